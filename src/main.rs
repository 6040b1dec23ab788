use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chatdeck::config::Config;
use chatdeck::logging::{self, LogConfig};
use chatdeck::notify::{ChannelNotifier, Notification, Severity};
use chatdeck::persistence::{FileKeyValueStore, PersistenceBridge};
use chatdeck::session::{ChatSession, DeleteOutcome, SendOutcome, SendRequest};
use chatdeck::threads::{StoreEvent, ThreadId, ThreadInfo};
use chatdeck::transport::HttpTransport;
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// ── CLI ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "chatdeck", version, about = "Chat with a hosted model from the terminal")]
struct Cli {
    /// Path to a config.toml file
    #[arg(short = 'c', long, value_name = "PATH", env = "CHATDECK_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// API root, e.g. https://chat.example.com/api/
    #[arg(long, value_name = "URL", env = "CHATDECK_API_URL", global = true)]
    api_url: Option<String>,

    /// Bearer token
    #[arg(long, value_name = "TOKEN", env = "CHATDECK_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// Namespace for remembered selections (user, admin, ...)
    #[arg(long, value_name = "ROLE", global = true)]
    user_type: Option<String>,

    /// Disable coloured output
    #[arg(long = "no-color", action = ArgAction::SetTrue, env = "NO_COLOR", global = true)]
    no_color: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List conversations
    Threads,
    /// Send a message and stream the reply (Ctrl-C stops the reply)
    Chat {
        /// Conversation to continue; a new one is started otherwise
        #[arg(short, long, value_name = "ID")]
        thread: Option<String>,
        /// Model to answer with
        #[arg(short, long)]
        model: Option<String>,
        /// Message text
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },
    /// Delete a conversation
    Delete {
        #[arg(value_name = "ID")]
        thread: String,
    },
    /// Store a token and start the next session on a fresh chat
    Login {
        #[arg(long, value_name = "TOKEN")]
        token: String,
    },
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(ref url) = self.api_url {
            config.api_url = url.clone();
        }
        if let Some(ref token) = self.token {
            config.api_token = Some(token.clone());
        }
        if let Some(ref user_type) = self.user_type {
            config.user_type = user_type.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.no_color {
        colored::control::set_override(false);
    }
    let log_config = LogConfig::from_env();
    logging::init(if cli.verbose { log_config.verbose() } else { log_config });

    let mut config = Config::load(cli.config.clone())?;
    cli.apply_overrides(&mut config);

    let (notifier, notifications) = ChannelNotifier::new();
    let printer = spawn_notification_printer(notifications);

    let transport = HttpTransport::new(&config.api_url, config.api_token.clone())
        .with_context(|| format!("invalid API URL {}", config.api_url))?
        .with_retry(config.retry.clone());
    let persistence = PersistenceBridge::new(
        Box::new(FileKeyValueStore::open(config.state_file())),
        config.user_type.clone(),
    );
    let session = ChatSession::new(
        Arc::new(transport),
        Arc::new(notifier),
        persistence,
        config.session_config(),
    );

    let result = match cli.command {
        Command::Threads => list_threads(&session).await,
        Command::Chat {
            thread,
            model,
            message,
        } => chat(&session, thread, model, message.join(" ")).await,
        Command::Delete { thread } => delete(&session, &thread).await,
        Command::Login { token } => login(&session, cli.config, token),
    };

    // Closes the notification channel so the printer drains and exits
    drop(session);
    let _ = printer.await;
    result
}

// ── Commands ────────────────────────────────────────────────────────────────

async fn list_threads(session: &ChatSession) -> Result<()> {
    let summary = session.load_threads().await?;
    if summary.failed {
        return Ok(());
    }
    if summary.thread_count == 0 {
        println!("{}", "No conversations yet.".dimmed());
        return Ok(());
    }
    let active = session.active_thread();
    for info in session.thread_infos() {
        print_thread(&info, active.as_ref() == Some(&info.id));
    }
    Ok(())
}

async fn chat(
    session: &ChatSession,
    thread: Option<String>,
    model: Option<String>,
    text: String,
) -> Result<()> {
    session.load_threads().await?;

    let mut request = SendRequest::new(text);
    if let Some(raw) = thread {
        let id = ThreadId::parse(&raw).context("empty thread id")?;
        session.select_thread(&id).await?;
        request = request.in_thread(id);
    }
    if let Some(model) = model {
        request = request.with_model(model);
    }

    let abort = session.abort_handle();
    let ctrl_c = tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            abort.abort();
        }
    });
    let sent = CancellationToken::new();
    let deltas = spawn_delta_printer(session.subscribe(), sent.clone());

    let outcome = session.send(request).await;
    ctrl_c.abort();
    sent.cancel();
    let _ = deltas.await;
    println!();

    match outcome? {
        SendOutcome::Completed { thread, .. } => {
            let title = session
                .thread(&thread)
                .map(|t| t.title)
                .unwrap_or_default();
            eprintln!("{} {} {}", "✓".green(), title.bold(), format!("({})", thread).dimmed());
        }
        SendOutcome::Stopped { thread, .. } => {
            eprintln!("{} {}", "■ stopped".yellow(), format!("({})", thread).dimmed());
        }
        SendOutcome::Failed { .. } | SendOutcome::Discarded { .. } => {}
    }
    Ok(())
}

async fn delete(session: &ChatSession, raw: &str) -> Result<()> {
    let id = ThreadId::parse(raw).context("empty thread id")?;
    session.load_threads().await?;
    match session.delete_thread(&id).await? {
        DeleteOutcome::Deleted | DeleteOutcome::RemovedLocally => {
            eprintln!("{} deleted {}", "✓".green(), id);
        }
        DeleteOutcome::Reconciled => {}
    }
    Ok(())
}

fn login(session: &ChatSession, config_path: Option<PathBuf>, token: String) -> Result<()> {
    Config::store_token(config_path, token)?;
    session.persistence().mark_just_logged_in();
    eprintln!("{} token saved", "✓".green());
    Ok(())
}

// ── Output ──────────────────────────────────────────────────────────────────

fn print_thread(info: &ThreadInfo, active: bool) {
    let marker = if active { "▸".cyan().to_string() } else { " ".to_string() };
    println!(
        "{} {:<48}  {}  {}",
        marker,
        info.title.bold(),
        info.updated_at.format("%Y-%m-%d %H:%M").to_string().dimmed(),
        info.id.to_string().dimmed(),
    );
}

/// Echo reply deltas until `sent` fires and the backlog is printed.
fn spawn_delta_printer(
    mut events: broadcast::Receiver<StoreEvent>,
    sent: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                event = events.recv() => event,
                _ = sent.cancelled() => break,
            };
            match event {
                Ok(StoreEvent::MessageDelta { delta, .. }) => {
                    let mut stdout = std::io::stdout().lock();
                    let _ = stdout.write_all(delta.as_bytes());
                    let _ = stdout.flush();
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Terminal fell behind the reply stream");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn spawn_notification_printer(mut rx: mpsc::UnboundedReceiver<Notification>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(n) = rx.recv().await {
            let title = match n.severity {
                Severity::Info => n.title.cyan(),
                Severity::Warning => n.title.yellow(),
                Severity::Error => n.title.red(),
            };
            eprintln!("{} {}", title.bold(), n.description.dimmed());
        }
    })
}
