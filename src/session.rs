//! Chat session: drives the send/receive lifecycle of a message.
//!
//! A send walks `idle → creating-conversation → streaming-assistant →
//! finalizing → idle`, skipping the creation step when the thread already
//! has a server conversation. Any failure lands in `error` with the thread
//! left consistent: the user's message is kept, an assistant reply with
//! content is finalized as-is, an empty one is dropped.
//!
//! Only one send runs at a time. The thread store sits behind a mutex that
//! is never held across an `.await`, so every store mutation is atomic with
//! respect to readers.

use crate::error::{ChatError, Result, TransportError};
use crate::notify::{Notification, Notifier};
use crate::persistence::PersistenceBridge;
use crate::status::{AbortHandle, Phase, StatusPublisher, StatusSnapshot};
use crate::threads::{
    title, Message, MessageId, Role, StoreEvent, Thread, ThreadId, ThreadInfo, ThreadStore,
    DEFAULT_TITLE,
};
use crate::transport::{ChunkStream, StreamChunk, Transport};
use futures_util::StreamExt;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Tunables for a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub conversation_limit: usize,
    pub message_limit: usize,
    pub default_model: Option<String>,
    /// Per-chunk idle limit while streaming; `None` waits forever.
    pub stream_idle_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            conversation_limit: 50,
            message_limit: 100,
            default_model: None,
            stream_idle_timeout: None,
        }
    }
}

/// A message the user wants to send.
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    /// Target thread; `None` starts (or reuses) an empty local thread.
    pub thread: Option<ThreadId>,
    pub text: String,
    /// Overrides the thread's and the session's model.
    pub model: Option<String>,
}

impl SendRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn in_thread(mut self, thread: ThreadId) -> Self {
        self.thread = Some(thread);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Where a failed send gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    CreateConversation,
    Stream,
}

/// How an accepted send ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Reply fully received and finalized.
    Completed { thread: ThreadId, reply: MessageId },
    /// Stopped by the user; any partial reply was kept.
    Stopped {
        thread: ThreadId,
        reply: Option<MessageId>,
    },
    /// Transport failure; the user was notified.
    Failed { thread: ThreadId, stage: FailureStage },
    /// The thread disappeared (deleted or reloaded away) mid-flight.
    Discarded { thread: ThreadId },
}

impl SendOutcome {
    pub fn thread(&self) -> &ThreadId {
        match self {
            Self::Completed { thread, .. }
            | Self::Stopped { thread, .. }
            | Self::Failed { thread, .. }
            | Self::Discarded { thread } => thread,
        }
    }
}

/// Result of a delete request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Local thread, removed without a network call.
    RemovedLocally,
    /// Server confirmed the delete.
    Deleted,
    /// Server refused; the list was reloaded from the server.
    Reconciled,
}

enum StreamEnd {
    Completed,
    Cancelled,
    /// The reply's thread vanished from the store.
    Orphaned,
}

/// Owns the threads of one chat surface and every send against them.
pub struct ChatSession {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) persistence: PersistenceBridge,
    pub(crate) config: SessionConfig,
    store: Mutex<ThreadStore>,
    status: StatusPublisher,
    active: Mutex<Option<ThreadId>>,
    /// Last reload ticket handed out.
    pub(crate) reloads_issued: AtomicU64,
    /// Newest reload ticket whose result reached the store.
    pub(crate) reloads_applied: AtomicU64,
}

impl ChatSession {
    pub fn new(
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn Notifier>,
        persistence: PersistenceBridge,
        config: SessionConfig,
    ) -> Self {
        Self {
            transport,
            notifier,
            persistence,
            config,
            store: Mutex::new(ThreadStore::new()),
            status: StatusPublisher::new(),
            active: Mutex::new(None),
            reloads_issued: AtomicU64::new(0),
            reloads_applied: AtomicU64::new(0),
        }
    }

    // ── Reads ───────────────────────────────────────────────────────────────

    /// Snapshot of every thread, most recent first.
    pub fn threads(&self) -> Vec<Thread> {
        self.with_store(|s| s.list_threads())
    }

    pub fn thread_infos(&self) -> Vec<ThreadInfo> {
        self.with_store(|s| s.list_info())
    }

    pub fn thread(&self, id: &ThreadId) -> Option<Thread> {
        self.with_store(|s| s.get(id).cloned())
    }

    pub fn active_thread(&self) -> Option<ThreadId> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.with_store(|s| s.subscribe())
    }

    pub fn status(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.subscribe()
    }

    pub fn status_snapshot(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.status.abort_handle()
    }

    pub fn persistence(&self) -> &PersistenceBridge {
        &self.persistence
    }

    /// Stop the in-flight reply. See [`AbortHandle::abort`].
    pub fn abort(&self) -> bool {
        self.status.abort_handle().abort()
    }

    // ── Thread management ───────────────────────────────────────────────────

    /// Start a new chat, reusing the empty local thread if there is one.
    pub fn new_thread(&self, model: Option<String>) -> ThreadId {
        let id = self.with_store(|s| s.new_local_thread(model));
        self.set_active(Some(id.clone()));
        id
    }

    /// Make `id` the active thread, fetching its history on first use.
    /// A failed fetch is logged and leaves the history empty.
    #[instrument(skip(self), fields(thread = %id))]
    pub async fn select_thread(&self, id: &ThreadId) -> Result<()> {
        let needs_history = self
            .with_store(|s| s.get(id).map(|t| !t.loaded))
            .ok_or_else(|| ChatError::ThreadNotFound(id.clone()))?;

        self.set_active(Some(id.clone()));

        let Some(conversation_id) = id.conversation_id().filter(|_| needs_history) else {
            return Ok(());
        };

        match self
            .transport
            .get_messages(conversation_id, self.config.message_limit)
            .await
        {
            Ok(remote) => {
                let history: Vec<Message> = remote.into_iter().map(|m| m.into_message()).collect();
                debug!(count = history.len(), "Fetched history");
                self.with_store(|s| s.load_history(id, history));
            }
            Err(e) => warn!(error = %e, "Could not fetch messages"),
        }
        Ok(())
    }

    /// Rename a thread. A blank title restores the default.
    pub fn rename_thread(&self, id: &ThreadId, title: &str) -> Result<()> {
        let title = match title.trim() {
            "" => DEFAULT_TITLE,
            t => t,
        };
        if self.with_store(|s| s.rename(id, title)) {
            Ok(())
        } else {
            Err(ChatError::ThreadNotFound(id.clone()))
        }
    }

    /// Delete a thread. Removal is immediate; for server threads a refused
    /// delete triggers a full reload instead of a local rollback.
    #[instrument(skip(self), fields(thread = %id))]
    pub async fn delete_thread(&self, id: &ThreadId) -> Result<DeleteOutcome> {
        if self.with_store(|s| s.remove_thread(id)).is_none() {
            return Err(ChatError::ThreadNotFound(id.clone()));
        }
        if self.active_thread().as_ref() == Some(id) {
            self.set_active(None);
        }

        let Some(conversation_id) = id.conversation_id() else {
            return Ok(DeleteOutcome::RemovedLocally);
        };

        match self.transport.delete_conversation(conversation_id).await {
            Ok(()) => {
                info!("Conversation deleted");
                Ok(DeleteOutcome::Deleted)
            }
            Err(e) => {
                warn!(error = %e, "Delete failed; reloading from server");
                self.notifier.notify(Notification::error(
                    "Couldn't delete chat",
                    "The chat list has been refreshed from the server.",
                ));
                if let Err(e) = self.reload().await {
                    warn!(error = %e, "Reconciliation reload failed");
                }
                Ok(DeleteOutcome::Reconciled)
            }
        }
    }

    // ── Sending ─────────────────────────────────────────────────────────────

    /// Send a user message and stream the assistant's reply into the thread.
    ///
    /// Returns `Err` only when the request is refused up front (another send
    /// is active, blank text, unknown thread). Once accepted, every failure
    /// is reported through the notifier and the returned [`SendOutcome`].
    #[instrument(skip(self, request), fields(thread = ?request.thread))]
    pub async fn send(&self, request: SendRequest) -> Result<SendOutcome> {
        let text = request.text.trim().to_string();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if let Some(ref id) = request.thread {
            if !self.with_store(|s| s.contains(id)) {
                return Err(ChatError::ThreadNotFound(id.clone()));
            }
        }

        let cancel = self.status.begin()?;
        let mut op = InFlight::new(self, cancel.clone());

        let mut thread_id = match request.thread {
            Some(id) => id,
            None => self.with_store(|s| s.new_local_thread(None)),
        };
        let model = request
            .model
            .or_else(|| self.with_store(|s| s.get(&thread_id).and_then(|t| t.model.clone())))
            .or_else(|| self.config.default_model.clone());
        self.set_active(Some(thread_id.clone()));

        // Optimistic: the user sees their message before anything is sent
        self.with_store(|s| append_user_message_once(s, &thread_id, &text));

        if thread_id.is_local() {
            self.status
                .transition(Phase::CreatingConversation, Some(thread_id.clone()));

            let created = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                created = self.transport.create_conversation() => Some(created),
            };
            let conversation = match created {
                None => return Ok(op.stopped(thread_id, None)),
                Some(Err(e)) => {
                    return Ok(op.failed(thread_id, FailureStage::CreateConversation, &e));
                }
                Some(Ok(conversation)) => conversation,
            };

            let Some(server_id) = self.with_store(|s| s.promote(&thread_id, &conversation.id))
            else {
                return Ok(op.discarded(thread_id));
            };
            info!(conversation = %conversation.id, "Conversation created");
            self.replace_active(&thread_id, &server_id);
            thread_id = server_id;
        }

        let skeleton = Message::skeleton(model.clone());
        let reply_id = skeleton.id.clone();
        if !self.with_store(|s| s.append_message(&thread_id, skeleton)) {
            return Ok(op.discarded(thread_id));
        }
        op.track_reply(thread_id.clone(), reply_id.clone());
        self.status
            .transition(Phase::StreamingAssistant, Some(thread_id.clone()));

        let conversation_id = thread_id.conversation_id().unwrap_or_default().to_string();
        let end = self
            .stream_reply(&thread_id, &reply_id, &conversation_id, &text, model.as_deref(), &cancel)
            .await;

        match end {
            Ok(StreamEnd::Completed) => {
                self.status
                    .transition(Phase::Finalizing, Some(thread_id.clone()));
                self.with_store(|s| {
                    s.finalize_message(&thread_id, &reply_id);
                    s.touch(&thread_id);
                    infer_title(s, &thread_id);
                });
                Ok(op.completed(thread_id, reply_id))
            }
            Ok(StreamEnd::Cancelled) => Ok(op.stopped(thread_id, Some(reply_id))),
            Ok(StreamEnd::Orphaned) => Ok(op.discarded(thread_id)),
            Err(e) => Ok(op.failed(thread_id, FailureStage::Stream, &e)),
        }
    }

    /// Apply chunks until end-of-stream, failure or cancellation.
    async fn stream_reply(
        &self,
        thread_id: &ThreadId,
        reply_id: &MessageId,
        conversation_id: &str,
        text: &str,
        model: Option<&str>,
        cancel: &CancellationToken,
    ) -> std::result::Result<StreamEnd, TransportError> {
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
            opened = self.transport.send_message_streaming(conversation_id, text, model, cancel.clone()) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(TransportError::Cancelled) => return Ok(StreamEnd::Cancelled),
            Err(e) => return Err(e),
        };

        let mut received_text = false;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
                next = self.next_chunk(&mut stream) => next,
            };
            let next = match next {
                Ok(next) => next,
                Err(TransportError::Cancelled) => return Ok(StreamEnd::Cancelled),
                Err(e) => return Err(e),
            };
            // Nothing delivered after an abort may reach the store
            if cancel.is_cancelled() {
                return Ok(StreamEnd::Cancelled);
            }

            match next {
                Some(StreamChunk::Text(delta)) => {
                    if delta.is_empty() {
                        continue;
                    }
                    if !self.with_store(|s| s.mutate_streaming_message(thread_id, reply_id, &delta)) {
                        return Ok(StreamEnd::Orphaned);
                    }
                    received_text = true;
                }
                Some(StreamChunk::Done) if received_text => return Ok(StreamEnd::Completed),
                Some(StreamChunk::Done) => {
                    return Err(TransportError::Malformed("empty reply".into()));
                }
                None => return Err(TransportError::Truncated),
            }
        }
    }

    async fn next_chunk(
        &self,
        stream: &mut ChunkStream,
    ) -> std::result::Result<Option<StreamChunk>, TransportError> {
        match self.config.stream_idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, stream.next()).await {
                Ok(item) => item.transpose(),
                Err(_) => Err(TransportError::IdleTimeout(limit.as_secs())),
            },
            None => stream.next().await.transpose(),
        }
    }

    // ── Internal ────────────────────────────────────────────────────────────

    /// Run `f` with the store locked. Never call across an `.await`.
    pub(crate) fn with_store<R>(&self, f: impl FnOnce(&mut ThreadStore) -> R) -> R {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut store)
    }

    pub(crate) fn set_active(&self, id: Option<ThreadId>) {
        match &id {
            // Local ids can't be restored after a restart
            Some(thread) if thread.is_local() => {}
            Some(thread) => self.persistence.remember_active_thread(thread),
            None => self.persistence.forget_active_thread(),
        }
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = id;
    }

    /// Follow a local → server promotion if the local thread was active.
    fn replace_active(&self, from: &ThreadId, to: &ThreadId) {
        if self.active_thread().as_ref() == Some(from) {
            self.set_active(Some(to.clone()));
        }
    }

    /// Drop an empty pending reply or finalize a partial one.
    fn settle_reply(&self, thread_id: &ThreadId, reply_id: &MessageId) {
        self.with_store(|s| {
            if !s.discard_pending_message(thread_id, reply_id) {
                s.finalize_message(thread_id, reply_id);
            }
        });
    }
}

/// Append the user's message unless it is already the last message of the
/// thread with no reply after it, which is what a failed send leaves behind.
fn append_user_message_once(store: &mut ThreadStore, thread_id: &ThreadId, text: &str) {
    let already_there = store
        .get(thread_id)
        .and_then(|t| t.last_message())
        .is_some_and(|m| m.role == Role::User && m.text() == text);
    if already_there {
        debug!(thread = %thread_id, "Resending unanswered message");
        return;
    }
    store.append_message(thread_id, Message::user(text));
}

fn infer_title(store: &mut ThreadStore, thread_id: &ThreadId) {
    let inferred = store
        .get(thread_id)
        .filter(|t| t.has_default_title())
        .and_then(|t| t.messages.iter().find(|m| m.role == Role::User))
        .and_then(|m| title::infer_title(m.text()));
    if let Some(title) = inferred {
        store.rename(thread_id, title);
    }
}

/// Bookkeeping for the send in progress. Each exit path consumes it; if the
/// send future is dropped instead, `Drop` still settles the reply and frees
/// the operation slot.
struct InFlight<'a> {
    session: &'a ChatSession,
    cancel: CancellationToken,
    reply: Option<(ThreadId, MessageId)>,
    finished: bool,
}

impl<'a> InFlight<'a> {
    fn new(session: &'a ChatSession, cancel: CancellationToken) -> Self {
        Self {
            session,
            cancel,
            reply: None,
            finished: false,
        }
    }

    fn track_reply(&mut self, thread_id: ThreadId, reply_id: MessageId) {
        self.reply = Some((thread_id, reply_id));
    }

    fn completed(mut self, thread: ThreadId, reply: MessageId) -> SendOutcome {
        info!(thread = %thread, "Reply completed");
        self.reply = None;
        self.finish(Phase::Idle);
        SendOutcome::Completed { thread, reply }
    }

    fn stopped(mut self, thread: ThreadId, reply: Option<MessageId>) -> SendOutcome {
        info!(thread = %thread, "Reply stopped by user");
        self.settle();
        // Only a reply that kept some content survives a stop
        let reply = reply.filter(|id| {
            self.session
                .with_store(|s| s.get(&thread).and_then(|t| t.message(id)).is_some())
        });
        self.session.notifier.notify(Notification::info(
            "Response stopped",
            "You can send a new message.",
        ));
        self.finish(Phase::Idle);
        SendOutcome::Stopped { thread, reply }
    }

    fn failed(mut self, thread: ThreadId, stage: FailureStage, cause: &TransportError) -> SendOutcome {
        error!(thread = %thread, ?stage, error = %cause, "Send failed");
        self.settle();
        let notification = match stage {
            FailureStage::CreateConversation => Notification::error(
                "Couldn't start the conversation",
                "Your message was kept. Please try sending it again.",
            ),
            FailureStage::Stream => Notification::error(
                "Response interrupted",
                "Something went wrong while receiving the reply. Please try again.",
            ),
        };
        self.session.notifier.notify(notification);
        self.finish(Phase::Error);
        SendOutcome::Failed { thread, stage }
    }

    fn discarded(mut self, thread: ThreadId) -> SendOutcome {
        warn!(thread = %thread, "Thread vanished during send");
        self.settle();
        self.finish(Phase::Idle);
        SendOutcome::Discarded { thread }
    }

    fn settle(&mut self) {
        if let Some((thread_id, reply_id)) = self.reply.take() {
            self.session.settle_reply(&thread_id, &reply_id);
        }
    }

    fn finish(&mut self, phase: Phase) {
        self.finished = true;
        // Tear down whatever the transport still has running
        self.cancel.cancel();
        self.session.status.finish(phase);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        debug!("Send dropped before completion");
        self.settle();
        self.finish(Phase::Idle);
    }
}
