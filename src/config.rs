use crate::retry::RetryPolicy;
use crate::session::SessionConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding config.toml and the state file
    pub settings_dir: PathBuf,
    /// Root of the platform's chat API
    pub api_url: String,
    /// Bearer token sent with every request
    pub api_token: Option<String>,
    /// User role; namespaces the remembered thread selection
    pub user_type: String,
    /// Model used when neither the request nor the thread names one
    pub default_model: Option<String>,
    /// How many conversations to list
    pub conversation_limit: usize,
    /// How many messages to fetch when opening a conversation
    pub message_limit: usize,
    /// Give up on a reply when no chunk arrives for this long
    pub stream_idle_timeout_secs: Option<u64>,
    /// Key-value state file (defaults to `<settings_dir>/state.json`)
    pub state_path: Option<PathBuf>,
    /// Backoff for listing and message fetches
    pub retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            settings_dir: home_dir.join(".chatdeck"),
            api_url: "http://127.0.0.1:8080/api/".to_string(),
            api_token: None,
            user_type: "user".to_string(),
            default_model: None,
            conversation_limit: 50,
            message_limit: 100,
            stream_idle_timeout_secs: Some(120),
            state_path: None,
            retry: RetryPolicy::reads_default(),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => Self::default().settings_dir.join("config.toml"),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("reading {}", config_path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("parsing {}", config_path.display()))?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: Option<PathBuf>) -> Result<()> {
        let config_path = match path {
            Some(p) => p,
            None => self.settings_dir.join("config.toml"),
        };

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    /// Write `token` into the config file. Every other field is kept as it
    /// is on disk, so command-line overrides never end up saved.
    pub fn store_token(path: Option<PathBuf>, token: impl Into<String>) -> Result<()> {
        let mut on_disk = Self::load(path.clone())?;
        on_disk.api_token = Some(token.into());
        on_disk.save(path)
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_path
            .clone()
            .unwrap_or_else(|| self.settings_dir.join("state.json"))
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            conversation_limit: self.conversation_limit.max(1),
            message_limit: self.message_limit.max(1),
            default_model: self.default_model.clone(),
            stream_idle_timeout: self
                .stream_idle_timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(Some(dir.path().join("nope.toml"))).unwrap();
        assert_eq!(config.conversation_limit, 50);
        assert_eq!(config.user_type, "user");
    }

    #[test]
    fn partial_file_overrides_only_given_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "api_url = \"https://chat.example.com/api/\"\nuser_type = \"admin\"\nstream_idle_timeout_secs = 0\n\n[retry]\nmax_attempts = 1\n",
        )
        .unwrap();

        let config = Config::load(Some(path)).unwrap();
        assert_eq!(config.api_url, "https://chat.example.com/api/");
        assert_eq!(config.user_type, "admin");
        assert_eq!(config.message_limit, 100);
        assert_eq!(config.retry.max_attempts, 1);
        assert_eq!(config.session_config().stream_idle_timeout, None);
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.toml");
        let config = Config {
            default_model: Some("llama3".into()),
            ..Config::default()
        };
        config.save(Some(path.clone())).unwrap();
        assert_eq!(Config::load(Some(path)).unwrap(), config);
    }

    #[test]
    fn store_token_keeps_saved_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "api_url = \"https://saved.example.com/\"\n").unwrap();

        Config::store_token(Some(path.clone()), "tok-1").unwrap();

        let config = Config::load(Some(path)).unwrap();
        assert_eq!(config.api_url, "https://saved.example.com/");
        assert_eq!(config.api_token.as_deref(), Some("tok-1"));
        assert_eq!(config.user_type, "user");
    }

    #[test]
    fn state_file_defaults_under_settings_dir() {
        let config = Config {
            settings_dir: PathBuf::from("/tmp/cd"),
            ..Config::default()
        };
        assert_eq!(config.state_file(), PathBuf::from("/tmp/cd/state.json"));
    }
}
