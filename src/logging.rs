//! Log setup for the chatdeck binary.
//!
//! Logs go to stderr so that streamed replies on stdout stay clean.
//!
//! - `CHATDECK_LOG` or `RUST_LOG`: filter directive, e.g. `chatdeck=debug,warn`
//! - `CHATDECK_LOG_FORMAT`: `pretty`, `compact` or `json`

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const DEFAULT_FILTER: &str = "chatdeck=info,warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    Pretty,
    /// Single line per event
    #[default]
    Compact,
    /// One JSON object per event
    Json,
}

impl LogFormat {
    /// Case-insensitive; anything unrecognised is compact.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Self::Json,
            "pretty" => Self::Pretty,
            _ => Self::Compact,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub filter: String,
    pub format: LogFormat,
    /// Include file and line of each event
    pub with_file: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            format: LogFormat::default(),
            with_file: false,
        }
    }
}

impl LogConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let filter = var("CHATDECK_LOG")
            .or_else(|| var("RUST_LOG"))
            .filter(|f| !f.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string());
        let format = var("CHATDECK_LOG_FORMAT")
            .map(|f| LogFormat::parse(&f))
            .unwrap_or_default();
        Self {
            filter,
            format,
            with_file: false,
        }
    }

    /// `-v` on the command line.
    pub fn verbose(mut self) -> Self {
        self.filter = "chatdeck=debug,info".to_string();
        self.with_file = true;
        self
    }
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(config: LogConfig) {
    let filter = EnvFilter::try_new(&config.filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_file(config.with_file)
        .with_line_number(config.with_file);

    let registry = tracing_subscriber::registry().with(filter);
    let _ = match config.format {
        LogFormat::Json => registry.with(layer.json()).try_init(),
        LogFormat::Pretty => registry.with(layer.pretty()).try_init(),
        LogFormat::Compact => registry.with(layer.compact()).try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn format_parsing_is_lenient() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse(" pretty "), LogFormat::Pretty);
        assert_eq!(LogFormat::parse("fancy"), LogFormat::Compact);
    }

    #[test]
    fn own_variable_wins_over_rust_log() {
        let config = LogConfig::from_vars(vars(&[
            ("CHATDECK_LOG", "chatdeck=trace"),
            ("RUST_LOG", "debug"),
            ("CHATDECK_LOG_FORMAT", "json"),
        ]));
        assert_eq!(config.filter, "chatdeck=trace");
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn defaults_without_variables() {
        let config = LogConfig::from_vars(vars(&[("RUST_LOG", "  ")]));
        assert_eq!(config, LogConfig::default());
        assert!(LogConfig::default().verbose().with_file);
    }
}
