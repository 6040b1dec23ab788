//! Notification surface: user-facing toasts raised by the chat core.
//!
//! Notifications are fire-and-forget and carry generic text. The underlying
//! cause goes to `tracing` and is never displayed.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// How a notification should be styled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub description: String,
    pub severity: Severity,
}

impl Notification {
    pub fn new(severity: Severity, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            severity,
        }
    }

    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(Severity::Info, title, description)
    }

    pub fn warning(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(Severity::Warning, title, description)
    }

    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(Severity::Error, title, description)
    }
}

/// Somewhere notifications can be shown.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log. Useful for headless runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, n: Notification) {
        match n.severity {
            Severity::Info => info!(title = %n.title, "{}", n.description),
            Severity::Warning => warn!(title = %n.title, "{}", n.description),
            Severity::Error => error!(title = %n.title, "{}", n.description),
        }
    }
}

/// Forwards notifications to a UI task over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            tracing::debug!("Notification dropped: receiver closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_notifier_forwards_in_order() {
        let (notifier, mut rx) = ChannelNotifier::new();
        notifier.notify(Notification::error("Send failed", "Please try again."));
        notifier.notify(Notification::info("Stopped", "Response stopped."));

        assert_eq!(rx.try_recv().unwrap().severity, Severity::Error);
        assert_eq!(rx.try_recv().unwrap().title, "Stopped");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn channel_notifier_tolerates_closed_receiver() {
        let (notifier, rx) = ChannelNotifier::new();
        drop(rx);
        notifier.notify(Notification::warning("x", "y"));
    }
}
