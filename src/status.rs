//! Status publisher: lifecycle phase, streaming flag and the abort handle.
//!
//! State changes are published through a `tokio::sync::watch` channel at the
//! moment of each transition, so a presentation layer can disable its input
//! exactly while the session is busy.

use crate::error::ChatError;
use crate::threads::ThreadId;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Lifecycle phase of the send operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    CreatingConversation,
    StreamingAssistant,
    Finalizing,
    Error,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::CreatingConversation => "creating-conversation",
            Self::StreamingAssistant => "streaming-assistant",
            Self::Finalizing => "finalizing",
            Self::Error => "error",
        }
    }

    /// Collapsed view for consumers that don't need the detail.
    pub fn activity(self) -> Activity {
        match self {
            Self::Idle => Activity::Idle,
            Self::CreatingConversation | Self::StreamingAssistant | Self::Finalizing => {
                Activity::Busy
            }
            Self::Error => Activity::Error,
        }
    }

    /// Phases in which the abort handle does anything.
    pub fn is_cancellable(self) -> bool {
        matches!(self, Self::CreatingConversation | Self::StreamingAssistant)
    }
}

/// Coarse activity for input controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Idle,
    Busy,
    Error,
}

/// What the presentation layer sees.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusSnapshot {
    pub phase: Phase,
    /// Thread the current (or last) operation targets.
    pub thread: Option<ThreadId>,
}

impl StatusSnapshot {
    pub fn activity(&self) -> Activity {
        self.phase.activity()
    }

    /// True only while the assistant reply is streaming.
    pub fn is_streaming(&self) -> bool {
        self.phase == Phase::StreamingAssistant
    }

    pub fn is_busy(&self) -> bool {
        self.activity() == Activity::Busy
    }
}

type OperationSlot = Arc<Mutex<Option<CancellationToken>>>;

/// Publishes lifecycle transitions and owns the per-operation cancel token.
pub struct StatusPublisher {
    tx: watch::Sender<StatusSnapshot>,
    operation: OperationSlot,
}

impl StatusPublisher {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(StatusSnapshot::default());
        Self {
            tx,
            operation: Arc::new(Mutex::new(None)),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.tx.borrow().clone()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            status: self.tx.subscribe(),
            operation: self.operation.clone(),
        }
    }

    /// Claim the single operation slot. Fails with [`ChatError::Busy`] while
    /// another operation holds it.
    pub fn begin(&self) -> Result<CancellationToken, ChatError> {
        let mut slot = self.operation.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(ChatError::Busy);
        }
        let token = CancellationToken::new();
        *slot = Some(token.clone());
        Ok(token)
    }

    /// Publish a transition.
    pub fn transition(&self, phase: Phase, thread: Option<ThreadId>) {
        debug!(phase = phase.as_str(), thread = ?thread, "Status transition");
        self.tx.send_replace(StatusSnapshot { phase, thread });
    }

    /// Publish the terminal phase and release the operation slot. After this
    /// the abort handle is a no-op until the next `begin`.
    pub fn finish(&self, phase: Phase) {
        self.operation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let thread = self.tx.borrow().thread.clone();
        self.transition(phase, thread);
    }
}

impl Default for StatusPublisher {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable handle that stops the in-flight operation.
#[derive(Clone)]
pub struct AbortHandle {
    status: watch::Receiver<StatusSnapshot>,
    operation: OperationSlot,
}

impl AbortHandle {
    /// Request cancellation. Returns `true` if an operation in a cancellable
    /// phase was signalled; repeated or late calls return `false`.
    pub fn abort(&self) -> bool {
        if !self.status.borrow().phase.is_cancellable() {
            return false;
        }
        let slot = self.operation.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(token) if !token.is_cancelled() => {
                debug!("Abort requested");
                token.cancel();
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_collapse_to_activity() {
        assert_eq!(Phase::Idle.activity(), Activity::Idle);
        assert_eq!(Phase::CreatingConversation.activity(), Activity::Busy);
        assert_eq!(Phase::Finalizing.activity(), Activity::Busy);
        assert_eq!(Phase::Error.activity(), Activity::Error);
        assert!(!Phase::Finalizing.is_cancellable());
    }

    #[test]
    fn begin_rejects_second_operation_until_finished() {
        let status = StatusPublisher::new();
        let _token = status.begin().unwrap();
        assert!(matches!(status.begin(), Err(ChatError::Busy)));
        status.finish(Phase::Idle);
        assert!(status.begin().is_ok());
    }

    #[test]
    fn abort_only_fires_in_cancellable_phase_and_once() {
        let status = StatusPublisher::new();
        let handle = status.abort_handle();
        let token = status.begin().unwrap();

        // Still idle: nothing to stop yet
        assert!(!handle.abort());

        status.transition(Phase::StreamingAssistant, None);
        assert!(status.snapshot().is_streaming());
        assert!(handle.abort());
        assert!(token.is_cancelled());
        assert!(!handle.abort());

        status.finish(Phase::Idle);
        assert!(!handle.abort());
    }

    #[test]
    fn subscribers_see_every_transition() {
        let status = StatusPublisher::new();
        let rx = status.subscribe();
        let thread = ThreadId::server("c1");
        status.transition(Phase::CreatingConversation, Some(thread.clone()));
        assert_eq!(rx.borrow().phase, Phase::CreatingConversation);
        assert!(rx.borrow().is_busy());
        status.finish(Phase::Error);
        assert_eq!(rx.borrow().phase, Phase::Error);
        assert_eq!(rx.borrow().thread, Some(thread));
    }
}
