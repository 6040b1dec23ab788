//! Store events: emitted whenever the thread store changes.

use super::{MessageId, ThreadId};

/// Events emitted by the [`ThreadStore`](super::ThreadStore).
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// The whole thread list was replaced (initial load or reconciliation)
    Replaced { thread_count: usize },

    /// A thread was inserted or replaced
    ThreadUpserted { thread_id: ThreadId },

    /// A local thread was swapped for its server-backed counterpart
    ThreadPromoted { from: ThreadId, to: ThreadId },

    /// A thread was removed
    ThreadRemoved { thread_id: ThreadId },

    /// A thread's title changed
    TitleChanged { thread_id: ThreadId, title: String },

    /// A thread's message history was fetched
    MessagesLoaded { thread_id: ThreadId, message_count: usize },

    /// Message appended to a thread
    MessageAppended {
        thread_id: ThreadId,
        message_id: MessageId,
    },

    /// Text appended to a streaming message
    MessageDelta {
        thread_id: ThreadId,
        message_id: MessageId,
        delta: String,
    },

    /// A streaming message was finalized
    MessageFinalized {
        thread_id: ThreadId,
        message_id: MessageId,
    },

    /// An empty pending reply was dropped
    MessageDiscarded {
        thread_id: ThreadId,
        message_id: MessageId,
    },
}

impl StoreEvent {
    /// The thread this event relates to, if it concerns a single thread.
    pub fn thread_id(&self) -> Option<&ThreadId> {
        match self {
            Self::Replaced { .. } => None,
            Self::ThreadPromoted { to, .. } => Some(to),
            Self::ThreadUpserted { thread_id }
            | Self::ThreadRemoved { thread_id }
            | Self::TitleChanged { thread_id, .. }
            | Self::MessagesLoaded { thread_id, .. }
            | Self::MessageAppended { thread_id, .. }
            | Self::MessageDelta { thread_id, .. }
            | Self::MessageFinalized { thread_id, .. }
            | Self::MessageDiscarded { thread_id, .. } => Some(thread_id),
        }
    }

    /// Should this event trigger a sidebar update?
    pub fn triggers_sidebar_update(&self) -> bool {
        // Message-level churn only affects the open conversation
        !matches!(
            self,
            Self::MessageDelta { .. } | Self::MessageAppended { .. } | Self::MessageFinalized { .. }
        )
    }
}
