//! Thread store: the ordered, in-memory collection of conversation threads.
//!
//! All mutations go through the store and emit a [`StoreEvent`]. There is no
//! I/O here. Operations addressed at a missing thread are silent no-ops that
//! return `false`, so a reply still streaming into a thread the user just
//! deleted simply goes nowhere.

use super::{Message, MessageBody, MessageId, Role, StoreEvent, Thread, ThreadId, ThreadInfo};
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Ordered thread collection, most recent first.
pub struct ThreadStore {
    threads: Vec<Thread>,
    events_tx: broadcast::Sender<StoreEvent>,
}

impl ThreadStore {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            threads: Vec::new(),
            events_tx,
        }
    }

    /// Subscribe to store events.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events_tx.subscribe()
    }

    // ── Reads ───────────────────────────────────────────────────────────────

    /// Snapshot of every thread in display order.
    pub fn list_threads(&self) -> Vec<Thread> {
        self.threads.clone()
    }

    /// Sidebar summaries in display order.
    pub fn list_info(&self) -> Vec<ThreadInfo> {
        self.threads.iter().map(Thread::to_info).collect()
    }

    pub fn get(&self, id: &ThreadId) -> Option<&Thread> {
        self.threads.iter().find(|t| &t.id == id)
    }

    pub fn contains(&self, id: &ThreadId) -> bool {
        self.position(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Number of messages currently streaming, across all threads.
    pub fn streaming_count(&self) -> usize {
        self.threads
            .iter()
            .flat_map(|t| t.messages.iter())
            .filter(|m| m.body.is_streaming())
            .count()
    }

    // ── Thread-level mutations ──────────────────────────────────────────────

    /// Insert or replace by id. Existing threads keep their position; new
    /// ones are prepended.
    pub fn upsert_thread(&mut self, thread: Thread) {
        let thread_id = thread.id.clone();
        match self.position(&thread_id) {
            Some(idx) => self.threads[idx] = thread,
            None => self.threads.insert(0, thread),
        }
        self.emit(StoreEvent::ThreadUpserted { thread_id });
    }

    /// Replace the whole collection, ordered by last update (newest first).
    /// Ties keep the order they were given in.
    pub fn replace_all(&mut self, mut threads: Vec<Thread>) {
        threads.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let thread_count = threads.len();
        self.threads = threads;
        self.emit(StoreEvent::Replaced { thread_count });
    }

    /// Return the empty local thread if there is one, otherwise create it.
    pub fn new_local_thread(&mut self, model: Option<String>) -> ThreadId {
        if let Some(existing) = self.threads.iter_mut().find(|t| t.is_local_empty()) {
            if model.is_some() {
                existing.model = model;
            }
            debug!(thread = %existing.id, "Reusing empty local thread");
            return existing.id.clone();
        }

        let thread = Thread::new_local(model);
        let id = thread.id.clone();
        self.upsert_thread(thread);
        id
    }

    /// Swap a local thread for a server-backed one at the same position,
    /// keeping its messages. Returns the new id, or `None` if the local
    /// thread no longer exists.
    pub fn promote(&mut self, local_id: &ThreadId, conversation_id: &str) -> Option<ThreadId> {
        let idx = self.position(local_id)?;
        let server_id = ThreadId::server(conversation_id);

        // A reload may already have brought the conversation in
        if let Some(dup) = self.position(&server_id) {
            if dup != idx {
                self.threads.remove(dup);
            }
        }
        let idx = self.position(local_id)?;

        let old = &mut self.threads[idx];
        let promoted = Thread {
            id: server_id.clone(),
            title: std::mem::take(&mut old.title),
            messages: std::mem::take(&mut old.messages),
            updated_at: old.updated_at,
            model: old.model.take(),
            loaded: true,
        };
        self.threads[idx] = promoted;

        self.emit(StoreEvent::ThreadPromoted {
            from: local_id.clone(),
            to: server_id.clone(),
        });
        Some(server_id)
    }

    pub fn remove_thread(&mut self, id: &ThreadId) -> Option<Thread> {
        let idx = self.position(id)?;
        let thread = self.threads.remove(idx);
        self.emit(StoreEvent::ThreadRemoved {
            thread_id: id.clone(),
        });
        Some(thread)
    }

    pub fn rename(&mut self, id: &ThreadId, title: impl Into<String>) -> bool {
        let title = title.into();
        let Some(thread) = self.get_mut(id) else {
            return false;
        };
        thread.title = title.clone();
        self.emit(StoreEvent::TitleChanged {
            thread_id: id.clone(),
            title,
        });
        true
    }

    /// Install a fetched message history.
    ///
    /// Local messages the fetched history already contains (a finished
    /// exchange sent before the thread was ever loaded) are dropped. The
    /// rest, such as a pending reply or a message appended while the fetch
    /// was in flight, are kept after the history in their original order.
    pub fn load_history(&mut self, id: &ThreadId, history: Vec<Message>) -> bool {
        let Some(thread) = self.get_mut(id) else {
            return false;
        };
        let local = std::mem::take(&mut thread.messages);
        let appended = unseen_messages(&history, local);
        thread.messages = history;
        thread.messages.extend(appended);
        thread.loaded = true;
        let message_count = thread.messages.len();
        self.emit(StoreEvent::MessagesLoaded {
            thread_id: id.clone(),
            message_count,
        });
        true
    }

    /// Refresh the last-updated time and move the thread to the front.
    pub fn touch(&mut self, id: &ThreadId) -> bool {
        let Some(idx) = self.position(id) else {
            return false;
        };
        let mut thread = self.threads.remove(idx);
        thread.updated_at = Utc::now();
        self.threads.insert(0, thread);
        self.emit(StoreEvent::ThreadUpserted {
            thread_id: id.clone(),
        });
        true
    }

    // ── Message-level mutations ─────────────────────────────────────────────

    /// Append a message. No-op when the thread is gone, or when the message
    /// is a pending reply and the thread already has one.
    pub fn append_message(&mut self, thread_id: &ThreadId, message: Message) -> bool {
        let Some(thread) = self.get_mut(thread_id) else {
            debug!(thread = %thread_id, "Append to missing thread ignored");
            return false;
        };
        if message.is_pending() && thread.pending_reply().is_some() {
            warn!(thread = %thread_id, "Thread already has a pending reply");
            return false;
        }
        let message_id = message.id.clone();
        thread.messages.push(message);
        self.emit(StoreEvent::MessageAppended {
            thread_id: thread_id.clone(),
            message_id,
        });
        true
    }

    /// Append `delta` to a pending message. The first delta turns a
    /// skeleton into a streaming message.
    pub fn mutate_streaming_message(
        &mut self,
        thread_id: &ThreadId,
        message_id: &MessageId,
        delta: &str,
    ) -> bool {
        let Some(message) = self
            .get_mut(thread_id)
            .and_then(|t| t.message_mut(message_id))
        else {
            return false;
        };

        match message.body {
            MessageBody::Skeleton => message.body = MessageBody::Streaming(delta.to_string()),
            MessageBody::Streaming(ref mut text) => text.push_str(delta),
            MessageBody::Final(_) => {
                warn!(thread = %thread_id, message = %message_id, "Delta for finalized message dropped");
                return false;
            }
        }

        self.emit(StoreEvent::MessageDelta {
            thread_id: thread_id.clone(),
            message_id: message_id.clone(),
            delta: delta.to_string(),
        });
        true
    }

    /// Mark a pending message as complete.
    pub fn finalize_message(&mut self, thread_id: &ThreadId, message_id: &MessageId) -> bool {
        let Some(message) = self
            .get_mut(thread_id)
            .and_then(|t| t.message_mut(message_id))
        else {
            return false;
        };

        let text = match std::mem::replace(&mut message.body, MessageBody::Skeleton) {
            MessageBody::Skeleton => String::new(),
            MessageBody::Streaming(text) | MessageBody::Final(text) => text,
        };
        message.body = MessageBody::Final(text);

        self.emit(StoreEvent::MessageFinalized {
            thread_id: thread_id.clone(),
            message_id: message_id.clone(),
        });
        true
    }

    /// Drop an assistant reply that never received any content. Messages
    /// with content, finalized messages and user messages are never removed
    /// this way.
    pub fn discard_pending_message(&mut self, thread_id: &ThreadId, message_id: &MessageId) -> bool {
        let Some(thread) = self.get_mut(thread_id) else {
            return false;
        };
        let Some(idx) = thread.messages.iter().position(|m| {
            &m.id == message_id && m.role == Role::Assistant && m.is_pending() && m.text().is_empty()
        }) else {
            return false;
        };
        thread.messages.remove(idx);
        self.emit(StoreEvent::MessageDiscarded {
            thread_id: thread_id.clone(),
            message_id: message_id.clone(),
        });
        true
    }

    // ── Internal ────────────────────────────────────────────────────────────

    fn position(&self, id: &ThreadId) -> Option<usize> {
        self.threads.iter().position(|t| &t.id == id)
    }

    fn get_mut(&mut self, id: &ThreadId) -> Option<&mut Thread> {
        self.threads.iter_mut().find(|t| &t.id == id)
    }

    fn emit(&self, event: StoreEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.events_tx.send(event);
    }
}

/// Local messages not covered by `history`.
///
/// Finalized local messages are matched in order against the history by id,
/// or by role and text since locally created ids never match server ids.
/// Matching stops at the first message the history lacks; everything from
/// there on is kept.
fn unseen_messages(history: &[Message], local: Vec<Message>) -> Vec<Message> {
    let mut cursor = 0;
    let mut matching = true;
    local
        .into_iter()
        .filter(|m| {
            if !matching || m.is_pending() {
                return true;
            }
            let found = history[cursor..]
                .iter()
                .position(|h| h.id == m.id || (h.role == m.role && h.text() == m.text()));
            match found {
                Some(offset) => {
                    cursor += offset + 1;
                    false
                }
                None => {
                    matching = false;
                    true
                }
            }
        })
        .collect()
}

impl Default for ThreadStore {
    fn default() -> Self {
        Self::new()
    }
}
