//! Thread model: conversation threads and their messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Title given to every thread until one is inferred or set by the user.
pub const DEFAULT_TITLE: &str = "New Chat";

/// Identifier of a thread.
///
/// A local id is assigned client-side and never reaches the server. Once a
/// conversation is created the local thread is swapped for one carrying the
/// server id; an id never changes variant in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "camelCase")]
pub enum ThreadId {
    Local(Uuid),
    Server(String),
}

impl ThreadId {
    /// Generate a fresh local id.
    pub fn new_local() -> Self {
        Self::Local(Uuid::new_v4())
    }

    pub fn server(id: impl Into<String>) -> Self {
        Self::Server(id.into())
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// The server conversation id, if this thread has one.
    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            Self::Server(id) => Some(id),
            Self::Local(_) => None,
        }
    }

    /// Parse the persisted form produced by `Display`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        match raw.strip_prefix("local:") {
            Some(rest) => Uuid::parse_str(rest).ok().map(Self::Local),
            None => Some(Self::Server(raw.to_string())),
        }
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(id) => write!(f, "local:{}", id),
            Self::Server(id) => f.write_str(id),
        }
    }
}

/// Identifier of a message, unique within its thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Content of a message and where it is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "text", rename_all = "camelCase")]
pub enum MessageBody {
    /// Placeholder shown while waiting for the first chunk.
    Skeleton,
    /// Content is still being appended.
    Streaming(String),
    /// Complete; no further changes.
    Final(String),
}

impl MessageBody {
    pub fn text(&self) -> &str {
        match self {
            Self::Skeleton => "",
            Self::Streaming(text) | Self::Final(text) => text,
        }
    }

    pub fn is_skeleton(&self) -> bool {
        matches!(self, Self::Skeleton)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming(_))
    }

    /// Skeleton or streaming.
    pub fn is_pending(&self) -> bool {
        !matches!(self, Self::Final(_))
    }
}

/// A single message in a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub body: MessageBody,
    pub created_at: DateTime<Utc>,
    /// Model that produced the reply, when known.
    pub model: Option<String>,
}

impl Message {
    /// A finalized user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::User,
            body: MessageBody::Final(text.into()),
            created_at: Utc::now(),
            model: None,
        }
    }

    /// An assistant placeholder awaiting its first chunk.
    pub fn skeleton(model: Option<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::Assistant,
            body: MessageBody::Skeleton,
            created_at: Utc::now(),
            model,
        }
    }

    pub fn text(&self) -> &str {
        self.body.text()
    }

    pub fn is_pending(&self) -> bool {
        self.body.is_pending()
    }
}

/// A conversation thread, local or server-backed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub title: String,
    /// Insertion order is chronological order.
    pub messages: Vec<Message>,
    pub updated_at: DateTime<Utc>,
    pub model: Option<String>,
    /// Whether the message history has been fetched. Local threads are
    /// always loaded; server threads are fetched lazily on selection.
    pub loaded: bool,
}

impl Thread {
    /// A fresh, empty local thread.
    pub fn new_local(model: Option<String>) -> Self {
        Self {
            id: ThreadId::new_local(),
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            updated_at: Utc::now(),
            model,
            loaded: true,
        }
    }

    /// A server-backed thread whose messages have not been fetched yet.
    pub fn from_server(
        id: impl Into<String>,
        title: Option<String>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        let title = title
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_TITLE.to_string());
        Self {
            id: ThreadId::server(id),
            title,
            messages: Vec::new(),
            updated_at,
            model: None,
            loaded: false,
        }
    }

    pub fn is_local(&self) -> bool {
        self.id.is_local()
    }

    /// Local and without any message.
    pub fn is_local_empty(&self) -> bool {
        self.is_local() && self.messages.is_empty()
    }

    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_TITLE
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn message_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| &m.id == id)
    }

    /// The skeleton/streaming assistant message, if any.
    pub fn pending_reply(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.is_pending())
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Lightweight summary for sidebar display.
    pub fn to_info(&self) -> ThreadInfo {
        ThreadInfo {
            id: self.id.clone(),
            title: self.title.clone(),
            message_count: self.messages.len(),
            updated_at: self.updated_at,
            is_local: self.is_local(),
        }
    }
}

/// Thread summary without its message history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub title: String,
    pub message_count: usize,
    pub updated_at: DateTime<Utc>,
    pub is_local: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_id_display_round_trips_through_parse() {
        let local = ThreadId::new_local();
        assert_eq!(ThreadId::parse(&local.to_string()), Some(local));

        let server = ThreadId::server("conv-42");
        assert_eq!(ThreadId::parse("conv-42"), Some(server));
        assert_eq!(ThreadId::parse("   "), None);
        assert_eq!(ThreadId::parse("local:not-a-uuid"), None);
    }

    #[test]
    fn body_flags_follow_variant() {
        assert!(MessageBody::Skeleton.is_skeleton());
        assert!(MessageBody::Skeleton.is_pending());
        assert!(MessageBody::Streaming("a".into()).is_streaming());
        assert!(!MessageBody::Final("a".into()).is_pending());
        assert_eq!(MessageBody::Skeleton.text(), "");
    }

    #[test]
    fn server_thread_defaults_blank_title() {
        let thread = Thread::from_server("c1", Some("  ".into()), Utc::now());
        assert_eq!(thread.title, DEFAULT_TITLE);
        assert!(!thread.loaded);
        assert!(!thread.is_local());

        let thread = Thread::from_server("c2", Some("Taxes".into()), Utc::now());
        assert_eq!(thread.title, "Taxes");
    }

    #[test]
    fn new_local_thread_is_empty_and_loaded() {
        let thread = Thread::new_local(Some("gpt-4o".into()));
        assert!(thread.is_local_empty());
        assert!(thread.loaded);
        assert!(thread.has_default_title());
        assert_eq!(thread.to_info().message_count, 0);
    }
}
