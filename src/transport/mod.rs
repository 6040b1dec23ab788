//! Transport adapter: the network side of the chat core.
//!
//! The session only talks to the server through the [`Transport`] trait.
//! [`HttpTransport`] is the REST + SSE implementation; tests substitute a
//! scripted one.

mod http;
pub mod sse;

pub use http::HttpTransport;

use crate::error::TransportError;
use crate::threads::{Message, MessageBody, MessageId, Role, Thread};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// One entry of the conversation listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    #[serde(alias = "conversation_id")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationSummary {
    /// Server-backed thread with its messages not yet fetched.
    pub fn into_thread(self) -> Thread {
        Thread::from_server(self.id, self.title, self.updated_at)
    }
}

/// Author of a stored message as the server reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    #[serde(alias = "bot", alias = "ai", alias = "model")]
    Assistant,
}

/// A stored message as returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMessage {
    pub id: String,
    pub sender: Sender,
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub model_name: Option<String>,
}

impl RemoteMessage {
    pub fn into_message(self) -> Message {
        Message {
            id: MessageId(self.id),
            role: match self.sender {
                Sender::User => Role::User,
                Sender::Assistant => Role::Assistant,
            },
            body: MessageBody::Final(self.text),
            created_at: self.created_at,
            model: self.model_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedConversation {
    #[serde(alias = "conversation_id")]
    pub id: String,
}

/// One item of an assistant reply stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    /// Text content delta
    Text(String),
    /// Explicit end-of-stream
    Done,
}

/// Reply stream. Ends after `Done` or an error; ending without either means
/// the connection dropped.
pub type ChunkStream = BoxStream<'static, Result<StreamChunk, TransportError>>;

/// Network operations consumed by the chat core.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Most recent conversations, at most `limit`.
    async fn list_conversations(
        &self,
        limit: usize,
    ) -> Result<Vec<ConversationSummary>, TransportError>;

    /// Stored messages of a conversation, oldest first.
    async fn get_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<RemoteMessage>, TransportError>;

    async fn create_conversation(&self) -> Result<CreatedConversation, TransportError>;

    /// Submit a user message and attach to the assistant's streamed reply.
    /// Once `cancel` fires the implementation should stop delivering chunks.
    async fn send_message_streaming(
        &self,
        conversation_id: &str,
        text: &str,
        model: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, TransportError>;

    async fn delete_conversation(&self, conversation_id: &str) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summaries_accept_missing_title_and_alias_id() {
        let json = r#"{"conversation_id":"c1","updated_at":"2024-05-01T10:00:00Z"}"#;
        let summary: ConversationSummary = serde_json::from_str(json).unwrap();
        assert_eq!(summary.id, "c1");
        assert_eq!(summary.title, None);

        let thread = summary.into_thread();
        assert!(!thread.loaded);
        assert!(thread.has_default_title());
    }

    #[test]
    fn remote_messages_map_assistant_equivalents() {
        let json = r#"{"id":"m1","sender":"bot","text":"hi","created_at":"2024-05-01T10:00:00Z","model_name":"llama3"}"#;
        let message = serde_json::from_str::<RemoteMessage>(json).unwrap().into_message();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.body, MessageBody::Final("hi".into()));
        assert_eq!(message.model.as_deref(), Some("llama3"));
    }
}
