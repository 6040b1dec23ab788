//! REST + SSE transport.
//!
//! Endpoints, relative to the configured API root:
//!
//! | Operation | Request |
//! |---|---|
//! | list | `GET conversations?limit=N` |
//! | messages | `GET conversations/{id}/messages?limit=N` |
//! | create | `POST conversations` |
//! | send | `POST conversations/{id}/messages` → `text/event-stream` |
//! | delete | `DELETE conversations/{id}` |

use super::sse::{self, SseDecoder};
use super::{ChunkStream, ConversationSummary, CreatedConversation, RemoteMessage, StreamChunk, Transport};
use crate::error::TransportError;
use crate::retry::{self, RetryPolicy};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

/// Either a bare array or an object wrapping one.
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Bare(Vec<T>),
    Wrapped {
        #[serde(alias = "conversations", alias = "messages", alias = "items")]
        data: Vec<T>,
    },
}

impl<T> Listing<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::Bare(items) | Self::Wrapped { data: items } => items,
        }
    }
}

pub struct HttpTransport {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
    retry: RetryPolicy,
}

impl HttpTransport {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
            token,
            retry: RetryPolicy::reads_default(),
        })
    }

    /// Retry policy applied to listing and message fetches.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::Malformed(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn with_limit(mut url: Url, limit: usize) -> Url {
        url.query_pairs_mut().append_pair("limit", &limit.to_string());
        url
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.token {
            Some(ref token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let retry_after = retry::parse_retry_after(resp.headers());
        let body = resp.text().await.unwrap_or_default();
        Err(TransportError::Status {
            status: status.as_u16(),
            body,
            retry_after,
        })
    }

    /// GET with retries; decodes JSON.
    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, TransportError> {
        retry::retry_read(
            &self.retry,
            |_attempt| {
                let url = url.clone();
                async move {
                    let resp = self.authorize(self.http.get(url)).send().await?;
                    let resp = Self::check(resp).await?;
                    resp.json::<T>()
                        .await
                        .map_err(|e| TransportError::Malformed(e.to_string()))
                }
            },
            |info| {
                warn!(
                    attempt = info.attempt,
                    delay_ms = info.delay.as_millis() as u64,
                    cause = %info.cause,
                    "Retrying read"
                );
            },
        )
        .await
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self))]
    async fn list_conversations(
        &self,
        limit: usize,
    ) -> Result<Vec<ConversationSummary>, TransportError> {
        let url = Self::with_limit(self.endpoint(&["conversations"])?, limit);
        let listing: Listing<ConversationSummary> = self.get_json(url).await?;
        Ok(listing.into_vec())
    }

    #[instrument(skip(self))]
    async fn get_messages(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<RemoteMessage>, TransportError> {
        let url = Self::with_limit(
            self.endpoint(&["conversations", conversation_id, "messages"])?,
            limit,
        );
        let listing: Listing<RemoteMessage> = self.get_json(url).await?;
        Ok(listing.into_vec())
    }

    #[instrument(skip(self))]
    async fn create_conversation(&self) -> Result<CreatedConversation, TransportError> {
        let url = self.endpoint(&["conversations"])?;
        let resp = self.authorize(self.http.post(url).json(&json!({}))).send().await?;
        let resp = Self::check(resp).await?;
        let created: CreatedConversation = resp
            .json()
            .await
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        if created.id.trim().is_empty() {
            return Err(TransportError::Malformed("empty conversation id".into()));
        }
        Ok(created)
    }

    #[instrument(skip(self, text, cancel), fields(text_len = text.len()))]
    async fn send_message_streaming(
        &self,
        conversation_id: &str,
        text: &str,
        model: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, TransportError> {
        let url = self.endpoint(&["conversations", conversation_id, "messages"])?;
        let body = json!({
            "text": text,
            "model_name": model,
            "stream": true,
        });
        let request = self
            .authorize(self.http.post(url).json(&body))
            .header(reqwest::header::ACCEPT, "text/event-stream");

        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            resp = request.send() => resp?,
        };
        let resp = Self::check(resp).await?;

        let (tx, mut rx) = mpsc::channel::<Result<StreamChunk, TransportError>>(64);
        tokio::spawn(async move {
            let mut bytes = resp.bytes_stream();
            let mut decoder = SseDecoder::new();

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!("Stream reader cancelled");
                        return;
                    }
                    next = bytes.next() => next,
                };

                let (events, closed) = match next {
                    Some(Ok(chunk)) => (decoder.push(&chunk), false),
                    Some(Err(e)) => {
                        let _ = tx.send(Err(TransportError::Http(e))).await;
                        return;
                    }
                    // Connection closed; the receiver sees the end of the
                    // stream and decides whether it was complete.
                    None => (decoder.finish().into_iter().collect::<Vec<_>>(), true),
                };

                for event in &events {
                    let Some(item) = sse::interpret(event) else {
                        continue;
                    };
                    let terminal = !matches!(item, Ok(StreamChunk::Text(_)));
                    if tx.send(item).await.is_err() || terminal {
                        return;
                    }
                }
                if closed {
                    return;
                }
            }
        });

        let stream = futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx));
        Ok(stream.boxed())
    }

    #[instrument(skip(self))]
    async fn delete_conversation(&self, conversation_id: &str) -> Result<(), TransportError> {
        let url = self.endpoint(&["conversations", conversation_id])?;
        let resp = self.authorize(self.http.delete(url)).send().await?;
        Self::check(resp).await?;
        Ok(())
    }
}
