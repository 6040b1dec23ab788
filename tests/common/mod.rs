//! Scripted transport and session fixtures shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chatdeck::error::TransportError;
use chatdeck::notify::{ChannelNotifier, Notification};
use chatdeck::persistence::{MemoryKeyValueStore, PersistenceBridge};
use chatdeck::session::{ChatSession, SessionConfig};
use chatdeck::transport::{
    ChunkStream, ConversationSummary, CreatedConversation, RemoteMessage, Sender, StreamChunk,
    Transport,
};
use chrono::{Duration as ChronoDuration, Utc};
use futures_util::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;

/// One step of a scripted reply stream.
pub enum Step {
    Text(&'static str),
    Done,
    Fail(TransportError),
    /// Pause until the gate is notified.
    Wait(Arc<Notify>),
    /// Stay open until cancelled.
    Hang,
    /// From here on, keep delivering whether or not the send was cancelled.
    IgnoreCancel,
}

pub enum Create {
    Ok(&'static str),
    Fail(TransportError),
    Hang,
}

pub enum List {
    Ok(Vec<ConversationSummary>),
    Fail(TransportError),
    /// Answer with the listing once the gate is notified.
    Gated(Arc<Notify>, Vec<ConversationSummary>),
}

#[derive(Default)]
pub struct ScriptedTransport {
    lists: Mutex<VecDeque<List>>,
    creates: Mutex<VecDeque<Create>>,
    streams: Mutex<VecDeque<Vec<Step>>>,
    deletes: Mutex<VecDeque<Result<(), TransportError>>>,
    messages: Mutex<HashMap<String, Vec<RemoteMessage>>>,
    message_failures: Mutex<VecDeque<TransportError>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_list(&self, list: List) -> &Self {
        self.lists.lock().unwrap().push_back(list);
        self
    }

    pub fn push_create(&self, create: Create) -> &Self {
        self.creates.lock().unwrap().push_back(create);
        self
    }

    pub fn push_stream(&self, steps: Vec<Step>) -> &Self {
        self.streams.lock().unwrap().push_back(steps);
        self
    }

    pub fn push_delete(&self, result: Result<(), TransportError>) -> &Self {
        self.deletes.lock().unwrap().push_back(result);
        self
    }

    pub fn set_messages(&self, conversation_id: &str, messages: Vec<RemoteMessage>) -> &Self {
        self.messages
            .lock()
            .unwrap()
            .insert(conversation_id.to_string(), messages);
        self
    }

    /// Fail the next history fetch with `error`.
    pub fn fail_messages(&self, error: TransportError) -> &Self {
        self.message_failures.lock().unwrap().push_back(error);
        self
    }

    /// Every call made so far, e.g. `list`, `create`, `send:c1`, `delete:c1`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn list_conversations(
        &self,
        _limit: usize,
    ) -> Result<Vec<ConversationSummary>, TransportError> {
        self.record("list".into());
        let next = self.lists.lock().unwrap().pop_front();
        match next {
            None => Ok(Vec::new()),
            Some(List::Ok(items)) => Ok(items),
            Some(List::Fail(e)) => Err(e),
            Some(List::Gated(gate, items)) => {
                gate.notified().await;
                Ok(items)
            }
        }
    }

    async fn get_messages(
        &self,
        conversation_id: &str,
        _limit: usize,
    ) -> Result<Vec<RemoteMessage>, TransportError> {
        self.record(format!("messages:{}", conversation_id));
        if let Some(e) = self.message_failures.lock().unwrap().pop_front() {
            return Err(e);
        }
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn create_conversation(&self) -> Result<CreatedConversation, TransportError> {
        self.record("create".into());
        let next = self.creates.lock().unwrap().pop_front();
        match next {
            None => Ok(CreatedConversation {
                id: format!("conv-{}", self.count_calls("create")),
            }),
            Some(Create::Ok(id)) => Ok(CreatedConversation { id: id.into() }),
            Some(Create::Fail(e)) => Err(e),
            Some(Create::Hang) => std::future::pending().await,
        }
    }

    async fn send_message_streaming(
        &self,
        conversation_id: &str,
        text: &str,
        _model: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, TransportError> {
        self.record(format!("send:{}:{}", conversation_id, text));
        let steps = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![Step::Text("ok"), Step::Done]);

        let (tx, mut rx) = mpsc::channel(16);
        tokio::spawn(async move {
            let mut deaf = false;
            for step in steps {
                let item = match step {
                    Step::Text(text) => Ok(StreamChunk::Text(text.to_string())),
                    Step::Done => Ok(StreamChunk::Done),
                    Step::Fail(e) => Err(e),
                    Step::Wait(gate) if deaf => {
                        gate.notified().await;
                        continue;
                    }
                    Step::Wait(gate) => {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = gate.notified() => continue,
                        }
                    }
                    Step::Hang => {
                        cancel.cancelled().await;
                        return;
                    }
                    Step::IgnoreCancel => {
                        deaf = true;
                        continue;
                    }
                };
                if (!deaf && cancel.is_cancelled()) || tx.send(item).await.is_err() {
                    return;
                }
            }
        });

        Ok(futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed())
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<(), TransportError> {
        self.record(format!("delete:{}", conversation_id));
        self.deletes.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

pub struct Fixture {
    pub session: Arc<ChatSession>,
    pub transport: Arc<ScriptedTransport>,
    pub notifications: mpsc::UnboundedReceiver<Notification>,
    pub kv: Arc<MemoryKeyValueStore>,
}

impl Fixture {
    pub fn new(transport: Arc<ScriptedTransport>) -> Self {
        Self::with_config(transport, SessionConfig::default(), Arc::new(MemoryKeyValueStore::new()))
    }

    pub fn with_config(
        transport: Arc<ScriptedTransport>,
        config: SessionConfig,
        kv: Arc<MemoryKeyValueStore>,
    ) -> Self {
        let (notifier, notifications) = ChannelNotifier::new();
        let persistence = PersistenceBridge::new(Box::new(kv.clone()), "user");
        let session = ChatSession::new(transport.clone(), Arc::new(notifier), persistence, config);
        Self {
            session: Arc::new(session),
            transport,
            notifications,
            kv,
        }
    }

    /// Notifications raised so far.
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = self.notifications.try_recv() {
            out.push(n);
        }
        out
    }
}

pub fn summary(id: &str, title: &str, minutes_ago: i64) -> ConversationSummary {
    ConversationSummary {
        id: id.into(),
        title: Some(title.into()),
        updated_at: Utc::now() - ChronoDuration::minutes(minutes_ago),
    }
}

pub fn remote(id: &str, sender: Sender, text: &str) -> RemoteMessage {
    RemoteMessage {
        id: id.into(),
        sender,
        text: text.into(),
        created_at: Utc::now(),
        model_name: None,
    }
}

pub fn server_error() -> TransportError {
    TransportError::Status {
        status: 500,
        body: "internal error".into(),
        retry_after: None,
    }
}

/// Poll `cond` until it holds, failing the test after two seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
