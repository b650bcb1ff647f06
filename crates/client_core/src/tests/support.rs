//! In-memory stand-ins shared by the client_core test modules.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    domain::{BranchId, ConversationId, ConversationStatus, MessageId, SenderRole},
    protocol::{
        ClientEvent, ConversationPayload, HandshakeAck, MessagePayload, ServerEvent,
    },
};
use tokio::{sync::mpsc, time::timeout};
use tokio_stream::wrappers::UnboundedReceiverStream;
use url::Url;

use crate::{
    error::GatewayError,
    rest::{ChatBackend, Page},
    settings::ConnectionSettings,
    transport::{Connector, Credential, TransportPair},
};

/// Lets spawned tasks drain their queues on the current-thread test runtime.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}

pub fn connection_settings() -> ConnectionSettings {
    let mut settings =
        ConnectionSettings::new(Url::parse("ws://chat.test/ws").expect("socket url"));
    settings.reconnect_delay = Duration::from_millis(10);
    settings.reconnect_delay_max = Duration::from_millis(40);
    settings.handshake_timeout = Duration::from_millis(500);
    settings
}

/// Server side of one scripted socket.
pub struct FakeSocket {
    pub url: Url,
    pub credential: Credential,
    inbound: mpsc::UnboundedSender<Result<String>>,
    outbound: mpsc::UnboundedReceiver<String>,
}

impl FakeSocket {
    pub fn push(&self, event: &ServerEvent) {
        let frame = serde_json::to_string(event).expect("encode server event");
        let _ = self.inbound.send(Ok(frame));
    }

    pub fn accept(&self) {
        self.push(&ServerEvent::Connected(HandshakeAck {
            socket_id: Some("socket-1".to_string()),
            user_id: Some("admin-1".to_string()),
        }));
    }

    pub fn fail(&self, reason: &str) {
        let _ = self.inbound.send(Err(anyhow!(reason.to_string())));
    }

    pub async fn next_event(&mut self) -> ClientEvent {
        let frame = timeout(Duration::from_secs(5), self.outbound.recv())
            .await
            .expect("client frame in time")
            .expect("socket still open");
        serde_json::from_str(&frame).expect("decode client event")
    }

    /// Everything the client emitted so far.
    pub fn sent(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            events.push(serde_json::from_str(&frame).expect("decode client event"));
        }
        events
    }
}

pub struct SocketQueue {
    sockets: mpsc::UnboundedReceiver<FakeSocket>,
}

impl SocketQueue {
    pub async fn next(&mut self) -> FakeSocket {
        timeout(Duration::from_secs(5), self.sockets.recv())
            .await
            .expect("connection attempt in time")
            .expect("connector alive")
    }

    pub fn try_next(&mut self) -> Option<FakeSocket> {
        self.sockets.try_recv().ok()
    }
}

/// Connector whose sockets are handed to the test as [`FakeSocket`]s.
pub struct ScriptedConnector {
    sockets: mpsc::UnboundedSender<FakeSocket>,
    opened: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new() -> (Arc<Self>, SocketQueue) {
        let (sockets, receiver) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                sockets,
                opened: AtomicUsize::new(0),
            }),
            SocketQueue { sockets: receiver },
        )
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(&self, url: &Url, credential: &Credential) -> Result<TransportPair> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let (inbound, inbound_rx) = mpsc::unbounded_channel::<Result<String>>();
        let (outbound_tx, outbound) = mpsc::unbounded_channel::<String>();
        self.sockets
            .send(FakeSocket {
                url: url.clone(),
                credential: credential.clone(),
                inbound,
                outbound,
            })
            .map_err(|_| anyhow!("socket queue dropped"))?;

        let sink = futures::sink::unfold(outbound_tx, |tx, frame: String| async move {
            tx.send(frame).map_err(|_| anyhow!("fake socket closed"))?;
            Ok::<_, anyhow::Error>(tx)
        });
        Ok(TransportPair {
            sink: Box::pin(sink),
            stream: Box::pin(UnboundedReceiverStream::new(inbound_rx)),
        })
    }
}

pub fn at(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_760_000_000 + seconds, 0).expect("timestamp")
}

pub fn message(id: &str, chat: &str, content: &str, sender: SenderRole, seconds: i64) -> MessagePayload {
    MessagePayload {
        id: MessageId::from(id),
        chat_id: Some(ConversationId::from(chat)),
        content: content.to_string(),
        sender,
        created_at: at(seconds),
        message_type: "text".to_string(),
        is_read: false,
    }
}

pub fn conversation(id: &str, unread: u32) -> ConversationPayload {
    ConversationPayload {
        id: ConversationId::from(id),
        user_id: None,
        last_message: None,
        last_message_time: None,
        unread_count: unread,
        status: ConversationStatus::Active,
    }
}

type Gate = tokio::sync::oneshot::Receiver<()>;

/// Backend double with per-conversation history and optional gates that hold
/// a history response until the test releases it.
#[derive(Default)]
pub struct FakeBackend {
    pub conversations: Mutex<HashMap<BranchId, Vec<ConversationPayload>>>,
    pub histories: Mutex<HashMap<ConversationId, Vec<MessagePayload>>>,
    gates: Mutex<HashMap<ConversationId, VecDeque<Gate>>>,
    pub history_calls: Mutex<Vec<ConversationId>>,
    pub read_calls: Mutex<Vec<ConversationId>>,
    pub closed: Mutex<Vec<ConversationId>>,
    pub fail_history: Mutex<bool>,
}

impl FakeBackend {
    pub fn with_branch(branch: &str, conversations: Vec<ConversationPayload>) -> Arc<Self> {
        let backend = Self::default();
        backend
            .conversations
            .lock()
            .expect("lock")
            .insert(BranchId::from(branch), conversations);
        Arc::new(backend)
    }

    pub fn set_history(&self, chat: &str, messages: Vec<MessagePayload>) {
        self.histories
            .lock()
            .expect("lock")
            .insert(ConversationId::from(chat), messages);
    }

    /// Holds the next history response for `chat` until the sender fires.
    pub fn gate_history(&self, chat: &str) -> tokio::sync::oneshot::Sender<()> {
        let (release, gate) = tokio::sync::oneshot::channel();
        self.gates
            .lock()
            .expect("lock")
            .entry(ConversationId::from(chat))
            .or_default()
            .push_back(gate);
        release
    }

    pub fn history_calls(&self) -> Vec<ConversationId> {
        self.history_calls.lock().expect("lock").clone()
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn list_conversations(
        &self,
        branch: &BranchId,
        _status: ConversationStatus,
        _page: u32,
        _limit: u32,
    ) -> Result<Page<ConversationPayload>, GatewayError> {
        let items = self
            .conversations
            .lock()
            .expect("lock")
            .get(branch)
            .cloned()
            .unwrap_or_default();
        Ok(Page {
            items,
            pagination: None,
        })
    }

    async fn fetch_messages(
        &self,
        chat: &ConversationId,
        _page: u32,
        _limit: u32,
    ) -> Result<Page<MessagePayload>, GatewayError> {
        self.history_calls.lock().expect("lock").push(chat.clone());
        let gate = self
            .gates
            .lock()
            .expect("lock")
            .get_mut(chat)
            .and_then(VecDeque::pop_front);
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if *self.fail_history.lock().expect("lock") {
            return Err(GatewayError::Status {
                status: 500,
                message: "history unavailable".to_string(),
                body: None,
            });
        }
        let items = self
            .histories
            .lock()
            .expect("lock")
            .get(chat)
            .cloned()
            .unwrap_or_default();
        Ok(Page {
            items,
            pagination: None,
        })
    }

    async fn mark_read(&self, chat: &ConversationId) -> Result<(), GatewayError> {
        self.read_calls.lock().expect("lock").push(chat.clone());
        Ok(())
    }

    async fn close_conversation(&self, chat: &ConversationId) -> Result<(), GatewayError> {
        self.closed.lock().expect("lock").push(chat.clone());
        Ok(())
    }
}
