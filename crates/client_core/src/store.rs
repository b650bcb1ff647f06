//! Conversation store: the state behind the admin chat view.
//!
//! One task owns all view state. User commands, push events, timer deadlines
//! and REST completions all arrive as [`StoreInput`]s on a single queue, so
//! nothing is mutated concurrently. REST work runs on spawned tasks and
//! reports back tagged with the generation it was started under; a completion
//! whose generation is no longer current is dropped.
//!
//! Branch-wide events reach the store through kind-keyed subscriptions held
//! for its whole lifetime. Events for the open conversation arrive through a
//! room-keyed subscription that lives exactly as long as that selection.

use std::{future, sync::Arc};

use chrono::Utc;
use shared::{
    domain::{BranchRef, ConversationId, ConversationStatus, DeliveryState, MessageId, Room, SenderRole},
    protocol::{
        ChatRef, ClientEvent, ConversationPayload, DeleteMessageRequest, EventKind,
        MessagePayload, SendMessageRequest, ServerEvent, DEFAULT_MESSAGE_TYPE,
    },
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    connection::{ConnectionState, RealtimeChannel},
    conversations::{ConversationList, ConversationSummary},
    error::{GatewayError, StoreError},
    event_bus::{EventFilter, Subscription},
    message_log::{Applied, LogEntry, MessageLog},
    persistence::{Selection, SelectionStore},
    presence::{PresenceRecord, PresenceTracker},
    rest::{ChatBackend, Page},
    settings::StoreSettings,
    typing::{OutboundTyping, TypingState},
};

/// Events the store follows for every conversation in the branch. Confirmations
/// and deletions are matched by message id, so they need no room.
const BRANCH_EVENTS: [EventKind; 8] = [
    EventKind::Connected,
    EventKind::ConnectError,
    EventKind::NewMessage,
    EventKind::MessageSent,
    EventKind::MessageDeleted,
    EventKind::ChatUpdate,
    EventKind::ChatClosed,
    EventKind::UserPresenceChanged,
];

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Idle,
    Loading,
    Ready,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRow {
    pub summary: ConversationSummary,
    pub online: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenConversation {
    pub id: ConversationId,
    pub generation: u64,
    pub messages: Vec<LogEntry>,
    pub history: LoadState,
    pub counterpart_typing: bool,
    /// Header presence; refreshed only by updates for this conversation.
    pub presence: Option<PresenceRecord>,
}

/// Everything a front end renders, published after every handled input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSnapshot {
    pub connection: ConnectionState,
    pub branch: Option<BranchRef>,
    pub conversations: Vec<ConversationRow>,
    pub conversations_state: LoadState,
    pub open: Option<OpenConversation>,
}

impl Default for ChatSnapshot {
    fn default() -> Self {
        Self {
            connection: ConnectionState::Disconnected,
            branch: None,
            conversations: Vec::new(),
            conversations_state: LoadState::Idle,
            open: None,
        }
    }
}

enum Command {
    SelectBranch(BranchRef),
    BackToBranches,
    SelectConversation(ConversationId),
    Deselect,
    Send {
        content: String,
        reply: oneshot::Sender<Result<MessageId, StoreError>>,
    },
    Resend {
        id: MessageId,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    Delete {
        id: MessageId,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
    NotifyTyping,
    Close(Option<ConversationId>),
    RefreshConversations,
    Unmount,
}

enum StoreInput {
    Command(Command),
    Push(ServerEvent),
    /// An event from the open conversation's room, tagged with the selection
    /// generation that subscribed to it.
    RoomPush {
        generation: u64,
        event: ServerEvent,
    },
    ConversationsLoaded {
        generation: u64,
        result: Result<Page<ConversationPayload>, GatewayError>,
    },
    HistoryLoaded {
        generation: u64,
        chat: ConversationId,
        result: Result<Page<MessagePayload>, GatewayError>,
    },
    MarkedRead {
        generation: u64,
        chat: ConversationId,
        result: Result<(), GatewayError>,
    },
    Closed {
        chat: ConversationId,
        result: Result<(), GatewayError>,
    },
}

enum PersistOp {
    Save(Selection),
    Clear,
}

struct Open {
    id: ConversationId,
    generation: u64,
    log: MessageLog,
    history: LoadState,
    header: Option<PresenceRecord>,
    _room_events: Subscription,
}

pub struct ConversationStore {
    settings: StoreSettings,
    channel: Arc<dyn RealtimeChannel>,
    backend: Arc<dyn ChatBackend>,
    inputs: mpsc::UnboundedSender<StoreInput>,
    persist: mpsc::UnboundedSender<PersistOp>,
    snapshot: watch::Sender<ChatSnapshot>,
    connection: watch::Receiver<ConnectionState>,
    branch: Option<BranchRef>,
    branch_generation: u64,
    selection_generation: u64,
    conversations: ConversationList,
    conversations_state: LoadState,
    open: Option<Open>,
    presence: PresenceTracker,
    typing: TypingState,
    outbound_typing: OutboundTyping,
}

impl ConversationStore {
    /// Restores the last selection, registers the branch-wide subscriptions
    /// and starts the store task. Rooms requested before the channel connects
    /// are queued by the channel.
    pub async fn mount(
        channel: Arc<dyn RealtimeChannel>,
        backend: Arc<dyn ChatBackend>,
        selections: Arc<dyn SelectionStore>,
        settings: StoreSettings,
    ) -> StoreHandle {
        let restored = match selections.restore().await {
            Ok(selection) => selection,
            Err(err) => {
                warn!("chat: failed to restore selection: {err:#}");
                Selection::default()
            }
        };

        let (inputs, receiver) = mpsc::unbounded_channel();
        let (persist, persist_rx) = mpsc::unbounded_channel();
        let (snapshot, snapshot_rx) = watch::channel(ChatSnapshot::default());
        let subscriptions: Vec<Subscription> = BRANCH_EVENTS
            .into_iter()
            .map(|kind| {
                let pushes = inputs.clone();
                channel.subscribe(
                    EventFilter::Kind(kind),
                    Arc::new(move |event: &ServerEvent| {
                        let _ = pushes.send(StoreInput::Push(event.clone()));
                    }),
                )
            })
            .collect();
        let connection = channel.watch_state();

        let mut store = Self {
            typing: TypingState::new(settings.typing_expiry),
            outbound_typing: OutboundTyping::new(settings.typing_idle),
            settings,
            channel,
            backend,
            inputs: inputs.clone(),
            persist,
            snapshot,
            connection,
            branch: None,
            branch_generation: 0,
            selection_generation: 0,
            conversations: ConversationList::default(),
            conversations_state: LoadState::Idle,
            open: None,
            presence: PresenceTracker::new(),
        };

        if let Some(branch) = restored.branch {
            info!(branch_id = %branch.id, "chat: restoring branch");
            store.select_branch(branch);
            if let Some(chat) = restored.conversation {
                info!(conversation_id = %chat, "chat: restoring conversation");
                store.select_conversation(chat);
            }
        }
        store.publish();

        let writer = tokio::spawn(persist_selections(selections, persist_rx));
        let task = tokio::spawn(store.run(receiver, subscriptions));
        StoreHandle {
            inputs,
            snapshot: snapshot_rx,
            task: Some(task),
            writer: Some(writer),
        }
    }

    async fn run(
        mut self,
        mut inputs: mpsc::UnboundedReceiver<StoreInput>,
        subscriptions: Vec<Subscription>,
    ) {
        let mut watching_state = true;
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                input = inputs.recv() => match input {
                    Some(StoreInput::Command(Command::Unmount)) | None => break,
                    Some(input) => self.handle(input),
                },
                changed = self.connection.changed(), if watching_state => {
                    if changed.is_err() {
                        watching_state = false;
                    }
                }
                _ = wait_until(deadline) => self.expire_timers(),
            }
            self.publish();
        }
        self.teardown();
        drop(subscriptions);
        self.publish();
        info!("chat: store unmounted");
    }

    fn handle(&mut self, input: StoreInput) {
        match input {
            StoreInput::Command(command) => self.handle_command(command),
            StoreInput::Push(event) => self.handle_push(event),
            StoreInput::RoomPush { generation, event } => self.handle_room_push(generation, event),
            StoreInput::ConversationsLoaded { generation, result } => {
                self.conversations_loaded(generation, result)
            }
            StoreInput::HistoryLoaded {
                generation,
                chat,
                result,
            } => self.history_loaded(generation, chat, result),
            StoreInput::MarkedRead {
                generation,
                chat,
                result,
            } => {
                if generation != self.selection_generation {
                    debug!(conversation_id = %chat, generation, "chat: stale mark-read result");
                    return;
                }
                match result {
                    Ok(()) => self.conversations.mark_read(&chat),
                    Err(err) => warn!(conversation_id = %chat, "chat: mark read failed: {err}"),
                }
            }
            StoreInput::Closed { chat, result } => match result {
                Ok(()) => {
                    info!(conversation_id = %chat, "chat: conversation closed");
                    self.conversations.set_status(&chat, ConversationStatus::Closed);
                }
                Err(err) => warn!(conversation_id = %chat, "chat: close failed: {err}"),
            },
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::SelectBranch(branch) => self.select_branch(branch),
            Command::BackToBranches => self.back_to_branches(),
            Command::SelectConversation(chat) => self.select_conversation(chat),
            Command::Deselect => {
                self.deselect();
                self.save_selection();
            }
            Command::Send { content, reply } => {
                let _ = reply.send(self.send(content));
            }
            Command::Resend { id, reply } => {
                let _ = reply.send(self.resend(&id));
            }
            Command::Delete { id, reply } => {
                let _ = reply.send(self.delete(&id));
            }
            Command::NotifyTyping => self.notify_typing(),
            Command::Close(chat) => self.close(chat),
            Command::RefreshConversations => self.fetch_conversations(),
            Command::Unmount => {}
        }
    }

    fn open_id(&self) -> Option<&ConversationId> {
        self.open.as_ref().map(|open| &open.id)
    }

    fn select_branch(&mut self, branch: BranchRef) {
        if let Some(current) = &self.branch {
            if current.id == branch.id {
                self.branch = Some(branch);
                self.fetch_conversations();
                return;
            }
        }
        self.deselect();
        if let Some(previous) = self.branch.take() {
            self.channel.leave_room(Room::Branch(previous.id));
        }
        self.conversations.clear();
        info!(branch_id = %branch.id, "chat: branch selected");
        self.channel.join_room(Room::Branch(branch.id.clone()));
        self.branch = Some(branch);
        self.save_selection();
        self.fetch_conversations();
    }

    fn back_to_branches(&mut self) {
        self.deselect();
        if let Some(previous) = self.branch.take() {
            self.channel.leave_room(Room::Branch(previous.id));
        }
        self.branch_generation += 1;
        self.conversations.clear();
        self.conversations_state = LoadState::Idle;
        self.request_persist(PersistOp::Clear);
    }

    fn fetch_conversations(&mut self) {
        let Some(branch) = self.branch.clone() else {
            return;
        };
        self.branch_generation += 1;
        self.conversations_state = LoadState::Loading;
        let generation = self.branch_generation;
        let backend = Arc::clone(&self.backend);
        let inputs = self.inputs.clone();
        let limit = self.settings.page_size;
        tokio::spawn(async move {
            let result = backend
                .list_conversations(&branch.id, ConversationStatus::Active, 1, limit)
                .await;
            let _ = inputs.send(StoreInput::ConversationsLoaded { generation, result });
        });
    }

    fn conversations_loaded(
        &mut self,
        generation: u64,
        result: Result<Page<ConversationPayload>, GatewayError>,
    ) {
        if generation != self.branch_generation {
            debug!(generation, "chat: discarding stale conversation list");
            return;
        }
        match result {
            Ok(page) => {
                self.conversations.merge_fetched(&page.items);
                if let Some(open) = self.open_id().cloned() {
                    self.conversations.mark_read(&open);
                }
                self.conversations_state = LoadState::Ready;
            }
            Err(err) => {
                warn!("chat: failed to load conversations: {err}");
                self.conversations_state = LoadState::Failed(err.to_string());
            }
        }
    }

    /// Leaves the open conversation: room, typing timers and log all go.
    fn deselect(&mut self) {
        self.selection_generation += 1;
        self.finish_outbound_typing();
        if let Some(previous) = self.open.take() {
            self.typing.cancel(&previous.id);
            self.channel.leave_room(Room::Conversation(previous.id));
        }
    }

    fn select_conversation(&mut self, chat: ConversationId) {
        if let Some(open) = &self.open {
            // Re-selecting is how a failed history load is retried.
            if open.id == chat && !matches!(open.history, LoadState::Failed(_)) {
                debug!(conversation_id = %chat, "chat: conversation already open");
                return;
            }
        }
        self.deselect();
        let generation = self.selection_generation;
        info!(conversation_id = %chat, generation, "chat: conversation selected");
        let pushes = self.inputs.clone();
        let room_events = self.channel.subscribe(
            EventFilter::Room(Room::Conversation(chat.clone())),
            Arc::new(move |event: &ServerEvent| {
                let _ = pushes.send(StoreInput::RoomPush {
                    generation,
                    event: event.clone(),
                });
            }),
        );
        self.open = Some(Open {
            id: chat.clone(),
            generation,
            log: MessageLog::new(self.settings.confirmation_window),
            history: LoadState::Loading,
            header: self.presence.get(&chat).cloned(),
            _room_events: room_events,
        });

        let backend = Arc::clone(&self.backend);
        let inputs = self.inputs.clone();
        let limit = self.settings.page_size;
        let fetch_chat = chat.clone();
        tokio::spawn(async move {
            let result = backend.fetch_messages(&fetch_chat, 1, limit).await;
            let _ = inputs.send(StoreInput::HistoryLoaded {
                generation,
                chat: fetch_chat,
                result,
            });
        });

        self.channel.join_room(Room::Conversation(chat.clone()));
        self.mark_read(chat);
        self.save_selection();
    }

    fn mark_read(&mut self, chat: ConversationId) {
        self.conversations.mark_read(&chat);
        let event = ClientEvent::MarkAsRead(ChatRef::new(chat.clone()));
        if self.channel.send(event).is_ok() {
            return;
        }
        let generation = self.selection_generation;
        let backend = Arc::clone(&self.backend);
        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            let result = backend.mark_read(&chat).await;
            let _ = inputs.send(StoreInput::MarkedRead {
                generation,
                chat,
                result,
            });
        });
    }

    fn history_loaded(
        &mut self,
        generation: u64,
        chat: ConversationId,
        result: Result<Page<MessagePayload>, GatewayError>,
    ) {
        let current = self.selection_generation;
        let Some(open) = self
            .open
            .as_mut()
            .filter(|open| open.generation == generation && open.id == chat)
        else {
            debug!(conversation_id = %chat, generation, current, "chat: discarding stale history");
            return;
        };
        match result {
            Ok(page) => {
                open.log.merge_history(&page.items);
                open.history = LoadState::Ready;
                debug!(conversation_id = %chat, entries = open.log.len(), "chat: history merged");
            }
            Err(err) => {
                warn!(conversation_id = %chat, "chat: failed to load history: {err}");
                open.history = LoadState::Failed(err.to_string());
            }
        }
    }

    /// Branch-wide events: connection lifecycle, list rows, presence records
    /// and confirmations or deletions matched by id.
    fn handle_push(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connected(_) => self.rejoin_rooms(),
            ServerEvent::ConnectError(notice) => {
                warn!("chat: push channel rejected: {}", notice.message);
            }
            ServerEvent::NewMessage(message) => match &message.chat_id {
                Some(chat) => self.conversations.note_message(chat, &message),
                None => {
                    debug!(message_id = %message.id, "chat: message without conversation ignored")
                }
            },
            ServerEvent::MessageSent(sent) => {
                let Some(provisional) = sent.temp_id else {
                    debug!(message_id = %sent.message_id, "chat: confirmation without temp id");
                    return;
                };
                let Some(open) = self.open.as_mut() else {
                    return;
                };
                if sent.chat_id.as_ref().is_some_and(|chat| *chat != open.id) {
                    return;
                }
                if open.log.confirm(&provisional, &sent.message_id, sent.created_at)
                    == Applied::Unknown
                {
                    debug!(%provisional, "chat: confirmation for unknown provisional id");
                }
            }
            ServerEvent::MessageDeleted(deleted) => {
                let Some(open) = self.open.as_mut() else {
                    return;
                };
                if deleted.chat_id.as_ref().map_or(true, |chat| *chat == open.id) {
                    open.log.remove(&deleted.message_id);
                }
            }
            ServerEvent::ChatUpdate(update) => self.conversations.apply_update(&update),
            ServerEvent::UserPresenceChanged(update) => {
                self.presence.apply(&update, None);
            }
            ServerEvent::ChatClosed(chat) => {
                info!(conversation_id = %chat.chat_id, "chat: conversation closed remotely");
                self.conversations
                    .set_status(&chat.chat_id, ConversationStatus::Closed);
            }
            other => debug!(kind = ?other.kind(), "chat: unrouted branch event"),
        }
    }

    /// Events from the open conversation's room. Anything queued by an earlier
    /// selection's subscription is dropped by generation.
    fn handle_room_push(&mut self, generation: u64, event: ServerEvent) {
        let Some(open) = self
            .open
            .as_mut()
            .filter(|open| open.generation == generation)
        else {
            debug!(generation, kind = ?event.kind(), "chat: stale room event");
            return;
        };
        match event {
            ServerEvent::NewMessage(message) => match open.log.apply_pushed(&message) {
                Applied::Duplicate => {
                    debug!(message_id = %message.id, "chat: duplicate delivery absorbed")
                }
                Applied::Confirmed { provisional } => {
                    debug!(%provisional, message_id = %message.id, "chat: provisional confirmed")
                }
                Applied::Appended | Applied::Unknown => {}
            },
            ServerEvent::UserTyping(typing) => {
                self.typing
                    .start(&typing.chat_id, typing.user_type, Some(&open.id), Instant::now());
            }
            ServerEvent::UserStoppedTyping(typing) => {
                if typing.user_type != Some(SenderRole::Admin) {
                    self.typing.stop(&typing.chat_id, Some(&open.id));
                }
            }
            ServerEvent::UserPresenceChanged(update) => {
                if let Some(record) = self.presence.apply(&update, Some(&open.id)) {
                    open.header = Some(record);
                }
            }
            ServerEvent::MessagesRead(_) => {
                open.log.mark_read_by_counterpart();
            }
            ServerEvent::JoinedChat(chat) => {
                debug!(conversation_id = %chat.chat_id, "chat: room joined");
            }
            // Room copies of branch-wide events were already handled.
            _ => {}
        }
    }

    /// Memberships do not survive a reconnect; ask for them again.
    fn rejoin_rooms(&mut self) {
        if let Some(branch) = &self.branch {
            self.channel.join_room(Room::Branch(branch.id.clone()));
        }
        if let Some(open) = &self.open {
            self.channel.join_room(Room::Conversation(open.id.clone()));
        }
        info!("chat: rooms re-joined after handshake");
    }

    fn send(&mut self, content: String) -> Result<MessageId, StoreError> {
        let content = content.trim().to_string();
        if content.is_empty() {
            return Err(StoreError::EmptyMessage);
        }
        let chat = self.open_id().cloned().ok_or(StoreError::NoConversationOpen)?;
        self.finish_outbound_typing();

        let now = Utc::now();
        let temp_id = match self.open.as_mut() {
            Some(open) => open.log.push_provisional(&content, now),
            None => return Err(StoreError::NoConversationOpen),
        };
        self.conversations.note_sent(&chat, &content, now);
        let event = ClientEvent::SendMessage(SendMessageRequest {
            chat_id: chat.clone(),
            content,
            message_type: DEFAULT_MESSAGE_TYPE.to_string(),
            temp_id: temp_id.clone(),
        });
        if let Err(err) = self.channel.send(event) {
            warn!(conversation_id = %chat, %temp_id, "chat: message left pending: {err}");
        }
        Ok(temp_id)
    }

    fn pending_entry(&self, id: &MessageId) -> Result<(ConversationId, LogEntry), StoreError> {
        let open = self.open.as_ref().ok_or(StoreError::NoConversationOpen)?;
        let entry = open
            .log
            .get(id)
            .ok_or_else(|| StoreError::UnknownMessage(id.clone()))?;
        Ok((open.id.clone(), entry.clone()))
    }

    /// Re-emits a still-pending message under the same provisional id.
    fn resend(&mut self, id: &MessageId) -> Result<(), StoreError> {
        let (chat, entry) = self.pending_entry(id)?;
        if !entry.is_provisional() || entry.state != DeliveryState::Pending {
            return Err(StoreError::UnknownMessage(id.clone()));
        }
        let event = ClientEvent::SendMessage(SendMessageRequest {
            chat_id: chat,
            content: entry.content,
            message_type: entry.message_type,
            temp_id: id.clone(),
        });
        self.channel.send(event).map_err(|_| StoreError::Offline)?;
        info!(temp_id = %id, "chat: message resent");
        Ok(())
    }

    fn delete(&mut self, id: &MessageId) -> Result<(), StoreError> {
        let (chat, entry) = self.pending_entry(id)?;
        if entry.is_provisional() || entry.sender != SenderRole::Admin {
            return Err(StoreError::NotDeletable(id.clone()));
        }
        let event = ClientEvent::DeleteMessage(DeleteMessageRequest {
            message_id: id.clone(),
            chat_id: chat,
        });
        self.channel.send(event).map_err(|_| StoreError::Offline)
    }

    fn notify_typing(&mut self) {
        let Some(chat) = self.open_id().cloned() else {
            return;
        };
        if !self.channel.is_connected() {
            return;
        }
        if self.outbound_typing.touch(&chat, Instant::now()) {
            let _ = self.channel.send(ClientEvent::Typing(ChatRef::new(chat)));
        }
    }

    fn finish_outbound_typing(&mut self) {
        if let Some(chat) = self.outbound_typing.finish() {
            let _ = self.channel.send(ClientEvent::StopTyping(ChatRef::new(chat)));
        }
    }

    fn close(&mut self, chat: Option<ConversationId>) {
        let Some(chat) = chat.or_else(|| self.open_id().cloned()) else {
            return;
        };
        let backend = Arc::clone(&self.backend);
        let inputs = self.inputs.clone();
        tokio::spawn(async move {
            let result = backend.close_conversation(&chat).await;
            let _ = inputs.send(StoreInput::Closed { chat, result });
        });
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.typing.next_deadline(), self.outbound_typing.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn expire_timers(&mut self) {
        let now = Instant::now();
        for chat in self.typing.expire(now) {
            debug!(conversation_id = %chat, "chat: typing indicator expired");
        }
        if let Some(chat) = self.outbound_typing.expire(now) {
            let _ = self.channel.send(ClientEvent::StopTyping(ChatRef::new(chat)));
        }
    }

    fn teardown(&mut self) {
        self.deselect();
        if let Some(branch) = &self.branch {
            self.channel.leave_room(Room::Branch(branch.id.clone()));
        }
        self.typing.clear();
    }

    fn save_selection(&self) {
        self.request_persist(PersistOp::Save(Selection {
            branch: self.branch.clone(),
            conversation: self.open_id().cloned(),
        }));
    }

    fn request_persist(&self, op: PersistOp) {
        if self.persist.send(op).is_err() {
            warn!("chat: selection writer stopped");
        }
    }

    fn publish(&self) {
        let conversations = self
            .conversations
            .items()
            .iter()
            .map(|summary| ConversationRow {
                online: self.presence.is_online(&summary.id),
                summary: summary.clone(),
            })
            .collect();
        let open = self.open.as_ref().map(|open| OpenConversation {
            id: open.id.clone(),
            generation: open.generation,
            messages: open.log.entries().to_vec(),
            history: open.history.clone(),
            counterpart_typing: self.typing.is_typing(&open.id),
            presence: open.header.clone(),
        });
        let snapshot = ChatSnapshot {
            connection: *self.connection.borrow(),
            branch: self.branch.clone(),
            conversations,
            conversations_state: self.conversations_state.clone(),
            open,
        };
        self.snapshot.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => future::pending().await,
    }
}

async fn persist_selections(
    selections: Arc<dyn SelectionStore>,
    mut ops: mpsc::UnboundedReceiver<PersistOp>,
) {
    while let Some(op) = ops.recv().await {
        let result = match &op {
            PersistOp::Save(selection) => selections.save(selection).await,
            PersistOp::Clear => selections.clear().await,
        };
        if let Err(err) = result {
            warn!("chat: failed to persist selection: {err:#}");
        }
    }
}

/// Front-end handle to a mounted store.
pub struct StoreHandle {
    inputs: mpsc::UnboundedSender<StoreInput>,
    snapshot: watch::Receiver<ChatSnapshot>,
    task: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl StoreHandle {
    pub fn snapshot(&self) -> ChatSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ChatSnapshot> {
        self.snapshot.clone()
    }

    fn command(&self, command: Command) {
        if self.inputs.send(StoreInput::Command(command)).is_err() {
            warn!("chat: store is not running");
        }
    }

    pub fn select_branch(&self, branch: BranchRef) {
        self.command(Command::SelectBranch(branch));
    }

    /// Leaves the branch and forgets the persisted selection.
    pub fn back_to_branches(&self) {
        self.command(Command::BackToBranches);
    }

    pub fn select_conversation(&self, chat: ConversationId) {
        self.command(Command::SelectConversation(chat));
    }

    pub fn deselect(&self) {
        self.command(Command::Deselect);
    }

    pub fn notify_typing(&self) {
        self.command(Command::NotifyTyping);
    }

    /// Closes the given conversation, or the open one.
    pub fn close_conversation(&self, chat: Option<ConversationId>) {
        self.command(Command::Close(chat));
    }

    pub fn refresh_conversations(&self) {
        self.command(Command::RefreshConversations);
    }

    /// Appends a Pending entry and emits it. Returns the provisional id; a
    /// send the channel could not deliver stays Pending.
    pub async fn send_message(&self, content: impl Into<String>) -> Result<MessageId, StoreError> {
        let (reply, response) = oneshot::channel();
        self.command(Command::Send {
            content: content.into(),
            reply,
        });
        response.await.map_err(|_| StoreError::Closed)?
    }

    pub async fn resend(&self, id: MessageId) -> Result<(), StoreError> {
        let (reply, response) = oneshot::channel();
        self.command(Command::Resend { id, reply });
        response.await.map_err(|_| StoreError::Closed)?
    }

    pub async fn delete_message(&self, id: MessageId) -> Result<(), StoreError> {
        let (reply, response) = oneshot::channel();
        self.command(Command::Delete { id, reply });
        response.await.map_err(|_| StoreError::Closed)?
    }

    /// Leaves every room, cancels timers and waits for pending selection writes.
    pub async fn unmount(mut self) {
        self.command(Command::Unmount);
        for task in [self.task.take(), self.writer.take()].into_iter().flatten() {
            if let Err(err) = task.await {
                warn!("chat: store task ended abnormally: {err}");
            }
        }
    }
}

impl Drop for StoreHandle {
    fn drop(&mut self) {
        if self.task.as_ref().is_some_and(|task| !task.is_finished()) {
            let _ = self.inputs.send(StoreInput::Command(Command::Unmount));
        }
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
