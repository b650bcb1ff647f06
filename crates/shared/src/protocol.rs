use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::{
    AdminId, BranchId, ConversationId, ConversationStatus, MessageId, Room, SenderRole,
};

pub const DEFAULT_MESSAGE_TYPE: &str = "text";

fn default_message_type() -> String {
    DEFAULT_MESSAGE_TYPE.to_string()
}

/// `lastMessage` arrives either as plain text or as an embedded message object.
fn text_or_content<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(text)) => Some(text),
        Some(serde_json::Value::Object(map)) => map
            .get("content")
            .and_then(|content| content.as_str())
            .map(str::to_string),
        _ => None,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRef {
    pub chat_id: ConversationId,
}

impl ChatRef {
    pub fn new(chat_id: ConversationId) -> Self {
        Self { chat_id }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub chat_id: ConversationId,
    pub content: String,
    pub message_type: String,
    pub temp_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMessageRequest {
    pub message_id: MessageId,
    pub chat_id: ConversationId,
}

/// Events the admin client emits on the push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    JoinChat(ConversationId),
    LeaveChat(ConversationId),
    JoinBranch(BranchId),
    LeaveBranch(BranchId),
    SendMessage(SendMessageRequest),
    Typing(ChatRef),
    StopTyping(ChatRef),
    MarkAsRead(ChatRef),
    DeleteMessage(DeleteMessageRequest),
}

impl ClientEvent {
    pub fn join(room: &Room) -> Self {
        match room {
            Room::Branch(id) => Self::JoinBranch(id.clone()),
            Room::Conversation(id) => Self::JoinChat(id.clone()),
        }
    }

    pub fn leave(room: &Room) -> Self {
        match room {
            Room::Branch(id) => Self::LeaveBranch(id.clone()),
            Room::Conversation(id) => Self::LeaveChat(id.clone()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinChat(_) => "joinChat",
            Self::LeaveChat(_) => "leaveChat",
            Self::JoinBranch(_) => "joinBranch",
            Self::LeaveBranch(_) => "leaveBranch",
            Self::SendMessage(_) => "sendMessage",
            Self::Typing(_) => "typing",
            Self::StopTyping(_) => "stopTyping",
            Self::MarkAsRead(_) => "markAsRead",
            Self::DeleteMessage(_) => "deleteMessage",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    #[serde(rename = "_id")]
    pub id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ConversationId>,
    pub content: String,
    #[serde(rename = "senderModel")]
    pub sender: SenderRole,
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_message_type")]
    pub message_type: String,
    #[serde(default)]
    pub is_read: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSentPayload {
    pub message_id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ConversationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeletedPayload {
    pub message_id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ConversationId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatUpdatePayload {
    pub chat_id: ConversationId,
    #[serde(
        default,
        deserialize_with = "text_or_content",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unread_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub chat_id: ConversationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<SenderRole>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub chat_id: ConversationId,
    pub online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchAck {
    pub branch_id: BranchId,
}

/// Events pushed by the messaging backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    Connected(HandshakeAck),
    #[serde(rename = "connect_error")]
    ConnectError(ErrorNotice),
    NewMessage(MessagePayload),
    MessageSent(MessageSentPayload),
    MessageDeleted(MessageDeletedPayload),
    ChatUpdate(ChatUpdatePayload),
    UserTyping(TypingPayload),
    UserStoppedTyping(TypingPayload),
    UserPresenceChanged(PresencePayload),
    MessagesRead(ChatRef),
    ChatClosed(ChatRef),
    JoinedChat(ChatRef),
    JoinedBranch(BranchAck),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    ConnectError,
    NewMessage,
    MessageSent,
    MessageDeleted,
    ChatUpdate,
    UserTyping,
    UserStoppedTyping,
    UserPresenceChanged,
    MessagesRead,
    ChatClosed,
    JoinedChat,
    JoinedBranch,
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected(_) => EventKind::Connected,
            Self::ConnectError(_) => EventKind::ConnectError,
            Self::NewMessage(_) => EventKind::NewMessage,
            Self::MessageSent(_) => EventKind::MessageSent,
            Self::MessageDeleted(_) => EventKind::MessageDeleted,
            Self::ChatUpdate(_) => EventKind::ChatUpdate,
            Self::UserTyping(_) => EventKind::UserTyping,
            Self::UserStoppedTyping(_) => EventKind::UserStoppedTyping,
            Self::UserPresenceChanged(_) => EventKind::UserPresenceChanged,
            Self::MessagesRead(_) => EventKind::MessagesRead,
            Self::ChatClosed(_) => EventKind::ChatClosed,
            Self::JoinedChat(_) => EventKind::JoinedChat,
            Self::JoinedBranch(_) => EventKind::JoinedBranch,
        }
    }

    /// The conversation an event is scoped to, when it carries one.
    pub fn conversation_id(&self) -> Option<&ConversationId> {
        match self {
            Self::NewMessage(message) => message.chat_id.as_ref(),
            Self::MessageSent(sent) => sent.chat_id.as_ref(),
            Self::MessageDeleted(deleted) => deleted.chat_id.as_ref(),
            Self::ChatUpdate(update) => Some(&update.chat_id),
            Self::UserTyping(typing) | Self::UserStoppedTyping(typing) => Some(&typing.chat_id),
            Self::UserPresenceChanged(presence) => Some(&presence.chat_id),
            Self::MessagesRead(chat) | Self::ChatClosed(chat) | Self::JoinedChat(chat) => {
                Some(&chat.chat_id)
            }
            Self::Connected(_) | Self::ConnectError(_) | Self::JoinedBranch(_) => None,
        }
    }

    pub fn room(&self) -> Option<Room> {
        if let Self::JoinedBranch(ack) = self {
            return Some(Room::Branch(ack.branch_id.clone()));
        }
        self.conversation_id()
            .map(|chat_id| Room::Conversation(chat_id.clone()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub pages: u32,
}

impl Pagination {
    pub fn has_more(&self) -> bool {
        self.page < self.pages
    }
}

/// `{ "success": true, "data": ..., "pagination": ... }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: bool,
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterpartProfile {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// `userId` is populated with a profile by the list endpoint, but may be a bare id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CounterpartRef {
    Profile(CounterpartProfile),
    Id(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPayload {
    #[serde(rename = "_id")]
    pub id: ConversationId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<CounterpartRef>,
    #[serde(
        default,
        deserialize_with = "text_or_content",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub status: ConversationStatus,
}

pub const UNKNOWN_COUNTERPART: &str = "Unknown User";

impl ConversationPayload {
    pub fn counterpart_name(&self) -> String {
        match &self.user_id {
            Some(CounterpartRef::Profile(profile)) => profile
                .full_name
                .clone()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_COUNTERPART.to_string()),
            _ => UNKNOWN_COUNTERPART.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageBody {
    pub content: String,
    pub message_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignBody {
    pub admin_id: AdminId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchChatStats {
    pub branch_id: BranchId,
    #[serde(default)]
    pub active_chats: u32,
    #[serde(default)]
    pub total_unread: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatStats {
    #[serde(default)]
    pub total_chats: u32,
    #[serde(default)]
    pub active_chats: u32,
    #[serde(default)]
    pub closed_chats: u32,
    #[serde(default)]
    pub total_unread: u32,
    #[serde(default)]
    pub by_branch: Vec<BranchChatStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line1: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchPayload {
    #[serde(rename = "_id")]
    pub id: BranchId,
    pub name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<AddressPayload>,
}
