use chrono::{DateTime, Utc};
use shared::{
    domain::{ConversationId, ConversationStatus},
    protocol::{ChatUpdatePayload, ConversationPayload, MessagePayload, UNKNOWN_COUNTERPART},
};

/// One row of the branch's conversation list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub counterpart: String,
    pub last_message: Option<String>,
    pub last_message_time: Option<DateTime<Utc>>,
    pub unread: u32,
    pub status: ConversationStatus,
}

impl ConversationSummary {
    fn placeholder(id: ConversationId) -> Self {
        Self {
            id,
            counterpart: UNKNOWN_COUNTERPART.to_string(),
            last_message: None,
            last_message_time: None,
            unread: 0,
            status: ConversationStatus::Active,
        }
    }
}

impl From<&ConversationPayload> for ConversationSummary {
    fn from(payload: &ConversationPayload) -> Self {
        Self {
            id: payload.id.clone(),
            counterpart: payload.counterpart_name(),
            last_message: payload.last_message.clone(),
            last_message_time: payload.last_message_time,
            unread: payload.unread_count,
            status: payload.status,
        }
    }
}

/// Summaries are created on first sight, from a list fetch or a push, and
/// afterwards only updated. Switching branch starts a fresh list.
#[derive(Debug, Clone, Default)]
pub struct ConversationList {
    items: Vec<ConversationSummary>,
}

impl ConversationList {
    pub fn items(&self) -> &[ConversationSummary] {
        &self.items
    }

    pub fn get(&self, id: &ConversationId) -> Option<&ConversationSummary> {
        self.items.iter().find(|item| item.id == *id)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn entry(&mut self, id: &ConversationId) -> &mut ConversationSummary {
        match self.items.iter().position(|item| item.id == *id) {
            Some(index) => &mut self.items[index],
            None => {
                self.items.push(ConversationSummary::placeholder(id.clone()));
                let last = self.items.len() - 1;
                &mut self.items[last]
            }
        }
    }

    /// Upserts fetched rows in fetch order; rows only known from pushes stay
    /// after them.
    pub fn merge_fetched(&mut self, fetched: &[ConversationPayload]) {
        let mut merged: Vec<ConversationSummary> =
            fetched.iter().map(ConversationSummary::from).collect();
        for item in self.items.drain(..) {
            if !merged.iter().any(|fetched| fetched.id == item.id) {
                merged.push(item);
            }
        }
        self.items = merged;
    }

    pub fn apply_update(&mut self, update: &ChatUpdatePayload) {
        let summary = self.entry(&update.chat_id);
        if let Some(last_message) = &update.last_message {
            summary.last_message = Some(last_message.clone());
        }
        if let Some(unread) = update.unread_count {
            summary.unread = unread;
        }
        if let Some(time) = update.last_message_time {
            summary.last_message_time = Some(time);
        }
    }

    /// Records a pushed message on its conversation's row. The unread count
    /// is left alone: only `chatUpdate` carries it, as an absolute value.
    pub fn note_message(&mut self, chat: &ConversationId, message: &MessagePayload) {
        let summary = self.entry(chat);
        summary.last_message = Some(message.content.clone());
        summary.last_message_time = Some(message.created_at);
    }

    pub fn note_sent(&mut self, chat: &ConversationId, content: &str, at: DateTime<Utc>) {
        let summary = self.entry(chat);
        summary.last_message = Some(content.to_string());
        summary.last_message_time = Some(at);
    }

    pub fn mark_read(&mut self, chat: &ConversationId) {
        if let Some(summary) = self.items.iter_mut().find(|item| item.id == *chat) {
            summary.unread = 0;
        }
    }

    pub fn set_status(&mut self, chat: &ConversationId, status: ConversationStatus) {
        self.entry(chat).status = status;
    }
}

#[cfg(test)]
#[path = "tests/conversations_tests.rs"]
mod tests;
