//! Typing overlays. Timers are deadlines polled by the store loop, so
//! replacing a deadline is the same as cancelling the old timer.

use std::{collections::HashMap, time::Duration};

use shared::domain::{ConversationId, SenderRole};
use tokio::time::Instant;
use tracing::debug;

/// Counterpart typing flags with a fixed auto-expiry.
#[derive(Debug)]
pub struct TypingState {
    expiry: Duration,
    deadlines: HashMap<ConversationId, Instant>,
}

impl TypingState {
    pub fn new(expiry: Duration) -> Self {
        Self {
            expiry,
            deadlines: HashMap::new(),
        }
    }

    /// Returns false when the event is ignored: admin-originated, or for a
    /// conversation other than the open one.
    pub fn start(
        &mut self,
        chat: &ConversationId,
        role: Option<SenderRole>,
        open: Option<&ConversationId>,
        now: Instant,
    ) -> bool {
        if role != Some(SenderRole::Counterpart) || open != Some(chat) {
            debug!(conversation_id = %chat, ?role, "typing: start ignored");
            return false;
        }
        self.deadlines.insert(chat.clone(), now + self.expiry);
        true
    }

    pub fn stop(&mut self, chat: &ConversationId, open: Option<&ConversationId>) -> bool {
        if open != Some(chat) {
            return false;
        }
        self.deadlines.remove(chat).is_some()
    }

    pub fn is_typing(&self, chat: &ConversationId) -> bool {
        self.deadlines.contains_key(chat)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Clears every flag whose deadline has passed and returns those conversations.
    pub fn expire(&mut self, now: Instant) -> Vec<ConversationId> {
        let expired: Vec<ConversationId> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(chat, _)| chat.clone())
            .collect();
        for chat in &expired {
            self.deadlines.remove(chat);
        }
        expired
    }

    pub fn cancel(&mut self, chat: &ConversationId) {
        self.deadlines.remove(chat);
    }

    pub fn clear(&mut self) {
        self.deadlines.clear();
    }
}

/// The admin's own typing burst: one `typing` per burst, `stopTyping` after
/// `idle` without input.
#[derive(Debug)]
pub struct OutboundTyping {
    idle: Duration,
    active: Option<(ConversationId, Instant)>,
}

impl OutboundTyping {
    pub fn new(idle: Duration) -> Self {
        Self { idle, active: None }
    }

    /// Extends the burst. Returns true when a new burst starts and `typing`
    /// should be emitted.
    pub fn touch(&mut self, chat: &ConversationId, now: Instant) -> bool {
        let deadline = now + self.idle;
        if let Some((active, until)) = &mut self.active {
            if *active == *chat {
                *until = deadline;
                return false;
            }
        }
        self.active = Some((chat.clone(), deadline));
        true
    }

    /// Ends the burst now, returning the conversation to send `stopTyping` for.
    pub fn finish(&mut self) -> Option<ConversationId> {
        self.active.take().map(|(chat, _)| chat)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.active.as_ref().map(|(_, until)| *until)
    }

    pub fn expire(&mut self, now: Instant) -> Option<ConversationId> {
        match self.deadline() {
            Some(until) if until <= now => self.finish(),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "tests/typing_tests.rs"]
mod tests;
