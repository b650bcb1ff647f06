//! Online/last-seen overlay for every conversation the view knows about.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use shared::{domain::ConversationId, protocol::PresencePayload};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceRecord {
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub who: Option<String>,
}

impl PresenceRecord {
    /// Header text: "online", a relative last-seen time, or "offline" when the
    /// backend never reported one.
    pub fn status_label(&self, now: DateTime<Utc>) -> String {
        if self.online {
            return "online".to_string();
        }
        match self.last_seen {
            Some(last_seen) => format!("last seen {}", last_seen_label(last_seen, now)),
            None => "offline".to_string(),
        }
    }
}

pub fn last_seen_label(last_seen: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(last_seen);
    let minutes = elapsed.num_minutes();
    if minutes < 1 {
        "just now".to_string()
    } else if minutes < 60 {
        plural(minutes, "minute")
    } else if elapsed.num_hours() < 24 {
        plural(elapsed.num_hours(), "hour")
    } else if elapsed.num_days() < 2 {
        "yesterday".to_string()
    } else {
        format!("{} days ago", elapsed.num_days())
    }
}

fn plural(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{count} {unit}s ago")
    }
}

#[derive(Debug, Default)]
pub struct PresenceTracker {
    records: HashMap<ConversationId, PresenceRecord>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the record for the referenced conversation only. Returns the
    /// new record when that conversation is the open one, so the caller can
    /// refresh the header from the same update.
    pub fn apply(
        &mut self,
        update: &PresencePayload,
        open: Option<&ConversationId>,
    ) -> Option<PresenceRecord> {
        let record = PresenceRecord {
            online: update.online,
            last_seen: update.last_seen,
            who: update.user_name.clone(),
        };
        self.records.insert(update.chat_id.clone(), record.clone());
        (open == Some(&update.chat_id)).then_some(record)
    }

    pub fn get(&self, chat: &ConversationId) -> Option<&PresenceRecord> {
        self.records.get(chat)
    }

    pub fn is_online(&self, chat: &ConversationId) -> bool {
        self.records.get(chat).is_some_and(|record| record.online)
    }
}

#[cfg(test)]
#[path = "tests/presence_tests.rs"]
mod tests;
