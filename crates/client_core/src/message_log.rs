//! The open conversation's message log and its reconciliation rules.
//!
//! A log never holds two entries for one logical message. A provisional entry
//! is confirmed in place: either exactly, when the backend echoes the
//! provisional id, or by matching content, sender and a creation time within
//! the confirmation window. History merges against whatever pushes already
//! delivered instead of overwriting them.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use shared::{
    domain::{DeliveryState, MessageId, SenderRole},
    protocol::{MessagePayload, DEFAULT_MESSAGE_TYPE},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: MessageId,
    pub content: String,
    pub sender: SenderRole,
    pub created_at: DateTime<Utc>,
    pub message_type: String,
    pub state: DeliveryState,
}

impl LogEntry {
    pub fn is_provisional(&self) -> bool {
        self.id.is_provisional()
    }
}

impl From<&MessagePayload> for LogEntry {
    fn from(payload: &MessagePayload) -> Self {
        Self {
            id: payload.id.clone(),
            content: payload.content.clone(),
            sender: payload.sender,
            created_at: payload.created_at,
            message_type: payload.message_type.clone(),
            state: if payload.is_read {
                DeliveryState::Read
            } else {
                DeliveryState::Confirmed
            },
        }
    }
}

/// How a push was absorbed into the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Appended,
    /// A provisional entry took the durable id in place.
    Confirmed { provisional: MessageId },
    Duplicate,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct MessageLog {
    entries: Vec<LogEntry>,
    window: chrono::Duration,
}

impl MessageLog {
    pub fn new(window: std::time::Duration) -> Self {
        Self {
            entries: Vec::new(),
            window: chrono::Duration::from_std(window).unwrap_or(chrono::Duration::seconds(5)),
        }
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, id: &MessageId) -> Option<&LogEntry> {
        self.entries.iter().find(|entry| entry.id == *id)
    }

    /// Appends a locally authored message as Pending and returns its provisional id.
    pub fn push_provisional(&mut self, content: &str, created_at: DateTime<Utc>) -> MessageId {
        let id = MessageId::provisional();
        self.entries.push(LogEntry {
            id: id.clone(),
            content: content.to_string(),
            sender: SenderRole::Admin,
            created_at,
            message_type: DEFAULT_MESSAGE_TYPE.to_string(),
            state: DeliveryState::Pending,
        });
        id
    }

    /// Absorbs a pushed message: known ids are duplicates, a matching pending
    /// provisional entry is confirmed in place, anything else is appended.
    pub fn apply_pushed(&mut self, payload: &MessagePayload) -> Applied {
        if self.get(&payload.id).is_some() {
            return Applied::Duplicate;
        }
        if let Some(index) = self.matching_provisional(payload) {
            let entry = &mut self.entries[index];
            let provisional = std::mem::replace(&mut entry.id, payload.id.clone());
            entry.created_at = payload.created_at;
            entry.state = DeliveryState::Confirmed;
            return Applied::Confirmed { provisional };
        }
        self.entries.push(LogEntry::from(payload));
        Applied::Appended
    }

    /// Exact confirmation from an echoed provisional id.
    pub fn confirm(
        &mut self,
        provisional: &MessageId,
        durable: &MessageId,
        created_at: Option<DateTime<Utc>>,
    ) -> Applied {
        if self.get(durable).is_some() {
            // The message already arrived under its durable id; drop the
            // provisional twin if one is somehow still pending.
            let before = self.entries.len();
            self.entries.retain(|entry| entry.id != *provisional);
            return if before == self.entries.len() {
                Applied::Duplicate
            } else {
                Applied::Confirmed {
                    provisional: provisional.clone(),
                }
            };
        }
        let Some(entry) = self.entries.iter_mut().find(|entry| entry.id == *provisional) else {
            return Applied::Unknown;
        };
        entry.id = durable.clone();
        if let Some(created_at) = created_at {
            entry.created_at = created_at;
        }
        if entry.state == DeliveryState::Pending {
            entry.state = DeliveryState::Confirmed;
        }
        Applied::Confirmed {
            provisional: provisional.clone(),
        }
    }

    /// History first, in fetch order; then every existing entry history does
    /// not already contain. A provisional entry that history confirms by the
    /// heuristic is dropped in favour of the durable one.
    pub fn merge_history(&mut self, history: &[MessagePayload]) {
        let mut merged: Vec<LogEntry> = Vec::with_capacity(history.len() + self.entries.len());
        let mut seen: HashSet<MessageId> = HashSet::new();
        for payload in history {
            if seen.insert(payload.id.clone()) {
                merged.push(LogEntry::from(payload));
            }
        }

        // A history payload the log already holds under its durable id has
        // been accounted for and cannot confirm another pending send.
        let mut claimed: HashSet<MessageId> = self
            .entries
            .iter()
            .filter(|entry| seen.contains(&entry.id))
            .map(|entry| entry.id.clone())
            .collect();
        for entry in std::mem::take(&mut self.entries) {
            if seen.contains(&entry.id) {
                continue;
            }
            if entry.is_provisional() && entry.state == DeliveryState::Pending {
                let confirmed_by = history.iter().find(|payload| {
                    !claimed.contains(&payload.id) && self.matches(&entry, payload)
                });
                if let Some(payload) = confirmed_by {
                    claimed.insert(payload.id.clone());
                    continue;
                }
            }
            merged.push(entry);
        }
        self.entries = merged;
    }

    pub fn remove(&mut self, id: &MessageId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != *id);
        before != self.entries.len()
    }

    /// The counterpart read the conversation: confirmed admin entries become Read.
    pub fn mark_read_by_counterpart(&mut self) -> usize {
        let mut changed = 0;
        for entry in &mut self.entries {
            if entry.sender == SenderRole::Admin && entry.state == DeliveryState::Confirmed {
                entry.state = DeliveryState::Read;
                changed += 1;
            }
        }
        changed
    }

    fn matching_provisional(&self, payload: &MessagePayload) -> Option<usize> {
        self.entries.iter().position(|entry| {
            entry.is_provisional()
                && entry.state == DeliveryState::Pending
                && self.matches(entry, payload)
        })
    }

    fn matches(&self, entry: &LogEntry, payload: &MessagePayload) -> bool {
        entry.content == payload.content
            && entry.sender == payload.sender
            && (entry.created_at - payload.created_at).abs() < self.window
    }
}

#[cfg(test)]
#[path = "tests/message_log_tests.rs"]
mod tests;
