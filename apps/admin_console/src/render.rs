use std::collections::HashSet;

use chrono::{Local, Utc};
use client_core::{
    conversations::ConversationSummary, message_log::LogEntry, BranchOverview, ChatSnapshot,
    ConnectionState, ConversationRow, LoadState,
};
use shared::domain::{ConversationId, DeliveryState, MessageId, SenderRole};
use tokio::sync::watch;

pub fn branch_line(branch: &BranchOverview) -> String {
    let mut line = format!(
        "{}  {}  active: {}  unread: {}",
        branch.id, branch.name, branch.active_chats, branch.total_unread
    );
    if let Some(address) = &branch.address {
        line.push_str(&format!("  ({address})"));
    }
    line
}

pub fn conversation_line(row: &ConversationRow) -> String {
    let ConversationSummary {
        id,
        counterpart,
        last_message,
        unread,
        ..
    } = &row.summary;
    let dot = if row.online { "*" } else { " " };
    let badge = if *unread > 0 {
        format!(" [{unread}]")
    } else {
        String::new()
    };
    format!(
        "{dot} {id}  {counterpart}{badge}  {}",
        last_message.as_deref().unwrap_or("")
    )
}

pub fn message_line(entry: &LogEntry) -> String {
    let who = match entry.sender {
        SenderRole::Admin => "you",
        SenderRole::Counterpart => "them",
    };
    let state = match entry.state {
        DeliveryState::Pending => format!("  (pending, /resend {})", entry.id),
        DeliveryState::Read if entry.sender == SenderRole::Admin => "  (read)".to_string(),
        _ => String::new(),
    };
    format!(
        "{} {who}: {}{state}",
        entry.created_at.with_timezone(&Local).format("%H:%M"),
        entry.content
    )
}

/// Prints what changed between consecutive snapshots.
#[derive(Default)]
pub struct Follower {
    connection: Option<ConnectionState>,
    open: Option<ConversationId>,
    printed: HashSet<MessageId>,
    typing: bool,
    list_state: LoadState,
    history: LoadState,
}

impl Follower {
    pub fn render(&mut self, snapshot: &ChatSnapshot) -> Vec<String> {
        let mut out = Vec::new();
        if self.connection != Some(snapshot.connection) {
            self.connection = Some(snapshot.connection);
            out.push(format!("[connection] {:?}", snapshot.connection).to_lowercase());
        }

        if snapshot.conversations_state != self.list_state {
            match &snapshot.conversations_state {
                LoadState::Ready => out.extend(snapshot.conversations.iter().map(conversation_line)),
                LoadState::Failed(reason) => {
                    out.push(format!("[conversations] failed to load: {reason}"))
                }
                LoadState::Idle | LoadState::Loading => {}
            }
            self.list_state = snapshot.conversations_state.clone();
        }

        let Some(open) = &snapshot.open else {
            self.open = None;
            self.printed.clear();
            return out;
        };
        if self.open.as_ref() != Some(&open.id) {
            self.open = Some(open.id.clone());
            self.printed.clear();
            self.typing = false;
            self.history = LoadState::Idle;
            let status = open
                .presence
                .as_ref()
                .map(|presence| presence.status_label(Utc::now()))
                .unwrap_or_else(|| "offline".to_string());
            out.push(format!("== {} ({status}) ==", open.id));
        }
        if open.history != self.history {
            if let LoadState::Failed(reason) = &open.history {
                out.push(format!("[history] failed: {reason}, /open {} to retry", open.id));
            }
            self.history = open.history.clone();
        }

        let live: HashSet<&MessageId> = open.messages.iter().map(|entry| &entry.id).collect();
        let confirmed_any = self
            .printed
            .iter()
            .any(|id| id.is_provisional() && !live.contains(id));
        for entry in &open.messages {
            if self.printed.contains(&entry.id) {
                continue;
            }
            if confirmed_any && entry.sender == SenderRole::Admin && !entry.is_provisional() {
                out.push(format!("  delivered as {}", entry.id));
            } else {
                out.push(message_line(entry));
            }
        }
        self.printed = open.messages.iter().map(|entry| entry.id.clone()).collect();

        if open.counterpart_typing && !self.typing {
            out.push("  ...typing".to_string());
        }
        self.typing = open.counterpart_typing;
        out
    }
}

pub async fn follow(mut snapshots: watch::Receiver<ChatSnapshot>) {
    let mut follower = Follower::default();
    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        for line in follower.render(&snapshot) {
            println!("{line}");
        }
        if snapshots.changed().await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
#[path = "tests/render_tests.rs"]
mod tests;
