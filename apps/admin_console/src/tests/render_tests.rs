use chrono::DateTime;
use client_core::OpenConversation;
use shared::domain::ConversationStatus;

use super::*;

fn entry(id: &str, sender: SenderRole, state: DeliveryState) -> LogEntry {
    LogEntry {
        id: MessageId::from(id),
        content: format!("text {id}"),
        sender,
        created_at: DateTime::from_timestamp(1_760_000_000, 0).expect("timestamp"),
        message_type: "text".to_string(),
        state,
    }
}

fn open_with(messages: Vec<LogEntry>) -> ChatSnapshot {
    ChatSnapshot {
        connection: ConnectionState::Connected,
        open: Some(OpenConversation {
            id: ConversationId::from("c1"),
            generation: 1,
            messages,
            history: LoadState::Ready,
            counterpart_typing: false,
            presence: None,
        }),
        ..ChatSnapshot::default()
    }
}

#[test]
fn rows_show_presence_and_unread_badge() {
    let row = ConversationRow {
        summary: ConversationSummary {
            id: ConversationId::from("c1"),
            counterpart: "Linh".to_string(),
            last_message: Some("hello".to_string()),
            last_message_time: None,
            unread: 2,
            status: ConversationStatus::Active,
        },
        online: true,
    };
    assert_eq!(conversation_line(&row), "* c1  Linh [2]  hello");
}

#[test]
fn pending_lines_offer_resend() {
    let line = message_line(&entry("temp-9", SenderRole::Admin, DeliveryState::Pending));
    assert!(line.ends_with("you: text temp-9  (pending, /resend temp-9)"), "{line}");
}

#[test]
fn follower_prints_only_new_entries_and_confirmations() {
    let mut follower = Follower::default();
    let first = follower.render(&open_with(vec![
        entry("m1", SenderRole::Counterpart, DeliveryState::Confirmed),
        entry("temp-1", SenderRole::Admin, DeliveryState::Pending),
    ]));
    assert_eq!(first[0], "[connection] connected");
    assert_eq!(first[1], "== c1 (offline) ==");
    assert_eq!(first.len(), 4);

    let second = follower.render(&open_with(vec![
        entry("m1", SenderRole::Counterpart, DeliveryState::Confirmed),
        entry("m2", SenderRole::Admin, DeliveryState::Confirmed),
    ]));
    assert_eq!(second, ["  delivered as m2"]);

    let mut typing = open_with(vec![]);
    if let Some(open) = typing.open.as_mut() {
        open.counterpart_typing = true;
    }
    assert_eq!(follower.render(&typing), ["  ...typing"]);
    assert!(follower.render(&typing).is_empty());
}
