use shared::domain::SenderRole;

use crate::test_support::{at, conversation, message};

use super::*;

fn chat(id: &str) -> ConversationId {
    ConversationId::from(id)
}

#[test]
fn pushes_create_rows_and_fetches_keep_them() {
    let mut list = ConversationList::default();
    list.apply_update(&ChatUpdatePayload {
        chat_id: chat("c9"),
        last_message: Some("new patient".to_string()),
        unread_count: Some(1),
        last_message_time: Some(at(5)),
    });
    list.merge_fetched(&[conversation("c1", 2), conversation("c2", 0)]);

    let ids: Vec<_> = list.items().iter().map(|item| item.id.as_str()).collect();
    assert_eq!(ids, ["c1", "c2", "c9"]);
    let pushed = list.get(&chat("c9")).expect("row from push");
    assert_eq!(pushed.counterpart, UNKNOWN_COUNTERPART);
    assert_eq!(pushed.unread, 1);
}

#[test]
fn chat_update_overrides_only_present_fields() {
    let mut list = ConversationList::default();
    let mut fetched = conversation("c1", 4);
    fetched.last_message = Some("earlier".to_string());
    list.merge_fetched(&[fetched]);

    list.apply_update(&ChatUpdatePayload {
        chat_id: chat("c1"),
        last_message: None,
        unread_count: Some(0),
        last_message_time: None,
    });

    let row = list.get(&chat("c1")).expect("row");
    assert_eq!(row.last_message.as_deref(), Some("earlier"));
    assert_eq!(row.unread, 0);
}

fn unread(list: &ConversationList, id: &str) -> u32 {
    list.get(&chat(id)).expect("row").unread
}

fn unread_update(id: &str, count: u32) -> ChatUpdatePayload {
    ChatUpdatePayload {
        chat_id: chat(id),
        last_message: None,
        unread_count: Some(count),
        last_message_time: None,
    }
}

#[test]
fn unread_follows_chat_update_in_either_arrival_order() {
    let mut list = ConversationList::default();
    list.merge_fetched(&[conversation("c1", 0), conversation("c2", 0)]);
    let hello = message("m1", "c1", "hello", SenderRole::Counterpart, 1);
    let again = message("m2", "c2", "again", SenderRole::Counterpart, 1);

    list.apply_update(&unread_update("c1", 1));
    list.note_message(&chat("c1"), &hello);

    list.note_message(&chat("c2"), &again);
    list.apply_update(&unread_update("c2", 1));

    assert_eq!(unread(&list, "c1"), 1);
    assert_eq!(unread(&list, "c2"), 1);
    assert_eq!(list.get(&chat("c1")).expect("c1").last_message.as_deref(), Some("hello"));
}

#[test]
fn pushed_messages_refresh_preview_and_read_clears_unread() {
    let mut list = ConversationList::default();
    list.merge_fetched(&[conversation("c1", 0), conversation("c2", 2)]);

    list.note_message(&chat("c2"), &message("m3", "c2", "reply", SenderRole::Admin, 3));

    let c2 = list.get(&chat("c2")).expect("c2");
    assert_eq!(c2.unread, 2);
    assert_eq!(c2.last_message.as_deref(), Some("reply"));
    assert_eq!(unread(&list, "c1"), 0);

    list.mark_read(&chat("c2"));
    list.set_status(&chat("c2"), ConversationStatus::Closed);
    let c2 = list.get(&chat("c2")).expect("c2");
    assert_eq!((c2.unread, c2.status), (0, ConversationStatus::Closed));
}
