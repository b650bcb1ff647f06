use chrono::Duration;

use super::*;

fn update(chat: &str, online: bool, last_seen: Option<DateTime<Utc>>) -> PresencePayload {
    PresencePayload {
        chat_id: ConversationId::from(chat),
        online,
        last_seen,
        user_name: Some("Mai".to_string()),
    }
}

#[test]
fn updates_touch_only_the_referenced_conversation() {
    let mut tracker = PresenceTracker::new();
    tracker.apply(&update("c1", true, None), None);
    tracker.apply(&update("c2", true, None), None);

    let header = tracker.apply(&update("c2", false, Some(Utc::now())), Some(&ConversationId::from("c1")));

    assert_eq!(header, None);
    assert!(tracker.is_online(&ConversationId::from("c1")));
    assert!(!tracker.is_online(&ConversationId::from("c2")));
    assert!(tracker.get(&ConversationId::from("c2")).is_some_and(|record| record.last_seen.is_some()));
}

#[test]
fn open_conversation_update_is_returned_for_header() {
    let mut tracker = PresenceTracker::new();
    let open = ConversationId::from("c1");
    let header = tracker
        .apply(&update("c1", true, None), Some(&open))
        .expect("header refresh");
    assert!(header.online);
    assert_eq!(header.who.as_deref(), Some("Mai"));
}

#[test]
fn last_seen_labels() {
    let now = Utc::now();
    assert_eq!(last_seen_label(now - Duration::seconds(20), now), "just now");
    assert_eq!(last_seen_label(now - Duration::minutes(1), now), "1 minute ago");
    assert_eq!(last_seen_label(now - Duration::minutes(42), now), "42 minutes ago");
    assert_eq!(last_seen_label(now - Duration::hours(3), now), "3 hours ago");
    assert_eq!(last_seen_label(now - Duration::hours(30), now), "yesterday");
    assert_eq!(last_seen_label(now - Duration::days(5), now), "5 days ago");
    assert_eq!(last_seen_label(now + Duration::minutes(2), now), "just now");
}

#[test]
fn status_label_prefers_online_flag() {
    let now = Utc::now();
    let offline = PresenceRecord {
        online: false,
        last_seen: Some(now - Duration::minutes(5)),
        who: None,
    };
    assert_eq!(offline.status_label(now), "last seen 5 minutes ago");
    assert_eq!(PresenceRecord::default().status_label(now), "offline");
    assert_eq!(
        PresenceRecord {
            online: true,
            ..offline
        }
        .status_label(now),
        "online"
    );
}
