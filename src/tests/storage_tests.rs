use crate::storage::*;
use crate::tests::helpers::store_with_users;
use crate::Error;
use tempfile::TempDir;

#[test]
fn test_user_id_parse_roundtrip() {
    let id = UserId::new();
    let parsed = UserId::parse(&id.to_string()).expect("Failed to parse id");
    assert_eq!(id, parsed);
}

#[test]
fn test_user_id_rejects_malformed_and_nil() {
    assert!(matches!(UserId::parse("not-a-uuid"), Err(Error::Validation(_))));
    assert!(matches!(UserId::parse(""), Err(Error::Validation(_))));
    assert!(matches!(
        UserId::parse("00000000-0000-0000-0000-000000000000"),
        Err(Error::Validation(_))
    ));
}

#[test]
fn test_pair_is_unordered() {
    let a = UserId::new();
    let b = UserId::new();
    assert_eq!(Pair::new(a, b), Pair::new(b, a));
    assert!(!Pair::new(a, b).is_self_pair());
    assert!(Pair::new(a, a).is_self_pair());
}

#[test]
fn test_normalize_text() {
    assert_eq!(normalize_text("  hello \n").expect("valid"), "hello");
    assert!(matches!(normalize_text("   \t\n"), Err(Error::Validation(_))));
    assert!(matches!(normalize_text(""), Err(Error::Validation(_))));
}

#[test]
fn test_directory_lookup() {
    let (store, users) = store_with_users(&["alice"]);

    let found = store.profile(&users[0].id).expect("Lookup failed");
    assert_eq!(found, Some(users[0].clone()));

    let missing = store.profile(&UserId::new()).expect("Lookup failed");
    assert!(missing.is_none());

    let err = store.require_profile(&UserId::new()).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[test]
fn test_upsert_user_updates_profile() {
    let (store, users) = store_with_users(&["alice"]);
    let updated = users[0].clone().with_profile_pic("https://cdn.example/alice.png");

    store.upsert_user(&updated).expect("Failed to update user");

    let found = store.require_profile(&users[0].id).expect("Lookup failed");
    assert_eq!(found.profile_pic.as_deref(), Some("https://cdn.example/alice.png"));
}

#[test]
fn test_append_trims_and_assigns_increasing_ids() {
    let (store, users) = store_with_users(&["alice", "bob"]);
    let (a, b) = (users[0].id, users[1].id);

    let first = store.append(&a, &b, "  hello  ").expect("Failed to append");
    let second = store.append(&b, &a, "hi").expect("Failed to append");

    assert_eq!(first.text, "hello");
    assert!(!first.read);
    assert_eq!(first.message_type, MessageType::Text);
    assert!(second.id > first.id);

    let stored = store.get(first.id).expect("Lookup failed").expect("Message missing");
    assert_eq!(stored, first);
}

#[test]
fn test_append_rejects_invalid_input() {
    let (store, users) = store_with_users(&["alice", "bob"]);
    let (a, b) = (users[0].id, users[1].id);

    assert!(matches!(store.append(&a, &b, "   "), Err(Error::Validation(_))));
    assert!(matches!(store.append(&a, &a, "hi"), Err(Error::Validation(_))));
    assert!(matches!(
        store.append(&a, &UserId::new(), "hi"),
        Err(Error::NotFound(_))
    ));

    assert_eq!(store.message_count().expect("Count failed"), 0);
}

#[test]
fn test_find_returns_ascending_with_id_tiebreak() {
    let (store, users) = store_with_users(&["alice", "bob", "carol"]);
    let (a, b, c) = (users[0].id, users[1].id, users[2].id);

    let m3 = store.append_at(&a, &b, "third", 3_000).expect("append");
    let m1 = store.append_at(&b, &a, "first", 1_000).expect("append");
    let m2a = store.append_at(&a, &b, "second-a", 2_000).expect("append");
    let m2b = store.append_at(&b, &a, "second-b", 2_000).expect("append");
    store.append_at(&a, &c, "other pair", 1_500).expect("append");

    let messages = store.find(&Pair::new(a, b), Pagination::all()).expect("find");
    let ids: Vec<i64> = messages.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![m1.id, m2a.id, m2b.id, m3.id]);
}

#[test]
fn test_find_window_counts_from_newest() {
    let (store, users) = store_with_users(&["alice", "bob"]);
    let (a, b) = (users[0].id, users[1].id);

    for i in 0..5 {
        store
            .append_at(&a, &b, &format!("m{}", i), 1_000 + i)
            .expect("append");
    }

    let newest = store
        .find(&Pair::new(a, b), Pagination::newest(0, 2))
        .expect("find");
    let texts: Vec<&str> = newest.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["m3", "m4"]);

    let older = store
        .find(&Pair::new(b, a), Pagination::newest(2, 2))
        .expect("find");
    let texts: Vec<&str> = older.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["m1", "m2"]);

    let past_end = store
        .find(&Pair::new(a, b), Pagination::newest(10, 2))
        .expect("find");
    assert!(past_end.is_empty());
}

#[test]
fn test_mark_read_is_idempotent_and_directional() {
    let (store, users) = store_with_users(&["alice", "bob"]);
    let (a, b) = (users[0].id, users[1].id);

    store.append(&b, &a, "one").expect("append");
    store.append(&b, &a, "two").expect("append");
    store.append(&a, &b, "reply").expect("append");

    assert_eq!(store.unread_count(&a, &b).expect("count"), 2);
    assert_eq!(store.mark_read(&a, &b).expect("mark"), 2);
    assert_eq!(store.mark_read(&a, &b).expect("mark"), 0);
    assert_eq!(store.unread_count(&a, &b).expect("count"), 0);

    // Alice's own message is still unread for Bob
    assert_eq!(store.unread_count(&b, &a).expect("count"), 1);
}

#[test]
fn test_mark_read_and_find_reflects_acknowledgement() {
    let (store, users) = store_with_users(&["alice", "bob"]);
    let (a, b) = (users[0].id, users[1].id);

    store.append(&b, &a, "hello").expect("append");
    store.append(&a, &b, "hey").expect("append");

    let (marked, messages) = store
        .mark_read_and_find(&a, &b, Pagination::all())
        .expect("mark and find");
    assert_eq!(marked, 1);
    assert!(messages[0].read, "Incoming message should come back read");
    assert!(!messages[1].read, "Outgoing message stays unread until Bob looks");
}

#[test]
fn test_delete_pair_only_touches_that_pair() {
    let (store, users) = store_with_users(&["alice", "bob", "carol"]);
    let (a, b, c) = (users[0].id, users[1].id, users[2].id);

    store.append(&a, &b, "ab").expect("append");
    store.append(&b, &a, "ba").expect("append");
    store.append(&a, &c, "ac").expect("append");

    assert_eq!(store.delete_pair(&b, &a).expect("delete"), 2);
    assert_eq!(store.count_pair(&Pair::new(a, b)).expect("count"), 0);
    assert_eq!(store.count_pair(&Pair::new(a, c)).expect("count"), 1);
    assert_eq!(store.delete_pair(&a, &b).expect("delete"), 0);
}

#[test]
fn test_latest_in_pair() {
    let (store, users) = store_with_users(&["alice", "bob"]);
    let (a, b) = (users[0].id, users[1].id);

    assert!(store.latest_in_pair(&Pair::new(a, b)).expect("latest").is_none());

    store.append_at(&a, &b, "old", 1_000).expect("append");
    let newest = store.append_at(&b, &a, "new", 2_000).expect("append");

    let latest = store.latest_in_pair(&Pair::new(a, b)).expect("latest");
    assert_eq!(latest, Some(newest));
}

#[test]
fn test_file_backed_store_persists() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("nested").join("messages.db");

    let alice = UserProfile::new(UserId::new(), "alice", "Alice");
    let bob = UserProfile::new(UserId::new(), "bob", "Bob");

    {
        let store = Storage::new(&path).expect("Failed to open store");
        store.upsert_user(&alice).expect("add user");
        store.upsert_user(&bob).expect("add user");
        store.append(&alice.id, &bob.id, "persisted").expect("append");
    }

    let reopened = Storage::new(&path).expect("Failed to reopen store");
    let messages = reopened
        .find(&Pair::new(alice.id, bob.id), Pagination::all())
        .expect("find");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "persisted");
}

#[test]
fn test_message_serializes_camel_case() {
    let (store, users) = store_with_users(&["alice", "bob"]);
    let message = store
        .append(&users[0].id, &users[1].id, "hi")
        .expect("append");

    let json = serde_json::to_value(&message).expect("Failed to serialize");
    assert_eq!(json["senderId"], users[0].id.to_string());
    assert_eq!(json["receiverId"], users[1].id.to_string());
    assert_eq!(json["messageType"], "text");
    assert_eq!(json["read"], false);
}
