use crate::conversation::list_conversations;
use crate::messaging::*;
use crate::pager;
use crate::storage::UserId;
use crate::tests::helpers::store_with_users;
use crate::Error;

#[test]
fn test_send_returns_denormalized_record() {
    let (store, users) = store_with_users(&["alice", "bob"]);
    let (a, b) = (&users[0], &users[1]);

    let message = send(&store, &store, &a.id, &b.id, "  hi Bob ").expect("send");
    assert_eq!(message.text, "hi Bob");
    assert_eq!(message.sender, *a);
    assert_eq!(message.receiver, *b);
    assert!(!message.read);
    assert_eq!(message.status_indicator(), "✓");

    let stored = store.get(message.id).expect("get").expect("stored");
    assert_eq!(stored.text, "hi Bob");
    assert_eq!(stored.sender_id, a.id);
    assert_eq!(stored.receiver_id, b.id);
}

#[test]
fn test_send_to_self_is_rejected_without_append() {
    let (store, users) = store_with_users(&["alice"]);
    let a = users[0].id;

    let err = send(&store, &store, &a, &a, "note to self").unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(store.message_count().expect("count"), 0);
}

#[test]
fn test_send_rejects_blank_text() {
    let (store, users) = store_with_users(&["alice", "bob"]);

    let err = send(&store, &store, &users[0].id, &users[1].id, " \n\t ").unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(store.message_count().expect("count"), 0);
}

#[test]
fn test_send_to_unknown_receiver() {
    let (store, users) = store_with_users(&["alice"]);

    let err = send(&store, &store, &users[0].id, &UserId::new(), "hello?").unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(store.message_count().expect("count"), 0);
}

#[test]
fn test_mark_read_idempotent() {
    let (store, users) = store_with_users(&["alice", "bob"]);
    let (a, b) = (users[0].id, users[1].id);

    send(&store, &store, &b, &a, "one").expect("send");
    send(&store, &store, &b, &a, "two").expect("send");

    assert_eq!(mark_read(&store, &a, &b).expect("mark"), 2);
    assert_eq!(mark_read(&store, &a, &b).expect("mark"), 0);
    assert!(matches!(mark_read(&store, &a, &a), Err(Error::Validation(_))));
}

#[test]
fn test_read_receipt_visible_to_sender() {
    let (store, users) = store_with_users(&["alice", "bob"]);
    let (a, b) = (users[0].id, users[1].id);

    let sent = send(&store, &store, &a, &b, "did you get this").expect("send");
    assert!(!sent.read);

    mark_read(&store, &b, &a).expect("mark");

    let p = pager::page(&store, &store, &a, &b, 1, 10).expect("page");
    assert!(p.messages[0].read);
    assert_eq!(p.messages[0].status_indicator(), "✓✓");
}

#[test]
fn test_delete_conversation_is_complete() {
    let (store, users) = store_with_users(&["alice", "bob", "carol"]);
    let (a, b, c) = (users[0].id, users[1].id, users[2].id);

    send(&store, &store, &a, &b, "one").expect("send");
    send(&store, &store, &b, &a, "two").expect("send");
    send(&store, &store, &c, &a, "keep me").expect("send");

    assert_eq!(delete_conversation(&store, &a, &b).expect("delete"), 2);

    let conversations = list_conversations(&store, &store, &a).expect("list");
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0].counterpart_id, c);

    // Gone for the other participant too
    let p = pager::page(&store, &store, &b, &a, 1, 10).expect("page");
    assert!(p.messages.is_empty());
    assert!(!p.has_more);

    assert_eq!(delete_conversation(&store, &b, &a).expect("delete"), 0);
}

#[test]
fn test_delete_conversation_with_self_rejected() {
    let (store, users) = store_with_users(&["alice"]);
    let a = users[0].id;

    assert!(matches!(
        delete_conversation(&store, &a, &a),
        Err(Error::Validation(_))
    ));
}
