//! High-level messaging operations
//!
//! This module provides the user-initiated write operations on top of the
//! message store: sending, acknowledging and deleting. Every failure here is
//! returned to the caller; nothing is retried silently.

use crate::{
    storage::{normalize_text, DirectMessage, Storage, UserDirectory, UserId},
    Error, Result,
};
use tracing::info;

/// Send a text message from `sender` to `receiver`
///
/// The text is trimmed before it is stored. The returned record carries both
/// participants' profiles so the sender's client can apply it immediately.
/// The receiver is not notified; it picks the message up on its next poll.
///
/// # Errors
/// * [`Error::Validation`] - empty text or `sender == receiver`
/// * [`Error::NotFound`] - the receiver (or sender) is not in the directory
///
/// # Example
/// ```rust,no_run
/// use dmsync::messaging::send;
/// use dmsync::storage::{Storage, UserId, UserProfile};
///
/// # fn example() -> dmsync::Result<()> {
/// let store = Storage::new_in_memory()?;
/// let alice = UserProfile::new(UserId::new(), "alice", "Alice");
/// let bob = UserProfile::new(UserId::new(), "bob", "Bob");
/// store.upsert_user(&alice)?;
/// store.upsert_user(&bob)?;
///
/// let message = send(&store, &store, &alice.id, &bob.id, "  hi Bob ")?;
/// assert_eq!(message.text, "hi Bob");
/// # Ok(())
/// # }
/// ```
pub fn send<D: UserDirectory>(
    store: &Storage,
    directory: &D,
    sender: &UserId,
    receiver: &UserId,
    text: &str,
) -> Result<DirectMessage> {
    if sender == receiver {
        return Err(Error::Validation(
            "Cannot send a message to yourself".to_string(),
        ));
    }
    let text = normalize_text(text)?;

    let receiver_profile = directory
        .profile(receiver)?
        .ok_or_else(|| Error::NotFound(format!("Receiver not found: {}", receiver)))?;
    let sender_profile = directory.require_profile(sender)?;

    let message = store.append(sender, receiver, &text)?;
    info!("Message {} sent from {} to {}", message.id, sender, receiver);

    Ok(DirectMessage::populate(message, sender_profile, receiver_profile))
}

/// Mark every unread message from `counterpart` to `viewer` as read
///
/// Idempotent: a second call right after the first returns 0.
pub fn mark_read(store: &Storage, viewer: &UserId, counterpart: &UserId) -> Result<usize> {
    if viewer == counterpart {
        return Err(Error::Validation(
            "Cannot mark a conversation with yourself".to_string(),
        ));
    }
    let modified = store.mark_read(viewer, counterpart)?;
    if modified > 0 {
        info!("{} read {} messages from {}", viewer, modified, counterpart);
    }
    Ok(modified)
}

/// Delete the whole conversation between `viewer` and `counterpart`
///
/// Removes messages in both directions and returns how many were removed.
/// Deleting an empty conversation is not an error.
pub fn delete_conversation(store: &Storage, viewer: &UserId, counterpart: &UserId) -> Result<usize> {
    if viewer == counterpart {
        return Err(Error::Validation(
            "Cannot delete a conversation with yourself".to_string(),
        ));
    }
    let deleted = store.delete_pair(viewer, counterpart)?;
    info!(
        "{} deleted conversation with {} ({} messages)",
        viewer, counterpart, deleted
    );
    Ok(deleted)
}
