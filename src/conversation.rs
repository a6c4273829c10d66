//! Conversation aggregation
//!
//! Conversations are never persisted. For a viewing user they are derived from
//! the message log on every request: one summary per counterpart, carrying the
//! latest message of the pair and the number of messages the viewer has not
//! read yet.

use crate::{
    storage::{Message, Pair, Storage, UserDirectory, UserId, UserProfile},
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// The most recent message of a pair, as shown in the conversation list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    /// Message text
    pub text: String,
    /// Creation time (Unix milliseconds)
    pub created_at: i64,
    /// Who sent it
    pub sender_id: UserId,
}

impl From<&Message> for LastMessage {
    fn from(message: &Message) -> Self {
        Self {
            text: message.text.clone(),
            created_at: message.created_at,
            sender_id: message.sender_id,
        }
    }
}

/// Per-counterpart view of a conversation, relative to one viewer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    /// The other participant
    pub counterpart_id: UserId,
    /// Display fields of the other participant
    pub counterpart: UserProfile,
    /// Latest message in either direction; `None` for a conversation with no messages yet
    pub last_message: Option<LastMessage>,
    /// Messages from the counterpart the viewer has not read
    pub unread_count: usize,
}

impl ConversationSummary {
    /// Creation time of the latest message, or `i64::MIN` when there is none
    pub fn last_activity(&self) -> i64 {
        self.last_message
            .as_ref()
            .map(|m| m.created_at)
            .unwrap_or(i64::MIN)
    }
}

/// Grouping result before profiles are attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationGroup {
    /// The other participant
    pub counterpart_id: UserId,
    /// Latest message of the pair
    pub latest: Message,
    /// Unread messages addressed to the viewer
    pub unread_count: usize,
}

/// Group a viewer's messages by counterpart
///
/// Input may be in any order. The latest message of each group is the one with
/// the greatest `(created_at, id)`. Groups are returned newest activity first.
/// Messages not involving the viewer are ignored.
pub fn aggregate(viewer: &UserId, messages: &[Message]) -> Vec<ConversationGroup> {
    let mut groups: Vec<ConversationGroup> = Vec::new();
    let mut index: HashMap<UserId, usize> = HashMap::new();

    for message in messages {
        if message.sender_id != *viewer && message.receiver_id != *viewer {
            continue;
        }
        let counterpart = message.counterpart_of(viewer);
        let unread = message.receiver_id == *viewer && !message.read;

        match index.get(&counterpart) {
            Some(&i) => {
                let group = &mut groups[i];
                if message.order_key() > group.latest.order_key() {
                    group.latest = message.clone();
                }
                if unread {
                    group.unread_count += 1;
                }
            }
            None => {
                index.insert(counterpart, groups.len());
                groups.push(ConversationGroup {
                    counterpart_id: counterpart,
                    latest: message.clone(),
                    unread_count: usize::from(unread),
                });
            }
        }
    }

    groups.sort_by(|a, b| b.latest.order_key().cmp(&a.latest.order_key()));
    groups
}

/// List the viewer's conversations, most recent activity first
///
/// A viewer with no messages gets an empty list. Counterparts that the
/// directory no longer knows are left out of the result. Never mutates
/// any message.
pub fn list_conversations<D: UserDirectory>(
    store: &Storage,
    directory: &D,
    viewer: &UserId,
) -> Result<Vec<ConversationSummary>> {
    let messages = store.messages_for_viewer(viewer)?;
    let groups = aggregate(viewer, &messages);

    let mut summaries = Vec::with_capacity(groups.len());
    for group in groups {
        let Some(counterpart) = directory.profile(&group.counterpart_id)? else {
            warn!(
                "Skipping conversation of {} with unknown user {}",
                viewer, group.counterpart_id
            );
            continue;
        };
        summaries.push(ConversationSummary {
            counterpart_id: group.counterpart_id,
            counterpart,
            last_message: Some(LastMessage::from(&group.latest)),
            unread_count: group.unread_count,
        });
    }

    debug!("Listed {} conversations for {}", summaries.len(), viewer);
    Ok(summaries)
}

/// Resolve the summary for a conversation the viewer is about to open
///
/// Works for a counterpart the viewer has never exchanged messages with, in
/// which case `last_message` is `None`. Read flags are left untouched.
pub fn start_conversation<D: UserDirectory>(
    store: &Storage,
    directory: &D,
    viewer: &UserId,
    counterpart: &UserId,
) -> Result<ConversationSummary> {
    if viewer == counterpart {
        return Err(Error::Validation(
            "Cannot start conversation with yourself".to_string(),
        ));
    }

    let profile = directory.require_profile(counterpart)?;
    let latest = store.latest_in_pair(&Pair::new(*viewer, *counterpart))?;
    let unread_count = store.unread_count(viewer, counterpart)?;

    Ok(ConversationSummary {
        counterpart_id: *counterpart,
        counterpart: profile,
        last_message: latest.as_ref().map(LastMessage::from),
        unread_count,
    })
}
