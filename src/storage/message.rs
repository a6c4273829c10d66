//! Message structures, user identifiers and the denormalized message record

use crate::{storage::user::UserProfile, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// User identifier supplied by the identity provider
///
/// Wraps a UUID. The nil UUID is treated as malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    /// Generate a fresh random user id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID, rejecting the nil value
    pub fn from_uuid(uuid: Uuid) -> Result<Self> {
        if uuid.is_nil() {
            return Err(Error::Validation("User ID must not be nil".to_string()));
        }
        Ok(Self(uuid))
    }

    /// Parse a user id from its textual form
    pub fn parse(value: &str) -> Result<Self> {
        let uuid = Uuid::parse_str(value.trim())
            .map_err(|_| Error::Validation(format!("Malformed user ID: {}", value)))?;
        Self::from_uuid(uuid)
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for UserId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Message content variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Plain text message
    #[default]
    Text,
    /// Image attachment (reserved)
    Image,
    /// File attachment (reserved)
    File,
}

impl MessageType {
    /// Stored representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::File => "file",
        }
    }

    /// Parse the stored representation
    pub fn from_str_opt(value: &str) -> Option<Self> {
        match value {
            "text" => Some(MessageType::Text),
            "image" => Some(MessageType::Image),
            "file" => Some(MessageType::File),
            _ => None,
        }
    }
}

/// A direct message as held by the message store
///
/// Immutable once created except for `read`, which only moves from false to true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Store-assigned id, increasing with creation order
    pub id: i64,
    /// Sender user id
    pub sender_id: UserId,
    /// Receiver user id
    pub receiver_id: UserId,
    /// Trimmed, non-empty message text
    pub text: String,
    /// Whether the receiver has seen the message
    pub read: bool,
    /// Creation time (Unix milliseconds)
    pub created_at: i64,
    /// Content variant
    #[serde(default)]
    pub message_type: MessageType,
}

impl Message {
    /// The other participant of this message relative to `viewer`
    pub fn counterpart_of(&self, viewer: &UserId) -> UserId {
        if self.sender_id == *viewer {
            self.receiver_id
        } else {
            self.sender_id
        }
    }

    /// Whether the message belongs to the unordered pair `{a, b}`
    pub fn in_pair(&self, a: &UserId, b: &UserId) -> bool {
        (self.sender_id == *a && self.receiver_id == *b)
            || (self.sender_id == *b && self.receiver_id == *a)
    }

    /// Ordering key: creation time, ties broken by id
    pub fn order_key(&self) -> (i64, i64) {
        (self.created_at, self.id)
    }
}

/// Message record with sender and receiver profiles filled in
///
/// This is the shape handed to clients by send and paging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectMessage {
    /// Store-assigned id
    pub id: i64,
    /// Sender profile
    pub sender: UserProfile,
    /// Receiver profile
    pub receiver: UserProfile,
    /// Message text
    pub text: String,
    /// Read flag
    pub read: bool,
    /// Creation time (Unix milliseconds)
    pub created_at: i64,
    /// Content variant
    #[serde(default)]
    pub message_type: MessageType,
}

impl DirectMessage {
    /// Combine a stored message with the participants' profiles
    pub fn populate(message: Message, sender: UserProfile, receiver: UserProfile) -> Self {
        Self {
            id: message.id,
            sender,
            receiver,
            text: message.text,
            read: message.read,
            created_at: message.created_at,
            message_type: message.message_type,
        }
    }

    /// Sender user id
    pub fn sender_id(&self) -> UserId {
        self.sender.id
    }

    /// Receiver user id
    pub fn receiver_id(&self) -> UserId {
        self.receiver.id
    }

    /// Ordering key: creation time, ties broken by id
    pub fn order_key(&self) -> (i64, i64) {
        (self.created_at, self.id)
    }

    /// Receipt indicator for the sender's view
    pub fn status_indicator(&self) -> &str {
        if self.read { "✓✓" } else { "✓" }
    }
}
