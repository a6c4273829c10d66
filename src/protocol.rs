//! Protocol module
//!
//! JSON request and response bodies for the messaging HTTP surface. Field
//! names are camelCase on the wire. Ids in request bodies are carried as plain
//! strings so that a malformed id surfaces as a validation error instead of a
//! body-parsing failure.

use crate::{
    conversation::ConversationSummary,
    pager::MessagePage,
    storage::DirectMessage,
    Error, Result,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Header carrying the authenticated viewer id, set by the identity provider
pub const VIEWER_HEADER: &str = "x-user-id";

/// Body of `POST /messages/send`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    /// Receiver user id
    pub receiver_id: String,
    /// Message text
    pub text: String,
}

/// Body of `POST /messages/start`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartConversationRequest {
    /// Counterpart user id
    pub user_id: String,
}

/// Response of `GET /messages/conversations`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationsResponse {
    /// Always true
    pub success: bool,
    /// Summaries, most recent first
    pub conversations: Vec<ConversationSummary>,
}

/// Response of `POST /messages/start`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    /// Always true
    pub success: bool,
    /// Summary of the conversation being opened
    pub conversation: ConversationSummary,
}

/// Response of `GET /messages/{userId}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesResponse {
    /// Always true
    pub success: bool,
    /// The page itself
    #[serde(flatten)]
    pub page: MessagePage,
}

/// Response of `POST /messages/send`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    /// Always true
    pub success: bool,
    /// The stored message with profiles attached
    pub message: DirectMessage,
}

/// Response of `POST /messages/{userId}/read`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadResponse {
    /// Always true
    pub success: bool,
    /// Messages that changed from unread to read
    pub modified_count: usize,
}

/// Response of `DELETE /messages/conversations/{userId}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    /// Always true
    pub success: bool,
    /// Messages removed
    pub deleted: usize,
}

/// Body of every failed request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Always false
    pub success: bool,
    /// Human-readable reason
    pub error: String,
}

impl ErrorResponse {
    /// Build the body for an error
    ///
    /// The status code already carries the error class, so only the detail is sent.
    pub fn from_error(err: &Error) -> Self {
        Self {
            success: false,
            error: err.detail(),
        }
    }
}

/// Encode a body as JSON
pub fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Decode a JSON body
///
/// Malformed bodies are the caller's fault and become validation errors.
pub fn from_json<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    serde_json::from_slice(data).map_err(|e| Error::Validation(format!("Invalid request body: {}", e)))
}
