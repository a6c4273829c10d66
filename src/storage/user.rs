//! User directory contract used for denormalizing profiles

use crate::{storage::message::UserId, Error, Result};
use serde::{Deserialize, Serialize};

/// Display fields of a user, as copied into messages and conversation summaries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// User id
    pub id: UserId,
    /// Unique handle
    pub username: String,
    /// Display name
    pub name: String,
    /// Profile picture URL, if any
    #[serde(default)]
    pub profile_pic: Option<String>,
}

impl UserProfile {
    /// Create a profile without a picture
    pub fn new(id: UserId, username: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            name: name.into(),
            profile_pic: None,
        }
    }

    /// Set the profile picture URL
    pub fn with_profile_pic(mut self, url: impl Into<String>) -> Self {
        self.profile_pic = Some(url.into());
        self
    }
}

/// Resolves user ids to display profiles
///
/// Lookups are assumed fast and always available. An unknown id fails the
/// enclosing operation with [`Error::NotFound`].
pub trait UserDirectory {
    /// Look up a profile, returning `None` for unknown ids
    fn profile(&self, id: &UserId) -> Result<Option<UserProfile>>;

    /// Look up a profile that must exist
    fn require_profile(&self, id: &UserId) -> Result<UserProfile> {
        self.profile(id)?
            .ok_or_else(|| Error::NotFound(format!("User not found: {}", id)))
    }
}
