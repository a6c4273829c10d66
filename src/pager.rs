//! Paginated conversation history
//!
//! Pages are counted back from the newest message: page 1 is the most recent
//! block, page 2 the block before it, and so on. Each block is returned in
//! ascending `(created_at, id)` order for display.
//!
//! Paging into a conversation acknowledges it: every unread message the
//! counterpart sent to the viewer is marked read as part of the same call.
//! Callers that need to look without acknowledging must not use this path.
//!
//! `has_more` is computed by over-fetching one message beyond the block, so a
//! conversation with exactly `page_size` messages reports `has_more = false`
//! on page 1.

use crate::{
    storage::{DirectMessage, Pagination, Pair, Storage, UserDirectory, UserId},
    Error, Result,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Page size used when none is requested
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Largest page size a caller may request
pub const MAX_PAGE_SIZE: usize = 100;

/// Page of a single conversation's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    /// Messages, oldest first
    pub messages: Vec<DirectMessage>,
    /// Whether older messages exist beyond this page
    pub has_more: bool,
    /// The 1-based page number that was served
    pub page: usize,
    /// How many messages this call acknowledged
    #[serde(default)]
    pub marked_read: usize,
}

impl MessagePage {
    /// An empty page
    pub fn empty(page: usize) -> Self {
        Self {
            messages: Vec::new(),
            has_more: false,
            page,
            marked_read: 0,
        }
    }
}

/// Validate a page request, clamping the page size to `max_page_size`
///
/// Returns the number of messages to skip and the effective page size. Pages
/// whose offset SQLite cannot address are rejected.
pub fn window(page_number: usize, page_size: usize, max_page_size: usize) -> Result<(i64, usize)> {
    if page_number == 0 {
        return Err(Error::Validation("Page numbers start at 1".to_string()));
    }
    if page_size == 0 {
        return Err(Error::Validation("Page size must be positive".to_string()));
    }
    let size = page_size.min(max_page_size.max(1));
    let skip = (page_number - 1)
        .checked_mul(size)
        .and_then(|skip| i64::try_from(skip).ok())
        .ok_or_else(|| Error::Validation("Page number out of range".to_string()))?;
    Ok((skip, size))
}

/// Serve one page of the conversation between `viewer` and `counterpart`
///
/// Marks the viewer's unread messages from the counterpart as read before
/// reading the page, so returned records already show the acknowledgement.
pub fn page<D: UserDirectory>(
    store: &Storage,
    directory: &D,
    viewer: &UserId,
    counterpart: &UserId,
    page_number: usize,
    page_size: usize,
) -> Result<MessagePage> {
    page_bounded(store, directory, viewer, counterpart, page_number, page_size, MAX_PAGE_SIZE)
}

/// Like [`page`], with a caller-supplied upper bound on the page size
pub fn page_bounded<D: UserDirectory>(
    store: &Storage,
    directory: &D,
    viewer: &UserId,
    counterpart: &UserId,
    page_number: usize,
    page_size: usize,
    max_page_size: usize,
) -> Result<MessagePage> {
    if Pair::new(*viewer, *counterpart).is_self_pair() {
        return Err(Error::Validation(
            "Cannot page a conversation with yourself".to_string(),
        ));
    }
    let (skip, size) = window(page_number, page_size, max_page_size)?;

    let fetch = i64::try_from(size + 1)
        .map_err(|_| Error::Validation("Page size out of range".to_string()))?;
    let (marked_read, mut messages) =
        store.mark_read_and_find(viewer, counterpart, Pagination::newest(skip, fetch))?;

    // The over-fetched message is the oldest one, at the front
    let has_more = messages.len() > size;
    if has_more {
        messages.remove(0);
    }

    if messages.is_empty() {
        return Ok(MessagePage {
            marked_read,
            ..MessagePage::empty(page_number)
        });
    }

    let viewer_profile = directory.require_profile(viewer)?;
    let counterpart_profile = directory.require_profile(counterpart)?;

    let messages = messages
        .into_iter()
        .map(|message| {
            let (sender, receiver) = if message.sender_id == *viewer {
                (viewer_profile.clone(), counterpart_profile.clone())
            } else {
                (counterpart_profile.clone(), viewer_profile.clone())
            };
            DirectMessage::populate(message, sender, receiver)
        })
        .collect::<Vec<_>>();

    debug!(
        "Served page {} ({} messages, has_more={}) of {} <-> {}",
        page_number,
        messages.len(),
        has_more,
        viewer,
        counterpart
    );

    Ok(MessagePage {
        messages,
        has_more,
        page: page_number,
        marked_read,
    })
}
