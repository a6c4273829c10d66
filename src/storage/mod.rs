//! Local storage module
//!
//! This module handles persistent storage including:
//! - The append-only direct message log
//! - The user directory used for profile denormalization
//! - Configuration
//!
//! Submodules:
//! - `message` - Message, user id and denormalized record types
//! - `user` - User profiles and the directory contract
//! - `storage_db` - SQLite message store
//! - `settings` - Service and client configuration

pub mod message;
pub mod settings;
pub mod storage_db;
pub mod user;

pub use message::{DirectMessage, Message, MessageType, UserId};
pub use settings::Settings;
pub use storage_db::{normalize_text, Pagination, Pair, Storage};
pub use user::{UserDirectory, UserProfile};
