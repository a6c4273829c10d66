//! SQLite-based message store
//!
//! The store is the single source of truth for direct messages. It owns every
//! message row; conversation views are always derived from it. It also hosts the
//! `users` table backing the [`UserDirectory`] contract.

use crate::{
    storage::{
        message::{Message, MessageType, UserId},
        user::{UserDirectory, UserProfile},
    },
    Error, Result,
};
use chrono::Utc;
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::debug;

/// Unordered pair of users identifying one conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pair {
    low: UserId,
    high: UserId,
}

impl Pair {
    /// Build the pair `{a, b}`; argument order does not matter
    pub fn new(a: UserId, b: UserId) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    /// Both members, in canonical order
    pub fn members(&self) -> (UserId, UserId) {
        (self.low, self.high)
    }

    /// Whether the pair is degenerate (a user with themselves)
    pub fn is_self_pair(&self) -> bool {
        self.low == self.high
    }
}

/// Window over a pair's history, counted back from the newest message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    /// Number of newest messages to skip
    pub skip: i64,
    /// Maximum number of messages to return (`None` for all)
    pub limit: Option<i64>,
}

impl Pagination {
    /// The whole history
    pub fn all() -> Self {
        Self { skip: 0, limit: None }
    }

    /// `limit` messages after skipping the `skip` newest
    pub fn newest(skip: i64, limit: i64) -> Self {
        Self {
            skip,
            limit: Some(limit),
        }
    }
}

/// Trim message text, rejecting text that is empty afterwards
pub fn normalize_text(text: &str) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation("Message text is required".to_string()));
    }
    Ok(trimmed.to_string())
}

/// SQLite-based storage manager
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Create a new storage instance with a database file
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::Storage(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::Transient(format!("Failed to open database: {}", e)))?;

        let mut storage = Self { conn };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Create an in-memory storage instance (for testing)
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Transient(format!("Failed to create in-memory database: {}", e)))?;

        let mut storage = Self { conn };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Initialize database schema
    fn init_schema(&mut self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                profile_pic TEXT
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sender_id TEXT NOT NULL,
                receiver_id TEXT NOT NULL,
                text TEXT NOT NULL CHECK (length(trim(text)) > 0),
                read INTEGER NOT NULL DEFAULT 0,
                message_type TEXT NOT NULL DEFAULT 'text',
                created_at INTEGER NOT NULL,
                CHECK (sender_id <> receiver_id)
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_pair_created
             ON messages(sender_id, receiver_id, created_at DESC)",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_receiver_read
             ON messages(receiver_id, read)",
            [],
        )?;

        Ok(())
    }

    // ========== Users ==========

    /// Insert or update a user profile
    pub fn upsert_user(&self, profile: &UserProfile) -> Result<()> {
        self.conn.execute(
            "INSERT INTO users (id, username, name, profile_pic)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                name = excluded.name,
                profile_pic = excluded.profile_pic",
            params![
                profile.id.to_string(),
                profile.username,
                profile.name,
                profile.profile_pic,
            ],
        )?;
        Ok(())
    }

    /// Whether a user with this id is known
    pub fn user_exists(&self, id: &UserId) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM users WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // ========== Messages ==========

    /// Append a new message from `sender` to `receiver`
    ///
    /// The text is trimmed before storing. Fails with a validation error for
    /// empty text or a self-addressed message and with not-found when the
    /// receiver is unknown.
    pub fn append(&self, sender: &UserId, receiver: &UserId, text: &str) -> Result<Message> {
        self.append_at(sender, receiver, text, Utc::now().timestamp_millis())
    }

    /// Append with an explicit creation time
    pub(crate) fn append_at(
        &self,
        sender: &UserId,
        receiver: &UserId,
        text: &str,
        created_at: i64,
    ) -> Result<Message> {
        if sender == receiver {
            return Err(Error::Validation(
                "Cannot send a message to yourself".to_string(),
            ));
        }
        let text = normalize_text(text)?;

        if !self.user_exists(receiver)? {
            return Err(Error::NotFound(format!("Receiver not found: {}", receiver)));
        }

        self.conn.execute(
            "INSERT INTO messages (sender_id, receiver_id, text, read, message_type, created_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?5)",
            params![
                sender.to_string(),
                receiver.to_string(),
                text,
                MessageType::Text.as_str(),
                created_at,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!("Appended message {} from {} to {}", id, sender, receiver);

        Ok(Message {
            id,
            sender_id: *sender,
            receiver_id: *receiver,
            text,
            read: false,
            created_at,
            message_type: MessageType::Text,
        })
    }

    /// Load a single message by id
    pub fn get(&self, id: i64) -> Result<Option<Message>> {
        let message = self
            .conn
            .query_row(
                "SELECT id, sender_id, receiver_id, text, read, created_at, message_type
                 FROM messages WHERE id = ?1",
                params![id],
                message_from_row,
            )
            .optional()?;
        Ok(message)
    }

    /// Messages of a pair in ascending `(created_at, id)` order
    ///
    /// The window is selected from the newest end and then reversed.
    pub fn find(&self, pair: &Pair, pagination: Pagination) -> Result<Vec<Message>> {
        find_in_pair(&self.conn, pair, pagination)
    }

    /// Number of messages in a pair
    pub fn count_pair(&self, pair: &Pair) -> Result<usize> {
        let (a, b) = pair.members();
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2)
                OR (sender_id = ?2 AND receiver_id = ?1)",
            params![a.to_string(), b.to_string()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Latest message of a pair, regardless of direction
    pub fn latest_in_pair(&self, pair: &Pair) -> Result<Option<Message>> {
        let mut latest = find_in_pair(&self.conn, pair, Pagination::newest(0, 1))?;
        Ok(latest.pop())
    }

    /// Every message the viewer sent or received, newest first
    pub fn messages_for_viewer(&self, viewer: &UserId) -> Result<Vec<Message>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, sender_id, receiver_id, text, read, created_at, message_type
             FROM messages
             WHERE sender_id = ?1 OR receiver_id = ?1
             ORDER BY created_at DESC, id DESC",
        )?;

        let rows = stmt.query_map(params![viewer.to_string()], message_from_row)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Unread messages sent by `sender` to `receiver`
    pub fn unread_count(&self, receiver: &UserId, sender: &UserId) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM messages
             WHERE sender_id = ?1 AND receiver_id = ?2 AND read = 0",
            params![sender.to_string(), receiver.to_string()],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Mark every unread message from `sender` to `receiver` as read
    ///
    /// Returns the number of messages that changed; already-read messages are
    /// left untouched, so a repeated call returns 0.
    pub fn mark_read(&self, receiver: &UserId, sender: &UserId) -> Result<usize> {
        mark_read_in(&self.conn, receiver, sender)
    }

    /// Acknowledge the viewer's unread messages and read a window, atomically
    ///
    /// The read flags are updated before the window is selected, so the
    /// returned records reflect the acknowledgement.
    pub fn mark_read_and_find(
        &self,
        viewer: &UserId,
        counterpart: &UserId,
        pagination: Pagination,
    ) -> Result<(usize, Vec<Message>)> {
        let tx = self.conn.unchecked_transaction()?;
        let marked = mark_read_in(&tx, viewer, counterpart)?;
        let messages = find_in_pair(&tx, &Pair::new(*viewer, *counterpart), pagination)?;
        tx.commit()?;
        Ok((marked, messages))
    }

    /// Remove every message exchanged between `a` and `b`
    pub fn delete_pair(&self, a: &UserId, b: &UserId) -> Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM messages
             WHERE (sender_id = ?1 AND receiver_id = ?2)
                OR (sender_id = ?2 AND receiver_id = ?1)",
            params![a.to_string(), b.to_string()],
        )?;
        debug!("Deleted {} messages between {} and {}", deleted, a, b);
        Ok(deleted)
    }

    /// Total number of stored messages
    pub fn message_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

impl UserDirectory for Storage {
    fn profile(&self, id: &UserId) -> Result<Option<UserProfile>> {
        let profile = self
            .conn
            .query_row(
                "SELECT id, username, name, profile_pic FROM users WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    Ok(UserProfile {
                        id: user_id_column(row, 0)?,
                        username: row.get(1)?,
                        name: row.get(2)?,
                        profile_pic: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(profile)
    }
}

fn find_in_pair(conn: &Connection, pair: &Pair, pagination: Pagination) -> Result<Vec<Message>> {
    let (a, b) = pair.members();
    // SQLite treats a negative LIMIT as "no limit"
    let limit = pagination.limit.unwrap_or(-1);

    let mut stmt = conn.prepare(
        "SELECT id, sender_id, receiver_id, text, read, created_at, message_type
         FROM messages
         WHERE (sender_id = ?1 AND receiver_id = ?2)
            OR (sender_id = ?2 AND receiver_id = ?1)
         ORDER BY created_at DESC, id DESC
         LIMIT ?3 OFFSET ?4",
    )?;

    let rows = stmt.query_map(
        params![a.to_string(), b.to_string(), limit, pagination.skip],
        message_from_row,
    )?;

    let mut messages = Vec::new();
    for row in rows {
        messages.push(row?);
    }
    messages.reverse();
    Ok(messages)
}

fn mark_read_in(conn: &Connection, receiver: &UserId, sender: &UserId) -> Result<usize> {
    let updated = conn.execute(
        "UPDATE messages SET read = 1
         WHERE sender_id = ?1 AND receiver_id = ?2 AND read = 0",
        params![sender.to_string(), receiver.to_string()],
    )?;
    if updated > 0 {
        debug!("Marked {} messages from {} to {} as read", updated, sender, receiver);
    }
    Ok(updated)
}

fn user_id_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<UserId> {
    let raw: String = row.get(idx)?;
    UserId::parse(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let message_type: String = row.get(6)?;
    Ok(Message {
        id: row.get(0)?,
        sender_id: user_id_column(row, 1)?,
        receiver_id: user_id_column(row, 2)?,
        text: row.get(3)?,
        read: row.get(4)?,
        created_at: row.get(5)?,
        message_type: MessageType::from_str_opt(&message_type).unwrap_or_default(),
    })
}
