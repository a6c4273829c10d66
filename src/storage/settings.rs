//! Service and client configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime settings
///
/// Stored as JSON. Missing fields fall back to their defaults so older files
/// keep loading after new settings are introduced.
///
/// # Example
/// ```rust,no_run
/// use dmsync::storage::Settings;
///
/// let mut settings = Settings::load("dmsync.json").expect("Failed to load");
/// settings.poll_interval_ms = 5_000;
/// settings.save("dmsync.json").expect("Failed to save");
///
/// println!("Listening on {}", settings.listen_addr);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// SQLite database file for the message store
    pub database_path: String,
    /// Address the HTTP server binds to
    pub listen_addr: String,
    /// Page size used when a request does not specify one
    pub default_page_size: usize,
    /// Upper bound for requested page sizes
    pub max_page_size: usize,
    /// Interval between sync reconciler ticks, in milliseconds
    pub poll_interval_ms: u64,
    /// How many of the newest messages each tick fetches for the open conversation
    pub poll_slice_size: usize,
}

impl Settings {
    /// Load settings from a JSON file
    ///
    /// Returns the defaults if the file doesn't exist or is empty.
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::Storage(format!("Failed to read settings: {}", e)))?;

        if data.trim().is_empty() {
            return Ok(Self::default());
        }

        let mut settings: Self = serde_json::from_str(&data)
            .map_err(|e| Error::Storage(format!("Failed to parse settings: {}", e)))?;
        settings.normalize();

        Ok(settings)
    }

    /// Save settings to a JSON file, creating the parent directory if needed
    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("Failed to create settings directory: {}", e)))?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Storage(format!("Failed to serialize settings: {}", e)))?;

        std::fs::write(path, json)
            .map_err(|e| Error::Storage(format!("Failed to write settings: {}", e)))?;

        Ok(())
    }

    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Clamp a requested page size into `1..=max_page_size`
    ///
    /// `None` selects the default page size.
    pub fn effective_page_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size.max(1))
    }

    /// Keep the page bounds and the interval consistent with each other
    fn normalize(&mut self) {
        if self.max_page_size == 0 {
            self.max_page_size = Self::default().max_page_size;
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            self.default_page_size = self.default_page_size.clamp(1, self.max_page_size);
        }
        if self.poll_interval_ms == 0 {
            self.poll_interval_ms = Self::default().poll_interval_ms;
        }
        if self.poll_slice_size == 0 {
            self.poll_slice_size = Self::default().poll_slice_size;
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_path: "./data/messages.db".to_string(),
            listen_addr: "127.0.0.1:8080".to_string(),
            default_page_size: 50,
            max_page_size: 100,
            poll_interval_ms: 2_000,
            poll_slice_size: 10,
        }
    }
}
