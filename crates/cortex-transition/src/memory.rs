//! Mode memory – remembers the last active mode across restarts.
//!
//! The state file is a small JSON document:
//!
//! ```json
//! { "mode": "alert", "timestamp": "2026-01-01T12:00:00Z" }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Contents of the state file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RememberedMode {
    pub mode: String,
    pub timestamp: DateTime<Utc>,
}

/// Reads and writes the remembered mode at a fixed path.
#[derive(Debug, Clone)]
pub struct ModeMemory {
    path: PathBuf,
}

impl ModeMemory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Conventional location: `<config_dir>/memory/.<config_name>_mode.json`.
    pub fn for_config(config_dir: &Path, config_name: &str) -> Self {
        Self::new(
            config_dir
                .join("memory")
                .join(format!(".{config_name}_mode.json")),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `mode` with the current UTC time.
    pub fn save(&self, mode: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let record = RememberedMode {
            mode: mode.to_string(),
            timestamp: Utc::now(),
        };
        let raw = serde_json::to_string_pretty(&record).map_err(io::Error::other)?;
        fs::write(&self.path, raw)?;
        debug!(path = %self.path.display(), mode, "mode remembered");
        Ok(())
    }

    /// Read the remembered record.  A missing or unreadable file yields `None`.
    pub fn load(&self) -> Option<RememberedMode> {
        let raw = fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring corrupt mode memory");
                None
            }
        }
    }

    /// The remembered mode if it is still one of `known_modes`.
    pub fn restore<'a>(&self, mut known_modes: impl Iterator<Item = &'a String>) -> Option<String> {
        let record = self.load()?;
        if known_modes.any(|m| *m == record.mode) {
            Some(record.mode)
        } else {
            warn!(mode = %record.mode, "remembered mode no longer exists");
            None
        }
    }
}
