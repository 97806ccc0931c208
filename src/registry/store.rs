//! On-disk format of the notification registry.
//!
//! The registry is one JSON document, `notification_registry.json`:
//!
//! ```json
//! {
//!   "schema_version": 1,
//!   "updated_at": "2024-05-01T12:00:00Z",
//!   "entries": {
//!     "octocat/hello-world#42": {
//!       "handles": [{ "channel_id": 10, "message_id": 20 }],
//!       "created_at": "2024-05-01T11:59:58Z"
//!     }
//!   }
//! }
//! ```
//!
//! # Atomic Writes
//!
//! Every save rewrites the whole document:
//! 1. Write to `<path>.tmp`
//! 2. fsync the file
//! 3. Rename over `<path>`
//! 4. fsync the directory, so the rename itself survives a power loss
//!
//! Readers see either the previous or the new document, never a torn one.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{EntityKey, MessageHandle};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("registry JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("registry schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },

    /// The blocking write task panicked or was cancelled.
    #[error("registry write task failed: {0}")]
    WriteTask(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// The delivered messages of one tracked entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedNotification {
    pub handles: Vec<MessageHandle>,
    pub created_at: DateTime<Utc>,
}

impl TrackedNotification {
    pub fn new(handles: Vec<MessageHandle>) -> Self {
        TrackedNotification {
            handles,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryFile {
    pub schema_version: u32,
    pub updated_at: DateTime<Utc>,
    pub entries: BTreeMap<EntityKey, TrackedNotification>,
}

impl RegistryFile {
    pub fn new(entries: BTreeMap<EntityKey, TrackedNotification>) -> Self {
        RegistryFile {
            schema_version: SCHEMA_VERSION,
            updated_at: Utc::now(),
            entries,
        }
    }
}

/// Writes any JSON document with the steps above. Blocking.
pub fn save_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(value)?;
    {
        let mut tmp = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp.write_all(&bytes)?;
        tmp.sync_all()?;
    }

    std::fs::rename(&tmp_path, path)?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fsync_dir(parent)?;
    }
    Ok(())
}

/// Loads the registry, or `None` if the file does not exist yet.
///
/// Malformed JSON and schema mismatches are errors: starting empty would
/// forget every tracked notification.
pub fn try_load(path: &Path) -> Result<Option<RegistryFile>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let file: RegistryFile = serde_json::from_slice(&bytes)?;
    if file.schema_version != SCHEMA_VERSION {
        return Err(RegistryError::SchemaMismatch {
            expected: SCHEMA_VERSION,
            got: file.schema_version,
        });
    }
    Ok(Some(file))
}

/// Directory entries (creates, renames) are only durable once the directory
/// itself is synced.
fn fsync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}
