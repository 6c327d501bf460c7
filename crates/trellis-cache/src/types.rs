//! Cache entry types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A cached entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key.
    pub key: String,
    /// Blob size in bytes.
    pub size_bytes: u64,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
    /// SHA-256 of the blob, hex.
    pub checksum: String,
}

/// Result of a write-once save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// This call published the entry.
    Stored(CacheEntry),
    /// An entry already existed under the key; nothing was written.
    AlreadyPresent,
}

impl SaveOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, SaveOutcome::Stored(_))
    }
}
