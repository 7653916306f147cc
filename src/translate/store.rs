//! Storage seam for the translation cache.
//! One row per document id; a put replaces the previous row for that id.

use std::collections::HashMap;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A persisted translation for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub document_id: String,
    /// Hex BLAKE3 digest of `source_text`.
    pub fingerprint: String,
    pub source_text: String,
    pub translated_text: String,
    /// Unix seconds.
    pub created_at: i64,
    /// Byte length of `source_text`.
    pub size_bytes: u64,
}

/// Aggregate over all current entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size_bytes: u64,
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("failed to open translation cache at {path}: {reason}")]
    OpenFailed { path: PathBuf, reason: String },

    #[error("cache query failed: {0}")]
    QueryFailed(String),

    #[error("cache storage unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for CacheError {
    fn from(e: rusqlite::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}

/// Durable key-value storage keyed by document id.
///
/// Implementations must make `put` atomic with respect to `get`: a reader sees
/// either the old entry or the new one.
pub trait CacheStore: Send + Sync {
    fn get(&self, document_id: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Insert or replace the entry for `entry.document_id`.
    fn put(&self, entry: &CacheEntry) -> Result<(), CacheError>;

    /// Returns whether an entry was removed.
    fn remove(&self, document_id: &str) -> Result<bool, CacheError>;

    /// Delete every entry, returning how many were removed.
    fn clear(&self) -> Result<usize, CacheError>;

    fn stats(&self) -> Result<CacheStats, CacheError>;
}

/// Process-local store with no persistence.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheStore for MemoryStore {
    fn get(&self, document_id: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.lock().get(document_id).cloned())
    }

    fn put(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        self.entries
            .lock()
            .insert(entry.document_id.clone(), entry.clone());
        Ok(())
    }

    fn remove(&self, document_id: &str) -> Result<bool, CacheError> {
        Ok(self.entries.lock().remove(document_id).is_some())
    }

    fn clear(&self) -> Result<usize, CacheError> {
        let mut entries = self.entries.lock();
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }

    fn stats(&self) -> Result<CacheStats, CacheError> {
        let entries = self.entries.lock();
        Ok(CacheStats {
            entries: entries.len(),
            total_size_bytes: entries.values().map(|e| e.size_bytes).sum(),
        })
    }
}

/// Current time as Unix timestamp (seconds).
pub(crate) fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
