//! Content-addressed translation cache.
//! Key: document id. Validity: BLAKE3 fingerprint of the exact source text.
//! A changed fingerprint is the only thing that invalidates an entry.
//!
//! Two levels: an optional in-memory LRU of recent entries (hot layer) in
//! front of a durable [`CacheStore`].

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::store::{now_unix, CacheEntry, CacheError, CacheStats, CacheStore};

/// Hex-encoded BLAKE3-256 digest of a document's text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint the exact text that will be sent for translation.
pub fn fingerprint(text: &str) -> Fingerprint {
    Fingerprint(blake3::hash(text.as_bytes()).to_hex().to_string())
}

/// Hot-layer record: just enough to answer a hit.
struct HotEntry {
    fingerprint: String,
    translated_text: String,
}

pub struct TranslationCache {
    store: Arc<dyn CacheStore>,
    hot: Option<Mutex<LruCache<String, HotEntry>>>,
    /// Held across a store access and the matching hot-layer update.
    sync: Mutex<()>,
}

impl TranslationCache {
    /// Cache with no in-memory layer; every lookup reads the store.
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            hot: None,
            sync: Mutex::new(()),
        }
    }

    /// Cache with an LRU of `hot_entries` recent documents. Zero disables it.
    pub fn with_hot_layer(store: Arc<dyn CacheStore>, hot_entries: usize) -> Self {
        Self {
            store,
            hot: NonZeroUsize::new(hot_entries).map(|cap| Mutex::new(LruCache::new(cap))),
            sync: Mutex::new(()),
        }
    }

    /// Returns the cached translation only when the stored fingerprint matches.
    /// Storage errors degrade to a miss.
    pub fn lookup(&self, document_id: &str, fingerprint: &Fingerprint) -> Option<String> {
        if let Some(hot) = &self.hot {
            if let Some(entry) = hot.lock().get(document_id) {
                if entry.fingerprint == fingerprint.as_str() {
                    debug!(document_id, "hot cache hit");
                    return Some(entry.translated_text.clone());
                }
            }
        }

        let _sync = self.sync.lock();
        let entry = match self.store.get(document_id) {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!(document_id, error = %e, "cache lookup failed, treating as miss");
                return None;
            }
        };

        if entry.fingerprint != fingerprint.as_str() {
            debug!(document_id, "cache stale: content changed");
            return None;
        }

        debug!(document_id, "cache hit");
        let translated = entry.translated_text.clone();
        self.remember(entry);
        Some(translated)
    }

    /// Replace whatever is cached for `document_id` with this translation.
    ///
    /// On error the hot layer forgets the document, so it never answers with
    /// something the store did not accept.
    pub fn store(
        &self,
        document_id: &str,
        fingerprint: &Fingerprint,
        source_text: &str,
        translated_text: &str,
    ) -> Result<(), CacheError> {
        let entry = CacheEntry {
            document_id: document_id.to_string(),
            fingerprint: fingerprint.as_str().to_string(),
            source_text: source_text.to_string(),
            translated_text: translated_text.to_string(),
            created_at: now_unix(),
            size_bytes: source_text.len() as u64,
        };

        let _sync = self.sync.lock();
        match self.store.put(&entry) {
            Ok(()) => {
                self.remember(entry);
                Ok(())
            }
            Err(e) => {
                self.forget(document_id);
                Err(e)
            }
        }
    }

    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        self.store.stats()
    }

    pub fn remove(&self, document_id: &str) -> Result<bool, CacheError> {
        let _sync = self.sync.lock();
        self.forget(document_id);
        self.store.remove(document_id)
    }

    /// Bulk clear of every stored translation.
    pub fn clear(&self) -> Result<usize, CacheError> {
        let _sync = self.sync.lock();
        if let Some(hot) = &self.hot {
            hot.lock().clear();
        }
        self.store.clear()
    }

    /// [`lookup`](Self::lookup) on the blocking pool, for async callers.
    pub async fn lookup_async(
        self: &Arc<Self>,
        document_id: &str,
        fingerprint: &Fingerprint,
    ) -> Option<String> {
        let cache = Arc::clone(self);
        let id = document_id.to_string();
        let fingerprint = fingerprint.clone();
        match tokio::task::spawn_blocking(move || cache.lookup(&id, &fingerprint)).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(document_id, error = %e, "cache lookup task failed, treating as miss");
                None
            }
        }
    }

    /// [`store`](Self::store) on the blocking pool, for async callers.
    pub async fn store_async(
        self: &Arc<Self>,
        document_id: &str,
        fingerprint: &Fingerprint,
        source_text: &str,
        translated_text: &str,
    ) -> Result<(), CacheError> {
        let cache = Arc::clone(self);
        let id = document_id.to_string();
        let fingerprint = fingerprint.clone();
        let source = source_text.to_string();
        let translated = translated_text.to_string();
        tokio::task::spawn_blocking(move || cache.store(&id, &fingerprint, &source, &translated))
            .await
            .map_err(|e| CacheError::Unavailable(e.to_string()))?
    }

    fn remember(&self, entry: CacheEntry) {
        if let Some(hot) = &self.hot {
            hot.lock().put(
                entry.document_id,
                HotEntry {
                    fingerprint: entry.fingerprint,
                    translated_text: entry.translated_text,
                },
            );
        }
    }

    fn forget(&self, document_id: &str) {
        if let Some(hot) = &self.hot {
            hot.lock().pop(document_id);
        }
    }
}
