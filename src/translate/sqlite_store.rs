//! Persistent translation store backed by SQLite.
//! One row per document id; no TTL. A row is only replaced when the document
//! is retranslated, or removed by an explicit remove/clear.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::store::{CacheEntry, CacheError, CacheStats, CacheStore};

/// SQLite-backed translation store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the translation database at the given path.
    pub fn open(db_path: &Path) -> Result<Self, CacheError> {
        let open_failed = |reason: String| CacheError::OpenFailed {
            path: db_path.to_path_buf(),
            reason,
        };

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| open_failed(e.to_string()))?;
            }
        }

        let conn = Connection::open(db_path).map_err(|e| open_failed(e.to_string()))?;

        // WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| open_failed(format!("PRAGMA failed: {e}")))?;

        Self::init_schema(&conn).map_err(|e| open_failed(e.to_string()))?;

        info!(path = %db_path.display(), "translation store opened");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS translations (
                document_id TEXT PRIMARY KEY,
                fingerprint TEXT NOT NULL,
                source_text TEXT NOT NULL,
                translated_text TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                size_bytes INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_translations_created
                ON translations(created_at);",
        )
    }
}

impl CacheStore for SqliteStore {
    fn get(&self, document_id: &str) -> Result<Option<CacheEntry>, CacheError> {
        let conn = self.conn.lock();
        let entry = conn
            .query_row(
                "SELECT document_id, fingerprint, source_text, translated_text,
                        created_at, size_bytes
                 FROM translations WHERE document_id = ?1",
                params![document_id],
                |row| {
                    Ok(CacheEntry {
                        document_id: row.get(0)?,
                        fingerprint: row.get(1)?,
                        source_text: row.get(2)?,
                        translated_text: row.get(3)?,
                        created_at: row.get(4)?,
                        size_bytes: row.get::<_, i64>(5)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    fn put(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let conn = self.conn.lock();
        // A single statement is its own transaction: readers see old or new row.
        conn.execute(
            "INSERT OR REPLACE INTO translations
             (document_id, fingerprint, source_text, translated_text, created_at, size_bytes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.document_id,
                entry.fingerprint,
                entry.source_text,
                entry.translated_text,
                entry.created_at,
                entry.size_bytes as i64,
            ],
        )?;
        debug!(document_id = %entry.document_id, "translation stored");
        Ok(())
    }

    fn remove(&self, document_id: &str) -> Result<bool, CacheError> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM translations WHERE document_id = ?1",
            params![document_id],
        )?;
        Ok(removed > 0)
    }

    fn clear(&self) -> Result<usize, CacheError> {
        let conn = self.conn.lock();
        let removed = conn.execute("DELETE FROM translations", [])?;
        if removed > 0 {
            info!(removed, "translation store cleared");
        }
        Ok(removed)
    }

    fn stats(&self) -> Result<CacheStats, CacheError> {
        let conn = self.conn.lock();
        let (entries, total): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0) FROM translations",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(CacheStats {
            entries: entries as usize,
            total_size_bytes: total as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::store::now_unix;

    fn entry(id: &str, fp: &str, source: &str, translated: &str) -> CacheEntry {
        CacheEntry {
            document_id: id.to_string(),
            fingerprint: fp.to_string(),
            source_text: source.to_string(),
            translated_text: translated.to_string(),
            created_at: now_unix(),
            size_bytes: source.len() as u64,
        }
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("translations.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .put(&entry("/docs/readme.md", "f1", "Hello", "안녕"))
                .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let got = store.get("/docs/readme.md").unwrap().unwrap();
        assert_eq!(got.translated_text, "안녕");
        assert_eq!(got.fingerprint, "f1");
        assert_eq!(got.size_bytes, 5);
    }

    #[test]
    fn retranslation_keeps_a_single_row() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put(&entry("a.md", "f1", "Hello", "안녕")).unwrap();
        store.put(&entry("a.md", "f2", "Hello!", "안녕!")).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.total_size_bytes, 6);
        assert_eq!(store.get("a.md").unwrap().unwrap().fingerprint, "f2");
    }

    #[test]
    fn missing_document_is_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get("nope.md").unwrap().is_none());
        assert_eq!(store.stats().unwrap(), CacheStats::default());
    }

    #[test]
    fn remove_and_clear_delete_rows() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.put(&entry("a.md", "f1", "a", "A")).unwrap();
        store.put(&entry("b.md", "f2", "b", "B")).unwrap();
        store.put(&entry("c.md", "f3", "c", "C")).unwrap();

        assert!(store.remove("b.md").unwrap());
        assert!(!store.remove("b.md").unwrap());
        assert_eq!(store.clear().unwrap(), 2);
        assert_eq!(store.stats().unwrap().entries, 0);
    }
}
