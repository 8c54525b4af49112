//! Embedded relational + vector store
//!
//! A single SQLite file (`memory.db` inside the state directory) holds
//! episodes, entities, relations, traces, summaries and edges. Writes are
//! serialized through one connection (WAL journaling, busy_timeout); reads
//! go through a second connection so retrieval can run concurrently with
//! ingest. The store is `Send + Sync` and is shared behind `Arc`.
//!
//! Failure semantics: single-row reads return `Ok(None)` for missing rows,
//! batch reads skip unreadable rows, and advisory writes (activation,
//! salience, last-accessed) are best-effort.

mod edge_ops;
mod entity_ops;
mod episode_ops;
pub mod migrations;
mod search;
mod trace_ops;

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use lru::LruCache;
use rusqlite::Connection;

use crate::error::{EngineError, Result};

#[cfg(feature = "vector-search")]
use crate::vector::VectorIndex;

/// Hot-path cache size for pyramid summary reads.
const SUMMARY_CACHE_CAPACITY: usize = 512;

/// The embedded store.
pub struct Store {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    /// In-memory ANN index over trace embeddings, rebuilt from blobs at open
    #[cfg(feature = "vector-search")]
    trace_index: Mutex<VectorIndex>,
    /// LRU over (owner id, level) -> summary text for the retrieval funnel
    summary_cache: Mutex<LruCache<(String, u8), String>>,
    /// Bumped on every entity write; the entity regex cache keys off it
    entity_epoch: AtomicU64,
    embedding_dim: usize,
}

impl Store {
    /// Apply PRAGMAs to a connection.
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA mmap_size = 268435456;",
        )?;
        Ok(())
    }

    /// Open (or create) the store in `state_dir`, applying forward-only
    /// migrations. `embedding_dim` must match the gateway's embedding
    /// dimension and stay constant for the lifetime of the database.
    pub fn open(state_dir: Option<PathBuf>, embedding_dim: usize) -> Result<Self> {
        let dir = match state_dir {
            Some(d) => d,
            None => {
                let proj_dirs = ProjectDirs::from("com", "engram", "core").ok_or_else(|| {
                    EngineError::Init("Could not determine project directories".to_string())
                })?;
                proj_dirs.data_dir().to_path_buf()
            }
        };
        std::fs::create_dir_all(&dir)?;
        let path = dir.join("memory.db");

        let writer_conn = Connection::open(&path)?;
        Self::configure_connection(&writer_conn)?;
        migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn)?;

        #[cfg(feature = "vector-search")]
        let trace_index = VectorIndex::new(embedding_dim)
            .map_err(|e| EngineError::Init(format!("Failed to create vector index: {}", e)))?;

        let store = Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            #[cfg(feature = "vector-search")]
            trace_index: Mutex::new(trace_index),
            summary_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(SUMMARY_CACHE_CAPACITY).expect("capacity is non-zero"),
            )),
            entity_epoch: AtomicU64::new(0),
            embedding_dim,
        };

        #[cfg(feature = "vector-search")]
        store.load_trace_embeddings_into_index()?;

        Ok(store)
    }

    /// Open an in-memory store (tests).
    pub fn open_in_memory(embedding_dim: usize) -> Result<Self> {
        // A shared-cache URI so the reader and writer see the same database
        let uri = format!(
            "file:engram-mem-{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4()
        );
        let writer_conn = Connection::open(&uri)?;
        Self::configure_connection(&writer_conn)?;
        migrations::apply_migrations(&writer_conn)?;
        let reader_conn = Connection::open(&uri)?;
        Self::configure_connection(&reader_conn)?;

        #[cfg(feature = "vector-search")]
        let trace_index = VectorIndex::new(embedding_dim)
            .map_err(|e| EngineError::Init(format!("Failed to create vector index: {}", e)))?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            #[cfg(feature = "vector-search")]
            trace_index: Mutex::new(trace_index),
            summary_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(SUMMARY_CACHE_CAPACITY).expect("capacity is non-zero"),
            )),
            entity_epoch: AtomicU64::new(0),
            embedding_dim,
        })
    }

    /// Embedding dimension this store was opened with.
    pub fn embedding_dimension(&self) -> usize {
        self.embedding_dim
    }

    /// Epoch counter bumped on every entity write. The process-wide entity
    /// cache rebuilds when its snapshot epoch falls behind.
    pub fn entity_epoch(&self) -> u64 {
        self.entity_epoch.load(Ordering::Acquire)
    }

    pub(crate) fn bump_entity_epoch(&self) {
        self.entity_epoch.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn reader(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| EngineError::Init("Reader lock poisoned".into()))
    }

    pub(crate) fn writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| EngineError::Init("Writer lock poisoned".into()))
    }

    pub(crate) fn cache_summary(&self, owner_id: &str, level: u8, text: &str) {
        if let Ok(mut cache) = self.summary_cache.lock() {
            cache.put((owner_id.to_string(), level), text.to_string());
        }
    }

    pub(crate) fn cached_summary(&self, owner_id: &str, level: u8) -> Option<String> {
        self.summary_cache
            .lock()
            .ok()
            .and_then(|mut cache| cache.get(&(owner_id.to_string(), level)).cloned())
    }

    pub(crate) fn evict_summaries(&self, owner_id: &str) {
        if let Ok(mut cache) = self.summary_cache.lock() {
            for level in crate::pyramid::LEVELS {
                cache.pop(&(owner_id.to_string(), level));
            }
        }
    }

    /// Parse an RFC3339 timestamp column.
    pub(crate) fn parse_timestamp(value: &str, field_name: &str) -> rusqlite::Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("Invalid {} timestamp '{}': {}", field_name, value, e),
                    )),
                )
            })
    }

    pub(crate) fn opt_timestamp(value: Option<String>) -> Option<DateTime<Utc>> {
        value.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        })
    }

    /// Snapshot of system size and health.
    pub fn stats(&self) -> Result<crate::model::MemoryStats> {
        let reader = self.reader()?;
        let total_episodes: i64 =
            reader.query_row("SELECT COUNT(*) FROM episodes", [], |r| r.get(0))?;
        let unconsolidated_episodes: i64 = reader.query_row(
            "SELECT COUNT(*) FROM episodes e
             LEFT JOIN trace_sources ts ON ts.episode_id = e.id
             WHERE ts.episode_id IS NULL",
            [],
            |r| r.get(0),
        )?;
        let total_traces: i64 =
            reader.query_row("SELECT COUNT(*) FROM traces", [], |r| r.get(0))?;
        let knowledge_traces: i64 = reader.query_row(
            "SELECT COUNT(*) FROM traces WHERE trace_type = 'knowledge'",
            [],
            |r| r.get(0),
        )?;
        let operational_traces: i64 = reader.query_row(
            "SELECT COUNT(*) FROM traces WHERE trace_type = 'operational'",
            [],
            |r| r.get(0),
        )?;
        let total_entities: i64 =
            reader.query_row("SELECT COUNT(*) FROM entities", [], |r| r.get(0))?;
        let active_relations: i64 = reader.query_row(
            "SELECT COUNT(*) FROM entity_relations WHERE invalid_at IS NULL",
            [],
            |r| r.get(0),
        )?;
        let average_activation: f64 = reader.query_row(
            "SELECT COALESCE(AVG(activation), 0.0) FROM traces",
            [],
            |r| r.get(0),
        )?;
        let oldest: Option<String> = reader.query_row(
            "SELECT MIN(occurred_at) FROM episodes",
            [],
            |r| r.get(0),
        )?;
        let newest: Option<String> = reader.query_row(
            "SELECT MAX(occurred_at) FROM episodes",
            [],
            |r| r.get(0),
        )?;

        Ok(crate::model::MemoryStats {
            total_episodes,
            unconsolidated_episodes,
            total_traces,
            knowledge_traces,
            operational_traces,
            total_entities,
            active_relations,
            average_activation,
            oldest_episode: Self::opt_timestamp(oldest),
            newest_episode: Self::opt_timestamp(newest),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_db_file_and_applies_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(Some(dir.path().to_path_buf()), 8).unwrap();
        assert!(dir.path().join("memory.db").exists());
        assert_eq!(store.embedding_dimension(), 8);

        // Reopening an existing database is a no-op migration-wise
        drop(store);
        let store = Store::open(Some(dir.path().to_path_buf()), 8).unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.total_episodes, 0);
    }

    #[test]
    fn stats_on_empty_store() {
        let store = Store::open_in_memory(8).unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats.total_traces, 0);
        assert_eq!(stats.total_entities, 0);
        assert!(stats.oldest_episode.is_none());
    }

    #[test]
    fn entity_epoch_bumps() {
        let store = Store::open_in_memory(8).unwrap();
        let before = store.entity_epoch();
        store.bump_entity_epoch();
        assert_eq!(store.entity_epoch(), before + 1);
    }
}
