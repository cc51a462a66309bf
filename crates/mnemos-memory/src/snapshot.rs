//! SQLite snapshot store.
//!
//! The engine itself keeps no durable state; this is the persistence
//! collaborator that receives
//! [`export_memories`][crate::engine::MemoryEngine::export_memories] output
//! and hands it back to
//! [`import_memories`][crate::engine::MemoryEngine::import_memories] on the
//! next start.
//!
//! # Storage layout
//!
//! A single table `vector_entries`:
//!
//! | column      | type    | description                                    |
//! |-------------|---------|------------------------------------------------|
//! | id          | TEXT    | entry id, primary key                          |
//! | agent_id    | TEXT    | owning agent                                   |
//! | kind        | TEXT    | `experience`, `knowledge`, ...                 |
//! | created_at  | TEXT    | RFC-3339 creation time (UTC)                   |
//! | record      | TEXT    | JSON of the entry without its embedding        |
//! | embedding   | BLOB    | Little-endian f32 vector (4 × N bytes)         |
//!
//! # Example
//!
//! ```rust
//! use mnemos_memory::{MemoryConfig, MemoryEngine, SnapshotStore};
//! use mnemos_types::{EntryType, MemoryEntry};
//!
//! let mut engine = MemoryEngine::new(MemoryConfig::default()).unwrap();
//! engine
//!     .store_memory(MemoryEntry::new("m1", EntryType::Task, "ship it", "a"), "a")
//!     .unwrap();
//!
//! let mut snapshot = SnapshotStore::open_in_memory().unwrap();
//! snapshot.save(&engine.export_memories(None)).unwrap();
//!
//! let mut restored = MemoryEngine::new(MemoryConfig::default()).unwrap();
//! restored.import_memories(snapshot.load_all().unwrap()).unwrap();
//! assert_eq!(restored.get_entry("m1").unwrap().agent_id, "a");
//! ```

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use thiserror::Error;
use tracing::debug;

use crate::entry::VectorEntry;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Record encoding error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Stored embedding for {0} is not a whole number of f32 values")]
    CorruptEmbedding(String),
}

impl From<SnapshotError> for mnemos_types::MnemosError {
    fn from(e: SnapshotError) -> Self {
        mnemos_types::MnemosError::Snapshot(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedding serialisation helpers
// ─────────────────────────────────────────────────────────────────────────────

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// SnapshotStore
// ─────────────────────────────────────────────────────────────────────────────

pub struct SnapshotStore {
    conn: Connection,
}

impl SnapshotStore {
    /// Open (or create) a snapshot database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, SnapshotError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), SnapshotError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS vector_entries (
                id         TEXT NOT NULL PRIMARY KEY,
                agent_id   TEXT NOT NULL,
                kind       TEXT NOT NULL,
                created_at TEXT NOT NULL,
                record     TEXT NOT NULL,
                embedding  BLOB NOT NULL
            );
            CREATE INDEX IF NOT EXISTS vector_entries_agent
                ON vector_entries (agent_id);",
        )?;
        Ok(())
    }

    /// Replace the whole snapshot with `entries` in one transaction.
    pub fn save(&mut self, entries: &[VectorEntry]) -> Result<usize, SnapshotError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM vector_entries", [])?;
        for entry in entries {
            Self::write(&tx, entry)?;
        }
        tx.commit()?;
        debug!(count = entries.len(), "snapshot saved");
        Ok(entries.len())
    }

    fn write(conn: &Connection, entry: &VectorEntry) -> Result<(), SnapshotError> {
        let record = VectorEntry {
            embedding: Vec::new(),
            ..entry.clone()
        };
        conn.execute(
            "INSERT OR REPLACE INTO vector_entries
                 (id, agent_id, kind, created_at, record, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.id,
                entry.agent_id,
                entry.kind.as_str(),
                entry.created_at.to_rfc3339(),
                serde_json::to_string(&record)?,
                embedding_to_bytes(&entry.embedding),
            ],
        )?;
        Ok(())
    }

    /// Every stored entry, oldest first.
    pub fn load_all(&self) -> Result<Vec<VectorEntry>, SnapshotError> {
        self.query(
            "SELECT id, record, embedding FROM vector_entries
             ORDER BY created_at ASC, id ASC",
            None,
        )
    }

    /// Entries owned by `agent_id`, oldest first.
    pub fn load_agent(&self, agent_id: &str) -> Result<Vec<VectorEntry>, SnapshotError> {
        self.query(
            "SELECT id, record, embedding FROM vector_entries
             WHERE agent_id = ?1
             ORDER BY created_at ASC, id ASC",
            Some(agent_id),
        )
    }

    fn query(&self, sql: &str, agent_id: Option<&str>) -> Result<Vec<VectorEntry>, SnapshotError> {
        let mut stmt = self.conn.prepare(sql)?;
        let map = |row: &rusqlite::Row<'_>| {
            let id: String = row.get(0)?;
            let record: String = row.get(1)?;
            let blob: Vec<u8> = row.get(2)?;
            Ok((id, record, blob))
        };
        let rows = match agent_id {
            Some(agent) => stmt.query_map(params![agent], map)?.collect::<Result<Vec<_>, _>>()?,
            None => stmt.query_map([], map)?.collect::<Result<Vec<_>, _>>()?,
        };

        let mut entries = Vec::with_capacity(rows.len());
        for (id, record, blob) in rows {
            let mut entry: VectorEntry = serde_json::from_str(&record)?;
            entry.embedding =
                bytes_to_embedding(&blob).ok_or_else(|| SnapshotError::CorruptEmbedding(id))?;
            entries.push(entry);
        }
        Ok(entries)
    }

    pub fn count(&self) -> Result<usize, SnapshotError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM vector_entries", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Creation time of the newest stored entry.
    pub fn newest(&self) -> Result<Option<DateTime<Utc>>, SnapshotError> {
        let raw: Option<String> = self.conn.query_row(
            "SELECT MAX(created_at) FROM vector_entries",
            [],
            |row| row.get(0),
        )?;
        raw.map(|s| {
            s.parse::<DateTime<Utc>>().map_err(|e| {
                SnapshotError::Sqlite(rusqlite::Error::InvalidColumnType(
                    0,
                    e.to_string(),
                    rusqlite::types::Type::Text,
                ))
            })
        })
        .transpose()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
