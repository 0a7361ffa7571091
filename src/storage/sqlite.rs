//! SQLite entry store using rusqlite with deadpool connection pooling
//!
//! Timestamps are stored as microseconds since the Unix epoch so ordering by
//! `(created_at, id)` is total and cheap. Embeddings are little-endian f32
//! blobs.

use crate::error::{ForecastError, Result};
use crate::storage::{EntryStore, LabeledHistory};
use crate::types::{EntityKey, Entry, EntryId, NewEntry, StudyAttributes};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_sqlite::{Config, Pool, Runtime};
use rusqlite::{params, OptionalExtension, Row};
use std::path::Path;
use tracing::{debug, info};

/// Default connection pool size
const DEFAULT_POOL_SIZE: usize = 8;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    test_id INTEGER NOT NULL,
    score REAL,
    predicted_score REAL,
    confidence REAL,
    stress REAL,
    sleep REAL,
    hours_studied REAL,
    feeling_text TEXT,
    feeling_embedding BLOB,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_entries_entity_time
    ON entries(user_id, test_id, created_at, id);
"#;

const ENTRY_COLUMNS: &str = "id, user_id, test_id, score, predicted_score, confidence, stress, \
                             sleep, hours_studied, feeling_text, feeling_embedding, created_at";

/// SQLite-backed [`EntryStore`]
pub struct SqliteEntryStore {
    pool: Pool,
}

impl SqliteEntryStore {
    /// Open (creating if missing) the database and ensure the schema exists
    pub async fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::with_pool_size(db_path, DEFAULT_POOL_SIZE).await
    }

    pub async fn with_pool_size<P: AsRef<Path>>(db_path: P, pool_size: usize) -> Result<Self> {
        let path = db_path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path.to_string_lossy().to_string();
        info!(
            "Opening entry store at: {} (pool_size: {})",
            path_str, pool_size
        );

        let mut config = Config::new(path_str);
        config.pool = Some(deadpool_sqlite::PoolConfig::new(pool_size));
        let pool = config.create_pool(Runtime::Tokio1).map_err(|e| {
            ForecastError::Database(format!("Failed to create connection pool: {}", e))
        })?;

        let store = Self { pool };
        store
            .with_conn(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;

        Ok(store)
    }

    /// Run a closure on a pooled connection
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut rusqlite::Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.pool.get().await.map_err(|e| {
            ForecastError::Database(format!("Failed to get connection from pool: {}", e))
        })?;

        conn.interact(f)
            .await
            .map_err(|e| ForecastError::Database(format!("Pool interaction failed: {}", e)))?
    }
}

fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn deserialize_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
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

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<Entry> {
    let embedding = match row.get::<_, Option<Vec<u8>>>(10)? {
        Some(bytes) => Some(deserialize_embedding(&bytes).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                10,
                rusqlite::types::Type::Blob,
                "embedding blob length is not a multiple of 4".into(),
            )
        })?),
        None => None,
    };

    let micros: i64 = row.get(11)?;
    let created_at = DateTime::<Utc>::from_timestamp_micros(micros)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(11, micros))?;

    Ok(Entry {
        id: row.get(0)?,
        user_id: row.get(1)?,
        test_id: row.get(2)?,
        score: row.get(3)?,
        predicted_score: row.get(4)?,
        attributes: StudyAttributes {
            confidence: row.get(5)?,
            stress: row.get(6)?,
            sleep: row.get(7)?,
            hours_studied: row.get(8)?,
            feeling_text: row.get(9)?,
        },
        embedding,
        created_at,
    })
}

fn fetch_entry(conn: &rusqlite::Connection, id: EntryId) -> Result<Entry> {
    conn.query_row(
        &format!("SELECT {} FROM entries WHERE id = ?1", ENTRY_COLUMNS),
        params![id],
        row_to_entry,
    )
    .optional()?
    .ok_or(ForecastError::EntryNotFound(id))
}

#[async_trait]
impl EntryStore for SqliteEntryStore {
    async fn insert_entry(
        &self,
        entry: &NewEntry,
        embedding: Option<&[f32]>,
        predicted_score: Option<f64>,
        created_at: DateTime<Utc>,
    ) -> Result<Entry> {
        let entry = entry.clone();
        let blob = embedding.map(serialize_embedding);
        let micros = created_at.timestamp_micros();

        let stored = self
            .with_conn(move |conn| {
                conn.execute(
                    r#"
                    INSERT INTO entries (
                        user_id, test_id, score, predicted_score, confidence, stress,
                        sleep, hours_studied, feeling_text, feeling_embedding, created_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                    "#,
                    params![
                        entry.user_id,
                        entry.test_id,
                        entry.score,
                        predicted_score,
                        entry.attributes.confidence,
                        entry.attributes.stress,
                        entry.attributes.sleep,
                        entry.attributes.hours_studied,
                        entry.attributes.feeling_text,
                        blob,
                        micros,
                    ],
                )?;
                fetch_entry(conn, conn.last_insert_rowid())
            })
            .await?;

        debug!("Stored entry {} for {}", stored.id, stored.key());
        Ok(stored)
    }

    async fn get_entry(&self, id: EntryId) -> Result<Entry> {
        self.with_conn(move |conn| fetch_entry(conn, id)).await
    }

    async fn set_label(&self, id: EntryId, score: f64) -> Result<Entry> {
        let entry = self
            .with_conn(move |conn| {
                let updated = conn.execute(
                    "UPDATE entries SET score = ?1 WHERE id = ?2",
                    params![score, id],
                )?;
                if updated == 0 {
                    return Err(ForecastError::EntryNotFound(id));
                }
                fetch_entry(conn, id)
            })
            .await?;

        debug!("Labeled entry {} with score {}", id, score);
        Ok(entry)
    }

    async fn set_embedding(&self, id: EntryId, embedding: &[f32]) -> Result<()> {
        let blob = serialize_embedding(embedding);
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE entries SET feeling_embedding = ?1 WHERE id = ?2",
                params![blob, id],
            )?;
            if updated == 0 {
                return Err(ForecastError::EntryNotFound(id));
            }
            Ok(())
        })
        .await
    }

    async fn labeled_entries(&self, key: EntityKey) -> Result<Vec<Entry>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM entries
                 WHERE user_id = ?1 AND test_id = ?2 AND score IS NOT NULL
                 ORDER BY created_at ASC, id ASC",
                ENTRY_COLUMNS
            ))?;
            let entries = stmt
                .query_map(params![key.user_id, key.test_id], row_to_entry)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
        .await
    }

    async fn labeled_history(&self, key: EntityKey, window: usize) -> Result<LabeledHistory> {
        let window = window as i64;
        self.with_conn(move |conn| {
            // Both reads inside one transaction see the same set of labels
            let tx = conn.transaction()?;
            let recent_desc = {
                let mut stmt = tx.prepare(
                    "SELECT score FROM entries
                     WHERE user_id = ?1 AND test_id = ?2 AND score IS NOT NULL
                     ORDER BY created_at DESC, id DESC
                     LIMIT ?3",
                )?;
                let scores = stmt
                    .query_map(params![key.user_id, key.test_id, window], |row| row.get(0))?
                    .collect::<rusqlite::Result<Vec<f64>>>()?;
                scores
            };
            let labeled_count: i64 = tx.query_row(
                "SELECT COUNT(*) FROM entries
                 WHERE user_id = ?1 AND test_id = ?2 AND score IS NOT NULL",
                params![key.user_id, key.test_id],
                |row| row.get(0),
            )?;
            tx.commit()?;

            Ok(LabeledHistory {
                recent_desc,
                labeled_count: labeled_count as usize,
            })
        })
        .await
    }

    async fn count_labeled(&self, key: EntityKey) -> Result<usize> {
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM entries
                 WHERE user_id = ?1 AND test_id = ?2 AND score IS NOT NULL",
                params![key.user_id, key.test_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
        .await
    }

    async fn list_entries(&self, key: Option<EntityKey>, limit: usize) -> Result<Vec<Entry>> {
        let limit = limit as i64;
        self.with_conn(move |conn| {
            let entries = match key {
                Some(key) => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM entries
                         WHERE user_id = ?1 AND test_id = ?2
                         ORDER BY created_at DESC, id DESC
                         LIMIT ?3",
                        ENTRY_COLUMNS
                    ))?;
                    let rows = stmt
                        .query_map(params![key.user_id, key.test_id, limit], row_to_entry)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM entries ORDER BY created_at DESC, id DESC LIMIT ?1",
                        ENTRY_COLUMNS
                    ))?;
                    let rows = stmt
                        .query_map(params![limit], row_to_entry)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                }
            };
            Ok(entries)
        })
        .await
    }
}
