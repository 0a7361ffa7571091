//! Entry persistence
//!
//! Stores submitted entries, their labels, cached embeddings, and the
//! predictions served for them.

pub mod sqlite;

pub use sqlite::SqliteEntryStore;

use crate::error::Result;
use crate::types::{EntityKey, Entry, EntryId, NewEntry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// An entity's labeled history as needed for a live prediction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabeledHistory {
    /// Newest first
    pub recent_desc: Vec<f64>,
    pub labeled_count: usize,
}

/// Storage backend trait defining all required operations
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Store a new entry in a single write
    async fn insert_entry(
        &self,
        entry: &NewEntry,
        embedding: Option<&[f32]>,
        predicted_score: Option<f64>,
        created_at: DateTime<Utc>,
    ) -> Result<Entry>;

    /// Retrieve an entry by ID
    async fn get_entry(&self, id: EntryId) -> Result<Entry>;

    /// Set the ground-truth score, making the entry a training example
    async fn set_label(&self, id: EntryId, score: f64) -> Result<Entry>;

    /// Persist an embedding computed after the entry was stored
    async fn set_embedding(&self, id: EntryId, embedding: &[f32]) -> Result<()>;

    /// All labeled entries for an entity, oldest first (created_at, then id)
    async fn labeled_entries(&self, key: EntityKey) -> Result<Vec<Entry>>;

    /// Most recent labeled scores (newest first, at most `window`) and the
    /// full labeled count, read from one consistent snapshot
    async fn labeled_history(&self, key: EntityKey, window: usize) -> Result<LabeledHistory>;

    /// Number of labeled entries for an entity
    async fn count_labeled(&self, key: EntityKey) -> Result<usize>;

    /// Most recent entries, optionally restricted to one entity
    async fn list_entries(&self, key: Option<EntityKey>, limit: usize) -> Result<Vec<Entry>>;
}
