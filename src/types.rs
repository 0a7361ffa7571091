//! Core data types for the score forecasting pipeline
//!
//! Defines the entity key, stored entries, and the reports returned by
//! training, status, and prediction requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Auto-assigned sequential entry identifier
pub type EntryId = i64;

/// A (user_id, test_id) pair: the unit of model scoping and history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub user_id: i64,
    pub test_id: i64,
}

impl EntityKey {
    pub fn new(user_id: i64, test_id: i64) -> Self {
        Self { user_id, test_id }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}/t{}", self.user_id, self.test_id)
    }
}

/// Self-reported study-session attributes
///
/// Every scalar is optional; missing values are imputed by the model pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StudyAttributes {
    pub confidence: Option<f64>,
    pub stress: Option<f64>,
    pub sleep: Option<f64>,
    pub hours_studied: Option<f64>,
    pub feeling_text: Option<String>,
}

impl StudyAttributes {
    /// Feeling text with blank values treated as absent
    pub fn feeling(&self) -> Option<&str> {
        self.feeling_text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// An observation submitted by a caller, before it is stored
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewEntry {
    pub user_id: i64,
    pub test_id: i64,
    /// Ground-truth exam score, if already known
    pub score: Option<f64>,
    #[serde(flatten)]
    pub attributes: StudyAttributes,
}

impl NewEntry {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.user_id, self.test_id)
    }
}

/// A stored observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub user_id: i64,
    pub test_id: i64,
    pub score: Option<f64>,
    pub predicted_score: Option<f64>,
    #[serde(flatten)]
    pub attributes: StudyAttributes,
    /// Persisted embedding of `feeling_text`; skipped in JSON output
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
}

impl Entry {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.user_id, self.test_id)
    }

    pub fn is_labeled(&self) -> bool {
        self.score.is_some()
    }
}

/// Result of a successful training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainReport {
    pub trained_rows: usize,
    pub train_mae: f64,
    pub model_path: PathBuf,
}

/// Training readiness and staleness for one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelStatus {
    pub labeled_count: usize,
    pub min_required: usize,
    pub can_train: bool,
    pub model_exists: bool,
    pub trained_rows: usize,
    /// Advisory only: more labeled rows exist than the model was fit on
    pub needs_retrain: bool,
}

/// Result of a prediction request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub entry_id: EntryId,
    pub predicted_score: f64,
}
