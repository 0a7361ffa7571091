//! Scorecast - per-student exam score forecasting
//!
//! Ingests self-reported study-session attributes (confidence, stress, sleep,
//! hours studied, free-text feeling) per (user, test) and trains a small
//! regression model per pair to predict the exam score.
//!
//! # Architecture
//!
//! - **Embeddings**: feeling text → 384-dim unit vector (fastembed, loaded once)
//! - **Features**: fixed-order 391-wide vector plus causal prior-score history
//! - **Model**: per-entity imputer → scaler → ridge pipeline, persisted
//!   atomically and cached by file stamp
//! - **Storage**: SQLite entry store
//! - **Forecaster**: request-facing service tying the above together
//!
//! # Example
//!
//! ```ignore
//! use scorecast_core::{EntityKey, ForecastConfig, Forecaster, LocalEmbeddingService, SqliteEntryStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> scorecast_core::Result<()> {
//!     let config = ForecastConfig::load(None)?;
//!     let entries = Arc::new(SqliteEntryStore::open(&config.database_path).await?);
//!     let embedder = LocalEmbeddingService::shared(&config.embedding)?;
//!     let forecaster = Forecaster::from_config(&config, entries, embedder);
//!
//!     let report = forecaster.train(EntityKey::new(1, 9)).await?;
//!     println!("trained on {} rows", report.trained_rows);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod embeddings;
pub mod error;
pub mod features;
pub mod forecaster;
pub mod model;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use config::{EmbeddingConfig, ForecastConfig};
pub use embeddings::{EmbeddingService, LocalEmbeddingService, EMBEDDING_DIM};
pub use error::{ForecastError, Result};
pub use features::{FeatureVector, HistoryWalker, TemporalFeatures, FEATURE_LEN};
pub use forecaster::Forecaster;
pub use model::{ModelArtifact, ModelStore};
pub use storage::{EntryStore, LabeledHistory, SqliteEntryStore};
pub use types::{
    EntityKey, Entry, EntryId, ModelStatus, NewEntry, Prediction, StudyAttributes, TrainReport,
};
