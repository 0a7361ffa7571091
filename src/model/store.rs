//! Per-entity model store
//!
//! Trains, persists, and serves one pipeline per (user_id, test_id).
//!
//! # Caching
//!
//! Loaded artifacts are cached per entity together with the file's
//! modification time, length, and (on unix) inode. Every load re-stats the
//! file; a changed stamp, for example after another process retrained,
//! triggers a reload. The cache is unbounded.
//!
//! # Concurrency
//!
//! Each entity owns a slot with two async locks:
//! - `train`: at most one training run per entity at a time
//! - `cache`: serializes the stat → compare → reload sequence so concurrent
//!   predictions never deserialize the same artifact twice
//!
//! Training does not hold the cache lock while fitting, so predictions keep
//! using the previous artifact until the new file has been renamed into place.

use crate::config::{artifact_path, ForecastConfig};
use crate::embeddings::local::canonical_model_name;
use crate::error::{ForecastError, Result};
use crate::features::builder::check_width;
use crate::features::{FeatureVector, HistoryWalker};
use crate::model::artifact::ModelArtifact;
use crate::model::pipeline::ScorePipeline;
use crate::types::{EntityKey, ModelStatus, StudyAttributes, TrainReport};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tokio::task;
use tracing::{debug, info};

/// One labeled row, supplied in chronological order
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledExample {
    pub attributes: StudyAttributes,
    pub embedding: Option<Vec<f32>>,
    pub score: f64,
}

/// Identifies one version of an artifact file on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ArtifactStamp {
    modified: SystemTime,
    len: u64,
    /// Atomic replacement always yields a new inode
    inode: u64,
}

impl ArtifactStamp {
    async fn of(path: &Path) -> Result<Option<Self>> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(Some(Self {
                modified: meta.modified()?,
                len: meta.len(),
                inode: inode(&meta),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ForecastError::Io(e)),
        }
    }
}

#[cfg(unix)]
fn inode(meta: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

#[cfg(not(unix))]
fn inode(_meta: &std::fs::Metadata) -> u64 {
    0
}

struct CachedModel {
    artifact: Arc<ModelArtifact>,
    stamp: ArtifactStamp,
}

#[derive(Default)]
struct EntitySlot {
    train: tokio::sync::Mutex<()>,
    cache: tokio::sync::Mutex<Option<CachedModel>>,
}

/// Trains and serves per-entity regression pipelines
pub struct ModelStore {
    model_dir: PathBuf,
    min_train_rows: usize,
    embedding_model: String,
    slots: Mutex<HashMap<EntityKey, Arc<EntitySlot>>>,
}

impl ModelStore {
    pub fn new(model_dir: impl Into<PathBuf>, min_train_rows: usize, embedding_model: &str) -> Self {
        Self {
            model_dir: model_dir.into(),
            min_train_rows,
            embedding_model: embedding_model.to_string(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &ForecastConfig) -> Self {
        Self::new(
            config.model_dir.clone(),
            config.min_train_rows,
            &config.embedding.model,
        )
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    pub fn min_train_rows(&self) -> usize {
        self.min_train_rows
    }

    /// Deterministic artifact path for an entity
    pub fn model_path(&self, key: EntityKey) -> PathBuf {
        artifact_path(&self.model_dir, key)
    }

    /// Fail with `InsufficientData` unless `have` meets the configured minimum
    pub fn ensure_trainable(&self, have: usize) -> Result<()> {
        if have < self.min_train_rows {
            return Err(ForecastError::InsufficientData {
                have,
                need: self.min_train_rows,
            });
        }
        Ok(())
    }

    fn slot(&self, key: EntityKey) -> Result<Arc<EntitySlot>> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|e| ForecastError::Other(format!("Model slot lock poisoned: {}", e)))?;
        Ok(Arc::clone(slots.entry(key).or_default()))
    }

    /// Refit the entity's pipeline from its full labeled history
    ///
    /// `examples` must be in chronological order (created_at, then id). The
    /// temporal features are rebuilt from scratch by replaying them.
    pub async fn train(&self, key: EntityKey, examples: Vec<LabeledExample>) -> Result<TrainReport> {
        self.ensure_trainable(examples.len())?;

        let slot = self.slot(key)?;
        let _training = slot.train.lock().await;

        let path = self.model_path(key);
        let embedding_model = self.embedding_model.clone();
        let write_path = path.clone();

        let (trained_rows, train_mae) = task::spawn_blocking(move || -> Result<(usize, f64)> {
            let (rows, targets) = training_matrix(&examples)?;
            let pipeline = ScorePipeline::fit(&rows, &targets)?;
            let train_mae = pipeline.mean_absolute_error(&rows, &targets)?;

            let artifact = ModelArtifact::new(pipeline, rows.len(), &embedding_model);
            artifact.write_atomic(&write_path)?;
            Ok((rows.len(), train_mae))
        })
        .await??;

        // Evict; the next load picks up the new file
        *slot.cache.lock().await = None;

        info!(
            "Trained model for {}: rows={}, mae={:.3}, path={}",
            key,
            trained_rows,
            train_mae,
            path.display()
        );

        Ok(TrainReport {
            trained_rows,
            train_mae,
            model_path: path,
        })
    }

    /// Return the entity's model, reloading if the file changed on disk
    pub async fn load(&self, key: EntityKey) -> Result<Arc<ModelArtifact>> {
        let path = self.model_path(key);
        let slot = self.slot(key)?;
        let mut cache = slot.cache.lock().await;

        let stamp = match ArtifactStamp::of(&path).await? {
            Some(stamp) => stamp,
            None => {
                *cache = None;
                return Err(ForecastError::ModelNotFound { path });
            }
        };

        if let Some(cached) = cache.as_ref() {
            if cached.stamp == stamp {
                debug!("Model cache hit for {}", key);
                return Ok(Arc::clone(&cached.artifact));
            }
            debug!("Model artifact changed on disk for {}, reloading", key);
        } else {
            debug!("Model cache miss for {}", key);
        }

        let read_path = path.clone();
        let artifact = match task::spawn_blocking(move || ModelArtifact::read(&read_path)).await? {
            Ok(artifact) => Arc::new(artifact),
            // Removed between stat and read
            Err(ForecastError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                *cache = None;
                return Err(ForecastError::ModelNotFound { path });
            }
            Err(e) => return Err(e),
        };

        if canonical_model_name(&artifact.embedding_model)
            != canonical_model_name(&self.embedding_model)
        {
            *cache = None;
            return Err(ForecastError::EmbeddingModelMismatch {
                trained: artifact.embedding_model.clone(),
                configured: self.embedding_model.clone(),
            });
        }

        info!(
            "Loaded model for {} ({} trained rows) from {}",
            key,
            artifact.trained_rows,
            path.display()
        );

        *cache = Some(CachedModel {
            artifact: Arc::clone(&artifact),
            stamp,
        });
        Ok(artifact)
    }

    /// Report training readiness and staleness
    ///
    /// `labeled_count` is the entity's current number of labeled entries.
    pub async fn status(&self, key: EntityKey, labeled_count: usize) -> Result<ModelStatus> {
        let (model_exists, trained_rows) = match self.load(key).await {
            Ok(artifact) => (true, artifact.trained_rows),
            Err(ForecastError::ModelNotFound { .. }) => (false, 0),
            Err(e) => return Err(e),
        };

        Ok(ModelStatus {
            labeled_count,
            min_required: self.min_train_rows,
            can_train: labeled_count >= self.min_train_rows,
            model_exists,
            trained_rows,
            needs_retrain: model_exists && labeled_count > trained_rows,
        })
    }

    /// Predict one score with the entity's own model
    pub async fn predict(&self, key: EntityKey, features: &FeatureVector) -> Result<f64> {
        check_width(features.len())?;
        let artifact = self.load(key).await?;
        artifact.pipeline.predict(features)
    }

    /// Whether an artifact for the entity is currently held in memory
    pub async fn is_cached(&self, key: EntityKey) -> bool {
        match self.slot(key) {
            Ok(slot) => slot.cache.lock().await.is_some(),
            Err(_) => false,
        }
    }
}

/// Replay examples through a fresh history walker into a feature matrix
fn training_matrix(examples: &[LabeledExample]) -> Result<(Vec<FeatureVector>, Vec<f64>)> {
    let mut walker = HistoryWalker::new();
    let mut rows = Vec::with_capacity(examples.len());
    let mut targets = Vec::with_capacity(examples.len());

    for example in examples {
        // Features are read before this example's score joins the history
        let temporal = walker.observe(example.score);
        rows.push(FeatureVector::build(
            &example.attributes,
            &temporal,
            example.embedding.as_deref(),
        )?);
        targets.push(example.score);
    }

    Ok((rows, targets))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::EMBEDDING_DIM;
    use crate::features::TemporalFeatures;
    use tempfile::TempDir;

    const SCORES: [f64; 10] = [60.0, 62.0, 58.0, 65.0, 70.0, 68.0, 72.0, 75.0, 80.0, 78.0];

    fn example(i: usize, score: f64) -> LabeledExample {
        let mut embedding = vec![0.0f32; EMBEDDING_DIM];
        embedding[i % EMBEDDING_DIM] = 1.0;
        LabeledExample {
            attributes: StudyAttributes {
                confidence: Some(0.5 + i as f64 * 0.03),
                stress: if i % 3 == 0 { None } else { Some(0.4) },
                sleep: Some(6.0 + (i % 3) as f64),
                hours_studied: Some(1.0 + i as f64 * 0.5),
                feeling_text: Some(format!("session {}", i)),
            },
            embedding: if i % 4 == 0 { None } else { Some(embedding) },
            score,
        }
    }

    fn examples(scores: &[f64]) -> Vec<LabeledExample> {
        scores.iter().enumerate().map(|(i, &s)| example(i, s)).collect()
    }

    fn store(dir: &TempDir, min_rows: usize) -> ModelStore {
        ModelStore::new(dir.path().join("models"), min_rows, "all-MiniLM-L6-v2")
    }

    fn live_features(key_scores: &[f64]) -> FeatureVector {
        let recent: Vec<f64> = key_scores.iter().rev().take(3).copied().collect();
        let temporal = TemporalFeatures::from_recent(&recent, key_scores.len());
        FeatureVector::build(&example(99, 0.0).attributes, &temporal, None).unwrap()
    }

    #[test]
    fn test_training_matrix_is_causal() {
        let (rows, targets) = training_matrix(&examples(&SCORES)).unwrap();
        assert_eq!(rows.len(), 10);
        assert_eq!(targets, SCORES.to_vec());

        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row.len(), 391);
            // count_prev column
            assert_eq!(row.as_slice()[6], i as f64);
        }
        assert!(rows[0].as_slice()[4].is_nan());
        assert_eq!(rows[1].as_slice()[4], 60.0);
        assert_eq!(rows[4].as_slice()[5], (62.0 + 58.0 + 65.0) / 3.0);
    }

    #[tokio::test]
    async fn test_insufficient_data_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 10);
        let key = EntityKey::new(1, 9);

        let err = store.train(key, examples(&SCORES[..9])).await.unwrap_err();
        assert!(matches!(
            err,
            ForecastError::InsufficientData { have: 9, need: 10 }
        ));
        assert!(!store.model_dir().exists());
    }

    #[tokio::test]
    async fn test_predict_without_artifact_is_model_not_found() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 3);
        let key = EntityKey::new(2, 5);

        let err = store.predict(key, &live_features(&SCORES)).await.unwrap_err();
        match err {
            ForecastError::ModelNotFound { path } => assert_eq!(path, store.model_path(key)),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_train_then_predict() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 10);
        let key = EntityKey::new(1, 9);

        let report = store.train(key, examples(&SCORES)).await.unwrap();
        assert_eq!(report.trained_rows, 10);
        assert!(report.train_mae.is_finite());
        assert_eq!(report.model_path, dir.path().join("models/model_u1_t9.bin"));
        assert!(report.model_path.exists());

        let prediction = store.predict(key, &live_features(&SCORES)).await.unwrap();
        assert!(prediction.is_finite());

        // model is entity-scoped
        let other = EntityKey::new(1, 10);
        assert!(matches!(
            store.predict(other, &live_features(&SCORES)).await,
            Err(ForecastError::ModelNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_status_tracks_staleness() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 10);
        let key = EntityKey::new(1, 9);

        let status = store.status(key, 9).await.unwrap();
        assert_eq!(
            status,
            ModelStatus {
                labeled_count: 9,
                min_required: 10,
                can_train: false,
                model_exists: false,
                trained_rows: 0,
                needs_retrain: false,
            }
        );

        store.train(key, examples(&SCORES)).await.unwrap();

        let status = store.status(key, 10).await.unwrap();
        assert!(status.model_exists);
        assert!(status.can_train);
        assert_eq!(status.trained_rows, 10);
        assert!(!status.needs_retrain);

        let status = store.status(key, 11).await.unwrap();
        assert!(status.needs_retrain);
    }

    #[tokio::test]
    async fn test_cache_reloads_after_external_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 3);
        let key = EntityKey::new(4, 2);

        store.train(key, examples(&SCORES[..5])).await.unwrap();
        assert!(!store.is_cached(key).await);

        let first = store.load(key).await.unwrap();
        assert_eq!(first.trained_rows, 5);
        assert!(store.is_cached(key).await);

        // cache hit returns the same allocation
        let again = store.load(key).await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        // simulate an out-of-process retrain writing the same path
        let writer = ModelStore::new(store.model_dir(), 3, "all-MiniLM-L6-v2");
        writer.train(key, examples(&SCORES)).await.unwrap();

        let reloaded = store.load(key).await.unwrap();
        assert_eq!(reloaded.trained_rows, 10);
        assert!(!Arc::ptr_eq(&first, &reloaded));
    }

    #[tokio::test]
    async fn test_load_rejects_artifact_from_other_embedding_model() {
        let dir = TempDir::new().unwrap();
        let key = EntityKey::new(3, 3);
        store(&dir, 3).train(key, examples(&SCORES)).await.unwrap();

        // hub prefix does not change the model
        let prefixed = ModelStore::new(
            dir.path().join("models"),
            3,
            "sentence-transformers/all-MiniLM-L6-v2",
        );
        assert!(prefixed.load(key).await.is_ok());

        let switched = ModelStore::new(dir.path().join("models"), 3, "bge-small-en-v1.5");
        match switched.load(key).await {
            Err(ForecastError::EmbeddingModelMismatch { trained, configured }) => {
                assert_eq!(trained, "all-MiniLM-L6-v2");
                assert_eq!(configured, "bge-small-en-v1.5");
            }
            other => panic!("unexpected result: {:?}", other.map(|a| a.trained_rows)),
        }
        assert!(!switched.is_cached(key).await);
        assert!(switched
            .predict(key, &live_features(&SCORES))
            .await
            .is_err());

        // retraining under the new model makes the entity usable again
        switched.train(key, examples(&SCORES)).await.unwrap();
        assert_eq!(switched.load(key).await.unwrap().embedding_model, "bge-small-en-v1.5");
    }

    #[tokio::test]
    async fn test_removed_artifact_clears_cache() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir, 3);
        let key = EntityKey::new(6, 6);

        store.train(key, examples(&SCORES[..4])).await.unwrap();
        store.load(key).await.unwrap();
        std::fs::remove_file(store.model_path(key)).unwrap();

        assert!(matches!(
            store.load(key).await,
            Err(ForecastError::ModelNotFound { .. })
        ));
        assert!(!store.is_cached(key).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_trains_same_entity() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store(&dir, 3));
        let key = EntityKey::new(1, 1);

        let short = examples(&SCORES[..6]);
        let long = examples(&SCORES);

        let a = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.train(key, short).await })
        };
        let b = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.train(key, long).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let artifact = ModelArtifact::read(&store.model_path(key)).unwrap();
        assert!(artifact.trained_rows == 6 || artifact.trained_rows == 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_loads_share_one_artifact() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(store(&dir, 3));
        let key = EntityKey::new(8, 3);
        store.train(key, examples(&SCORES)).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.load(key).await.unwrap() })
            })
            .collect();

        let mut loaded = Vec::new();
        for handle in handles {
            loaded.push(handle.await.unwrap());
        }
        for artifact in &loaded[1..] {
            assert!(Arc::ptr_eq(&loaded[0], artifact));
        }
    }
}
