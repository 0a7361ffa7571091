//! Common test utilities and helpers

#![allow(dead_code)]

use async_trait::async_trait;
use scorecast_core::{
    error::{ForecastError, Result},
    EmbeddingService, Forecaster, ModelStore, NewEntry, SqliteEntryStore, StudyAttributes,
    EMBEDDING_DIM,
};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Mock embedding service that generates deterministic fake embeddings
///
/// Embeddings are derived from the text hash, so tests run without
/// downloading a model.
pub struct MockEmbeddingService {
    calls: AtomicUsize,
}

impl MockEmbeddingService {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of texts embedded so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn generate_embedding(text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let base_hash = hasher.finish();

        let mut embedding: Vec<f32> = (0..EMBEDDING_DIM)
            .map(|i| {
                let mut dim_hasher = DefaultHasher::new();
                base_hash.hash(&mut dim_hasher);
                i.hash(&mut dim_hasher);
                ((dim_hasher.finish() % 2000) as f32 - 1000.0) / 1000.0
            })
            .collect();

        // Normalize to unit length (like real embeddings)
        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut embedding {
                *value /= magnitude;
            }
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingService for MockEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Self::generate_embedding(text))
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }

    fn model_name(&self) -> &str {
        "mock-embedding-service"
    }
}

/// Embedding service whose backing model is unavailable
pub struct FailingEmbeddingService;

#[async_trait]
impl EmbeddingService for FailingEmbeddingService {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(ForecastError::Embedding("model unavailable".to_string()))
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }

    fn model_name(&self) -> &str {
        "failing-embedding-service"
    }
}

/// Forecaster over a temporary database and model directory
pub struct TestHarness {
    pub forecaster: Forecaster,
    pub entries: Arc<SqliteEntryStore>,
    pub embedder: Arc<MockEmbeddingService>,
    pub dir: TempDir,
}

pub async fn create_test_harness(min_train_rows: usize) -> TestHarness {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let entries = Arc::new(
        SqliteEntryStore::open(dir.path().join("entries.db"))
            .await
            .expect("Failed to open entry store"),
    );
    let embedder = Arc::new(MockEmbeddingService::new());
    let models = ModelStore::new(
        dir.path().join("models"),
        min_train_rows,
        "mock-embedding-service",
    );

    let forecaster = Forecaster::new(entries.clone(), embedder.clone(), models);
    TestHarness {
        forecaster,
        entries,
        embedder,
        dir,
    }
}

/// Study session for an entity; attributes vary with `i`
pub fn session(user_id: i64, test_id: i64, i: usize, score: Option<f64>) -> NewEntry {
    NewEntry {
        user_id,
        test_id,
        score,
        attributes: StudyAttributes {
            confidence: Some(0.4 + (i % 5) as f64 * 0.1),
            stress: if i % 4 == 0 { None } else { Some(0.2 + (i % 3) as f64 * 0.2) },
            sleep: Some(6.0 + (i % 3) as f64),
            hours_studied: Some(1.0 + i as f64 * 0.5),
            feeling_text: Some(format!("session {} felt okay", i)),
        },
    }
}
