//! Score forecasting service
//!
//! Ties together the entry store, embedding provider, feature builder, and
//! per-entity model store:
//!
//! ```text
//! entry → embed feeling text → temporal features → feature vector
//!       ├─ labeled:   stored as a training example
//!       └─ unlabeled: scored by the entity's model, stored with the prediction
//! ```

use crate::config::ForecastConfig;
use crate::embeddings::{embed_text, EmbeddingService};
use crate::error::{ForecastError, Result};
use crate::features::history::ROLLING_WINDOW;
use crate::features::{FeatureVector, TemporalFeatures};
use crate::model::{LabeledExample, ModelStore};
use crate::storage::EntryStore;
use crate::types::{EntityKey, Entry, EntryId, ModelStatus, NewEntry, Prediction, TrainReport};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Request-facing facade over storage, embeddings, and models
pub struct Forecaster {
    entries: Arc<dyn EntryStore>,
    embedder: Arc<dyn EmbeddingService>,
    models: ModelStore,
}

impl Forecaster {
    pub fn new(
        entries: Arc<dyn EntryStore>,
        embedder: Arc<dyn EmbeddingService>,
        models: ModelStore,
    ) -> Self {
        Self {
            entries,
            embedder,
            models,
        }
    }

    pub fn from_config(
        config: &ForecastConfig,
        entries: Arc<dyn EntryStore>,
        embedder: Arc<dyn EmbeddingService>,
    ) -> Self {
        Self::new(entries, embedder, ModelStore::from_config(config))
    }

    pub fn models(&self) -> &ModelStore {
        &self.models
    }

    /// Store a new entry, embedding its feeling text once
    pub async fn create_entry(&self, entry: NewEntry) -> Result<Entry> {
        validate(&entry)?;
        let embedding = embed_text(self.embedder.as_ref(), entry.attributes.feeling()).await?;
        let stored = self
            .entries
            .insert_entry(&entry, embedding.as_deref(), None, Utc::now())
            .await?;

        info!(
            "Created entry {} for {} (labeled: {})",
            stored.id,
            stored.key(),
            stored.is_labeled()
        );
        Ok(stored)
    }

    /// Attach a ground-truth score to an existing entry
    pub async fn label_entry(&self, id: EntryId, score: f64) -> Result<Entry> {
        if !score.is_finite() {
            return Err(ForecastError::InvalidInput(format!(
                "Score must be finite, got {}",
                score
            )));
        }
        self.entries.set_label(id, score).await
    }

    pub async fn list_entries(&self, key: Option<EntityKey>, limit: usize) -> Result<Vec<Entry>> {
        self.entries.list_entries(key, limit).await
    }

    /// Refit the entity's model from its full labeled history
    pub async fn train(&self, key: EntityKey) -> Result<TrainReport> {
        // Check before any embedding work or filesystem write
        let have = self.entries.count_labeled(key).await?;
        self.models.ensure_trainable(have)?;

        let labeled = self.entries.labeled_entries(key).await?;
        let mut examples = Vec::with_capacity(labeled.len());

        for entry in labeled {
            let score = match entry.score {
                Some(score) => score,
                None => continue,
            };

            let embedding = match entry.embedding {
                Some(embedding) => Some(embedding),
                None => {
                    let computed =
                        embed_text(self.embedder.as_ref(), entry.attributes.feeling()).await?;
                    if let Some(embedding) = &computed {
                        warn!("Entry {} had no stored embedding, computed it now", entry.id);
                        self.entries.set_embedding(entry.id, embedding).await?;
                    }
                    computed
                }
            };

            examples.push(LabeledExample {
                attributes: entry.attributes,
                embedding,
                score,
            });
        }

        debug!("Training {} on {} labeled entries", key, examples.len());
        self.models.train(key, examples).await
    }

    /// Training readiness and staleness for an entity
    pub async fn status(&self, key: EntityKey) -> Result<ModelStatus> {
        let labeled_count = self.entries.count_labeled(key).await?;
        self.models.status(key, labeled_count).await
    }

    /// Score an unlabeled entry with the entity's model and store it
    pub async fn predict(&self, request: NewEntry) -> Result<Prediction> {
        validate(&request)?;
        if request.score.is_some() {
            return Err(ForecastError::InvalidInput(
                "Prediction requests must not carry a score".to_string(),
            ));
        }

        let key = request.key();
        // Fail fast before embedding when the entity was never trained
        self.models.load(key).await?;

        let embedding = embed_text(self.embedder.as_ref(), request.attributes.feeling()).await?;
        let temporal = self.live_temporal_features(key).await?;
        let features =
            FeatureVector::build(&request.attributes, &temporal, embedding.as_deref())?;

        let predicted_score = self.models.predict(key, &features).await?;

        let stored = self
            .entries
            .insert_entry(
                &request,
                embedding.as_deref(),
                Some(predicted_score),
                Utc::now(),
            )
            .await?;

        info!(
            "Predicted {:.2} for {} (entry {})",
            predicted_score, key, stored.id
        );

        Ok(Prediction {
            entry_id: stored.id,
            predicted_score,
        })
    }

    /// Prior-score features for a new entry appended after all labeled ones
    pub async fn live_temporal_features(&self, key: EntityKey) -> Result<TemporalFeatures> {
        let history = self.entries.labeled_history(key, ROLLING_WINDOW).await?;
        Ok(TemporalFeatures::from_recent(
            &history.recent_desc,
            history.labeled_count,
        ))
    }
}

fn validate(entry: &NewEntry) -> Result<()> {
    let a = &entry.attributes;
    let fields = [
        ("score", entry.score),
        ("confidence", a.confidence),
        ("stress", a.stress),
        ("sleep", a.sleep),
        ("hours_studied", a.hours_studied),
    ];
    for (name, value) in fields {
        if let Some(v) = value {
            if !v.is_finite() {
                return Err(ForecastError::InvalidInput(format!(
                    "{} must be finite, got {}",
                    name, v
                )));
            }
        }
    }
    Ok(())
}
