//! Local embedding service using fastembed
//!
//! The ONNX model is loaded on first use, exactly once, even when several
//! requests race to embed their first text. Models are downloaded to the
//! configured cache directory and reused on subsequent runs.

use crate::config::EmbeddingConfig;
use crate::embeddings::{normalize, EmbeddingService, EMBEDDING_DIM};
use crate::error::{ForecastError, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::OnceCell;
use tokio::task;
use tracing::{debug, info};

/// Process-wide service shared by every request
static SHARED: OnceLock<Arc<LocalEmbeddingService>> = OnceLock::new();

/// Local embedding service using fastembed
pub struct LocalEmbeddingService {
    /// Loaded lazily; `OnceCell` guarantees a single initialization
    model: OnceCell<Arc<Mutex<TextEmbedding>>>,
    config: EmbeddingConfig,
}

impl LocalEmbeddingService {
    /// Create a service without loading the model
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            model: OnceCell::new(),
            config,
        })
    }

    /// Return the process-wide service, creating it on first call
    ///
    /// Later calls must name the same model as the first one.
    pub fn shared(config: &EmbeddingConfig) -> Result<Arc<Self>> {
        if let Some(existing) = SHARED.get() {
            return Self::check_same_model(existing, config);
        }

        let service = Arc::new(Self::new(config.clone())?);
        let winner = SHARED.get_or_init(|| service);
        Self::check_same_model(winner, config)
    }

    fn check_same_model(service: &Arc<Self>, config: &EmbeddingConfig) -> Result<Arc<Self>> {
        if service.config.model != config.model {
            return Err(ForecastError::Embedding(format!(
                "Embedding model already initialized as '{}', cannot switch to '{}'",
                service.config.model, config.model
            )));
        }
        Ok(Arc::clone(service))
    }

    /// Whether the underlying model has been loaded yet
    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    async fn model(&self) -> Result<Arc<Mutex<TextEmbedding>>> {
        let model = self
            .model
            .get_or_try_init(|| async {
                let embedding_model = model_name_to_enum(&self.config.model)?;
                let init_options = InitOptions::new(embedding_model)
                    .with_cache_dir(self.config.cache_dir.clone())
                    .with_show_download_progress(self.config.show_download_progress);

                info!(
                    "Loading embedding model: model={}, cache={:?}",
                    self.config.model, self.config.cache_dir
                );

                // May download the model if not cached
                let model = task::spawn_blocking(move || TextEmbedding::try_new(init_options))
                    .await?
                    .map_err(|e| {
                        ForecastError::Embedding(format!("Failed to load model: {}", e))
                    })?;

                info!("Embedding model loaded: {}", self.config.model);
                Ok::<_, ForecastError>(Arc::new(Mutex::new(model)))
            })
            .await?;

        Ok(Arc::clone(model))
    }
}

/// Map a model identifier to fastembed's enum
///
/// Only models producing [`EMBEDDING_DIM`]-wide vectors are accepted; the
/// `sentence-transformers/` and `BAAI/` hub prefixes are optional.
pub fn model_name_to_enum(model_name: &str) -> Result<EmbeddingModel> {
    match canonical_model_name(model_name) {
        "all-MiniLM-L6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "all-MiniLM-L12-v2" => Ok(EmbeddingModel::AllMiniLML12V2),
        "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        _ => Err(ForecastError::Config(config::ConfigError::Message(format!(
            "Unsupported embedding model: '{}'. Supported {}-dim models: \
             all-MiniLM-L6-v2, all-MiniLM-L12-v2, bge-small-en-v1.5",
            model_name, EMBEDDING_DIM
        )))),
    }
}

/// Model identifier without its hub prefix
///
/// `sentence-transformers/all-MiniLM-L6-v2` and `all-MiniLM-L6-v2` name the
/// same model and produce the same vectors.
pub fn canonical_model_name(model_name: &str) -> &str {
    model_name
        .strip_prefix("sentence-transformers/")
        .or_else(|| model_name.strip_prefix("BAAI/"))
        .unwrap_or(model_name)
}

#[async_trait]
impl EmbeddingService for LocalEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(ForecastError::InvalidInput(
                "Text cannot be empty".to_string(),
            ));
        }

        let model = self.model().await?;
        let texts = vec![text.to_string()];

        // fastembed is synchronous
        let mut embeddings = task::spawn_blocking(move || {
            let mut model_guard = model
                .lock()
                .map_err(|e| format!("Mutex lock failed: {}", e))?;
            model_guard
                .embed(texts, None)
                .map_err(|e| format!("Embedding generation failed: {}", e))
        })
        .await?
        .map_err(ForecastError::Embedding)?;

        let mut embedding = embeddings
            .pop()
            .ok_or_else(|| ForecastError::Embedding("No embedding returned".to_string()))?;

        if embedding.len() != EMBEDDING_DIM {
            return Err(ForecastError::Embedding(format!(
                "Embedding has wrong dimensions: expected {}, got {}",
                EMBEDDING_DIM,
                embedding.len()
            )));
        }

        normalize(&mut embedding);
        debug!("Generated embedding for {} chars", text.len());
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}
