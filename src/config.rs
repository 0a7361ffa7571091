//! Configuration for the score forecasting service
//!
//! Values are layered with the `config` crate:
//! 1. Built-in defaults
//! 2. Optional TOML file
//! 3. `SCORECAST_*` environment variables (`__` separates nested keys,
//!    e.g. `SCORECAST_EMBEDDING__MODEL`)
//! 4. Legacy variable names from earlier deployments
//!    (`EMBEDDING_MODEL_NAME`, `MODEL_DIR`, `MIN_TRAIN_ROWS`, `DATABASE_PATH`)

use crate::embeddings::{local::model_name_to_enum, EMBEDDING_DIM};
use crate::error::{ForecastError, Result};
use crate::types::EntityKey;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default embedding model identifier
pub const DEFAULT_EMBEDDING_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Default minimum number of labeled rows before training is permitted
pub const DEFAULT_MIN_TRAIN_ROWS: usize = 10;

/// Environment variable prefix
const ENV_PREFIX: &str = "SCORECAST";

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model identifier, e.g. "sentence-transformers/all-MiniLM-L6-v2"
    pub model: String,
    /// Where downloaded model files are cached
    pub cache_dir: PathBuf,
    /// Show a progress bar while downloading the model
    pub show_download_progress: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            cache_dir: default_data_dir().join("embedding-cache"),
            show_download_progress: false,
        }
    }
}

impl EmbeddingConfig {
    /// Output width of the configured model
    pub fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }

    /// Reject models that are unknown or do not produce 384-dim vectors
    pub fn validate(&self) -> Result<()> {
        model_name_to_enum(&self.model).map(|_| ())
    }
}

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastConfig {
    /// SQLite database holding entries
    pub database_path: PathBuf,
    /// Directory holding one artifact per (user, test)
    pub model_dir: PathBuf,
    /// Minimum labeled rows required to train
    pub min_train_rows: usize,
    pub embedding: EmbeddingConfig,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            database_path: data_dir.join("scorecast.db"),
            model_dir: data_dir.join("models"),
            min_train_rows: DEFAULT_MIN_TRAIN_ROWS,
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl ForecastConfig {
    /// Load configuration from defaults, an optional file, and the environment
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let defaults = ForecastConfig::default();

        let mut builder = Config::builder()
            .set_default(
                "database_path",
                defaults.database_path.to_string_lossy().to_string(),
            )?
            .set_default("model_dir", defaults.model_dir.to_string_lossy().to_string())?
            .set_default("min_train_rows", defaults.min_train_rows as i64)?
            .set_default("embedding.model", defaults.embedding.model.clone())?
            .set_default(
                "embedding.cache_dir",
                defaults.embedding.cache_dir.to_string_lossy().to_string(),
            )?
            .set_default(
                "embedding.show_download_progress",
                defaults.embedding.show_download_progress,
            )?;

        if let Some(path) = file {
            debug!("Loading configuration file: {}", path.display());
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("embedding.model", env::var("EMBEDDING_MODEL_NAME").ok())?
            .set_override_option("model_dir", env::var("MODEL_DIR").ok())?
            .set_override_option("database_path", env::var("DATABASE_PATH").ok())?
            .set_override_option("min_train_rows", legacy_min_train_rows()?)?;

        let config: ForecastConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that deserialization cannot express
    pub fn validate(&self) -> Result<()> {
        if self.min_train_rows == 0 {
            return Err(ForecastError::Config(config::ConfigError::Message(
                "min_train_rows must be at least 1".to_string(),
            )));
        }
        self.embedding.validate()
    }

}

/// `MIN_TRAIN_ROWS`, if set; a value that is not a whole number is an error
fn legacy_min_train_rows() -> Result<Option<i64>> {
    match env::var("MIN_TRAIN_ROWS") {
        Ok(raw) => raw.trim().parse::<i64>().map(Some).map_err(|e| {
            ForecastError::Config(config::ConfigError::Message(format!(
                "MIN_TRAIN_ROWS must be a whole number, got '{}': {}",
                raw, e
            )))
        }),
        Err(_) => Ok(None),
    }
}

/// `{model_dir}/model_u{user_id}_t{test_id}.bin`
pub fn artifact_path(model_dir: &Path, key: EntityKey) -> PathBuf {
    model_dir.join(format!("model_u{}_t{}.bin", key.user_id, key.test_id))
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("scorecast")
}
