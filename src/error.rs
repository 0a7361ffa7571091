//! Error types for the score forecasting pipeline
//!
//! Structured variants are defined with thiserror; anyhow errors coming from
//! outer layers are folded into [`ForecastError::Other`].

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for scorecast operations
#[derive(Error, Debug)]
pub enum ForecastError {
    /// Training was requested with fewer labeled rows than configured
    #[error("Insufficient data: have {have} labeled rows, need {need}")]
    InsufficientData { have: usize, need: usize },

    /// No trained artifact exists for the entity
    #[error("Model not found at {}", path.display())]
    ModelNotFound { path: PathBuf },

    /// Label update targeted an unknown entry
    #[error("Entry not found: {0}")]
    EntryNotFound(i64),

    /// Feature vector width differs from the pipeline's expected width
    #[error("Feature shape mismatch: expected {expected} columns, got {actual}")]
    FeatureShapeMismatch { expected: usize, actual: usize },

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Model artifact could not be written or decoded
    #[error("Artifact error: {0}")]
    Artifact(String),

    /// Artifact was fit on embeddings from a different model
    #[error("Embedding model mismatch: artifact trained with '{trained}', configured '{configured}'")]
    EmbeddingModelMismatch { trained: String, configured: String },

    /// Caller supplied an invalid value
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Result type alias for scorecast operations
pub type Result<T> = std::result::Result<T, ForecastError>;

impl From<anyhow::Error> for ForecastError {
    fn from(err: anyhow::Error) -> Self {
        ForecastError::Other(err.to_string())
    }
}

impl From<rusqlite::Error> for ForecastError {
    fn from(err: rusqlite::Error) -> Self {
        ForecastError::Database(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ForecastError {
    fn from(err: tokio::task::JoinError) -> Self {
        ForecastError::Other(format!("Task join error: {}", err))
    }
}
