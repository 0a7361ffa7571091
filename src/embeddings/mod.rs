//! Text embedding for free-text feeling descriptions
//!
//! The provider maps text to a fixed-width, unit-normalized vector. Local
//! generation runs fastembed behind a lazily-initialized, process-wide model.

pub mod local;

pub use local::LocalEmbeddingService;

use crate::error::Result;
use async_trait::async_trait;

/// Width of every embedding fed into the feature vector
pub const EMBEDDING_DIM: usize = 384;

/// Embedding service trait defining required operations
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Generate an embedding for a single non-blank text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embedding dimensionality
    fn dimensions(&self) -> usize;

    /// Model identifier
    fn model_name(&self) -> &str;
}

/// Embed optional text, returning `None` for absent or blank input
///
/// Errors from the underlying service propagate unchanged.
pub async fn embed_text(
    service: &dyn EmbeddingService,
    text: Option<&str>,
) -> Result<Option<Vec<f32>>> {
    match text.map(str::trim).filter(|t| !t.is_empty()) {
        Some(t) => service.embed(t).await.map(Some),
        None => Ok(None),
    }
}

/// Scale a vector to unit L2 norm in place; zero vectors are left untouched
pub fn normalize(vector: &mut [f32]) {
    let magnitude: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        for value in vector.iter_mut() {
            *value /= magnitude;
        }
    }
}
