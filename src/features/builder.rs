//! Fixed-order feature vector assembly
//!
//! Layout (identical for training and inference):
//!
//! | index | feature          |
//! |-------|------------------|
//! | 0     | confidence       |
//! | 1     | stress           |
//! | 2     | sleep            |
//! | 3     | hours_studied    |
//! | 4     | prev1            |
//! | 5     | mean3            |
//! | 6     | count_prev       |
//! | 7..   | feeling embedding|
//!
//! Missing scalars are encoded as NaN and left for the pipeline's imputer.
//! A missing embedding becomes all zeros, which is a real value rather than
//! a missing one.

use crate::embeddings::EMBEDDING_DIM;
use crate::error::{ForecastError, Result};
use crate::features::history::TemporalFeatures;
use crate::types::StudyAttributes;
use serde::{Deserialize, Serialize};

/// Number of scalar columns preceding the embedding
pub const SCALAR_FEATURES: usize = 7;

/// Total feature width
pub const FEATURE_LEN: usize = SCALAR_FEATURES + EMBEDDING_DIM;

/// One row of model input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    /// Assemble a feature vector from raw attributes
    pub fn build(
        attributes: &StudyAttributes,
        temporal: &TemporalFeatures,
        embedding: Option<&[f32]>,
    ) -> Result<Self> {
        let mut values = Vec::with_capacity(FEATURE_LEN);
        values.push(missing_as_nan(attributes.confidence));
        values.push(missing_as_nan(attributes.stress));
        values.push(missing_as_nan(attributes.sleep));
        values.push(missing_as_nan(attributes.hours_studied));
        values.push(missing_as_nan(temporal.prev1));
        values.push(missing_as_nan(temporal.mean3));
        values.push(temporal.count_prev as f64);

        match embedding {
            Some(embedding) => {
                if embedding.len() != EMBEDDING_DIM {
                    return Err(ForecastError::FeatureShapeMismatch {
                        expected: FEATURE_LEN,
                        actual: SCALAR_FEATURES + embedding.len(),
                    });
                }
                values.extend(embedding.iter().map(|&v| v as f64));
            }
            None => values.resize(FEATURE_LEN, 0.0),
        }

        Self::from_values(values)
    }

    /// Wrap raw values, checking the width
    pub fn from_values(values: Vec<f64>) -> Result<Self> {
        check_width(values.len())?;
        Ok(Self(values))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Fail loudly if a vector's width drifts from [`FEATURE_LEN`]
pub fn check_width(actual: usize) -> Result<()> {
    if actual != FEATURE_LEN {
        return Err(ForecastError::FeatureShapeMismatch {
            expected: FEATURE_LEN,
            actual,
        });
    }
    Ok(())
}

fn missing_as_nan(value: Option<f64>) -> f64 {
    value.unwrap_or(f64::NAN)
}
