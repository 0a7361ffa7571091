//! Per-entity regression models
//!
//! - [`pipeline`]: median imputation → standardization → ridge regression
//! - [`artifact`]: versioned on-disk format with trained-row metadata
//! - [`store`]: training, cached loading, status, and prediction per entity

pub mod artifact;
pub mod pipeline;
pub mod store;

pub use artifact::ModelArtifact;
pub use pipeline::{ScorePipeline, RIDGE_ALPHA};
pub use store::{LabeledExample, ModelStore};
