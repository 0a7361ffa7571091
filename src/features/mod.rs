//! Feature engineering shared by training and inference
//!
//! - [`builder`]: fixed-order feature vector assembly
//! - [`history`]: causal prior-score features per entity

pub mod builder;
pub mod history;

pub use builder::{FeatureVector, FEATURE_LEN, SCALAR_FEATURES};
pub use history::{HistoryWalker, TemporalFeatures};
