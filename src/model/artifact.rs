//! Versioned on-disk format for a trained pipeline
//!
//! Layout: 4-byte magic `SCMF`, 1-byte format version, then a bincode body.
//! The trained-row count travels inside the body as declared metadata.

use crate::error::{ForecastError, Result};
use crate::features::FEATURE_LEN;
use crate::model::pipeline::ScorePipeline;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

const ARTIFACT_MAGIC: [u8; 4] = *b"SCMF";
const ARTIFACT_VERSION: u8 = 1;
const HEADER_LEN: usize = ARTIFACT_MAGIC.len() + 1;

/// A trained pipeline plus the metadata recorded at training time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    /// Labeled rows the pipeline was fit on
    pub trained_rows: usize,
    /// Feature width expected by the pipeline
    pub feature_len: usize,
    /// Embedding model used to build the text features
    pub embedding_model: String,
    pub trained_at: DateTime<Utc>,
    pub pipeline: ScorePipeline,
}

impl ModelArtifact {
    pub fn new(pipeline: ScorePipeline, trained_rows: usize, embedding_model: &str) -> Self {
        Self {
            trained_rows,
            feature_len: pipeline.feature_len(),
            embedding_model: embedding_model.to_string(),
            trained_at: Utc::now(),
            pipeline,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)
            .map_err(|e| ForecastError::Artifact(format!("bincode serialization failed: {}", e)))?;

        let mut data = Vec::with_capacity(HEADER_LEN + body.len());
        data.extend_from_slice(&ARTIFACT_MAGIC);
        data.push(ARTIFACT_VERSION);
        data.extend_from_slice(&body);
        Ok(data)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN || data[..ARTIFACT_MAGIC.len()] != ARTIFACT_MAGIC {
            return Err(ForecastError::Artifact(
                "Not a scorecast model artifact".to_string(),
            ));
        }

        let version = data[ARTIFACT_MAGIC.len()];
        if version != ARTIFACT_VERSION {
            return Err(ForecastError::Artifact(format!(
                "Unsupported artifact version {} (expected {})",
                version, ARTIFACT_VERSION
            )));
        }

        let artifact: ModelArtifact = bincode::deserialize(&data[HEADER_LEN..]).map_err(|e| {
            ForecastError::Artifact(format!("bincode deserialization failed: {}", e))
        })?;

        if artifact.feature_len != FEATURE_LEN || artifact.pipeline.feature_len() != FEATURE_LEN {
            return Err(ForecastError::FeatureShapeMismatch {
                expected: FEATURE_LEN,
                actual: artifact.feature_len,
            });
        }

        Ok(artifact)
    }

    /// Read and decode an artifact file
    pub fn read(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        debug!("Read {} bytes from {}", data.len(), path.display());
        Self::decode(&data)
    }

    /// Write to a unique temporary sibling, then rename over `path`
    ///
    /// Readers see either the previous artifact or the new one, never a
    /// partially written file.
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        let data = self.encode()?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        let temp_path = temp_sibling(path);
        let written = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(&data)?;
            file.sync_all()?;
            fs::rename(&temp_path, path)
        })();

        if let Err(e) = written {
            if let Err(cleanup) = fs::remove_file(&temp_path) {
                warn!(
                    "Failed to remove temp artifact {}: {}",
                    temp_path.display(),
                    cleanup
                );
            }
            return Err(ForecastError::Io(e));
        }

        debug!("Wrote {} bytes to {}", data.len(), path.display());
        Ok(())
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "artifact".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureVector;
    use tempfile::TempDir;

    fn trained_artifact(rows: usize) -> ModelArtifact {
        let features: Vec<FeatureVector> = (0..rows)
            .map(|i| {
                let mut values = vec![0.0; FEATURE_LEN];
                values[3] = i as f64;
                FeatureVector::from_values(values).unwrap()
            })
            .collect();
        let targets: Vec<f64> = (0..rows).map(|i| 50.0 + i as f64).collect();
        let pipeline = ScorePipeline::fit(&features, &targets).unwrap();
        ModelArtifact::new(pipeline, rows, "all-MiniLM-L6-v2")
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("model_u1_t9.bin");

        let artifact = trained_artifact(6);
        artifact.write_atomic(&path).unwrap();

        let loaded = ModelArtifact::read(&path).unwrap();
        assert_eq!(loaded.trained_rows, 6);
        assert_eq!(loaded.feature_len, FEATURE_LEN);
        assert_eq!(loaded, artifact);

        // no temp files left behind
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_overwrite_replaces_previous() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model_u1_t1.bin");

        trained_artifact(4).write_atomic(&path).unwrap();
        trained_artifact(7).write_atomic(&path).unwrap();

        assert_eq!(ModelArtifact::read(&path).unwrap().trained_rows, 7);
    }

    #[test]
    fn test_decode_rejects_foreign_data() {
        assert!(matches!(
            ModelArtifact::decode(b"not a model"),
            Err(ForecastError::Artifact(_))
        ));

        let mut data = trained_artifact(3).encode().unwrap();
        data[4] = 99;
        assert!(matches!(
            ModelArtifact::decode(&data),
            Err(ForecastError::Artifact(msg)) if msg.contains("version 99")
        ));
    }

    #[test]
    fn test_decode_rejects_truncated_body() {
        let data = trained_artifact(3).encode().unwrap();
        assert!(ModelArtifact::decode(&data[..data.len() / 2]).is_err());
    }
}
