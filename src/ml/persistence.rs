//! Artifact persistence
//!
//! A training run leaves four files in the model directory, all written
//! atomically and only valid together:
//! - `best_model.bin`: the selected model (bincode)
//! - `scaler.bin`: fitted standard scaler (bincode)
//! - `imputer.bin`: fitted mean imputer (bincode)
//! - `feature_columns.txt`: comma-joined feature order

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::evaluation::TrainedModel;
use super::models::SavedModel;
use super::preprocess::{MeanImputer, Preprocessor, StandardScaler};
use super::Regressor;
use crate::config::ModelKind;
use crate::error::{PipelineError, PipelineResult};
use crate::features::FeatureSet;

pub const MODEL_FILE: &str = "best_model.bin";
pub const SCALER_FILE: &str = "scaler.bin";
pub const IMPUTER_FILE: &str = "imputer.bin";
pub const FEATURES_FILE: &str = "feature_columns.txt";

/// Writes `bytes` to a temporary file beside `path`, then renames it into
/// place. Readers see either the old file or the complete new one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> PipelineResult<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    debug!(path = %path.display(), bytes = bytes.len(), "artifact written");
    Ok(())
}

/// The selected model with enough metadata to identify it after reload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedModel {
    pub name: String,
    pub display_name: String,
    pub kind: ModelKind,
    pub trained_at: DateTime<Utc>,
    pub model: SavedModel,
}

/// Everything inference needs, loaded together
pub struct ArtifactBundle {
    pub name: String,
    pub display_name: String,
    pub trained_at: DateTime<Utc>,
    pub model: Box<dyn Regressor>,
    pub preprocessor: Preprocessor,
    pub feature_set: FeatureSet,
}

impl std::fmt::Debug for ArtifactBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactBundle")
            .field("name", &self.name)
            .field("kind", &self.model.kind())
            .field("trained_at", &self.trained_at)
            .field("feature_set", &self.feature_set)
            .finish()
    }
}

/// Saves the winner, the fitted preprocessing and the feature order.
pub fn save_artifacts(
    dir: &Path,
    best: &TrainedModel,
    preprocessor: &Preprocessor,
    feature_set: &FeatureSet,
) -> PipelineResult<()> {
    let persisted = PersistedModel {
        name: best.name().to_string(),
        display_name: best.display_name().to_string(),
        kind: best.kind(),
        trained_at: Utc::now(),
        model: best.model.to_saved()?,
    };

    // Serialize everything before touching the disk
    let model_bytes = bincode::serialize(&persisted)?;
    let scaler_bytes = bincode::serialize(&preprocessor.scaler)?;
    let imputer_bytes = bincode::serialize(&preprocessor.imputer)?;

    write_atomic(&dir.join(SCALER_FILE), &scaler_bytes)?;
    write_atomic(&dir.join(IMPUTER_FILE), &imputer_bytes)?;
    write_atomic(&dir.join(FEATURES_FILE), feature_set.to_text().as_bytes())?;
    write_atomic(&dir.join(MODEL_FILE), &model_bytes)?;

    info!(
        dir = %dir.display(),
        model = %persisted.name,
        features = feature_set.len(),
        "artifacts saved"
    );
    Ok(())
}

fn read_required(path: &Path) -> PipelineResult<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        PipelineError::Io(std::io::Error::new(
            e.kind(),
            format!("{}: {}", path.display(), e),
        ))
    })
}

/// Loads all four artifacts; any missing or inconsistent piece is an error.
pub fn load_artifacts(dir: &Path) -> PipelineResult<ArtifactBundle> {
    let persisted: PersistedModel = bincode::deserialize(&read_required(&dir.join(MODEL_FILE))?)?;
    let scaler: StandardScaler = bincode::deserialize(&read_required(&dir.join(SCALER_FILE))?)?;
    let imputer: MeanImputer = bincode::deserialize(&read_required(&dir.join(IMPUTER_FILE))?)?;
    let text = String::from_utf8(read_required(&dir.join(FEATURES_FILE))?)
        .map_err(|e| PipelineError::Serialization(e.to_string()))?;
    let feature_set = FeatureSet::from_text(&text);

    if feature_set.is_empty() {
        return Err(PipelineError::Serialization(format!(
            "{} lists no features",
            FEATURES_FILE
        )));
    }
    for width in [scaler.means().len(), imputer.means().len()] {
        if width != feature_set.len() {
            return Err(PipelineError::ShapeMismatch {
                expected: feature_set.len(),
                actual: width,
            });
        }
    }

    let model = persisted.model.restore()?;
    info!(
        dir = %dir.display(),
        model = %persisted.name,
        trained_at = %persisted.trained_at,
        "artifacts loaded"
    );
    Ok(ArtifactBundle {
        name: persisted.name,
        display_name: persisted.display_name,
        trained_at: persisted.trained_at,
        model,
        preprocessor: Preprocessor { imputer, scaler },
        feature_set,
    })
}
