//! ML Model Inference Engine
//!
//! Reloads the persisted bundle and scores new sensor readings with exactly
//! the preprocessing and feature order used in training.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use super::evaluation::clamp_non_negative;
use super::persistence::{load_artifacts, ArtifactBundle};
use crate::data::{SensorLog, Table, WeatherObservation};
use crate::error::PipelineResult;
use crate::features::FeatureEngineer;

/// One scored reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub timestamp: NaiveDateTime,
    pub irrigation_minutes: f64,
}

/// Inference Engine for running predictions
#[derive(Debug)]
pub struct InferenceEngine {
    bundle: ArtifactBundle,
    engineer: FeatureEngineer,
}

impl InferenceEngine {
    pub fn new(bundle: ArtifactBundle, engineer: FeatureEngineer) -> Self {
        Self { bundle, engineer }
    }

    pub fn load(dir: &Path, engineer: FeatureEngineer) -> PipelineResult<Self> {
        Ok(Self::new(load_artifacts(dir)?, engineer))
    }

    pub fn bundle(&self) -> &ArtifactBundle {
        &self.bundle
    }

    /// Scores an engineered table: reindex, impute, scale, predict, clamp.
    pub fn predict_table(&self, table: &Table) -> PipelineResult<Vec<f64>> {
        let x = self.bundle.feature_set.matrix(table)?;
        let x = self.bundle.preprocessor.transform(&x)?;
        let raw = self.bundle.model.predict(&x)?;
        Ok(clamp_non_negative(&raw))
    }

    /// Engineers raw readings (fusing weather when given) and scores them.
    pub fn predict_log(
        &self,
        log: &SensorLog,
        weather: Option<&[WeatherObservation]>,
    ) -> PipelineResult<Vec<Prediction>> {
        let table = self.engineer.engineer(log, weather)?;
        let minutes = self.predict_table(&table)?;
        info!(
            model = %self.bundle.name,
            rows = minutes.len(),
            "readings scored"
        );
        Ok(table
            .timestamps()
            .iter()
            .zip(minutes)
            .map(|(&timestamp, irrigation_minutes)| Prediction {
                timestamp,
                irrigation_minutes,
            })
            .collect())
    }
}
