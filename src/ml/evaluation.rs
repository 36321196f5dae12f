//! Held-out evaluation, best-model selection and the run report

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use super::persistence::write_atomic;
use super::training::FittedModel;
use super::{mean_absolute_error, mean_squared_error, r2_score, Matrix, Regressor};
use crate::config::{ModelKind, ModelSpec};
use crate::error::{PipelineError, PipelineResult};
use crate::features::FeatureSet;

/// Irrigation minutes cannot be negative.
pub fn clamp_non_negative(predictions: &[f64]) -> Vec<f64> {
    predictions.iter().map(|p| p.max(0.0)).collect()
}

/// Test-set metrics of one model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestMetrics {
    /// The model's own R² on raw predictions
    pub score: f64,
    pub rmse: f64,
    pub mae: f64,
    pub r2: f64,
}

impl TestMetrics {
    /// RMSE, MAE and R² use clamped predictions; `score` uses raw ones.
    pub fn calculate(actual: &[f64], raw: &[f64], clamped: &[f64]) -> PipelineResult<Self> {
        Ok(Self {
            score: r2_score(actual, raw)?,
            rmse: mean_squared_error(actual, clamped)?.sqrt(),
            mae: mean_absolute_error(actual, clamped)?,
            r2: r2_score(actual, clamped)?,
        })
    }
}

/// A fitted model with its training and test results
pub struct TrainedModel {
    pub spec: ModelSpec,
    pub model: Box<dyn Regressor>,
    pub training_score: f64,
    pub cv_rmse: f64,
    pub test: TestMetrics,
    /// Clamped test-set predictions
    pub predictions: Vec<f64>,
}

impl TrainedModel {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn display_name(&self) -> &str {
        self.spec.display_name()
    }

    pub fn kind(&self) -> ModelKind {
        self.model.kind()
    }
}

impl std::fmt::Debug for TrainedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainedModel")
            .field("name", &self.spec.name)
            .field("kind", &self.model.kind())
            .field("training_score", &self.training_score)
            .field("cv_rmse", &self.cv_rmse)
            .field("test", &self.test)
            .finish()
    }
}

/// Index of the lowest test RMSE; the earliest model wins ties.
/// A NaN RMSE ranks after every number.
pub fn select_best(rmses: &[f64]) -> Option<usize> {
    let key = |v: f64| if v.is_nan() { f64::INFINITY } else { v };
    let mut best: Option<usize> = None;
    for (i, &rmse) in rmses.iter().enumerate() {
        match best {
            Some(b) if key(rmse).total_cmp(&key(rmses[b])).is_lt() => best = Some(i),
            None => best = Some(i),
            _ => {}
        }
    }
    best
}

/// All evaluated models plus the selected one
#[derive(Debug)]
pub struct Evaluation {
    models: Vec<TrainedModel>,
    best: usize,
}

impl Evaluation {
    pub fn models(&self) -> &[TrainedModel] {
        &self.models
    }

    pub fn best(&self) -> &TrainedModel {
        &self.models[self.best]
    }

    /// Keeps the winner and discards the rest.
    pub fn into_best(mut self) -> TrainedModel {
        self.models.swap_remove(self.best)
    }
}

/// Model Evaluator / Selector
pub struct ModelEvaluator;

impl ModelEvaluator {
    pub fn evaluate_one(
        fitted: FittedModel,
        x_test: &Matrix,
        y_test: &[f64],
    ) -> PipelineResult<TrainedModel> {
        let raw = fitted.model.predict(x_test)?;
        let predictions = clamp_non_negative(&raw);
        let test = TestMetrics::calculate(y_test, &raw, &predictions)?;
        Ok(TrainedModel {
            spec: fitted.spec,
            model: fitted.model,
            training_score: fitted.training_score,
            cv_rmse: fitted.cv_rmse,
            test,
            predictions,
        })
    }

    pub fn evaluate(
        fitted: Vec<FittedModel>,
        x_test: &Matrix,
        y_test: &[f64],
    ) -> PipelineResult<Evaluation> {
        let models = fitted
            .into_iter()
            .map(|f| Self::evaluate_one(f, x_test, y_test))
            .collect::<PipelineResult<Vec<_>>>()?;

        for m in &models {
            info!(
                model = %m.name(),
                rmse = %format!("{:.4}", m.test.rmse),
                mae = %format!("{:.4}", m.test.mae),
                r2 = %format!("{:.4}", m.test.r2),
                score = %format!("{:.4}", m.test.score),
                "model evaluated"
            );
        }

        let rmses: Vec<f64> = models.iter().map(|m| m.test.rmse).collect();
        let best = select_best(&rmses)
            .ok_or_else(|| PipelineError::InsufficientData("no models to evaluate".to_string()))?;
        let ranking = models
            .iter()
            .sorted_by(|a, b| a.test.rmse.total_cmp(&b.test.rmse))
            .map(|m| format!("{}={:.4}", m.name(), m.test.rmse))
            .join(", ");
        info!(
            model = %models[best].name(),
            rmse = %format!("{:.4}", models[best].test.rmse),
            %ranking,
            "best model selected"
        );

        Ok(Evaluation { models, best })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelReport {
    pub name: String,
    pub display_name: String,
    pub kind: ModelKind,
    pub training_score: f64,
    pub cv_rmse: f64,
    pub test: TestMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature_importances: Option<Vec<FeatureImportance>>,
}

/// Summary of one training run, written next to the artifacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub generated_at: DateTime<Utc>,
    pub rows: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub weather_fused: bool,
    pub feature_set: FeatureSet,
    pub skipped_features: Vec<String>,
    pub models: Vec<ModelReport>,
    pub selected: String,
}

impl RunReport {
    pub fn model_report(model: &TrainedModel, features: &FeatureSet) -> ModelReport {
        let feature_importances = model.model.feature_importances().map(|values| {
            let mut ranked: Vec<FeatureImportance> = features
                .names()
                .iter()
                .zip(values)
                .map(|(feature, importance)| FeatureImportance {
                    feature: feature.clone(),
                    importance,
                })
                .collect();
            ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
            ranked
        });

        ModelReport {
            name: model.name().to_string(),
            display_name: model.display_name().to_string(),
            kind: model.kind(),
            training_score: model.training_score,
            cv_rmse: model.cv_rmse,
            test: model.test,
            feature_importances,
        }
    }

    pub fn write(&self, path: &Path) -> PipelineResult<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &json)
    }

    pub fn read(path: &Path) -> PipelineResult<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
