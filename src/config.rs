use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::PipelineError;
use crate::heuristic::IrrigationRule;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub data: DataConfig,
    pub training: TrainingConfig,
    pub artifacts: ArtifactConfig,
    pub models: Vec<ModelSpec>,
    /// Labelling rule used by the `generate` command
    #[serde(default)]
    pub heuristic: IrrigationRule,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Glob matching one or more sensor log files, concatenated in path order
    pub sensor_glob: String,
    /// Optional weather observations; silently skipped when the file is absent
    pub weather_path: PathBuf,
    /// Tried in order for every timestamp cell
    pub timestamp_formats: Vec<String>,
    pub fusion_tolerance_minutes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub test_size: f64,
    pub random_state: u64,
    pub cv_folds: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    pub model_dir: PathBuf,
    pub export_dir: PathBuf,
    pub report_file: String,
}

/// Regressor families the registry knows how to build
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ModelKind {
    LinearRegression,
    DecisionTree,
    RandomForest,
    GradientBoosting,
}

impl ModelKind {
    pub fn default_display_name(&self) -> &'static str {
        match self {
            ModelKind::LinearRegression => "LinearRegression",
            ModelKind::DecisionTree => "DecisionTreeRegressor",
            ModelKind::RandomForest => "RandomForestRegressor",
            ModelKind::GradientBoosting => "GradientBoostingRegressor",
        }
    }
}

/// One registry entry. Order in the config is the registry order, which is
/// also the selection tie-break order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub kind: ModelKind,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub hyperparameters: Hyperparameters,
}

impl ModelSpec {
    pub fn new(name: &str, kind: ModelKind, hyperparameters: Hyperparameters) -> Self {
        Self {
            name: name.to_string(),
            kind,
            display_name: None,
            hyperparameters,
        }
    }

    pub fn display_name(&self) -> &str {
        self.display_name
            .as_deref()
            .unwrap_or_else(|| self.kind.default_display_name())
    }
}

/// Union of every family's knobs; each family reads what it needs and
/// falls back to its own defaults for the rest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    pub n_estimators: Option<usize>,
    pub max_depth: Option<usize>,
    pub min_samples_split: Option<usize>,
    pub min_samples_leaf: Option<usize>,
    pub max_leaf_nodes: Option<usize>,
    pub max_features: Option<usize>,
    pub learning_rate: Option<f64>,
    pub seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data: DataConfig {
                sensor_glob: "data/dados_arduino*.csv".to_string(),
                weather_path: PathBuf::from("data/weather.csv"),
                timestamp_formats: vec![
                    "%Y-%m-%d %H:%M:%S%.f".to_string(),
                    "%Y-%m-%dT%H:%M:%S%.f".to_string(),
                    "%Y-%m-%d %H:%M".to_string(),
                    "%d/%m/%Y %H:%M:%S".to_string(),
                    "%d/%m/%Y %H:%M".to_string(),
                ],
                fusion_tolerance_minutes: 60,
            },
            training: TrainingConfig {
                test_size: 0.2,
                random_state: 42,
                cv_folds: 5,
            },
            artifacts: ArtifactConfig {
                model_dir: PathBuf::from("models"),
                export_dir: PathBuf::from("models/export"),
                report_file: "metrics.json".to_string(),
            },
            models: default_models(),
            heuristic: IrrigationRule::default(),
        }
    }
}

fn default_models() -> Vec<ModelSpec> {
    vec![
        ModelSpec::new(
            "linear_regression",
            ModelKind::LinearRegression,
            Hyperparameters::default(),
        ),
        ModelSpec::new(
            "random_forest",
            ModelKind::RandomForest,
            Hyperparameters {
                n_estimators: Some(100),
                seed: Some(42),
                ..Default::default()
            },
        ),
        ModelSpec::new(
            "gradient_boosting",
            ModelKind::GradientBoosting,
            Hyperparameters {
                n_estimators: Some(10),
                max_depth: Some(3),
                learning_rate: Some(0.1),
                ..Default::default()
            },
        ),
        ModelSpec::new(
            "decision_tree",
            ModelKind::DecisionTree,
            Hyperparameters {
                max_depth: Some(3),
                min_samples_leaf: Some(3),
                max_leaf_nodes: Some(10),
                ..Default::default()
            },
        ),
    ]
}

impl Config {
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("config/default.toml"));
        if let Ok(path) = std::env::var("IRRIGATION_CONFIG") {
            figment = figment.merge(Toml::file(path));
        }
        let cfg: Config = figment
            .merge(Env::prefixed("IRR__").split("__"))
            .extract()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(self.training.test_size > 0.0 && self.training.test_size < 1.0) {
            return Err(PipelineError::Config(format!(
                "training.test_size must be in (0, 1), got {}",
                self.training.test_size
            )));
        }
        if self.training.cv_folds < 2 {
            return Err(PipelineError::Config(format!(
                "training.cv_folds must be at least 2, got {}",
                self.training.cv_folds
            )));
        }
        if self.data.timestamp_formats.is_empty() {
            return Err(PipelineError::Config(
                "data.timestamp_formats must not be empty".to_string(),
            ));
        }
        if self.data.fusion_tolerance_minutes < 0 {
            return Err(PipelineError::Config(
                "data.fusion_tolerance_minutes must not be negative".to_string(),
            ));
        }
        if self.models.is_empty() {
            return Err(PipelineError::Config("no models registered".to_string()));
        }
        for (i, spec) in self.models.iter().enumerate() {
            if spec.name.trim().is_empty() {
                return Err(PipelineError::Config(format!("model #{} has an empty name", i)));
            }
            if self.models[..i].iter().any(|other| other.name == spec.name) {
                return Err(PipelineError::Config(format!(
                    "duplicate model name '{}'",
                    spec.name
                )));
            }
        }
        Ok(())
    }

    pub fn fusion_tolerance(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.data.fusion_tolerance_minutes)
    }
}
