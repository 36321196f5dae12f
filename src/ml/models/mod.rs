//! Model registry
//!
//! Candidate regressors, built from the configured [`ModelSpec`] list:
//! - Ordinary least squares (portable as a linear template)
//! - CART decision tree (portable as a nested conditional)
//! - Gradient boosting over CART trees (portable as a sum of conditionals)
//! - SmartCore random forest (not portable)

use serde::{Deserialize, Serialize};

use super::Regressor;
use crate::config::{ModelKind, ModelSpec};
use crate::error::PipelineResult;

pub mod boosting;
pub mod linear;
pub mod tree;

pub use boosting::{BoostingParams, GradientBoostingRegressor};
pub use linear::LinearRegression;
pub use tree::{DecisionTreeRegressor, RegressionTree, TreeParams};

#[cfg(feature = "ml")]
use super::smartcore::{ForestParams, SavedForest, SmartcoreRandomForest};

/// Builds an unfitted regressor for one registry entry.
pub fn build(spec: &ModelSpec) -> PipelineResult<Box<dyn Regressor>> {
    let hp = &spec.hyperparameters;
    let model: Box<dyn Regressor> = match spec.kind {
        ModelKind::LinearRegression => Box::new(LinearRegression::new()),
        ModelKind::DecisionTree => {
            Box::new(DecisionTreeRegressor::new(TreeParams::from_hyperparameters(hp)))
        }
        ModelKind::GradientBoosting => Box::new(GradientBoostingRegressor::new(
            BoostingParams::from_hyperparameters(hp),
        )),
        #[cfg(feature = "ml")]
        ModelKind::RandomForest => Box::new(SmartcoreRandomForest::new(
            ForestParams::from_hyperparameters(hp),
        )),
        #[cfg(not(feature = "ml"))]
        ModelKind::RandomForest => {
            return Err(crate::error::PipelineError::Config(format!(
                "model '{}' needs the `ml` feature",
                spec.name
            )))
        }
    };
    Ok(model)
}

/// One entry of the ordered registry
pub struct RegisteredModel {
    pub spec: ModelSpec,
    pub model: Box<dyn Regressor>,
}

/// Candidate models in configuration order.
///
/// Order matters: it is the evaluation order and breaks RMSE ties.
pub struct ModelRegistry {
    entries: Vec<RegisteredModel>,
}

impl ModelRegistry {
    pub fn from_specs(specs: &[ModelSpec]) -> PipelineResult<Self> {
        let entries = specs
            .iter()
            .map(|spec| {
                Ok(RegisteredModel {
                    spec: spec.clone(),
                    model: build(spec)?,
                })
            })
            .collect::<PipelineResult<Vec<_>>>()?;
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.spec.name.as_str()).collect()
    }

    pub fn into_entries(self) -> Vec<RegisteredModel> {
        self.entries
    }
}

/// Serializable snapshot of a fitted model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SavedModel {
    Linear(LinearRegression),
    DecisionTree(DecisionTreeRegressor),
    GradientBoosting(GradientBoostingRegressor),
    #[cfg(feature = "ml")]
    RandomForest(SavedForest),
}

impl SavedModel {
    pub fn kind(&self) -> ModelKind {
        match self {
            SavedModel::Linear(_) => ModelKind::LinearRegression,
            SavedModel::DecisionTree(_) => ModelKind::DecisionTree,
            SavedModel::GradientBoosting(_) => ModelKind::GradientBoosting,
            #[cfg(feature = "ml")]
            SavedModel::RandomForest(_) => ModelKind::RandomForest,
        }
    }

    pub fn restore(self) -> PipelineResult<Box<dyn Regressor>> {
        let model: Box<dyn Regressor> = match self {
            SavedModel::Linear(m) => Box::new(m),
            SavedModel::DecisionTree(m) => Box::new(m),
            SavedModel::GradientBoosting(m) => Box::new(m),
            #[cfg(feature = "ml")]
            SavedModel::RandomForest(saved) => Box::new(SmartcoreRandomForest::from_saved(&saved)?),
        };
        Ok(model)
    }
}
