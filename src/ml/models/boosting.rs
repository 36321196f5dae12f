//! Gradient-boosted regression trees with squared loss
//!
//! Starts from the training mean and adds `learning_rate`-shrunk trees, each
//! fitted to the residuals of the ensemble so far.

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::tree::{normalize, RegressionTree, TreeParams};
use crate::config::{Hyperparameters, ModelKind};
use crate::error::{PipelineError, PipelineResult};
use crate::ml::models::SavedModel;
use crate::ml::{check_predict_input, check_training_input, Matrix, PortableModel, Regressor};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub tree: TreeParams,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            tree: TreeParams {
                max_depth: Some(3),
                ..TreeParams::default()
            },
        }
    }
}

impl BoostingParams {
    pub fn from_hyperparameters(hp: &Hyperparameters) -> Self {
        let defaults = Self::default();
        let mut tree = TreeParams::from_hyperparameters(hp);
        tree.max_depth = hp.max_depth.or(defaults.tree.max_depth);
        Self {
            n_estimators: hp.n_estimators.unwrap_or(defaults.n_estimators),
            learning_rate: hp.learning_rate.unwrap_or(defaults.learning_rate),
            tree,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Ensemble {
    init: f64,
    trees: Vec<RegressionTree>,
    n_features: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostingRegressor {
    params: BoostingParams,
    ensemble: Option<Ensemble>,
}

impl GradientBoostingRegressor {
    pub fn new(params: BoostingParams) -> Self {
        Self {
            params,
            ensemble: None,
        }
    }

    pub fn params(&self) -> &BoostingParams {
        &self.params
    }

    pub fn n_trees(&self) -> usize {
        self.ensemble.as_ref().map_or(0, |e| e.trees.len())
    }

    fn fitted(&self) -> PipelineResult<&Ensemble> {
        self.ensemble.as_ref().ok_or_else(|| PipelineError::NotFitted {
            model: self.kind().to_string(),
        })
    }
}

impl Regressor for GradientBoostingRegressor {
    fn kind(&self) -> ModelKind {
        ModelKind::GradientBoosting
    }

    fn fit(&mut self, x: &Matrix, y: &[f64]) -> PipelineResult<()> {
        check_training_input(self.kind(), x, y)?;
        if !(self.params.learning_rate > 0.0 && self.params.learning_rate.is_finite()) {
            return Err(PipelineError::fit(
                self.kind().to_string(),
                format!("invalid learning rate {}", self.params.learning_rate),
            ));
        }

        let init = y.iter().sum::<f64>() / y.len() as f64;
        let mut current = vec![init; y.len()];
        let mut trees = Vec::with_capacity(self.params.n_estimators);

        for stage in 0..self.params.n_estimators {
            let residuals: Vec<f64> = y.iter().zip(&current).map(|(t, p)| t - p).collect();
            let tree = RegressionTree::grow(x, &residuals, &self.params.tree);
            for (row, pred) in x.rows().zip(current.iter_mut()) {
                *pred += self.params.learning_rate * tree.predict_row(row);
            }
            trace!(stage, leaves = tree.n_leaves(), "boosting stage fitted");
            trees.push(tree);
        }

        self.ensemble = Some(Ensemble {
            init,
            trees,
            n_features: x.ncols(),
        });
        Ok(())
    }

    fn predict(&self, x: &Matrix) -> PipelineResult<Vec<f64>> {
        let ensemble = self.fitted()?;
        check_predict_input(ensemble.n_features, x)?;
        Ok(x.rows()
            .map(|row| {
                ensemble.init
                    + self.params.learning_rate
                        * ensemble.trees.iter().map(|t| t.predict_row(row)).sum::<f64>()
            })
            .collect())
    }

    fn fresh(&self) -> Box<dyn Regressor> {
        Box::new(GradientBoostingRegressor::new(self.params))
    }

    fn portable(&self) -> PipelineResult<PortableModel> {
        let ensemble = self.fitted()?;
        Ok(PortableModel::TreeEnsemble {
            base: ensemble.init,
            scale: self.params.learning_rate,
            trees: ensemble.trees.iter().map(RegressionTree::to_portable).collect(),
        })
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        let ensemble = self.ensemble.as_ref()?;
        let mut total = vec![0.0; ensemble.n_features];
        for tree in &ensemble.trees {
            for (acc, gain) in total.iter_mut().zip(normalize(tree.gains())) {
                *acc += gain;
            }
        }
        Some(normalize(&total))
    }

    fn to_saved(&self) -> PipelineResult<SavedModel> {
        Ok(SavedModel::GradientBoosting(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quadratic() -> (Matrix, Vec<f64>) {
        let rows: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64 / 4.0]).collect();
        let y = rows.iter().map(|r| r[0] * r[0]).collect();
        (Matrix::from_rows(&rows).unwrap(), y)
    }

    #[test]
    fn test_more_stages_fit_better() {
        let (x, y) = quadratic();
        let mut scores = Vec::new();
        for n_estimators in [1, 10, 50] {
            let mut model = GradientBoostingRegressor::new(BoostingParams {
                n_estimators,
                ..BoostingParams::default()
            });
            model.fit(&x, &y).unwrap();
            scores.push(model.score(&x, &y).unwrap());
        }
        assert!(scores[0] < scores[1]);
        assert!(scores[1] < scores[2]);
        assert!(scores[2] > 0.95);
    }

    #[test]
    fn test_portable_form_reproduces_predictions() {
        let (x, y) = quadratic();
        let mut model = GradientBoostingRegressor::new(BoostingParams {
            n_estimators: 5,
            ..BoostingParams::default()
        });
        model.fit(&x, &y).unwrap();
        let predictions = model.predict(&x).unwrap();

        let PortableModel::TreeEnsemble { base, scale, trees } = model.portable().unwrap() else {
            panic!("boosting should export as a tree ensemble");
        };
        assert_eq!(trees.len(), 5);
        for (row, expected) in x.rows().zip(predictions) {
            let value = base + scale * trees.iter().map(|t| t.eval(row)).sum::<f64>();
            assert!((value - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_zero_estimators_predicts_mean() {
        let (x, y) = quadratic();
        let mut model = GradientBoostingRegressor::new(BoostingParams {
            n_estimators: 0,
            ..BoostingParams::default()
        });
        model.fit(&x, &y).unwrap();
        let mean = y.iter().sum::<f64>() / y.len() as f64;
        assert!(model.predict(&x).unwrap().iter().all(|p| (p - mean).abs() < 1e-12));
    }

    #[test]
    fn test_hyperparameters_override_defaults() {
        let params = BoostingParams::from_hyperparameters(&Hyperparameters {
            n_estimators: Some(10),
            learning_rate: Some(0.2),
            ..Default::default()
        });
        assert_eq!(params.n_estimators, 10);
        assert_eq!(params.learning_rate, 0.2);
        assert_eq!(params.tree.max_depth, Some(3));
    }
}
