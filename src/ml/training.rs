//! ML Model Training Pipeline
//!
//! Seeded train/test splitting, k-fold cross-validation and the trainer that
//! fits every registered model on the same training split.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::models::{ModelRegistry, RegisteredModel};
use super::{mean_squared_error, Matrix, Regressor};
use crate::config::{ModelSpec, TrainingConfig};
use crate::error::{PipelineError, PipelineResult};

/// Row indices of a shuffled train/test partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Shuffles `0..n` with a seeded RNG and takes the first
/// `ceil(n * test_size)` rows as the test partition.
pub fn train_test_split(n: usize, test_size: f64, seed: u64) -> PipelineResult<SplitIndices> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(PipelineError::Config(format!(
            "test_size must be in (0, 1), got {}",
            test_size
        )));
    }
    let n_test = (n as f64 * test_size).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(PipelineError::InsufficientData(format!(
            "{} rows cannot be split with test_size {}",
            n, test_size
        )));
    }

    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    order.shuffle(&mut rng);
    let train = order.split_off(n_test);
    Ok(SplitIndices { train, test: order })
}

/// Contiguous, unshuffled k-fold partition. The first `n % k` folds hold one
/// extra row.
pub fn k_fold(n: usize, k: usize) -> PipelineResult<Vec<SplitIndices>> {
    if k < 2 {
        return Err(PipelineError::Config(format!(
            "cross-validation needs at least 2 folds, got {}",
            k
        )));
    }
    if n < k {
        return Err(PipelineError::InsufficientData(format!(
            "{} training rows cannot form {} folds",
            n, k
        )));
    }

    let mut folds = Vec::with_capacity(k);
    let mut start = 0;
    for fold in 0..k {
        let size = n / k + usize::from(fold < n % k);
        let end = start + size;
        folds.push(SplitIndices {
            train: (0..start).chain(end..n).collect(),
            test: (start..end).collect(),
        });
        start = end;
    }
    Ok(folds)
}

fn subset(y: &[f64], indices: &[usize]) -> Vec<f64> {
    indices.iter().map(|&i| y[i]).collect()
}

/// Cross-validated RMSE: `sqrt(mean(fold MSE))`, each fold on a fresh model.
pub fn cross_validate_rmse(
    template: &dyn Regressor,
    x: &Matrix,
    y: &[f64],
    folds: usize,
) -> PipelineResult<f64> {
    let splits = k_fold(x.nrows(), folds)?;
    let mut total = 0.0;
    for split in &splits {
        let mut model = template.fresh();
        model.fit(&x.select_rows(&split.train), &subset(y, &split.train))?;
        let predictions = model.predict(&x.select_rows(&split.test))?;
        total += mean_squared_error(&subset(y, &split.test), &predictions)?;
    }
    Ok((total / splits.len() as f64).sqrt())
}

/// A registry model fitted on the full training split
pub struct FittedModel {
    pub spec: ModelSpec,
    pub model: Box<dyn Regressor>,
    /// In-sample coefficient of determination
    pub training_score: f64,
    pub cv_rmse: f64,
}

impl std::fmt::Debug for FittedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FittedModel")
            .field("name", &self.spec.name)
            .field("kind", &self.model.kind())
            .field("training_score", &self.training_score)
            .field("cv_rmse", &self.cv_rmse)
            .finish()
    }
}

/// Model Trainer
pub struct ModelTrainer {
    cv_folds: usize,
}

impl ModelTrainer {
    pub fn new(config: &TrainingConfig) -> Self {
        Self {
            cv_folds: config.cv_folds,
        }
    }

    /// Fits one registry entry and cross-validates a fresh copy of it.
    pub fn train_one(
        &self,
        entry: RegisteredModel,
        x: &Matrix,
        y: &[f64],
    ) -> PipelineResult<FittedModel> {
        let RegisteredModel { spec, mut model } = entry;
        let tag = |err: PipelineError| match err {
            PipelineError::ModelFit { reason, .. } => PipelineError::ModelFit {
                model: spec.name.clone(),
                reason,
            },
            other => other,
        };

        model.fit(x, y).map_err(tag)?;
        let training_score = model.score(x, y).map_err(tag)?;
        let cv_rmse = cross_validate_rmse(model.as_ref(), x, y, self.cv_folds).map_err(tag)?;

        info!(
            model = %spec.name,
            training_score = %format!("{:.2}", training_score),
            cv_rmse = %format!("{:.2}", cv_rmse),
            "model trained"
        );

        Ok(FittedModel {
            spec,
            model,
            training_score,
            cv_rmse,
        })
    }

    /// Fits every model in registry order. The first failure aborts training.
    pub fn train_all(
        &self,
        registry: ModelRegistry,
        x: &Matrix,
        y: &[f64],
    ) -> PipelineResult<Vec<FittedModel>> {
        debug!(models = ?registry.names(), rows = x.nrows(), "training registry");
        registry
            .into_entries()
            .into_iter()
            .map(|entry| self.train_one(entry, x, y))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Hyperparameters, ModelKind};
    use crate::ml::models::LinearRegression;
    use rstest::rstest;

    #[rstest]
    #[case(10, 0.2, 2)]
    #[case(11, 0.2, 3)]
    #[case(2, 0.2, 1)]
    fn test_split_sizes(#[case] n: usize, #[case] test_size: f64, #[case] n_test: usize) {
        let split = train_test_split(n, test_size, 42).unwrap();
        assert_eq!(split.test.len(), n_test);
        assert_eq!(split.train.len(), n - n_test);

        let mut all: Vec<usize> = split.train.iter().chain(&split.test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..n).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_is_seeded() {
        let a = train_test_split(50, 0.2, 42).unwrap();
        let b = train_test_split(50, 0.2, 42).unwrap();
        let c = train_test_split(50, 0.2, 7).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_split_too_small() {
        assert!(matches!(
            train_test_split(1, 0.2, 42),
            Err(PipelineError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_k_fold_sizes() {
        let folds = k_fold(12, 5).unwrap();
        let sizes: Vec<usize> = folds.iter().map(|f| f.test.len()).collect();
        assert_eq!(sizes, vec![3, 3, 2, 2, 2]);
        assert_eq!(folds[0].test, vec![0, 1, 2]);
        assert_eq!(folds[1].train.len(), 9);
        assert!(k_fold(4, 5).is_err());
    }

    #[test]
    fn test_cv_rmse_zero_for_exact_model() {
        let rows: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = rows.iter().map(|r| 3.0 * r[0] - 1.0).collect();
        let x = Matrix::from_rows(&rows).unwrap();
        let rmse = cross_validate_rmse(&LinearRegression::new(), &x, &y, 5).unwrap();
        assert!(rmse < 1e-9);
    }

    #[test]
    fn test_trainer_reports_scores_in_order() {
        let rows: Vec<Vec<f64>> = (0..30).map(|i| vec![i as f64, (i % 4) as f64]).collect();
        let y: Vec<f64> = rows.iter().map(|r| r[0] + 2.0 * r[1]).collect();
        let x = Matrix::from_rows(&rows).unwrap();

        let specs = vec![
            ModelSpec::new("ols", ModelKind::LinearRegression, Hyperparameters::default()),
            ModelSpec::new(
                "stump",
                ModelKind::DecisionTree,
                Hyperparameters {
                    max_depth: Some(1),
                    ..Default::default()
                },
            ),
        ];
        let registry = ModelRegistry::from_specs(&specs).unwrap();
        let trainer = ModelTrainer::new(&TrainingConfig {
            test_size: 0.2,
            random_state: 42,
            cv_folds: 5,
        });
        let fitted = trainer.train_all(registry, &x, &y).unwrap();

        assert_eq!(fitted[0].spec.name, "ols");
        assert!(fitted[0].training_score > 0.999);
        assert_eq!(fitted[1].spec.name, "stump");
        assert!(fitted[1].cv_rmse > fitted[0].cv_rmse);
    }

    #[test]
    fn test_fit_failure_names_the_model() {
        let x = Matrix::from_rows(&[vec![f64::NAN], vec![1.0]]).unwrap();
        let registry = ModelRegistry::from_specs(&[ModelSpec::new(
            "broken",
            ModelKind::LinearRegression,
            Hyperparameters::default(),
        )])
        .unwrap();
        let trainer = ModelTrainer::new(&TrainingConfig {
            test_size: 0.2,
            random_state: 42,
            cv_folds: 2,
        });
        match trainer.train_all(registry, &x, &[1.0, 2.0]) {
            Err(PipelineError::ModelFit { model, .. }) => assert_eq!(model, "broken"),
            other => panic!("expected fit failure, got {other:?}"),
        }
    }
}
