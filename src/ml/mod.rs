//! Machine Learning Module
//!
//! Offline training of irrigation-duration regressors:
//! - Preprocessing (mean imputation, standardization) fitted on training data only
//! - A registry of interchangeable regressors behind the [`Regressor`] trait
//! - Cross-validated training, held-out evaluation and best-model selection
//! - Export of the winning model to a microcontroller-friendly source file
//! - Persistence and reloading of the full inference bundle

use serde::{Deserialize, Serialize};

use crate::config::ModelKind;
use crate::error::{PipelineError, PipelineResult};

pub mod evaluation;
pub mod export;
pub mod inference;
pub mod models;
pub mod persistence;
pub mod preprocess;
pub mod training;

#[cfg(feature = "ml")]
pub mod smartcore;

/// Dense row-major matrix of `f64`. Missing cells are NaN until imputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> PipelineResult<Self> {
        if data.len() != rows * cols {
            return Err(PipelineError::ShapeMismatch {
                expected: rows * cols,
                actual: data.len(),
            });
        }
        Ok(Self { rows, cols, data })
    }

    pub fn from_rows(rows: &[Vec<f64>]) -> PipelineResult<Self> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            if row.len() != cols {
                return Err(PipelineError::ShapeMismatch {
                    expected: cols,
                    actual: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Self::new(rows.len(), cols, data)
    }

    pub fn nrows(&self) -> usize {
        self.rows
    }

    pub fn ncols(&self) -> usize {
        self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        (0..self.rows).map(move |r| self.row(r))
    }

    pub fn column(&self, col: usize) -> impl Iterator<Item = f64> + '_ {
        (0..self.rows).map(move |r| self.get(r, col))
    }

    /// New matrix with the given rows, in the given order.
    pub fn select_rows(&self, indices: &[usize]) -> Matrix {
        let mut data = Vec::with_capacity(indices.len() * self.cols);
        for &i in indices {
            data.extend_from_slice(self.row(i));
        }
        Matrix {
            rows: indices.len(),
            cols: self.cols,
            data,
        }
    }

    /// Applies `f(col, value)` to every cell.
    pub fn map_cells(&self, f: impl Fn(usize, f64) -> f64) -> Matrix {
        let cols = self.cols;
        Matrix {
            rows: self.rows,
            cols,
            data: self
                .data
                .iter()
                .enumerate()
                .map(|(i, &v)| f(i % cols, v))
                .collect(),
        }
    }
}

/// A decision tree in portable form; `x[feature] <= threshold` goes left.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PortableTree {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: Box<PortableTree>,
        right: Box<PortableTree>,
    },
}

impl PortableTree {
    pub fn eval(&self, x: &[f64]) -> f64 {
        match self {
            PortableTree::Leaf(value) => *value,
            PortableTree::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if x[*feature] <= *threshold {
                    left.eval(x)
                } else {
                    right.eval(x)
                }
            }
        }
    }
}

/// Learned parameters in a form the exporter can serialize.
///
/// `TreeEnsemble` predicts `base + scale * Σ trees(x)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PortableModel {
    Linear {
        coefficients: Vec<f64>,
        intercept: f64,
    },
    TreeEnsemble {
        base: f64,
        scale: f64,
        trees: Vec<PortableTree>,
    },
    /// No portable form; export is refused.
    Other { kind: String },
}

impl PortableModel {
    pub fn tag(&self) -> &'static str {
        match self {
            PortableModel::Linear { .. } => "linear",
            PortableModel::TreeEnsemble { .. } => "tree_ensemble",
            PortableModel::Other { .. } => "other",
        }
    }
}

/// Capability shared by every model in the registry
pub trait Regressor: Send + Sync {
    fn kind(&self) -> ModelKind;

    fn fit(&mut self, x: &Matrix, y: &[f64]) -> PipelineResult<()>;

    fn predict(&self, x: &Matrix) -> PipelineResult<Vec<f64>>;

    /// Coefficient of determination of raw predictions
    fn score(&self, x: &Matrix, y: &[f64]) -> PipelineResult<f64> {
        let predictions = self.predict(x)?;
        r2_score(y, &predictions)
    }

    /// An unfitted instance with the same hyperparameters
    fn fresh(&self) -> Box<dyn Regressor>;

    fn portable(&self) -> PipelineResult<PortableModel>;

    fn feature_importances(&self) -> Option<Vec<f64>> {
        None
    }

    fn to_saved(&self) -> PipelineResult<models::SavedModel>;
}

pub(crate) fn check_training_input(kind: ModelKind, x: &Matrix, y: &[f64]) -> PipelineResult<()> {
    if x.is_empty() || y.is_empty() {
        return Err(PipelineError::fit(kind.to_string(), "cannot train on empty dataset"));
    }
    if x.nrows() != y.len() {
        return Err(PipelineError::fit(
            kind.to_string(),
            format!(
                "feature and target count mismatch: {} rows, {} targets",
                x.nrows(),
                y.len()
            ),
        ));
    }
    if x.as_slice().iter().chain(y).any(|v| !v.is_finite()) {
        return Err(PipelineError::fit(
            kind.to_string(),
            "non-finite values in training data",
        ));
    }
    Ok(())
}

pub(crate) fn check_predict_input(expected_cols: usize, x: &Matrix) -> PipelineResult<()> {
    if x.ncols() != expected_cols {
        return Err(PipelineError::ShapeMismatch {
            expected: expected_cols,
            actual: x.ncols(),
        });
    }
    Ok(())
}

fn check_lengths(actual: &[f64], predicted: &[f64]) -> PipelineResult<()> {
    if actual.len() != predicted.len() {
        return Err(PipelineError::ShapeMismatch {
            expected: actual.len(),
            actual: predicted.len(),
        });
    }
    if actual.is_empty() {
        return Err(PipelineError::InsufficientData("no predictions to evaluate".to_string()));
    }
    Ok(())
}

pub fn mean_squared_error(actual: &[f64], predicted: &[f64]) -> PipelineResult<f64> {
    check_lengths(actual, predicted)?;
    Ok(actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum::<f64>()
        / actual.len() as f64)
}

pub fn mean_absolute_error(actual: &[f64], predicted: &[f64]) -> PipelineResult<f64> {
    check_lengths(actual, predicted)?;
    Ok(actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).abs())
        .sum::<f64>()
        / actual.len() as f64)
}

/// R². A constant target scores 1.0 on a perfect fit and 0.0 otherwise.
pub fn r2_score(actual: &[f64], predicted: &[f64]) -> PipelineResult<f64> {
    check_lengths(actual, predicted)?;
    let n = actual.len() as f64;
    let mean = actual.iter().sum::<f64>() / n;
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
    let ss_res: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum();

    if ss_tot.abs() < 1e-12 {
        return Ok(if ss_res.abs() < 1e-12 { 1.0 } else { 0.0 });
    }
    Ok(1.0 - ss_res / ss_tot)
}
