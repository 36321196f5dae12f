//! Missing-value imputation and feature standardization
//!
//! Both transforms learn their statistics from the training split only. The
//! only way to obtain a fitted [`Preprocessor`] is [`Preprocessor::fit_transform`]
//! on training data; test and inference data go through [`Preprocessor::transform`].

use serde::{Deserialize, Serialize};

use super::{check_predict_input, Matrix};
use crate::error::{PipelineError, PipelineResult};

fn column_means(x: &Matrix) -> Vec<f64> {
    (0..x.ncols())
        .map(|col| {
            let (sum, count) = x
                .column(col)
                .filter(|v| !v.is_nan())
                .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
            if count == 0 {
                0.0
            } else {
                sum / count as f64
            }
        })
        .collect()
}

/// Replaces NaN cells with the training mean of their column.
///
/// A column with no observed value at fit time is filled with 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeanImputer {
    means: Vec<f64>,
}

impl MeanImputer {
    pub fn fit(x: &Matrix) -> PipelineResult<Self> {
        if x.is_empty() {
            return Err(PipelineError::InsufficientData(
                "cannot fit imputer on an empty matrix".to_string(),
            ));
        }
        Ok(Self {
            means: column_means(x),
        })
    }

    pub fn means(&self) -> &[f64] {
        &self.means
    }

    pub fn transform(&self, x: &Matrix) -> PipelineResult<Matrix> {
        check_predict_input(self.means.len(), x)?;
        Ok(x.map_cells(|col, v| if v.is_nan() { self.means[col] } else { v }))
    }
}

/// Standardizes each column to zero mean and unit population variance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(x: &Matrix) -> PipelineResult<Self> {
        if x.is_empty() {
            return Err(PipelineError::InsufficientData(
                "cannot fit scaler on an empty matrix".to_string(),
            ));
        }
        if x.as_slice().iter().any(|v| v.is_nan()) {
            return Err(PipelineError::fit("scaler", "input contains missing values"));
        }

        let n = x.nrows() as f64;
        let means = column_means(x);
        let scales = means
            .iter()
            .enumerate()
            .map(|(col, mean)| {
                let var = x.column(col).map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                let std = var.sqrt();
                // Constant columns pass through centred but unscaled
                if std < f64::EPSILON {
                    1.0
                } else {
                    std
                }
            })
            .collect();
        Ok(Self { means, scales })
    }

    pub fn means(&self) -> &[f64] {
        &self.means
    }

    pub fn scales(&self) -> &[f64] {
        &self.scales
    }

    pub fn transform(&self, x: &Matrix) -> PipelineResult<Matrix> {
        check_predict_input(self.means.len(), x)?;
        Ok(x.map_cells(|col, v| (v - self.means[col]) / self.scales[col]))
    }
}

/// Imputer followed by scaler, fitted together on the training split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preprocessor {
    pub imputer: MeanImputer,
    pub scaler: StandardScaler,
}

impl Preprocessor {
    /// Fits both stages on `train` and returns the transformed training matrix.
    pub fn fit_transform(train: &Matrix) -> PipelineResult<(Self, Matrix)> {
        let imputer = MeanImputer::fit(train)?;
        let imputed = imputer.transform(train)?;
        let scaler = StandardScaler::fit(&imputed)?;
        let scaled = scaler.transform(&imputed)?;
        Ok((Self { imputer, scaler }, scaled))
    }

    pub fn transform(&self, x: &Matrix) -> PipelineResult<Matrix> {
        let imputed = self.imputer.transform(x)?;
        self.scaler.transform(&imputed)
    }
}
