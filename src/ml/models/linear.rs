//! Ordinary least squares regression
//!
//! Fitted on centred data with an SVD least-squares solve, so collinear or
//! constant (post-scaling zero) columns get the minimum-norm solution instead
//! of failing.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::config::ModelKind;
use crate::error::{PipelineError, PipelineResult};
use crate::ml::models::SavedModel;
use crate::ml::{check_predict_input, check_training_input, Matrix, PortableModel, Regressor};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearParams {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

/// Linear regression `y = x · coefficients + intercept`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LinearRegression {
    params: Option<LinearParams>,
}

impl LinearRegression {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fitted model with known parameters
    pub fn from_parameters(coefficients: Vec<f64>, intercept: f64) -> Self {
        Self {
            params: Some(LinearParams {
                coefficients,
                intercept,
            }),
        }
    }

    pub fn params(&self) -> Option<&LinearParams> {
        self.params.as_ref()
    }

    fn fitted(&self) -> PipelineResult<&LinearParams> {
        self.params.as_ref().ok_or_else(|| PipelineError::NotFitted {
            model: self.kind().to_string(),
        })
    }
}

impl Regressor for LinearRegression {
    fn kind(&self) -> ModelKind {
        ModelKind::LinearRegression
    }

    fn fit(&mut self, x: &Matrix, y: &[f64]) -> PipelineResult<()> {
        check_training_input(self.kind(), x, y)?;

        let (n, p) = (x.nrows(), x.ncols());
        let x_mean: Vec<f64> = (0..p)
            .map(|c| x.column(c).sum::<f64>() / n as f64)
            .collect();
        let y_mean = y.iter().sum::<f64>() / n as f64;

        let centred = DMatrix::from_fn(n, p, |r, c| x.get(r, c) - x_mean[c]);
        let target = DVector::from_iterator(n, y.iter().map(|v| v - y_mean));

        let coefficients: Vec<f64> = if p == 0 {
            Vec::new()
        } else {
            let svd = centred.svd(true, true);
            let largest = svd.singular_values.max();
            let eps = largest * n.max(p) as f64 * f64::EPSILON;
            svd.solve(&target, eps)
                .map_err(|e| PipelineError::fit(self.kind().to_string(), e))?
                .iter()
                .copied()
                .collect()
        };

        if coefficients.iter().any(|c| !c.is_finite()) {
            return Err(PipelineError::fit(
                self.kind().to_string(),
                "least squares produced non-finite coefficients",
            ));
        }

        let intercept = y_mean
            - coefficients
                .iter()
                .zip(&x_mean)
                .map(|(c, m)| c * m)
                .sum::<f64>();

        self.params = Some(LinearParams {
            coefficients,
            intercept,
        });
        Ok(())
    }

    fn predict(&self, x: &Matrix) -> PipelineResult<Vec<f64>> {
        let params = self.fitted()?;
        check_predict_input(params.coefficients.len(), x)?;
        Ok(x.rows()
            .map(|row| {
                row.iter()
                    .zip(&params.coefficients)
                    .map(|(f, c)| f * c)
                    .sum::<f64>()
                    + params.intercept
            })
            .collect())
    }

    fn fresh(&self) -> Box<dyn Regressor> {
        Box::new(LinearRegression::new())
    }

    fn portable(&self) -> PipelineResult<PortableModel> {
        let params = self.fitted()?;
        Ok(PortableModel::Linear {
            coefficients: params.coefficients.clone(),
            intercept: params.intercept,
        })
    }

    fn to_saved(&self) -> PipelineResult<SavedModel> {
        Ok(SavedModel::Linear(self.clone()))
    }
}
