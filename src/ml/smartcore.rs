//! SmartCore random forest wrapper
//!
//! Bagged CART ensemble from SmartCore. After fitting, the trees are read back
//! through the model's serde form into [`PortableTree`]s, which drive both the
//! exported expression (`mean of trees`) and the gain-based importances.

use serde::{Deserialize, Serialize};

use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;

use crate::config::{Hyperparameters, ModelKind};
use crate::error::{PipelineError, PipelineResult};
use crate::ml::models::SavedModel;
use crate::ml::models::tree::normalize;
use crate::ml::{
    check_predict_input, check_training_input, Matrix, PortableModel, PortableTree, Regressor,
};

type Forest = RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Features tried per split; `None` lets SmartCore pick
    pub max_features: Option<usize>,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            seed: 42,
        }
    }
}

impl ForestParams {
    pub fn from_hyperparameters(hp: &Hyperparameters) -> Self {
        let defaults = Self::default();
        Self {
            n_trees: hp.n_estimators.unwrap_or(defaults.n_trees),
            max_depth: hp.max_depth,
            min_samples_split: hp.min_samples_split.unwrap_or(defaults.min_samples_split),
            min_samples_leaf: hp.min_samples_leaf.unwrap_or(defaults.min_samples_leaf),
            max_features: hp.max_features,
            seed: hp.seed.unwrap_or(defaults.seed),
        }
    }

    fn to_smartcore(self) -> RandomForestRegressorParameters {
        RandomForestRegressorParameters {
            max_depth: self.max_depth.map(|d| d.min(u16::MAX as usize) as u16),
            min_samples_leaf: self.min_samples_leaf,
            min_samples_split: self.min_samples_split,
            n_trees: self.n_trees,
            m: self.max_features,
            keep_samples: false, // Don't store training samples
            seed: self.seed,
        }
    }
}

/// Persisted form: parameters plus the bincode-encoded SmartCore model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedForest {
    pub params: ForestParams,
    pub n_features: usize,
    pub model_bytes: Vec<u8>,
}

/// Serialized shape of a SmartCore regression tree node. A node with both
/// children sends `x[split_feature] <= split_value` to `true_child`.
#[derive(Debug, Deserialize)]
struct RawNode {
    output: f64,
    split_feature: usize,
    split_value: Option<f64>,
    split_score: Option<f64>,
    true_child: Option<usize>,
    false_child: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RawTree {
    nodes: Vec<RawNode>,
}

#[derive(Debug, Deserialize)]
struct RawForest {
    trees: Option<Vec<RawTree>>,
}

/// Trees of a fitted forest plus per-tree split gains by feature
#[derive(Debug, Clone, PartialEq)]
struct DecodedForest {
    trees: Vec<PortableTree>,
    gains: Vec<Vec<f64>>,
}

fn decode_node(nodes: &[RawNode], id: usize, depth: usize) -> PipelineResult<PortableTree> {
    let node = nodes.get(id).ok_or_else(|| {
        PipelineError::Serialization(format!("forest node {} out of range", id))
    })?;
    if depth > nodes.len() {
        return Err(PipelineError::Serialization("forest tree has a cycle".to_string()));
    }
    match (node.true_child, node.false_child, node.split_value) {
        (None, None, _) => Ok(PortableTree::Leaf(node.output)),
        (Some(left), Some(right), Some(threshold)) => Ok(PortableTree::Split {
            feature: node.split_feature,
            threshold,
            left: Box::new(decode_node(nodes, left, depth + 1)?),
            right: Box::new(decode_node(nodes, right, depth + 1)?),
        }),
        _ => Err(PipelineError::Serialization(format!(
            "forest node {} has an incomplete split",
            id
        ))),
    }
}

fn decode(forest: &Forest, n_features: usize) -> PipelineResult<DecodedForest> {
    let raw: RawForest = serde_json::from_value(serde_json::to_value(forest)?)?;
    let raw_trees = raw.trees.unwrap_or_default();
    if raw_trees.is_empty() {
        return Err(PipelineError::Serialization("forest has no trees".to_string()));
    }

    let mut trees = Vec::with_capacity(raw_trees.len());
    let mut gains = Vec::with_capacity(raw_trees.len());
    for tree in &raw_trees {
        trees.push(decode_node(&tree.nodes, 0, 0)?);
        let mut per_feature = vec![0.0; n_features];
        for node in tree.nodes.iter().filter(|n| n.true_child.is_some()) {
            if let (Some(slot), Some(score)) = (per_feature.get_mut(node.split_feature), node.split_score) {
                *slot += score.max(0.0);
            }
        }
        gains.push(per_feature);
    }
    Ok(DecodedForest { trees, gains })
}

#[derive(Debug)]
pub struct SmartcoreRandomForest {
    params: ForestParams,
    model: Option<Forest>,
    decoded: Option<DecodedForest>,
    n_features: usize,
}

fn dense(x: &Matrix) -> DenseMatrix<f64> {
    DenseMatrix::new(x.nrows(), x.ncols(), x.as_slice().to_vec(), false)
}

impl SmartcoreRandomForest {
    pub fn new(params: ForestParams) -> Self {
        Self {
            params,
            model: None,
            decoded: None,
            n_features: 0,
        }
    }

    pub fn params(&self) -> &ForestParams {
        &self.params
    }

    pub fn from_saved(saved: &SavedForest) -> PipelineResult<Self> {
        let model: Forest = bincode::deserialize(&saved.model_bytes)?;
        let decoded = decode(&model, saved.n_features)?;
        Ok(Self {
            params: saved.params,
            model: Some(model),
            decoded: Some(decoded),
            n_features: saved.n_features,
        })
    }

    fn fitted(&self) -> PipelineResult<&Forest> {
        self.model.as_ref().ok_or_else(|| PipelineError::NotFitted {
            model: self.kind().to_string(),
        })
    }
}

impl Regressor for SmartcoreRandomForest {
    fn kind(&self) -> ModelKind {
        ModelKind::RandomForest
    }

    fn fit(&mut self, x: &Matrix, y: &[f64]) -> PipelineResult<()> {
        check_training_input(self.kind(), x, y)?;
        let model = Forest::fit(&dense(x), &y.to_vec(), self.params.to_smartcore())
            .map_err(|e| PipelineError::fit(self.kind().to_string(), format!("{:?}", e)))?;
        self.decoded = Some(decode(&model, x.ncols())?);
        self.model = Some(model);
        self.n_features = x.ncols();
        Ok(())
    }

    fn predict(&self, x: &Matrix) -> PipelineResult<Vec<f64>> {
        let model = self.fitted()?;
        check_predict_input(self.n_features, x)?;
        if x.is_empty() {
            return Ok(Vec::new());
        }
        model
            .predict(&dense(x))
            .map_err(|e| PipelineError::fit(self.kind().to_string(), format!("prediction failed: {:?}", e)))
    }

    fn fresh(&self) -> Box<dyn Regressor> {
        Box::new(SmartcoreRandomForest::new(self.params))
    }

    /// Mean of the trees: `0 + (1 / n_trees) * Σ tree(x)`.
    fn portable(&self) -> PipelineResult<PortableModel> {
        self.fitted()?;
        let decoded = self.decoded.as_ref().ok_or_else(|| PipelineError::NotFitted {
            model: self.kind().to_string(),
        })?;
        Ok(PortableModel::TreeEnsemble {
            base: 0.0,
            scale: 1.0 / decoded.trees.len() as f64,
            trees: decoded.trees.clone(),
        })
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        let decoded = self.decoded.as_ref()?;
        let mut total = vec![0.0; self.n_features];
        for gains in &decoded.gains {
            for (acc, gain) in total.iter_mut().zip(normalize(gains)) {
                *acc += gain;
            }
        }
        Some(normalize(&total))
    }

    fn to_saved(&self) -> PipelineResult<SavedModel> {
        let model_bytes = bincode::serialize(self.fitted()?)?;
        Ok(SavedModel::RandomForest(SavedForest {
            params: self.params,
            n_features: self.n_features,
            model_bytes,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane() -> (Matrix, Vec<f64>) {
        // y = 2x1 + 3x2
        let rows: Vec<Vec<f64>> = (0..30)
            .map(|i| vec![(i % 6) as f64, (i / 6) as f64])
            .collect();
        let y = rows.iter().map(|r| 2.0 * r[0] + 3.0 * r[1]).collect();
        (Matrix::from_rows(&rows).unwrap(), y)
    }

    #[test]
    fn test_parameters_from_hyperparameters() {
        let params = ForestParams::from_hyperparameters(&Hyperparameters {
            n_estimators: Some(100),
            seed: Some(42),
            ..Default::default()
        });
        assert_eq!(params.n_trees, 100);
        assert_eq!(params.seed, 42);
        let sc = params.to_smartcore();
        assert_eq!(sc.n_trees, 100);
        assert!(!sc.keep_samples);
    }

    #[test]
    fn test_train_and_predict() {
        let (x, y) = plane();
        let mut model = SmartcoreRandomForest::new(ForestParams {
            n_trees: 10,
            ..ForestParams::default()
        });
        model.fit(&x, &y).unwrap();
        let predictions = model.predict(&x).unwrap();
        assert_eq!(predictions.len(), 30);
        assert!(model.score(&x, &y).unwrap() > 0.8);
    }

    #[test]
    fn test_portable_form_averages_trees() {
        let (x, y) = plane();
        let mut model = SmartcoreRandomForest::new(ForestParams {
            n_trees: 5,
            ..ForestParams::default()
        });
        model.fit(&x, &y).unwrap();

        let PortableModel::TreeEnsemble { base, scale, trees } = model.portable().unwrap() else {
            panic!("forest should be a tree ensemble");
        };
        assert_eq!(base, 0.0);
        assert_eq!(trees.len(), 5);
        assert!((scale - 0.2).abs() < 1e-15);

        let predictions = model.predict(&x).unwrap();
        for (row, expected) in x.rows().zip(predictions) {
            let mean = scale * trees.iter().map(|t| t.eval(row)).sum::<f64>();
            assert!((mean - expected).abs() < 1e-9, "{} vs {}", mean, expected);
        }
    }

    #[test]
    fn test_importances_follow_split_gains() {
        // Only the first feature carries signal
        let rows: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64, (i % 2) as f64]).collect();
        let y: Vec<f64> = rows.iter().map(|r| if r[0] < 20.0 { 0.0 } else { 10.0 }).collect();
        let x = Matrix::from_rows(&rows).unwrap();
        let mut model = SmartcoreRandomForest::new(ForestParams {
            n_trees: 10,
            max_features: Some(2),
            ..ForestParams::default()
        });
        model.fit(&x, &y).unwrap();

        let importances = model.feature_importances().unwrap();
        assert_eq!(importances.len(), 2);
        assert!((importances.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(importances[0] > importances[1]);
    }

    #[test]
    fn test_unfitted_forest_has_no_importances() {
        let model = SmartcoreRandomForest::new(ForestParams::default());
        assert!(model.feature_importances().is_none());
        assert!(model.portable().is_err());
    }

    #[test]
    fn test_saved_form_restores_predictions() {
        let (x, y) = plane();
        let mut model = SmartcoreRandomForest::new(ForestParams {
            n_trees: 5,
            ..ForestParams::default()
        });
        model.fit(&x, &y).unwrap();
        let SavedModel::RandomForest(saved) = model.to_saved().unwrap() else {
            panic!("forest should save as a forest");
        };
        let restored = SmartcoreRandomForest::from_saved(&saved).unwrap();
        assert_eq!(restored.predict(&x).unwrap(), model.predict(&x).unwrap());
        assert_eq!(restored.portable().unwrap(), model.portable().unwrap());
    }
}
