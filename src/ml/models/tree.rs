//! CART regression trees
//!
//! Trees are grown best-first: among all open leaves, the one whose best
//! split removes the most squared error is split next. Without a leaf budget
//! this produces the same tree as depth-first growth; with `max_leaf_nodes`
//! it keeps the most useful splits.
//!
//! Nodes live in a flat array; a sample goes left when
//! `x[feature] <= threshold`.

use serde::{Deserialize, Serialize};

use crate::config::{Hyperparameters, ModelKind};
use crate::error::{PipelineError, PipelineResult};
use crate::ml::models::SavedModel;
use crate::ml::{
    check_predict_input, check_training_input, Matrix, PortableModel, PortableTree, Regressor,
};

/// Split improvements at or below this are treated as no improvement.
const MIN_IMPROVEMENT: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TreeParams {
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_leaf_nodes: Option<usize>,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_leaf_nodes: None,
        }
    }
}

impl TreeParams {
    pub fn from_hyperparameters(hp: &Hyperparameters) -> Self {
        let defaults = Self::default();
        Self {
            max_depth: hp.max_depth,
            min_samples_split: hp.min_samples_split.unwrap_or(defaults.min_samples_split).max(2),
            min_samples_leaf: hp.min_samples_leaf.unwrap_or(defaults.min_samples_leaf).max(1),
            max_leaf_nodes: hp.max_leaf_nodes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

#[derive(Debug, Clone, Copy)]
struct BestSplit {
    feature: usize,
    threshold: f64,
    improvement: f64,
}

struct OpenLeaf {
    node: usize,
    indices: Vec<usize>,
    depth: usize,
    split: Option<BestSplit>,
}

/// A fitted regression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<TreeNode>,
    n_features: usize,
    /// Unnormalized squared-error reduction per feature
    gains: Vec<f64>,
}

fn mean_of(y: &[f64], indices: &[usize]) -> f64 {
    indices.iter().map(|&i| y[i]).sum::<f64>() / indices.len() as f64
}

fn sse_of(y: &[f64], indices: &[usize]) -> f64 {
    let mean = mean_of(y, indices);
    indices.iter().map(|&i| (y[i] - mean).powi(2)).sum()
}

impl RegressionTree {
    /// Grows a tree on pre-validated input.
    pub fn grow(x: &Matrix, y: &[f64], params: &TreeParams) -> Self {
        let all: Vec<usize> = (0..x.nrows()).collect();
        let mut tree = Self {
            nodes: vec![TreeNode::Leaf {
                value: mean_of(y, &all),
            }],
            n_features: x.ncols(),
            gains: vec![0.0; x.ncols()],
        };

        let mut open = vec![OpenLeaf {
            node: 0,
            split: find_best_split(x, y, &all, 0, params),
            indices: all,
            depth: 0,
        }];
        let mut leaves = 1usize;

        loop {
            if params.max_leaf_nodes.is_some_and(|max| leaves >= max) {
                break;
            }

            // Largest improvement first; earliest opened wins ties
            let mut chosen: Option<(usize, f64)> = None;
            for (pos, leaf) in open.iter().enumerate() {
                if let Some(split) = leaf.split {
                    if chosen.map_or(true, |(_, best)| split.improvement > best) {
                        chosen = Some((pos, split.improvement));
                    }
                }
            }
            let Some((pos, _)) = chosen else { break };
            let leaf = open.remove(pos);
            let Some(split) = leaf.split else { break };

            let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = leaf
                .indices
                .iter()
                .partition(|&&i| x.get(i, split.feature) <= split.threshold);

            let left = tree.nodes.len();
            tree.nodes.push(TreeNode::Leaf {
                value: mean_of(y, &left_idx),
            });
            let right = tree.nodes.len();
            tree.nodes.push(TreeNode::Leaf {
                value: mean_of(y, &right_idx),
            });
            tree.nodes[leaf.node] = TreeNode::Split {
                feature: split.feature,
                threshold: split.threshold,
                left,
                right,
            };
            tree.gains[split.feature] += split.improvement;
            leaves += 1;

            let depth = leaf.depth + 1;
            open.push(OpenLeaf {
                node: left,
                split: find_best_split(x, y, &left_idx, depth, params),
                indices: left_idx,
                depth,
            });
            open.push(OpenLeaf {
                node: right,
                split: find_best_split(x, y, &right_idx, depth, params),
                indices: right_idx,
                depth,
            });
        }

        tree
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, TreeNode::Leaf { .. }))
            .count()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], at: usize) -> usize {
            match nodes[at] {
                TreeNode::Leaf { .. } => 0,
                TreeNode::Split { left, right, .. } => 1 + walk(nodes, left).max(walk(nodes, right)),
            }
        }
        walk(&self.nodes, 0)
    }

    pub fn gains(&self) -> &[f64] {
        &self.gains
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut at = 0;
        loop {
            match self.nodes[at] {
                TreeNode::Leaf { value } => return value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    at = if row[feature] <= threshold { left } else { right };
                }
            }
        }
    }

    pub fn predict(&self, x: &Matrix) -> PipelineResult<Vec<f64>> {
        check_predict_input(self.n_features, x)?;
        Ok(x.rows().map(|row| self.predict_row(row)).collect())
    }

    pub fn to_portable(&self) -> PortableTree {
        fn convert(nodes: &[TreeNode], at: usize) -> PortableTree {
            match nodes[at] {
                TreeNode::Leaf { value } => PortableTree::Leaf(value),
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => PortableTree::Split {
                    feature,
                    threshold,
                    left: Box::new(convert(nodes, left)),
                    right: Box::new(convert(nodes, right)),
                },
            }
        }
        convert(&self.nodes, 0)
    }
}

fn find_best_split(
    x: &Matrix,
    y: &[f64],
    indices: &[usize],
    depth: usize,
    params: &TreeParams,
) -> Option<BestSplit> {
    let n = indices.len();
    if params.max_depth.is_some_and(|max| depth >= max)
        || n < params.min_samples_split
        || n < 2 * params.min_samples_leaf
    {
        return None;
    }

    let parent_sse = sse_of(y, indices);
    if parent_sse <= MIN_IMPROVEMENT {
        return None;
    }

    let mut best: Option<BestSplit> = None;
    let mut sorted = indices.to_vec();
    for feature in 0..x.ncols() {
        sorted.sort_by(|&a, &b| x.get(a, feature).total_cmp(&x.get(b, feature)));

        let total_sum: f64 = sorted.iter().map(|&i| y[i]).sum();
        let total_sq: f64 = sorted.iter().map(|&i| y[i] * y[i]).sum();
        let mut left_sum = 0.0;
        let mut left_sq = 0.0;

        for split_at in 1..n {
            let prev = sorted[split_at - 1];
            left_sum += y[prev];
            left_sq += y[prev] * y[prev];

            let n_left = split_at;
            let n_right = n - split_at;
            if n_left < params.min_samples_leaf || n_right < params.min_samples_leaf {
                continue;
            }

            let lo = x.get(prev, feature);
            let hi = x.get(sorted[split_at], feature);
            if lo >= hi {
                continue;
            }

            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let left_sse = left_sq - left_sum * left_sum / n_left as f64;
            let right_sse = right_sq - right_sum * right_sum / n_right as f64;
            let improvement = parent_sse - left_sse - right_sse;

            if improvement > MIN_IMPROVEMENT
                && best.map_or(true, |b| improvement > b.improvement)
            {
                let mut threshold = (lo + hi) / 2.0;
                // Midpoint can round up to `hi` for adjacent floats
                if threshold >= hi {
                    threshold = lo;
                }
                best = Some(BestSplit {
                    feature,
                    threshold,
                    improvement,
                });
            }
        }
    }
    best
}

/// Single CART regressor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTreeRegressor {
    params: TreeParams,
    tree: Option<RegressionTree>,
}

impl DecisionTreeRegressor {
    pub fn new(params: TreeParams) -> Self {
        Self { params, tree: None }
    }

    pub fn params(&self) -> &TreeParams {
        &self.params
    }

    pub fn tree(&self) -> Option<&RegressionTree> {
        self.tree.as_ref()
    }

    fn fitted(&self) -> PipelineResult<&RegressionTree> {
        self.tree.as_ref().ok_or_else(|| PipelineError::NotFitted {
            model: self.kind().to_string(),
        })
    }
}

impl Regressor for DecisionTreeRegressor {
    fn kind(&self) -> ModelKind {
        ModelKind::DecisionTree
    }

    fn fit(&mut self, x: &Matrix, y: &[f64]) -> PipelineResult<()> {
        check_training_input(self.kind(), x, y)?;
        self.tree = Some(RegressionTree::grow(x, y, &self.params));
        Ok(())
    }

    fn predict(&self, x: &Matrix) -> PipelineResult<Vec<f64>> {
        self.fitted()?.predict(x)
    }

    fn fresh(&self) -> Box<dyn Regressor> {
        Box::new(DecisionTreeRegressor::new(self.params))
    }

    fn portable(&self) -> PipelineResult<PortableModel> {
        Ok(PortableModel::TreeEnsemble {
            base: 0.0,
            scale: 1.0,
            trees: vec![self.fitted()?.to_portable()],
        })
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        self.tree.as_ref().map(|t| normalize(t.gains()))
    }

    fn to_saved(&self) -> PipelineResult<SavedModel> {
        Ok(SavedModel::DecisionTree(self.clone()))
    }
}

/// Scales non-negative gains to sum to 1; all-zero stays all-zero.
pub(crate) fn normalize(gains: &[f64]) -> Vec<f64> {
    let total: f64 = gains.iter().sum();
    if total <= 0.0 {
        return vec![0.0; gains.len()];
    }
    gains.iter().map(|g| g / total).collect()
}
