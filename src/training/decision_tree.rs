//! CART decision trees for regression and classification

use crate::data::CsrMatrix;
use crate::error::{MlopsError, Result};
use ndarray::{Array1, Array2};
use rand::seq::index;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Row-indexed feature storage the trees can fit and predict on.
///
/// Sparse inputs are read in place, so one-hot matrices never need densifying.
pub trait FeatureMatrix: Sync {
    fn n_rows(&self) -> usize;
    fn n_cols(&self) -> usize;
    fn value(&self, row: usize, col: usize) -> f64;
}

impl FeatureMatrix for Array2<f64> {
    fn n_rows(&self) -> usize {
        self.nrows()
    }

    fn n_cols(&self) -> usize {
        self.ncols()
    }

    fn value(&self, row: usize, col: usize) -> f64 {
        self[[row, col]]
    }
}

impl FeatureMatrix for CsrMatrix {
    fn n_rows(&self) -> usize {
        self.nrows()
    }

    fn n_cols(&self) -> usize {
        self.ncols()
    }

    fn value(&self, row: usize, col: usize) -> f64 {
        self.get(row, col)
    }
}

/// Decision tree node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    Leaf {
        value: f64,
        n_samples: usize,
    },
    /// Samples with `x[feature] <= threshold` go left
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
        n_samples: usize,
    },
}

impl TreeNode {
    fn predict(&self, feature_value: impl Fn(usize) -> f64) -> f64 {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { value, .. } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    node = if feature_value(*feature) <= *threshold { left } else { right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    pub fn n_leaves(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Split { left, right, .. } => left.n_leaves() + right.n_leaves(),
        }
    }
}

/// Impurity criterion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Criterion {
    Gini,
    Entropy,
    /// Squared error (regression)
    Mse,
}

/// Number of features examined at each split
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MaxFeatures {
    All,
    Sqrt,
    Log2,
    Fraction(f64),
    Fixed(usize),
}

impl MaxFeatures {
    pub fn resolve(&self, n_features: usize) -> usize {
        let n = n_features as f64;
        let k = match self {
            MaxFeatures::All => n_features,
            MaxFeatures::Sqrt => n.sqrt().floor() as usize,
            MaxFeatures::Log2 => n.log2().floor() as usize,
            MaxFeatures::Fraction(f) => (n * f).floor() as usize,
            MaxFeatures::Fixed(k) => *k,
        };
        k.clamp(1, n_features.max(1))
    }

    /// Name used when logging parameters
    pub fn as_param(&self) -> String {
        match self {
            MaxFeatures::All => "all".to_string(),
            MaxFeatures::Sqrt => "sqrt".to_string(),
            MaxFeatures::Log2 => "log2".to_string(),
            MaxFeatures::Fraction(f) => f.to_string(),
            MaxFeatures::Fixed(k) => k.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    feature: usize,
    threshold: f64,
    /// Weighted child impurity, lower is better
    cost: f64,
}

/// Decision tree model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    root: Option<TreeNode>,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub criterion: Criterion,
    pub random_state: Option<u64>,
    n_features: usize,
    /// Sorted class labels; empty for regression
    classes: Vec<f64>,
}

impl DecisionTree {
    pub fn new_classifier() -> Self {
        Self::with_criterion_kind(Criterion::Gini)
    }

    pub fn new_regressor() -> Self {
        Self::with_criterion_kind(Criterion::Mse)
    }

    fn with_criterion_kind(criterion: Criterion) -> Self {
        Self {
            root: None,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::All,
            criterion,
            random_state: None,
            n_features: 0,
            classes: Vec::new(),
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn with_min_samples_split(mut self, n: usize) -> Self {
        self.min_samples_split = n;
        self
    }

    pub fn with_min_samples_leaf(mut self, n: usize) -> Self {
        self.min_samples_leaf = n;
        self
    }

    pub fn with_max_features(mut self, max_features: MaxFeatures) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn with_criterion(mut self, criterion: Criterion) -> Self {
        self.criterion = criterion;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    fn is_classification(&self) -> bool {
        self.criterion != Criterion::Mse
    }

    pub fn root(&self) -> Option<&TreeNode> {
        self.root.as_ref()
    }

    pub fn fit<M: FeatureMatrix + ?Sized>(&mut self, x: &M, y: &Array1<f64>) -> Result<&mut Self> {
        let indices: Vec<usize> = (0..x.n_rows()).collect();
        self.fit_indices(x, y, &indices)
    }

    /// Fit on the rows named by `indices`; repeated indices act as sample weights
    pub fn fit_indices<M: FeatureMatrix + ?Sized>(
        &mut self,
        x: &M,
        y: &Array1<f64>,
        indices: &[usize],
    ) -> Result<&mut Self> {
        if x.n_rows() != y.len() {
            return Err(MlopsError::ShapeError {
                expected: format!("{} targets", x.n_rows()),
                actual: format!("{} targets", y.len()),
            });
        }
        if indices.is_empty() {
            return Err(MlopsError::TrainingError("cannot fit a tree on zero rows".to_string()));
        }
        if self.min_samples_split < 2 {
            return Err(MlopsError::invalid_param(
                "min_samples_split",
                self.min_samples_split,
                "must be at least 2",
            ));
        }
        if self.min_samples_leaf < 1 {
            return Err(MlopsError::invalid_param(
                "min_samples_leaf",
                self.min_samples_leaf,
                "must be at least 1",
            ));
        }

        self.n_features = x.n_cols();
        if self.is_classification() {
            let mut classes: Vec<f64> = indices.iter().map(|&i| y[i].round()).collect();
            classes.sort_by(f64::total_cmp);
            classes.dedup();
            self.classes = classes;
        }

        let mut rng = match self.random_state {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let mut rows = indices.to_vec();
        self.root = Some(self.build(x, y, &mut rows, 0, &mut rng));
        Ok(self)
    }

    fn build<M: FeatureMatrix + ?Sized>(
        &self,
        x: &M,
        y: &Array1<f64>,
        rows: &mut [usize],
        depth: usize,
        rng: &mut ChaCha8Rng,
    ) -> TreeNode {
        let n_samples = rows.len();
        let value = self.leaf_value(y, rows);

        let stop = n_samples < self.min_samples_split
            || n_samples < 2 * self.min_samples_leaf
            || self.max_depth.is_some_and(|d| depth >= d)
            || self.node_impurity(y, rows) <= 1e-12;
        if stop {
            return TreeNode::Leaf { value, n_samples };
        }

        let k = self.max_features.resolve(self.n_features);
        let features: Vec<usize> = if k >= self.n_features {
            (0..self.n_features).collect()
        } else {
            index::sample(rng, self.n_features, k).into_vec()
        };

        let view: &[usize] = rows;
        let best = features
            .par_iter()
            .filter_map(|&f| self.best_split_for(x, y, view, f))
            .min_by(|a, b| a.cost.total_cmp(&b.cost).then(a.feature.cmp(&b.feature)));

        let Some(split) = best else {
            return TreeNode::Leaf { value, n_samples };
        };

        let mut left_len = 0;
        for i in 0..rows.len() {
            if x.value(rows[i], split.feature) <= split.threshold {
                rows.swap(i, left_len);
                left_len += 1;
            }
        }
        let (left_rows, right_rows) = rows.split_at_mut(left_len);
        let left = self.build(x, y, left_rows, depth + 1, rng);
        let right = self.build(x, y, right_rows, depth + 1, rng);

        TreeNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: Box::new(left),
            right: Box::new(right),
            n_samples,
        }
    }

    /// Scan the sorted values of one feature and return the cheapest valid threshold
    fn best_split_for<M: FeatureMatrix + ?Sized>(
        &self,
        x: &M,
        y: &Array1<f64>,
        rows: &[usize],
        feature: usize,
    ) -> Option<Candidate> {
        let mut order: Vec<(f64, f64)> = rows.iter().map(|&r| (x.value(r, feature), y[r])).collect();
        order.sort_by(|a, b| a.0.total_cmp(&b.0));
        let n = order.len();
        let min_leaf = self.min_samples_leaf;
        let mut best: Option<Candidate> = None;

        let consider = |i: usize, cost: f64, best: &mut Option<Candidate>| {
            // boundary between position i - 1 and i
            if i < min_leaf || n - i < min_leaf || order[i - 1].0 == order[i].0 {
                return;
            }
            if best.map_or(true, |b| cost < b.cost) {
                *best = Some(Candidate {
                    feature,
                    threshold: (order[i - 1].0 + order[i].0) / 2.0,
                    cost,
                });
            }
        };

        if self.is_classification() {
            let n_classes = self.classes.len();
            let class_of = |v: f64| self.classes.partition_point(|c| *c < v.round());
            let mut right = vec![0usize; n_classes];
            for (_, v) in &order {
                right[class_of(*v)] += 1;
            }
            let mut left = vec![0usize; n_classes];
            for i in 1..n {
                let c = class_of(order[i - 1].1);
                left[c] += 1;
                right[c] -= 1;
                let cost = i as f64 * self.class_impurity(&left, i)
                    + (n - i) as f64 * self.class_impurity(&right, n - i);
                consider(i, cost, &mut best);
            }
        } else {
            let total: f64 = order.iter().map(|(_, v)| v).sum();
            let total_sq: f64 = order.iter().map(|(_, v)| v * v).sum();
            let (mut sum, mut sq) = (0.0, 0.0);
            for i in 1..n {
                let v = order[i - 1].1;
                sum += v;
                sq += v * v;
                let (nl, nr) = (i as f64, (n - i) as f64);
                let sse_left = sq - sum * sum / nl;
                let sse_right = (total_sq - sq) - (total - sum) * (total - sum) / nr;
                consider(i, sse_left + sse_right, &mut best);
            }
        }

        let parent = n as f64 * self.node_impurity(y, rows);
        best.filter(|b| b.cost < parent - 1e-12)
    }

    fn class_impurity(&self, counts: &[usize], n: usize) -> f64 {
        let n = n as f64;
        match self.criterion {
            Criterion::Entropy => -counts
                .iter()
                .filter(|&&c| c > 0)
                .map(|&c| {
                    let p = c as f64 / n;
                    p * p.ln()
                })
                .sum::<f64>(),
            _ => 1.0 - counts.iter().map(|&c| (c as f64 / n).powi(2)).sum::<f64>(),
        }
    }

    fn node_impurity(&self, y: &Array1<f64>, rows: &[usize]) -> f64 {
        if self.is_classification() {
            let mut counts = vec![0usize; self.classes.len()];
            for &r in rows {
                counts[self.classes.partition_point(|c| *c < y[r].round())] += 1;
            }
            self.class_impurity(&counts, rows.len())
        } else {
            let n = rows.len() as f64;
            let mean = rows.iter().map(|&r| y[r]).sum::<f64>() / n;
            rows.iter().map(|&r| (y[r] - mean).powi(2)).sum::<f64>() / n
        }
    }

    fn leaf_value(&self, y: &Array1<f64>, rows: &[usize]) -> f64 {
        if self.is_classification() {
            let mut counts = vec![0usize; self.classes.len()];
            for &r in rows {
                counts[self.classes.partition_point(|c| *c < y[r].round())] += 1;
            }
            // first maximum, so ties go to the smaller label
            let best = counts
                .iter()
                .enumerate()
                .fold((0, 0), |acc, (i, &c)| if c > acc.1 { (i, c) } else { acc })
                .0;
            self.classes[best]
        } else {
            rows.iter().map(|&r| y[r]).sum::<f64>() / rows.len() as f64
        }
    }

    pub fn predict<M: FeatureMatrix + ?Sized>(&self, x: &M) -> Result<Array1<f64>> {
        let root = self.root.as_ref().ok_or(MlopsError::ModelNotFitted)?;
        if x.n_cols() != self.n_features {
            return Err(MlopsError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.n_cols()),
            });
        }
        Ok((0..x.n_rows()).map(|r| root.predict(|f| x.value(r, f))).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_regressor_fits_step_function() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0], [6.0]];
        let y = array![10.0, 10.0, 10.0, 20.0, 20.0, 20.0];
        let mut tree = DecisionTree::new_regressor().with_random_state(0);
        tree.fit(&x, &y).unwrap();

        assert_eq!(tree.predict(&x).unwrap(), y);
        let root = tree.root().unwrap();
        assert_eq!(root.depth(), 1);
        assert!(matches!(root, TreeNode::Split { threshold, .. } if *threshold == 3.5));
    }

    #[test]
    fn test_max_depth_limits_tree() {
        let x = Array2::from_shape_fn((32, 1), |(i, _)| i as f64);
        let y = Array1::from_iter((0..32).map(|i| (i * i) as f64));
        let mut tree = DecisionTree::new_regressor().with_max_depth(2);
        tree.fit(&x, &y).unwrap();
        assert!(tree.root().unwrap().depth() <= 2);
        assert!(tree.root().unwrap().n_leaves() <= 4);
    }

    #[test]
    fn test_min_samples_leaf() {
        let x = array![[1.0], [2.0], [3.0], [4.0]];
        let y = array![0.0, 5.0, 5.0, 5.0];
        let mut tree = DecisionTree::new_regressor().with_min_samples_leaf(2);
        tree.fit(&x, &y).unwrap();
        if let Some(TreeNode::Split { left, right, .. }) = tree.root() {
            for child in [left, right] {
                if let TreeNode::Leaf { n_samples, .. } = child.as_ref() {
                    assert!(*n_samples >= 2);
                }
            }
        }
    }

    #[test]
    fn test_classifier_on_two_features() {
        let x = array![[0.0, 1.0], [0.1, 0.9], [1.0, 0.0], [0.9, 0.2], [0.2, 0.8], [0.8, 0.1]];
        let y = array![1.0, 1.0, 0.0, 0.0, 1.0, 0.0];
        for criterion in [Criterion::Gini, Criterion::Entropy] {
            let mut tree = DecisionTree::new_classifier().with_criterion(criterion);
            tree.fit(&x, &y).unwrap();
            assert_eq!(tree.predict(&x).unwrap(), y);
        }
    }

    #[test]
    fn test_max_features_resolution() {
        assert_eq!(MaxFeatures::Sqrt.resolve(10), 3);
        assert_eq!(MaxFeatures::Log2.resolve(1), 1);
        assert_eq!(MaxFeatures::Fixed(50).resolve(10), 10);
        assert_eq!(MaxFeatures::Sqrt.as_param(), "sqrt");
    }

    #[test]
    fn test_sparse_fit_matches_dense() {
        let x = Array2::from_shape_fn((40, 6), |(i, j)| if (i + j) % 3 == 0 { (i % 7) as f64 } else { 0.0 });
        let y = Array1::from_iter((0..40).map(|i| ((i % 7) * 2 + i % 3) as f64));
        let sparse = CsrMatrix::from_dense(&x);

        let mut dense_tree = DecisionTree::new_regressor().with_max_depth(4).with_random_state(3);
        dense_tree.fit(&x, &y).unwrap();
        let mut sparse_tree = DecisionTree::new_regressor().with_max_depth(4).with_random_state(3);
        sparse_tree.fit(&sparse, &y).unwrap();

        assert_eq!(sparse_tree.predict(&sparse).unwrap(), dense_tree.predict(&x).unwrap());
        assert_eq!(sparse_tree.predict(&x).unwrap(), dense_tree.predict(&sparse).unwrap());
    }

    #[test]
    fn test_predict_unfitted() {
        let tree = DecisionTree::new_regressor();
        assert!(matches!(tree.predict(&array![[1.0]]), Err(MlopsError::ModelNotFitted)));
    }
}
