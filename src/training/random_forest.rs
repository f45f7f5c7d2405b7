//! Random forest of bootstrapped CART trees

use super::decision_tree::{Criterion, DecisionTree, FeatureMatrix, MaxFeatures};
use crate::error::{MlopsError, Result};
use ndarray::Array1;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Random forest model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub bootstrap: bool,
    pub criterion: Criterion,
    pub random_state: Option<u64>,
}

impl RandomForest {
    pub fn new_regressor(n_estimators: usize) -> Self {
        Self::with_kind(n_estimators, Criterion::Mse, MaxFeatures::All)
    }

    pub fn new_classifier(n_estimators: usize) -> Self {
        Self::with_kind(n_estimators, Criterion::Gini, MaxFeatures::Sqrt)
    }

    fn with_kind(n_estimators: usize, criterion: Criterion, max_features: MaxFeatures) -> Self {
        Self {
            trees: Vec::new(),
            n_estimators,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features,
            bootstrap: true,
            criterion,
            random_state: None,
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

    pub fn with_bootstrap(mut self, bootstrap: bool) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    fn is_classification(&self) -> bool {
        self.criterion != Criterion::Mse
    }

    pub fn trees(&self) -> &[DecisionTree] {
        &self.trees
    }

    /// Parameters in the form they are logged to the tracking server
    pub fn params(&self) -> BTreeMap<String, String> {
        let mut p = BTreeMap::new();
        p.insert("n_estimators".to_string(), self.n_estimators.to_string());
        p.insert(
            "max_depth".to_string(),
            self.max_depth.map_or("None".to_string(), |d| d.to_string()),
        );
        p.insert("min_samples_split".to_string(), self.min_samples_split.to_string());
        p.insert("min_samples_leaf".to_string(), self.min_samples_leaf.to_string());
        p.insert("max_features".to_string(), self.max_features.as_param());
        p.insert("bootstrap".to_string(), self.bootstrap.to_string());
        if let Some(seed) = self.random_state {
            p.insert("random_state".to_string(), seed.to_string());
        }
        p
    }

    /// Fit all trees in parallel, each on its own bootstrap sample
    pub fn fit<M: FeatureMatrix + ?Sized>(&mut self, x: &M, y: &Array1<f64>) -> Result<&mut Self> {
        let n_samples = x.n_rows();
        if n_samples != y.len() {
            return Err(MlopsError::ShapeError {
                expected: format!("{} targets", n_samples),
                actual: format!("{} targets", y.len()),
            });
        }
        if n_samples == 0 {
            return Err(MlopsError::TrainingError("cannot fit a forest on zero rows".to_string()));
        }
        if self.n_estimators == 0 {
            return Err(MlopsError::invalid_param("n_estimators", 0, "must be at least 1"));
        }

        let base_seed = match self.random_state {
            Some(seed) => seed,
            None => rand::thread_rng().gen(),
        };

        let trees = (0..self.n_estimators)
            .into_par_iter()
            .map(|t| {
                let seed = base_seed.wrapping_add(t as u64);
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                let rows: Vec<usize> = if self.bootstrap {
                    (0..n_samples).map(|_| rng.gen_range(0..n_samples)).collect()
                } else {
                    (0..n_samples).collect()
                };

                let mut tree = DecisionTree::new_regressor()
                    .with_criterion(self.criterion)
                    .with_min_samples_split(self.min_samples_split)
                    .with_min_samples_leaf(self.min_samples_leaf)
                    .with_max_features(self.max_features)
                    .with_random_state(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15));
                tree.max_depth = self.max_depth;
                tree.fit_indices(x, y, &rows)?;
                Ok(tree)
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(n_trees = trees.len(), n_samples, "fitted random forest");
        self.trees = trees;
        Ok(self)
    }

    /// Mean of tree predictions for regression, majority vote for classification
    pub fn predict<M: FeatureMatrix + ?Sized>(&self, x: &M) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(MlopsError::ModelNotFitted);
        }
        let per_tree = self
            .trees
            .par_iter()
            .map(|t| t.predict(x))
            .collect::<Result<Vec<_>>>()?;

        let n = x.n_rows();
        if self.is_classification() {
            Ok((0..n)
                .map(|i| {
                    let mut votes: BTreeMap<i64, usize> = BTreeMap::new();
                    for p in &per_tree {
                        *votes.entry(p[i].round() as i64).or_default() += 1;
                    }
                    votes
                        .into_iter()
                        .fold((0i64, 0usize), |acc, (cls, c)| if c > acc.1 { (cls, c) } else { acc })
                        .0 as f64
                })
                .collect())
        } else {
            let mut sum = Array1::<f64>::zeros(n);
            for p in &per_tree {
                sum += p;
            }
            Ok(sum / per_tree.len() as f64)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CsrMatrix;
    use crate::training::root_mean_squared_error;
    use ndarray::{array, Array2};

    fn linear_data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((60, 3), |(i, j)| ((i * (j + 1)) % 17) as f64);
        let y = x.column(0).mapv(|v| 2.0 * v + 1.0);
        (x, y)
    }

    #[test]
    fn test_regressor_beats_mean_baseline() {
        let (x, y) = linear_data();
        let mut rf = RandomForest::new_regressor(20)
            .with_max_depth(6)
            .with_random_state(0);
        rf.fit(&x, &y).unwrap();

        let pred = rf.predict(&x).unwrap();
        let baseline = Array1::from_elem(y.len(), y.mean().unwrap());
        let rmse = root_mean_squared_error(&y, &pred).unwrap();
        assert!(rmse < root_mean_squared_error(&y, &baseline).unwrap() / 2.0);
        assert_eq!(rf.trees().len(), 20);
    }

    #[test]
    fn test_seed_is_reproducible() {
        let (x, y) = linear_data();
        let fit = |seed| {
            let mut rf = RandomForest::new_regressor(5)
                .with_max_features(MaxFeatures::Sqrt)
                .with_random_state(seed);
            rf.fit(&x, &y).unwrap();
            rf.predict(&x).unwrap()
        };
        assert_eq!(fit(42), fit(42));
    }

    #[test]
    fn test_classifier_vote() {
        let x = array![[0.0], [0.1], [0.2], [1.0], [1.1], [1.2]];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let mut rf = RandomForest::new_classifier(15).with_random_state(3);
        rf.fit(&x, &y).unwrap();
        let pred = rf.predict(&array![[0.05], [1.15]]).unwrap();
        assert_eq!(pred, array![0.0, 1.0]);
    }

    #[test]
    fn test_params_for_logging() {
        let rf = RandomForest::new_regressor(50)
            .with_max_depth(10)
            .with_max_features(MaxFeatures::Sqrt)
            .with_random_state(0);
        let p = rf.params();
        assert_eq!(p["max_features"], "sqrt");
        assert_eq!(p["max_depth"], "10");
        assert_eq!(p["min_samples_split"], "2");
    }

    #[test]
    fn test_fits_one_hot_csr_without_densifying() {
        let (_, y) = linear_data();
        let one_hot = Array2::from_shape_fn((60, 20), |(i, j)| if (i * 7) % 20 == j { 1.0 } else { 0.0 });
        let sparse = CsrMatrix::from_dense(&one_hot);
        let fit_dense = {
            let mut rf = RandomForest::new_regressor(8).with_random_state(11);
            rf.fit(&one_hot, &y).unwrap();
            rf.predict(&one_hot).unwrap()
        };
        let mut rf = RandomForest::new_regressor(8).with_random_state(11);
        rf.fit(&sparse, &y).unwrap();
        assert_eq!(rf.predict(&sparse).unwrap(), fit_dense);
    }

    #[test]
    fn test_predict_unfitted() {
        let rf = RandomForest::new_regressor(3);
        assert!(rf.predict(&array![[1.0]]).is_err());
    }
}
