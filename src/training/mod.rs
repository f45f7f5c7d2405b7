//! Model training
//!
//! Estimators used by the flows:
//! - Support vector classifier (SMO, Platt-scaled probabilities)
//! - Decision trees and random forests
//! - Ordinary least squares, dense or sparse
//!
//! Fitted models are persisted as bincode bundles with [`save_model`] and
//! [`load_model`].

pub mod decision_tree;
pub mod linear;
mod metrics;
mod platt;
pub mod random_forest;
pub mod svm;

pub use decision_tree::{Criterion, DecisionTree, FeatureMatrix, MaxFeatures, TreeNode};
pub use linear::LinearRegression;
pub use metrics::{accuracy_score, mean_squared_error, root_mean_squared_error};
pub use platt::PlattScaling;
pub use random_forest::RandomForest;
pub use svm::{Gamma, Kernel, SvcParams, SvmClassifier};

use crate::data::dataset::{read_bin, write_bin};
use crate::error::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use tracing::info;

/// Write any serializable model (or tuple of models) to `path`
pub fn save_model<T: Serialize>(model: &T, path: impl AsRef<Path>) -> Result<()> {
    write_bin(path.as_ref(), model)?;
    info!(path = %path.as_ref().display(), "model saved");
    Ok(())
}

/// Read a model written by [`save_model`]
pub fn load_model<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    read_bin(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::DictVectorizer;
    use ndarray::array;

    #[test]
    fn test_bundle_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.bin");

        let mut lr = LinearRegression::new();
        lr.fit(&array![[1.0], [2.0], [3.0]], &array![2.0, 4.0, 6.0]).unwrap();
        save_model(&(DictVectorizer::new(), lr.clone()), &path).unwrap();

        let (dv, loaded): (DictVectorizer, LinearRegression) = load_model(&path).unwrap();
        assert!(!dv.is_fitted());
        assert_eq!(
            loaded.predict(&array![[4.0]]).unwrap(),
            lr.predict(&array![[4.0]]).unwrap()
        );
    }
}
