//! End-to-end pipelines
//!
//! Each flow runs start to finish against a [`TrackingStore`](crate::tracking::TrackingStore);
//! none of them retries. The CLI wires them to configuration and prints
//! their outcomes.

pub mod heart_hyperopt;
pub mod heart_monitor;
pub mod rf_hpo;
pub mod rf_register;
pub mod rf_train;
pub mod trip_duration;

use crate::error::{MlopsError, Result};
use crate::optimizer::TrialParams;
use crate::training::{MaxFeatures, RandomForest};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Write a markdown report to `<dir>/<key>.md`
pub fn create_markdown_artifact(dir: impl AsRef<Path>, key: &str, markdown: &str) -> Result<PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.md", key));
    std::fs::write(&path, markdown)?;
    info!(key, path = %path.display(), "Created markdown artifact");
    Ok(path)
}

/// Trial parameters as the strings logged to the tracking server
pub fn params_to_strings(params: &TrialParams) -> BTreeMap<String, String> {
    params
        .iter()
        .map(|(k, v)| (k.clone(), v.to_string()))
        .collect()
}

/// Random forest hyperparameters shared by tuning and re-training
pub const RF_PARAMS: [&str; 5] = [
    "max_depth",
    "n_estimators",
    "min_samples_split",
    "min_samples_leaf",
    "random_state",
];

/// Integer-valued parameter logged as text (`"7"` or `"7.0"`)
pub(crate) fn int_param(params: &BTreeMap<String, String>, name: &str) -> Result<u64> {
    let raw = params
        .get(name)
        .ok_or_else(|| MlopsError::invalid_param(name, "<missing>", "parameter not logged"))?;
    raw.parse::<u64>()
        .ok()
        .or_else(|| {
            raw.parse::<f64>()
                .ok()
                .filter(|v| *v >= 0.0 && v.fract() == 0.0)
                .map(|v| v as u64)
        })
        .ok_or_else(|| MlopsError::invalid_param(name, raw, "expected a non-negative integer"))
}

/// Regressor built from [`RF_PARAMS`]
pub(crate) fn forest_from_params(params: &BTreeMap<String, String>) -> Result<RandomForest> {
    let n_estimators = int_param(params, "n_estimators")? as usize;
    if n_estimators == 0 {
        return Err(MlopsError::invalid_param("n_estimators", 0, "must be positive"));
    }
    Ok(RandomForest::new_regressor(n_estimators)
        .with_max_depth(int_param(params, "max_depth")? as usize)
        .with_min_samples_split(int_param(params, "min_samples_split")? as usize)
        .with_min_samples_leaf(int_param(params, "min_samples_leaf")? as usize)
        .with_max_features(MaxFeatures::All)
        .with_random_state(int_param(params, "random_state")?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::ParamValue;

    fn rf_params(depth: &str) -> BTreeMap<String, String> {
        [
            ("max_depth", depth),
            ("n_estimators", "12"),
            ("min_samples_split", "3"),
            ("min_samples_leaf", "2"),
            ("random_state", "42"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_forest_from_logged_params() {
        let rf = forest_from_params(&rf_params("7.0")).unwrap();
        assert_eq!(rf.n_estimators, 12);
        assert_eq!(rf.max_depth, Some(7));
        assert_eq!(rf.min_samples_split, 3);
        assert_eq!(rf.min_samples_leaf, 2);
        assert_eq!(rf.random_state, Some(42));
        assert_eq!(rf.max_features, MaxFeatures::All);
        assert_eq!(rf.params()["max_features"], "all");
    }

    #[test]
    fn test_bad_params_are_rejected() {
        assert!(forest_from_params(&rf_params("deep")).is_err());
        assert!(forest_from_params(&rf_params("2.5")).is_err());
        let mut missing = rf_params("3");
        missing.remove("n_estimators");
        assert!(matches!(
            forest_from_params(&missing),
            Err(MlopsError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_params_to_strings() {
        let mut params = TrialParams::new();
        params.insert("C".to_string(), ParamValue::Float(0.5));
        params.insert("degree".to_string(), ParamValue::Int(3));
        params.insert("probability".to_string(), ParamValue::Bool(true));
        let logged = params_to_strings(&params);
        assert_eq!(logged["C"], "0.5");
        assert_eq!(logged["degree"], "3");
        assert_eq!(logged["probability"], "true");
    }

    #[test]
    fn test_markdown_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = create_markdown_artifact(dir.path(), "report", "# Title").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "# Title");
    }
}
