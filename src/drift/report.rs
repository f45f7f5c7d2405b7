//! Dataset-level drift report

use super::stats::{n_unique, ColumnSample, StatTest, StatTestResult};
use crate::data::column_to_f64;
use crate::error::{MlopsError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Which columns to compare, and how to treat them
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub target: Option<String>,
    pub prediction: Option<String>,
    pub numerical_features: Vec<String>,
    pub categorical_features: Vec<String>,
}

impl ColumnMapping {
    /// Columns in report order with their kind; the target and prediction
    /// are categorical unless listed as numerical
    fn columns(&self) -> Vec<(String, ColumnKind)> {
        let mut out: Vec<(String, ColumnKind)> = Vec::new();
        let mut push = |name: &str, kind: ColumnKind| {
            if !out.iter().any(|(n, _)| n == name) {
                out.push((name.to_string(), kind));
            }
        };
        for name in &self.numerical_features {
            push(name, ColumnKind::Num);
        }
        for name in &self.categorical_features {
            push(name, ColumnKind::Cat);
        }
        for name in self.target.iter().chain(self.prediction.iter()) {
            push(name, ColumnKind::Cat);
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Num,
    Cat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDriftResult {
    pub column_name: String,
    pub column_type: ColumnKind,
    pub stattest_name: String,
    #[serde(flatten)]
    pub result: StatTestResult,
    pub reference_size: usize,
    pub current_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetDriftResult {
    pub drift_share: f64,
    pub number_of_columns: usize,
    pub number_of_drifted_columns: usize,
    pub share_of_drifted_columns: f64,
    pub dataset_drift: bool,
    pub drift_by_columns: Vec<ColumnDriftResult>,
}

impl DatasetDriftResult {
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!(path = %path.display(), "Saved drift report");
        Ok(())
    }
}

/// Share-of-drifted-columns check over a pair of tables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetDriftMetric {
    /// Dataset drift is declared when at least this share of columns drift
    pub drift_share: f64,
    /// Overrides the per-test default threshold
    pub stattest_threshold: Option<f64>,
}

impl Default for DatasetDriftMetric {
    fn default() -> Self {
        Self {
            drift_share: 0.5,
            stattest_threshold: None,
        }
    }
}

impl DatasetDriftMetric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_drift_share(mut self, share: f64) -> Self {
        self.drift_share = share.clamp(0.0, 1.0);
        self
    }

    pub fn with_stattest_threshold(mut self, threshold: f64) -> Self {
        self.stattest_threshold = Some(threshold);
        self
    }

    pub fn run(
        &self,
        reference: &DataFrame,
        current: &DataFrame,
        mapping: &ColumnMapping,
    ) -> Result<DatasetDriftResult> {
        let columns = mapping.columns();
        if columns.is_empty() {
            return Err(MlopsError::ConfigError(
                "column mapping names no columns".to_string(),
            ));
        }

        let mut drift_by_columns = Vec::with_capacity(columns.len());
        for (name, kind) in &columns {
            let ref_sample = column_sample(reference, name, *kind)?;
            let cur_sample = column_sample(current, name, *kind)?;
            let unique = n_unique(&ref_sample, &cur_sample);
            let test = StatTest::select(*kind == ColumnKind::Num, ref_sample.len(), unique);
            let threshold = self
                .stattest_threshold
                .unwrap_or_else(|| test.default_threshold());
            let result = test.run(&ref_sample, &cur_sample, threshold)?;
            debug!(
                column = %name,
                stattest = %test,
                score = result.score,
                drift = result.drift_detected,
                "Column drift"
            );
            drift_by_columns.push(ColumnDriftResult {
                column_name: name.clone(),
                column_type: *kind,
                stattest_name: test.to_string(),
                result,
                reference_size: ref_sample.len(),
                current_size: cur_sample.len(),
            });
        }

        let number_of_columns = drift_by_columns.len();
        let number_of_drifted_columns = drift_by_columns
            .iter()
            .filter(|c| c.result.drift_detected)
            .count();
        let share_of_drifted_columns = number_of_drifted_columns as f64 / number_of_columns as f64;
        let dataset_drift = share_of_drifted_columns >= self.drift_share;
        info!(
            columns = number_of_columns,
            drifted = number_of_drifted_columns,
            share = share_of_drifted_columns,
            dataset_drift,
            "Drift report computed"
        );

        Ok(DatasetDriftResult {
            drift_share: self.drift_share,
            number_of_columns,
            number_of_drifted_columns,
            share_of_drifted_columns,
            dataset_drift,
            drift_by_columns,
        })
    }
}

/// Non-null values of `name`. Numeric categorical columns are labelled by
/// their float value so `1` and `1.0` agree across files.
fn column_sample(df: &DataFrame, name: &str, kind: ColumnKind) -> Result<ColumnSample> {
    let column = df
        .column(name)
        .map_err(|_| MlopsError::FeatureNotFound(name.to_string()))?;
    let numeric_dtype = column.dtype().is_primitive_numeric() || column.dtype() == &DataType::Boolean;

    match (kind, numeric_dtype) {
        (ColumnKind::Num, true) => Ok(ColumnSample::Numeric(
            column_to_f64(df, name)?.into_iter().filter(|v| !v.is_nan()).collect(),
        )),
        (ColumnKind::Num, false) => Err(MlopsError::DataError(format!(
            "column {} is listed as numerical but has type {}",
            name,
            column.dtype()
        ))),
        (ColumnKind::Cat, true) => Ok(ColumnSample::Categorical(
            column_to_f64(df, name)?
                .into_iter()
                .filter(|v| !v.is_nan())
                .map(|v| v.to_string())
                .collect(),
        )),
        (ColumnKind::Cat, false) => {
            let cast = column.cast(&DataType::String)?;
            Ok(ColumnSample::Categorical(
                cast.str()?
                    .into_iter()
                    .flatten()
                    .map(str::to_string)
                    .collect(),
            ))
        }
    }
}
