//! Heart-data drift monitor with an email alert

use crate::data::DataLoader;
use crate::drift::{ColumnMapping, DatasetDriftMetric, DatasetDriftResult};
use crate::error::Result;
use crate::notify::{drift_message, Notifier};
use std::path::Path;
use tracing::info;

pub const NUMERICAL_FEATURES: [&str; 5] = ["age", "trtbps", "chol", "thalachh", "oldpeak"];
pub const CATEGORICAL_FEATURES: [&str; 9] = [
    "sex", "cp", "fbs", "restecg", "exng", "slp", "caa", "thall", "output",
];
pub const TARGET: &str = "output";

pub fn column_mapping() -> ColumnMapping {
    ColumnMapping {
        target: Some(TARGET.to_string()),
        prediction: None,
        numerical_features: NUMERICAL_FEATURES.iter().map(|s| s.to_string()).collect(),
        categorical_features: CATEGORICAL_FEATURES.iter().map(|s| s.to_string()).collect(),
    }
}

/// Compare the current table against the reference; save the report when
/// `report_path` is given
pub fn drift_report(
    loader: &DataLoader,
    current_csv: &Path,
    reference_csv: &Path,
    report_path: Option<&Path>,
) -> Result<DatasetDriftResult> {
    let current = loader.load_csv(current_csv)?;
    let reference = loader.load_csv(reference_csv)?;
    let result = DatasetDriftMetric::new().run(&reference, &current, &column_mapping())?;
    if let Some(path) = report_path {
        result.save_json(path)?;
    }
    Ok(result)
}

/// Run the drift report and email the outcome to `recipient`.
/// Returns the share of drifted columns.
pub async fn main_flow(
    current_csv: &Path,
    reference_csv: &Path,
    report_path: Option<&Path>,
    notifier: &dyn Notifier,
    recipient: &str,
    sender: &str,
) -> Result<f64> {
    let result = drift_report(&DataLoader::new(), current_csv, reference_csv, report_path)?;
    let share = result.share_of_drifted_columns;
    info!(
        share_of_drifted_columns = share,
        drifted = result.number_of_drifted_columns,
        "Drift check complete"
    );
    notifier.send(&drift_message(share, recipient, sender)).await?;
    Ok(share)
}
