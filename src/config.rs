//! Pipeline configuration
//!
//! Every setting has an environment-backed default so the flows run with no
//! config file at all. A JSON file can override the defaults and CLI flags
//! override both.

use crate::error::{MlopsError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn env_or(key: &str, fallback: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| fallback.to_string())
}

/// Experiment-tracking server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingSettings {
    /// `http(s)://` for a tracking server, `file://` for the local store
    pub tracking_uri: String,
    pub request_timeout_secs: u64,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            tracking_uri: env_or("MLFLOW_TRACKING_URI", "http://mlflow:5000"),
            request_timeout_secs: std::env::var("MLFLOW_HTTP_REQUEST_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(120),
        }
    }
}

/// Transport security used when talking to the mail relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SmtpType {
    Ssl,
    StartTls,
    Plain,
}

/// Default relay used when a credentials block is created
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmtpSettings {
    pub smtp_server: String,
    pub smtp_port: u16,
    pub smtp_type: SmtpType,
    /// Name of the credentials block the monitor loads
    pub block_name: String,
    pub from_address: String,
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            smtp_server: env_or("SMTP_SERVER", "smtp.gmail.com"),
            smtp_port: std::env::var("SMTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(465),
            smtp_type: SmtpType::Ssl,
            block_name: env_or("EMAIL_BLOCK", "gmail"),
            from_address: env_or("EMAIL_FROM", "noreply@mlops.com"),
        }
    }
}

/// File locations read and written by the flows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataPaths {
    pub heart_csv: PathBuf,
    pub reference_csv: PathBuf,
    pub trip_parquet: PathBuf,
    pub trip_model_output: PathBuf,
    /// Directory holding `train.bin`, `val.bin` and `test.bin`
    pub prepared_dir: PathBuf,
    /// Where named credential blocks are stored
    pub blocks_dir: PathBuf,
    /// Where markdown and drift report artifacts are written
    pub artifacts_dir: PathBuf,
}

impl Default for DataPaths {
    fn default() -> Self {
        Self {
            heart_csv: env_or("HEART_DATA", "./data/heart.csv").into(),
            reference_csv: env_or("REFERENCE_DATA", "./data/reference.csv").into(),
            trip_parquet: env_or("TRIP_DATA", "./data/yellow_tripdata_2023-05.parquet").into(),
            trip_model_output: env_or("TRIP_MODEL_OUTPUT", "./models/model.bin").into(),
            prepared_dir: env_or("PREPARED_DIR", "./output").into(),
            blocks_dir: env_or("BLOCKS_DIR", "./.blocks").into(),
            artifacts_dir: env_or("ARTIFACTS_DIR", "./artifacts").into(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub tracking: TrackingSettings,
    pub smtp: SmtpSettings,
    pub paths: DataPaths,
}

impl PipelineConfig {
    /// Load a JSON config file; missing keys fall back to defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            MlopsError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: PipelineConfig = serde_json::from_str(&raw)?;
        Ok(config)
    }

    /// Defaults, optionally overridden by a config file
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    /// Builder method to set the tracking URI
    pub fn with_tracking_uri(mut self, uri: impl Into<String>) -> Self {
        self.tracking.tracking_uri = uri.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"tracking": {{"tracking_uri": "file:///tmp/mlruns"}}}}"#).unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.tracking.tracking_uri, "file:///tmp/mlruns");
        assert_eq!(config.smtp.smtp_port, SmtpSettings::default().smtp_port);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = PipelineConfig::from_file("/definitely/not/here.json").unwrap_err();
        assert!(matches!(err, MlopsError::ConfigError(_)));
    }

    #[test]
    fn test_builder_overrides_uri() {
        let config = PipelineConfig::default().with_tracking_uri("http://localhost:5000");
        assert_eq!(config.tracking.tracking_uri, "http://localhost:5000");
    }
}
