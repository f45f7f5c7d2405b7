//! Experiment tracking and model registry client
//!
//! [`TrackingStore`] is the seam every flow logs through. [`MlflowClient`]
//! talks to a tracking server over REST; [`FileStore`] keeps the same data in
//! a local JSON file and backs `file://` URIs and the test suite.

mod file_store;
mod mlflow;
mod registry;
mod run;
mod types;

pub use file_store::FileStore;
pub use mlflow::MlflowClient;
pub use registry::{best_run, parse_runs_uri, register_model};
pub use run::RunScope;
pub use types::{
    Experiment, Metric, ModelVersion, ModelVersionStatus, OrderBy, OrderKind, Param,
    RegisteredModel, Run, RunData, RunInfo, RunStatus, RunTag, SearchQuery, ViewType,
};

use crate::config::TrackingSettings;
use crate::error::{MlopsError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Client side of an experiment-tracking service
#[async_trait]
pub trait TrackingStore: Send + Sync {
    async fn get_experiment_by_name(&self, name: &str) -> Result<Option<Experiment>>;

    /// Create an experiment and return its id
    async fn create_experiment(&self, name: &str) -> Result<String>;

    async fn create_run(&self, experiment_id: &str, run_name: Option<&str>) -> Result<RunInfo>;

    async fn get_run(&self, run_id: &str) -> Result<Run>;

    async fn log_batch(
        &self,
        run_id: &str,
        metrics: &[Metric],
        params: &[Param],
        tags: &[RunTag],
    ) -> Result<()>;

    /// Mark a run as ended with `status`
    async fn terminate_run(&self, run_id: &str, status: RunStatus) -> Result<()>;

    async fn search_runs(&self, query: &SearchQuery) -> Result<Vec<Run>>;

    /// Upload one local file under the run's artifact root
    async fn log_artifact(
        &self,
        run_id: &str,
        local_path: &Path,
        artifact_path: Option<&str>,
    ) -> Result<()>;

    /// Create a registered model; succeeds when it already exists
    async fn create_registered_model(&self, name: &str) -> Result<()>;

    async fn create_model_version(
        &self,
        name: &str,
        source: &str,
        run_id: Option<&str>,
    ) -> Result<ModelVersion>;

    async fn get_model_version(&self, name: &str, version: &str) -> Result<ModelVersion>;

    /// Id of the experiment called `name`, created when missing
    async fn set_experiment(&self, name: &str) -> Result<String> {
        match self.get_experiment_by_name(name).await? {
            Some(exp) => Ok(exp.experiment_id),
            None => {
                let id = self.create_experiment(name).await?;
                info!(experiment = name, experiment_id = %id, "Created experiment");
                Ok(id)
            }
        }
    }

    async fn log_param(&self, run_id: &str, key: &str, value: &str) -> Result<()> {
        self.log_batch(run_id, &[], &[Param::new(key, value)], &[]).await
    }

    async fn log_params(&self, run_id: &str, params: &BTreeMap<String, String>) -> Result<()> {
        let params: Vec<Param> = params.iter().map(|(k, v)| Param::new(k.as_str(), v)).collect();
        self.log_batch(run_id, &[], &params, &[]).await
    }

    async fn log_metric(&self, run_id: &str, key: &str, value: f64) -> Result<()> {
        self.log_batch(run_id, &[Metric::new(key, value)], &[], &[]).await
    }
}

/// Pick the store implementation for the configured tracking URI
pub fn open_store(settings: &TrackingSettings) -> Result<Arc<dyn TrackingStore>> {
    let uri = settings.tracking_uri.trim();
    if uri.starts_with("http://") || uri.starts_with("https://") {
        Ok(Arc::new(MlflowClient::new(settings)?))
    } else if let Some(path) = uri.strip_prefix("file://") {
        Ok(Arc::new(FileStore::open(path)?))
    } else if !uri.is_empty() && !uri.contains("://") {
        Ok(Arc::new(FileStore::open(uri)?))
    } else {
        Err(MlopsError::ConfigError(format!(
            "unsupported tracking URI: {}",
            uri
        )))
    }
}
