//! Scoped tracking run

use super::types::{Metric, Param, RunInfo, RunStatus};
use super::TrackingStore;
use crate::error::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// A started run. Always close it with [`RunScope::end`], which records
/// `FINISHED` or `FAILED` depending on the outcome it is handed.
pub struct RunScope<'a> {
    store: &'a dyn TrackingStore,
    info: RunInfo,
}

impl<'a> RunScope<'a> {
    pub async fn start(
        store: &'a dyn TrackingStore,
        experiment_id: &str,
        run_name: Option<&str>,
    ) -> Result<RunScope<'a>> {
        let info = store.create_run(experiment_id, run_name).await?;
        info!(run_id = %info.run_id, experiment_id, "Run started");
        Ok(Self { store, info })
    }

    pub fn run_id(&self) -> &str {
        &self.info.run_id
    }

    pub fn info(&self) -> &RunInfo {
        &self.info
    }

    pub async fn log_param(&self, key: &str, value: impl ToString) -> Result<()> {
        self.store
            .log_param(&self.info.run_id, key, &value.to_string())
            .await
    }

    pub async fn log_params(&self, params: &BTreeMap<String, String>) -> Result<()> {
        self.store.log_params(&self.info.run_id, params).await
    }

    pub async fn log_metric(&self, key: &str, value: f64) -> Result<()> {
        self.store.log_metric(&self.info.run_id, key, value).await
    }

    /// Log metrics and params in one request
    pub async fn log_batch(&self, metrics: &[(&str, f64)], params: &[(&str, String)]) -> Result<()> {
        let metrics: Vec<Metric> = metrics.iter().map(|(k, v)| Metric::new(*k, *v)).collect();
        let params: Vec<Param> = params.iter().map(|(k, v)| Param::new(*k, v)).collect();
        self.store
            .log_batch(&self.info.run_id, &metrics, &params, &[])
            .await
    }

    pub async fn log_artifact(&self, local_path: &Path, artifact_path: Option<&str>) -> Result<()> {
        self.store
            .log_artifact(&self.info.run_id, local_path, artifact_path)
            .await
    }

    /// Serialize `value` to `<artifact_path>/<file_name>` in the run's artifacts
    pub async fn log_bin<T: Serialize + Sync>(
        &self,
        value: &T,
        artifact_path: &str,
        file_name: &str,
    ) -> Result<()> {
        let staging = std::env::temp_dir().join(format!("mlops-{}", uuid::Uuid::new_v4().simple()));
        let local = staging.join(file_name);
        crate::data::dataset::write_bin(&local, value)?;
        let uploaded = self.log_artifact(&local, Some(artifact_path)).await;
        if let Err(e) = std::fs::remove_dir_all(&staging) {
            warn!(path = %staging.display(), error = %e, "Could not remove staging directory");
        }
        uploaded
    }

    /// Terminate the run according to `outcome` and hand the outcome back.
    /// A failure to terminate only surfaces when the body itself succeeded.
    pub async fn end<T>(self, outcome: Result<T>) -> Result<T> {
        let status = if outcome.is_ok() {
            RunStatus::Finished
        } else {
            RunStatus::Failed
        };
        let closed = self.store.terminate_run(&self.info.run_id, status).await;
        match (outcome, closed) {
            (Ok(v), Ok(())) => {
                info!(run_id = %self.info.run_id, "Run finished");
                Ok(v)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    warn!(run_id = %self.info.run_id, error = %close_err, "Could not mark run as failed");
                }
                warn!(run_id = %self.info.run_id, error = %e, "Run failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MlopsError;
    use crate::tracking::FileStore;

    #[tokio::test]
    async fn test_end_records_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let exp = store.set_experiment("e").await.unwrap();

        let ok = RunScope::start(&store, &exp, None).await.unwrap();
        let ok_id = ok.run_id().to_string();
        ok.log_metric("acc", 0.8).await.unwrap();
        assert_eq!(ok.end(Ok(7)).await.unwrap(), 7);

        let bad = RunScope::start(&store, &exp, None).await.unwrap();
        let bad_id = bad.run_id().to_string();
        let err = bad
            .end::<()>(Err(MlopsError::TrainingError("diverged".to_string())))
            .await
            .unwrap_err();
        assert!(matches!(err, MlopsError::TrainingError(_)));

        assert_eq!(store.get_run(&ok_id).await.unwrap().info.status, RunStatus::Finished);
        assert_eq!(store.get_run(&bad_id).await.unwrap().info.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_log_bin_stores_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let exp = store.set_experiment("e").await.unwrap();
        let run = RunScope::start(&store, &exp, None).await.unwrap();
        run.log_bin(&vec![1.0f64, 2.0], "model", "model.bin").await.unwrap();
        run.log_batch(&[("rmse", 1.5)], &[("max_depth", "3".to_string())])
            .await
            .unwrap();
        let uri = run.info().artifact_uri.clone();
        run.end(Ok(())).await.unwrap();

        let stored: Vec<f64> =
            crate::data::dataset::read_bin(Path::new(&uri).join("model").join("model.bin")).unwrap();
        assert_eq!(stored, vec![1.0, 2.0]);
    }
}
