//! Model registration and best-run lookup

use super::types::{ModelVersion, ModelVersionStatus, Run, SearchQuery};
use super::TrackingStore;
use crate::error::{MlopsError, Result};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Split `runs:/<run_id>/<artifact path>` into its parts
pub fn parse_runs_uri(model_uri: &str) -> Result<(&str, &str)> {
    let rest = model_uri.strip_prefix("runs:/").ok_or_else(|| {
        MlopsError::invalid_param("model_uri", model_uri, "expected runs:/<run_id>/<path>")
    })?;
    let rest = rest.trim_start_matches('/');
    match rest.split_once('/') {
        Some((run_id, path)) if !run_id.is_empty() && !path.trim_matches('/').is_empty() => {
            Ok((run_id, path.trim_matches('/')))
        }
        _ => Err(MlopsError::invalid_param(
            "model_uri",
            model_uri,
            "expected runs:/<run_id>/<path>",
        )),
    }
}

/// Register the model logged at `model_uri` under `name`.
///
/// The registered model is created when missing. The new version is polled
/// until the registry reports it `READY`; if `await_for` elapses first the
/// pending version is returned with a warning.
pub async fn register_model(
    store: &dyn TrackingStore,
    model_uri: &str,
    name: &str,
    await_for: Duration,
) -> Result<ModelVersion> {
    let (run_id, path) = parse_runs_uri(model_uri)?;
    let run = store.get_run(run_id).await?;
    let source = format!("{}/{}", run.info.artifact_uri.trim_end_matches('/'), path);

    store.create_registered_model(name).await?;
    let mut version = store.create_model_version(name, &source, Some(run_id)).await?;
    info!(model = name, version = %version.version, source = %source, "Created model version");

    let started = Instant::now();
    loop {
        match version.status {
            ModelVersionStatus::Ready => break,
            ModelVersionStatus::FailedRegistration => {
                return Err(MlopsError::RegistryError(format!(
                    "version {} of {} failed to register",
                    version.version, name
                )));
            }
            ModelVersionStatus::PendingRegistration => {
                if started.elapsed() >= await_for {
                    warn!(
                        model = name,
                        version = %version.version,
                        waited_secs = await_for.as_secs(),
                        "Model version is still pending registration"
                    );
                    break;
                }
                tokio::time::sleep(POLL_INTERVAL.min(await_for)).await;
                version = store.get_model_version(name, &version.version).await?;
            }
        }
    }
    Ok(version)
}

/// First run of `experiment` ordered by `metric`
pub async fn best_run(
    store: &dyn TrackingStore,
    experiment: &str,
    metric: &str,
    ascending: bool,
) -> Result<Run> {
    let exp = store
        .get_experiment_by_name(experiment)
        .await?
        .ok_or_else(|| MlopsError::EmptyResult(format!("experiment {} does not exist", experiment)))?;
    let direction = if ascending { "ASC" } else { "DESC" };
    let query = SearchQuery::new(exp.experiment_id)
        .order_by(format!("metrics.{} {}", metric, direction))
        .max_results(1);
    store
        .search_runs(&query)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| MlopsError::EmptyResult(format!("experiment {} has no runs", experiment)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::types::{Experiment, Metric, Param, RunData, RunInfo, RunStatus, RunTag};
    use crate::tracking::FileStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;

    /// Registry whose new versions go through a scripted list of statuses
    struct ScriptedRegistry {
        statuses: Mutex<VecDeque<ModelVersionStatus>>,
        polls: Mutex<usize>,
    }

    impl ScriptedRegistry {
        fn new(statuses: &[ModelVersionStatus]) -> Self {
            Self {
                statuses: Mutex::new(statuses.iter().copied().collect()),
                polls: Mutex::new(0),
            }
        }

        fn polls(&self) -> usize {
            *self.polls.lock().unwrap()
        }

        fn version(status: ModelVersionStatus) -> ModelVersion {
            ModelVersion {
                name: "BestRandomForestModel".to_string(),
                version: "1".to_string(),
                source: "mlflow-artifacts:/1/r1/artifacts/model".to_string(),
                run_id: Some("r1".to_string()),
                status,
                creation_timestamp: None,
            }
        }
    }

    #[async_trait]
    impl TrackingStore for ScriptedRegistry {
        async fn get_experiment_by_name(&self, _: &str) -> Result<Option<Experiment>> {
            unimplemented!()
        }

        async fn create_experiment(&self, _: &str) -> Result<String> {
            unimplemented!()
        }

        async fn create_run(&self, _: &str, _: Option<&str>) -> Result<RunInfo> {
            unimplemented!()
        }

        async fn get_run(&self, run_id: &str) -> Result<Run> {
            Ok(Run {
                info: RunInfo {
                    run_id: run_id.to_string(),
                    experiment_id: "1".to_string(),
                    run_name: None,
                    status: RunStatus::Finished,
                    start_time: 0,
                    end_time: Some(1),
                    artifact_uri: "mlflow-artifacts:/1/r1/artifacts".to_string(),
                    lifecycle_stage: "active".to_string(),
                },
                data: RunData::default(),
            })
        }

        async fn log_batch(&self, _: &str, _: &[Metric], _: &[Param], _: &[RunTag]) -> Result<()> {
            unimplemented!()
        }

        async fn terminate_run(&self, _: &str, _: RunStatus) -> Result<()> {
            unimplemented!()
        }

        async fn search_runs(&self, _: &SearchQuery) -> Result<Vec<Run>> {
            unimplemented!()
        }

        async fn log_artifact(&self, _: &str, _: &Path, _: Option<&str>) -> Result<()> {
            unimplemented!()
        }

        async fn create_registered_model(&self, _: &str) -> Result<()> {
            Ok(())
        }

        async fn create_model_version(&self, _: &str, _: &str, _: Option<&str>) -> Result<ModelVersion> {
            Ok(Self::version(ModelVersionStatus::PendingRegistration))
        }

        async fn get_model_version(&self, _: &str, _: &str) -> Result<ModelVersion> {
            *self.polls.lock().unwrap() += 1;
            let status = self
                .statuses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(ModelVersionStatus::PendingRegistration);
            Ok(Self::version(status))
        }
    }

    const URI: &str = "runs:/r1/model";
    const NAME: &str = "BestRandomForestModel";

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_ready() {
        use ModelVersionStatus::*;
        let store = ScriptedRegistry::new(&[PendingRegistration, PendingRegistration, Ready]);
        let v = register_model(&store, URI, NAME, Duration::from_secs(60)).await.unwrap();
        assert_eq!(v.status, Ready);
        assert_eq!(v.source, "mlflow-artifacts:/1/r1/artifacts/model");
        assert_eq!(store.polls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_registration_is_an_error() {
        use ModelVersionStatus::*;
        let store = ScriptedRegistry::new(&[PendingRegistration, FailedRegistration, Ready]);
        let err = register_model(&store, URI, NAME, Duration::from_secs(60)).await.unwrap_err();
        assert!(matches!(err, MlopsError::RegistryError(_)));
        assert_eq!(store.polls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_pending_version() {
        let store = ScriptedRegistry::new(&[]);
        let started = Instant::now();
        let v = register_model(&store, URI, NAME, Duration::from_secs(5)).await.unwrap();
        assert_eq!(v.status, ModelVersionStatus::PendingRegistration);
        assert_eq!(store.polls(), 5);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_wait_does_not_poll() {
        let store = ScriptedRegistry::new(&[ModelVersionStatus::Ready]);
        let v = register_model(&store, URI, NAME, Duration::ZERO).await.unwrap();
        assert_eq!(v.status, ModelVersionStatus::PendingRegistration);
        assert_eq!(store.polls(), 0);
    }

    #[test]
    fn test_parse_runs_uri() {
        assert_eq!(parse_runs_uri("runs:/abc123/model").unwrap(), ("abc123", "model"));
        assert_eq!(parse_runs_uri("runs:/abc/nested/model/").unwrap(), ("abc", "nested/model"));
        assert!(parse_runs_uri("models:/m/1").is_err());
        assert!(parse_runs_uri("runs:/abc").is_err());
        assert!(parse_runs_uri("runs://model").is_err());
    }

    #[tokio::test]
    async fn test_register_points_at_run_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let exp = store.set_experiment("e").await.unwrap();
        let run = store.create_run(&exp, None).await.unwrap();

        let uri = format!("runs:/{}/model", run.run_id);
        let v = register_model(&store, &uri, "BestSupportVectorClassifier", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(v.version, "1");
        assert_eq!(v.source, format!("{}/model", run.artifact_uri));
        assert_eq!(v.run_id.as_deref(), Some(run.run_id.as_str()));

        let again = register_model(&store, &uri, "BestSupportVectorClassifier", Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(again.version, "2");
    }

    #[tokio::test]
    async fn test_best_run_on_empty_experiment() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let err = best_run(&store, "missing", "acc", false).await.unwrap_err();
        assert!(matches!(err, MlopsError::EmptyResult(_)));

        store.set_experiment("empty").await.unwrap();
        let err = best_run(&store, "empty", "acc", false).await.unwrap_err();
        assert!(matches!(err, MlopsError::EmptyResult(_)));
    }

    #[tokio::test]
    async fn test_best_run_direction() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let exp = store.set_experiment("heart").await.unwrap();
        for acc in [0.7, 0.9, 0.8] {
            let run = store.create_run(&exp, None).await.unwrap();
            store.log_metric(&run.run_id, "acc", acc).await.unwrap();
        }
        let best = best_run(&store, "heart", "acc", false).await.unwrap();
        assert_eq!(best.data.metric("acc"), Some(0.9));
        let worst = best_run(&store, "heart", "acc", true).await.unwrap();
        assert_eq!(worst.data.metric("acc"), Some(0.7));
    }
}
