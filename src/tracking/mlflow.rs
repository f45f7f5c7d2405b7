//! REST client for an MLflow-compatible tracking server

use super::types::{
    now_millis, Experiment, Metric, ModelVersion, Param, Run, RunInfo,
    RunStatus, RunTag, SearchQuery,
};
use super::TrackingStore;
use crate::config::TrackingSettings;
use crate::error::{MlopsError, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const API_PREFIX: &str = "api/2.0/mlflow";
const ARTIFACT_PREFIX: &str = "api/2.0/mlflow-artifacts/artifacts";
const ARTIFACT_SCHEME: &str = "mlflow-artifacts:";

/// Error payload the server sends with non-2xx responses
#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    error_code: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ExperimentResponse {
    experiment: Experiment,
}

#[derive(Deserialize)]
struct CreateExperimentResponse {
    experiment_id: String,
}

#[derive(Deserialize)]
struct RunResponse {
    run: Run,
}

#[derive(Deserialize)]
struct SearchRunsResponse {
    #[serde(default)]
    runs: Vec<Run>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct ModelVersionResponse {
    model_version: ModelVersion,
}

pub struct MlflowClient {
    client: Client,
    base_url: String,
}

impl MlflowClient {
    pub fn new(settings: &TrackingSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: settings.tracking_uri.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, API_PREFIX, path)
    }

    /// Map a non-2xx response to a tracking error carrying the server's error code
    fn map_http_error(status: StatusCode, body_text: &str) -> MlopsError {
        let message = match serde_json::from_str::<ApiError>(body_text) {
            Ok(err) if !err.error_code.is_empty() => format!("{}: {}", err.error_code, err.message),
            _ => body_text.to_string(),
        };
        MlopsError::TrackingError {
            status: status.as_u16(),
            message,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<String> {
        let response = request.send().await?;
        let status = response.status();
        let body_text = response.text().await?;
        if !status.is_success() {
            return Err(Self::map_http_error(status, &body_text));
        }
        Ok(body_text)
    }

    async fn call<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let body_text = self.send(request).await?;
        Ok(serde_json::from_str(&body_text)?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        self.call(self.client.get(self.endpoint(path)).query(query)).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        self.call(self.client.post(self.endpoint(path)).json(body)).await
    }

    /// Proxy URL for a file under a run's `mlflow-artifacts:` root
    fn artifact_url(&self, artifact_uri: &str, artifact_path: Option<&str>, file_name: &str) -> Result<String> {
        let root = artifact_uri
            .strip_prefix(ARTIFACT_SCHEME)
            .ok_or_else(|| {
                MlopsError::ConfigError(format!(
                    "artifact root {} is not served by the tracking server",
                    artifact_uri
                ))
            })?
            .trim_start_matches('/')
            .trim_end_matches('/');
        let mut url = format!("{}/{}/{}", self.base_url, ARTIFACT_PREFIX, root);
        if let Some(dir) = artifact_path.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
            url.push('/');
            url.push_str(dir);
        }
        url.push('/');
        url.push_str(file_name);
        Ok(url)
    }
}

/// `RESOURCE_DOES_NOT_EXIST` responses become `None`
fn not_found_as_none<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(MlopsError::TrackingError { status: 404, .. }) => Ok(None),
        Err(MlopsError::TrackingError { message, .. }) if message.starts_with("RESOURCE_DOES_NOT_EXIST") => Ok(None),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl TrackingStore for MlflowClient {
    async fn get_experiment_by_name(&self, name: &str) -> Result<Option<Experiment>> {
        let resp = self
            .get::<ExperimentResponse>("experiments/get-by-name", &[("experiment_name", name)])
            .await;
        Ok(not_found_as_none(resp)?.map(|r| r.experiment))
    }

    async fn create_experiment(&self, name: &str) -> Result<String> {
        let resp: CreateExperimentResponse = self
            .post("experiments/create", &json!({ "name": name }))
            .await?;
        Ok(resp.experiment_id)
    }

    async fn create_run(&self, experiment_id: &str, run_name: Option<&str>) -> Result<RunInfo> {
        let mut body = json!({
            "experiment_id": experiment_id,
            "start_time": now_millis(),
        });
        if let Some(name) = run_name {
            body["run_name"] = json!(name);
        }
        let resp: RunResponse = self.post("runs/create", &body).await?;
        debug!(run_id = %resp.run.info.run_id, "Started run");
        Ok(resp.run.info)
    }

    async fn get_run(&self, run_id: &str) -> Result<Run> {
        let resp: RunResponse = self.get("runs/get", &[("run_id", run_id)]).await?;
        Ok(resp.run)
    }

    async fn log_batch(
        &self,
        run_id: &str,
        metrics: &[Metric],
        params: &[Param],
        tags: &[RunTag],
    ) -> Result<()> {
        let body = json!({
            "run_id": run_id,
            "metrics": metrics,
            "params": params,
            "tags": tags,
        });
        let _: Value = self.post("runs/log-batch", &body).await?;
        Ok(())
    }

    async fn terminate_run(&self, run_id: &str, status: RunStatus) -> Result<()> {
        let body = json!({
            "run_id": run_id,
            "status": status,
            "end_time": now_millis(),
        });
        let _: Value = self.post("runs/update", &body).await?;
        Ok(())
    }

    async fn search_runs(&self, query: &SearchQuery) -> Result<Vec<Run>> {
        let mut runs = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let remaining = query.max_results.saturating_sub(runs.len());
            if remaining == 0 {
                break;
            }
            let mut body = json!({
                "experiment_ids": query.experiment_ids,
                "run_view_type": query.run_view_type,
                "max_results": remaining,
                "order_by": query.order_by,
            });
            if let Some(token) = &page_token {
                body["page_token"] = json!(token);
            }
            let page: SearchRunsResponse = self.post("runs/search", &body).await?;
            runs.extend(page.runs);
            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        runs.truncate(query.max_results);
        Ok(runs)
    }

    async fn log_artifact(
        &self,
        run_id: &str,
        local_path: &Path,
        artifact_path: Option<&str>,
    ) -> Result<()> {
        let run = self.get_run(run_id).await?;
        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| MlopsError::invalid_param("local_path", local_path.display(), "has no file name"))?;
        let url = self.artifact_url(&run.info.artifact_uri, artifact_path, file_name)?;
        let bytes = tokio::fs::read(local_path).await?;
        let size = bytes.len();
        self.send(self.client.put(&url).body(bytes)).await?;
        info!(run_id, artifact = file_name, bytes = size, "Uploaded artifact");
        Ok(())
    }

    async fn create_registered_model(&self, name: &str) -> Result<()> {
        let result: Result<Value> = self
            .post("registered-models/create", &json!({ "name": name }))
            .await;
        match result {
            Ok(_) => {
                info!(model = name, "Created registered model");
                Ok(())
            }
            Err(MlopsError::TrackingError { message, .. })
                if message.starts_with("RESOURCE_ALREADY_EXISTS") =>
            {
                debug!(model = name, "Registered model already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn create_model_version(
        &self,
        name: &str,
        source: &str,
        run_id: Option<&str>,
    ) -> Result<ModelVersion> {
        let mut body = json!({ "name": name, "source": source });
        if let Some(id) = run_id {
            body["run_id"] = json!(id);
        }
        let resp: ModelVersionResponse = self.post("model-versions/create", &body).await?;
        Ok(resp.model_version)
    }

    async fn get_model_version(&self, name: &str, version: &str) -> Result<ModelVersion> {
        let resp: ModelVersionResponse = self
            .get("model-versions/get", &[("name", name), ("version", version)])
            .await?;
        Ok(resp.model_version)
    }
}
