//! Tracking store kept in a local directory
//!
//! Everything except artifacts lives in `store.json`; artifacts are copied
//! under `artifacts/<experiment_id>/<run_id>/artifacts/`.

use super::types::{
    now_millis, Experiment, Metric, ModelVersion, ModelVersionStatus, Param, RegisteredModel,
    Run, RunData, RunInfo, RunStatus, RunTag, SearchQuery,
};
use super::TrackingStore;
use crate::error::{MlopsError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

const STORE_FILE: &str = "store.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    experiments: Vec<Experiment>,
    runs: Vec<Run>,
    registered_models: Vec<RegisteredModel>,
    model_versions: Vec<ModelVersion>,
}

impl StoreState {
    fn run_mut(&mut self, run_id: &str) -> Result<&mut Run> {
        self.runs
            .iter_mut()
            .find(|r| r.info.run_id == run_id)
            .ok_or_else(|| does_not_exist(format!("Run '{}' not found", run_id)))
    }
}

fn does_not_exist(message: String) -> MlopsError {
    MlopsError::TrackingError {
        status: 404,
        message: format!("RESOURCE_DOES_NOT_EXIST: {}", message),
    }
}

fn already_exists(message: String) -> MlopsError {
    MlopsError::TrackingError {
        status: 400,
        message: format!("RESOURCE_ALREADY_EXISTS: {}", message),
    }
}

/// JSON-file implementation of [`TrackingStore`]
pub struct FileStore {
    root: PathBuf,
    state: Mutex<StoreState>,
}

impl FileStore {
    /// Open (or create) a store rooted at `root`
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let file = root.join(STORE_FILE);
        let state = if file.exists() {
            serde_json::from_str(&fs::read_to_string(&file)?)?
        } else {
            StoreState::default()
        };
        debug!(root = %root.display(), "Opened file tracking store");
        Ok(Self {
            root,
            state: Mutex::new(state),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>> {
        self.state
            .lock()
            .map_err(|_| MlopsError::ConfigError("file store lock poisoned".to_string()))
    }

    fn persist(&self, state: &StoreState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.root.join(format!("{}.tmp", STORE_FILE));
        fs::write(&tmp, json)?;
        fs::rename(&tmp, self.root.join(STORE_FILE))?;
        Ok(())
    }

    /// Apply `f` to the state and write it back
    fn mutate<T>(&self, f: impl FnOnce(&mut StoreState) -> Result<T>) -> Result<T> {
        let mut state = self.lock()?;
        let out = f(&mut state)?;
        self.persist(&state)?;
        Ok(out)
    }
}

#[async_trait]
impl TrackingStore for FileStore {
    async fn get_experiment_by_name(&self, name: &str) -> Result<Option<Experiment>> {
        let state = self.lock()?;
        Ok(state.experiments.iter().find(|e| e.name == name).cloned())
    }

    async fn create_experiment(&self, name: &str) -> Result<String> {
        let artifacts = self.root.join("artifacts");
        self.mutate(|state| {
            if state.experiments.iter().any(|e| e.name == name) {
                return Err(already_exists(format!("Experiment '{}' already exists", name)));
            }
            let id = (state.experiments.len() + 1).to_string();
            state.experiments.push(Experiment {
                experiment_id: id.clone(),
                name: name.to_string(),
                artifact_location: Some(artifacts.join(&id).display().to_string()),
                lifecycle_stage: "active".to_string(),
            });
            Ok(id)
        })
    }

    async fn create_run(&self, experiment_id: &str, run_name: Option<&str>) -> Result<RunInfo> {
        self.mutate(|state| {
            let exp = state
                .experiments
                .iter()
                .find(|e| e.experiment_id == experiment_id)
                .ok_or_else(|| does_not_exist(format!("No experiment with id {}", experiment_id)))?;
            let run_id = uuid::Uuid::new_v4().simple().to_string();
            let location = exp.artifact_location.clone().unwrap_or_default();
            let info = RunInfo {
                run_id: run_id.clone(),
                experiment_id: experiment_id.to_string(),
                run_name: run_name.map(str::to_string),
                status: RunStatus::Running,
                start_time: now_millis(),
                end_time: None,
                artifact_uri: format!("{}/{}/artifacts", location, run_id),
                lifecycle_stage: "active".to_string(),
            };
            state.runs.push(Run {
                info: info.clone(),
                data: RunData::default(),
            });
            Ok(info)
        })
    }

    async fn get_run(&self, run_id: &str) -> Result<Run> {
        let mut state = self.lock()?;
        Ok(state.run_mut(run_id)?.clone())
    }

    async fn log_batch(
        &self,
        run_id: &str,
        metrics: &[Metric],
        params: &[Param],
        tags: &[RunTag],
    ) -> Result<()> {
        self.mutate(|state| {
            let run = state.run_mut(run_id)?;
            for p in params {
                match run.data.params.iter().find(|q| q.key == p.key) {
                    Some(existing) if existing.value != p.value => {
                        return Err(MlopsError::TrackingError {
                            status: 400,
                            message: format!(
                                "INVALID_PARAMETER_VALUE: param '{}' already logged as '{}'",
                                p.key, existing.value
                            ),
                        });
                    }
                    Some(_) => {}
                    None => run.data.params.push(p.clone()),
                }
            }
            for tag in tags {
                run.data.tags.retain(|t| t.key != tag.key);
                run.data.tags.push(tag.clone());
            }
            run.data.metrics.extend(metrics.iter().cloned());
            Ok(())
        })
    }

    async fn terminate_run(&self, run_id: &str, status: RunStatus) -> Result<()> {
        self.mutate(|state| {
            let run = state.run_mut(run_id)?;
            run.info.status = status;
            run.info.end_time = Some(now_millis());
            Ok(())
        })
    }

    async fn search_runs(&self, query: &SearchQuery) -> Result<Vec<Run>> {
        let order = query.parsed_order();
        let state = self.lock()?;
        let mut runs: Vec<Run> = state
            .runs
            .iter()
            .filter(|r| query.experiment_ids.contains(&r.info.experiment_id))
            .filter(|r| query.run_view_type.admits(&r.info.lifecycle_stage))
            .cloned()
            .collect();
        drop(state);

        runs.sort_by(|a, b| {
            order
                .iter()
                .map(|o| o.compare(a, b))
                .find(|ord| *ord != Ordering::Equal)
                .unwrap_or_else(|| {
                    b.info
                        .start_time
                        .cmp(&a.info.start_time)
                        .then_with(|| a.info.run_id.cmp(&b.info.run_id))
                })
        });
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
            .ok_or_else(|| MlopsError::invalid_param("local_path", local_path.display(), "has no file name"))?;
        let mut dest = PathBuf::from(run.info.artifact_uri.trim_start_matches("file://"));
        if let Some(dir) = artifact_path.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
            dest.push(dir);
        }
        fs::create_dir_all(&dest)?;
        dest.push(file_name);
        let bytes = fs::copy(local_path, &dest)?;
        info!(run_id, artifact = %dest.display(), bytes, "Stored artifact");
        Ok(())
    }

    async fn create_registered_model(&self, name: &str) -> Result<()> {
        self.mutate(|state| {
            if !state.registered_models.iter().any(|m| m.name == name) {
                state.registered_models.push(RegisteredModel {
                    name: name.to_string(),
                    creation_timestamp: Some(now_millis()),
                });
            }
            Ok(())
        })
    }

    async fn create_model_version(
        &self,
        name: &str,
        source: &str,
        run_id: Option<&str>,
    ) -> Result<ModelVersion> {
        self.mutate(|state| {
            if !state.registered_models.iter().any(|m| m.name == name) {
                return Err(does_not_exist(format!("Registered Model with name={} not found", name)));
            }
            let next = state.model_versions.iter().filter(|v| v.name == name).count() + 1;
            let version = ModelVersion {
                name: name.to_string(),
                version: next.to_string(),
                source: source.to_string(),
                run_id: run_id.map(str::to_string),
                status: ModelVersionStatus::Ready,
                creation_timestamp: Some(now_millis()),
            };
            state.model_versions.push(version.clone());
            Ok(version)
        })
    }

    async fn get_model_version(&self, name: &str, version: &str) -> Result<ModelVersion> {
        let state = self.lock()?;
        state
            .model_versions
            .iter()
            .find(|v| v.name == name && v.version == version)
            .cloned()
            .ok_or_else(|| does_not_exist(format!("Model Version (name={}, version={}) not found", name, version)))
    }
}
