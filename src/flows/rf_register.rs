//! Re-train the best tuned forests and register the winner

use super::{forest_from_params, RF_PARAMS};
use crate::data::Dataset;
use crate::error::{MlopsError, Result};
use crate::tracking::{
    best_run, register_model, ModelVersion, Run, RunScope, SearchQuery, TrackingStore, ViewType,
};
use crate::training::root_mean_squared_error;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub const HPO_EXPERIMENT_NAME: &str = "random-forest-hyperopt";
pub const EXPERIMENT_NAME: &str = "random-forest-best-models";
pub const MODEL_NAME: &str = "random-forest-regressor-best";
const REGISTRATION_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RegisterOutcome {
    pub run_id: String,
    pub test_rmse: f64,
    pub model_version: ModelVersion,
}

/// Train on the train split with the tuned `params`, then log both RMSEs
/// and the model
async fn train_and_log_model(
    store: &dyn TrackingStore,
    experiment_id: &str,
    data_path: &Path,
    params: &BTreeMap<String, String>,
    test: &Dataset,
) -> Result<()> {
    let train = Dataset::load(data_path.join("train.bin"))?;
    let val = Dataset::load(data_path.join("val.bin"))?;

    let run = RunScope::start(store, experiment_id, None).await?;
    let outcome: Result<()> = async {
        let new_params: BTreeMap<String, String> = RF_PARAMS
            .iter()
            .map(|&k| {
                params
                    .get(k)
                    .map(|v| (k.to_string(), v.clone()))
                    .ok_or_else(|| MlopsError::invalid_param(k, "<missing>", "not logged by the tuning run"))
            })
            .collect::<Result<_>>()?;
        let mut rf = forest_from_params(&new_params)?;
        rf.fit(&train.x, &train.y)?;

        let val_rmse = root_mean_squared_error(&val.y, &rf.predict(&val.x)?)?;
        let test_rmse = root_mean_squared_error(&test.y, &rf.predict(&test.x)?)?;

        run.log_params(&new_params).await?;
        run.log_metric("val_rmse", val_rmse).await?;
        run.log_metric("test_rmse", test_rmse).await?;
        run.log_bin(&rf, "model", "model.bin").await?;
        info!(run_id = run.run_id(), val_rmse, test_rmse, "Re-trained candidate");
        Ok(())
    }
    .await;
    run.end(outcome).await
}

async fn top_runs(store: &dyn TrackingStore, top_n: usize) -> Result<Vec<Run>> {
    let hpo = store
        .get_experiment_by_name(HPO_EXPERIMENT_NAME)
        .await?
        .ok_or_else(|| {
            MlopsError::EmptyResult(format!("experiment {} does not exist", HPO_EXPERIMENT_NAME))
        })?;
    let query = SearchQuery::new(hpo.experiment_id)
        .view_type(ViewType::ActiveOnly)
        .max_results(top_n)
        .order_by("metrics.rmse ASC");
    store.search_runs(&query).await
}

/// Take the `top_n` tuning runs by `rmse`, re-train each, and register the
/// one with the lowest `test_rmse`
pub async fn run_register_model(
    store: &dyn TrackingStore,
    data_path: &Path,
    top_n: usize,
) -> Result<RegisterOutcome> {
    let experiment_id = store.set_experiment(EXPERIMENT_NAME).await?;
    let candidates = top_runs(store, top_n).await?;
    info!(candidates = candidates.len(), "Selected tuning runs");

    let test = Dataset::load(data_path.join("test.bin"))?;
    for run in &candidates {
        let params: BTreeMap<String, String> = run
            .data
            .params
            .iter()
            .map(|p| (p.key.clone(), p.value.clone()))
            .collect();
        train_and_log_model(store, &experiment_id, data_path, &params, &test).await?;
    }

    let best = best_run(store, EXPERIMENT_NAME, "test_rmse", true).await?;
    let test_rmse = best.data.metric("test_rmse").ok_or_else(|| {
        MlopsError::EmptyResult(format!("run {} has no test_rmse metric", best.info.run_id))
    })?;
    let model_uri = format!("runs:/{}/model", best.info.run_id);
    let model_version = register_model(store, &model_uri, MODEL_NAME, REGISTRATION_WAIT).await?;

    Ok(RegisterOutcome {
        run_id: best.info.run_id,
        test_rmse,
        model_version,
    })
}
