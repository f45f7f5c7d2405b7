//! TPE search over random forest settings on the prepared trip data

use super::{forest_from_params, params_to_strings};
use crate::data::{CsrMatrix, Dataset};
use crate::error::Result;
use crate::optimizer::{HyperOpt, SearchSpace, Study, TrialParams};
use crate::tracking::{RunScope, TrackingStore};
use crate::training::root_mean_squared_error;
use ndarray::Array1;
use std::path::Path;
use tracing::info;

pub const EXPERIMENT_NAME: &str = "random-forest-hyperopt";
pub const DEFAULT_TRIALS: usize = 15;
const SEED: u64 = 42;

pub fn search_space() -> SearchSpace {
    SearchSpace::new()
        .quniform("max_depth", 1.0, 20.0, 1.0)
        .quniform("n_estimators", 10.0, 50.0, 1.0)
        .quniform("min_samples_split", 2.0, 10.0, 1.0)
        .quniform("min_samples_leaf", 1.0, 4.0, 1.0)
        .fixed("random_state", 42i64)
}

struct Splits {
    x_train: CsrMatrix,
    y_train: Array1<f64>,
    x_val: CsrMatrix,
    y_val: Array1<f64>,
}

async fn objective(
    store: &dyn TrackingStore,
    experiment_id: &str,
    params: &TrialParams,
    data: &Splits,
) -> Result<f64> {
    let run = RunScope::start(store, experiment_id, None).await?;
    let outcome: Result<f64> = async {
        let logged = params_to_strings(params);
        run.log_params(&logged).await?;
        let mut rf = forest_from_params(&logged)?;
        rf.fit(&data.x_train, &data.y_train)?;
        let rmse = root_mean_squared_error(&data.y_val, &rf.predict(&data.x_val)?)?;
        run.log_metric("rmse", rmse).await?;
        Ok(rmse)
    }
    .await;
    run.end(outcome).await
}

/// Run `num_trials` trials, each a run of [`EXPERIMENT_NAME`] logging its
/// params and validation `rmse`
pub async fn run_optimization(
    store: &dyn TrackingStore,
    data_path: &Path,
    num_trials: usize,
) -> Result<Study> {
    let experiment_id = store.set_experiment(EXPERIMENT_NAME).await?;
    let train = Dataset::load(data_path.join("train.bin"))?;
    let val = Dataset::load(data_path.join("val.bin"))?;
    let data = Splits {
        x_train: train.x,
        y_train: train.y,
        x_val: val.x,
        y_val: val.y,
    };

    let mut opt = HyperOpt::tpe(search_space(), SEED)?;
    for _ in 0..num_trials {
        let params = opt.ask();
        let outcome = objective(store, &experiment_id, &params, &data).await;
        opt.tell(params, outcome);
    }
    let study = opt.finish()?;
    info!(
        best_rmse = study.best_loss().unwrap_or(f64::NAN),
        failed = study.n_failed(),
        "Random forest search finished"
    );
    Ok(opt.into_study())
}
