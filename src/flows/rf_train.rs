//! Memory-conscious random forest baseline on the prepared trip data

use crate::data::Dataset;
use crate::error::Result;
use crate::memory::MemoryProbe;
use crate::tracking::{RunScope, TrackingStore};
use crate::training::{root_mean_squared_error, MaxFeatures, RandomForest};
use std::path::Path;
use tracing::info;

pub const EXPERIMENT_NAME: &str = "my-experiment";

fn load_logged(probe: &mut MemoryProbe, path: &Path) -> Result<Dataset> {
    let snapshot = probe.snapshot();
    info!(file = %path.display(), available_gb = snapshot.available_gb, "Loading dataset");
    let dataset = Dataset::load(path)?;
    info!(file = %path.display(), rows = dataset.len(), "Loaded dataset");
    Ok(dataset)
}

/// Fit the baseline forest and log `rmse` plus its settings in a run
/// of [`EXPERIMENT_NAME`]. Returns the validation RMSE.
pub async fn run_train(store: &dyn TrackingStore, data_path: &Path) -> Result<f64> {
    let experiment_id = store.set_experiment(EXPERIMENT_NAME).await?;
    let run = RunScope::start(store, &experiment_id, None).await?;

    let outcome: Result<f64> = async {
        let mut probe = MemoryProbe::new();
        probe.log("initial");
        let train = load_logged(&mut probe, &data_path.join("train.bin"))?;
        let val = load_logged(&mut probe, &data_path.join("val.bin"))?;
        probe.log("after loading");
        info!(train = ?train.x.shape(), val = ?val.x.shape(), "Dataset shapes");

        let mut rf = RandomForest::new_regressor(50)
            .with_max_depth(10)
            .with_max_features(MaxFeatures::Sqrt)
            .with_random_state(0);
        rf.fit(&train.x, &train.y)?;
        let y_pred = rf.predict(&val.x)?;
        let rmse = root_mean_squared_error(&val.y, &y_pred)?;

        run.log_metric("rmse", rmse).await?;
        run.log_param("n_estimators", 50).await?;
        run.log_param("max_depth", 10).await?;
        run.log_param("max_features", "sqrt").await?;
        run.log_param("min_samples_split", rf.min_samples_split).await?;
        info!(rmse, "Validation RMSE");
        Ok(rmse)
    }
    .await;
    run.end(outcome).await
}
