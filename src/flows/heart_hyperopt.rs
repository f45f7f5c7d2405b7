//! Heart-attack classifier: tune an SVC, log every trial, register the best

use super::{create_markdown_artifact, params_to_strings};
use crate::data::{drop_duplicates, split_x_y, train_test_split, DataLoader};
use crate::error::{MlopsError, Result};
use crate::optimizer::{HyperOpt, SearchSpace, Study, TrialParams};
use crate::preprocessing::{scale_data, StandardScaler};
use crate::tracking::{best_run, register_model, ModelVersion, RunScope, TrackingStore};
use crate::training::{accuracy_score, Gamma, Kernel, SvcParams, SvmClassifier};
use ndarray::{Array1, Array2};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const EXPERIMENT_NAME: &str = "heart-attack-hyperopt";
pub const MODEL_NAME: &str = "BestSupportVectorClassifier";
pub const REPORT_KEY: &str = "heart-attack-hyper-opt-report";
pub const DEFAULT_TRIALS: usize = 10;
const SEED: u64 = 42;
const REGISTRATION_WAIT: Duration = Duration::from_secs(300);

/// Scaled train and test splits
pub struct PreparedData {
    pub x_train: Array2<f64>,
    pub x_test: Array2<f64>,
    pub y_train: Array1<f64>,
    pub y_test: Array1<f64>,
    /// Scaler fitted on the training split
    pub scaler: StandardScaler,
}

#[derive(Debug)]
pub struct HyperoptOutcome {
    pub study: Study,
    pub best_run_id: String,
    pub best_acc: f64,
    pub model_version: ModelVersion,
    pub report_path: PathBuf,
}

pub fn search_space() -> SearchSpace {
    SearchSpace::new()
        .loguniform("C", 1e-3, 1e2)
        .choice("kernel", vec!["linear", "rbf", "poly", "sigmoid"])
        .quniform("degree", 2.0, 5.0, 1.0)
        .choice("gamma", vec!["scale", "auto"])
        .choice("probability", vec![true, false])
        .fixed("random_state", 42i64)
}

fn required<'a>(params: &'a TrialParams, name: &str) -> Result<&'a crate::optimizer::ParamValue> {
    params
        .get(name)
        .ok_or_else(|| MlopsError::invalid_param(name, "<missing>", "not in trial parameters"))
}

/// Classifier settings for one trial
pub fn svc_params(params: &TrialParams) -> Result<SvcParams> {
    let c = required(params, "C")?
        .as_float()
        .ok_or_else(|| MlopsError::invalid_param("C", &params["C"], "expected a number"))?;
    let kernel: Kernel = required(params, "kernel")?.to_string().parse()?;
    let degree = required(params, "degree")?
        .as_int()
        .filter(|d| *d > 0)
        .ok_or_else(|| MlopsError::invalid_param("degree", &params["degree"], "expected a positive integer"))?;
    let gamma: Gamma = required(params, "gamma")?.to_string().parse()?;
    let probability = required(params, "probability")?
        .as_bool()
        .ok_or_else(|| MlopsError::invalid_param("probability", &params["probability"], "expected a bool"))?;

    let mut svc = SvcParams::default()
        .with_c(c)
        .with_kernel(kernel)
        .with_degree(degree as u32)
        .with_gamma(gamma)
        .with_probability(probability);
    if let Some(seed) = params.get("random_state").and_then(|v| v.as_int()) {
        svc = svc.with_random_state(seed as u64);
    }
    Ok(svc)
}

/// Read, deduplicate, split 80/20 and scale.
///
/// The test split is scaled by its own scaler; the returned scaler is the
/// one fitted on the training split.
pub fn prepare_data(loader: &DataLoader, heart_csv: &Path) -> Result<PreparedData> {
    let raw = loader.load_csv(heart_csv)?;
    let data = drop_duplicates(&raw)?;
    info!(rows = raw.height(), unique = data.height(), "Deduplicated heart data");
    let (x, y) = split_x_y(&data)?;
    let split = train_test_split(&x, &y, 0.2, 0)?;
    let (x_test, _) = scale_data(&split.x_test, None)?;
    let (x_train, scaler) = scale_data(&split.x_train, None)?;
    Ok(PreparedData {
        x_train,
        x_test,
        y_train: split.y_train,
        y_test: split.y_test,
        scaler,
    })
}

/// One trial: fit, score, log params, `acc`, the scaler and the model
async fn objective(
    store: &dyn TrackingStore,
    experiment_id: &str,
    params: &TrialParams,
    data: &PreparedData,
) -> Result<f64> {
    let run = RunScope::start(store, experiment_id, None).await?;
    let outcome: Result<f64> = async {
        let mut model = SvmClassifier::new(svc_params(params)?);
        model.fit(&data.x_train, &data.y_train)?;
        let y_pred = model.predict(&data.x_test)?;
        let acc = accuracy_score(&data.y_test, &y_pred)?;

        run.log_params(&params_to_strings(params)).await?;
        run.log_metric("acc", acc).await?;
        run.log_bin(&data.scaler, "scaler", "scaler.bin").await?;
        run.log_bin(&model, "model", "model.bin").await?;
        Ok(acc)
    }
    .await;
    run.end(outcome).await
}

/// Tune over [`search_space`] with TPE; the loss is the negated accuracy
pub async fn run_optimization(
    store: &dyn TrackingStore,
    experiment_id: &str,
    num_trials: usize,
    data: &PreparedData,
) -> Result<Study> {
    let mut opt = HyperOpt::tpe(search_space(), SEED)?;
    for _ in 0..num_trials {
        let params = opt.ask();
        let outcome = objective(store, experiment_id, &params, data).await;
        opt.tell(params, outcome.map(|acc| -acc));
    }
    opt.finish()?;
    Ok(opt.into_study())
}

/// Register the most accurate run and write the summary report
pub async fn register_best(
    store: &dyn TrackingStore,
    artifacts_dir: &Path,
) -> Result<(String, f64, ModelVersion, PathBuf)> {
    let best = best_run(store, EXPERIMENT_NAME, "acc", false).await?;
    let run_id = best.info.run_id.clone();
    let acc = best
        .data
        .metric("acc")
        .ok_or_else(|| MlopsError::EmptyResult(format!("run {} has no acc metric", run_id)))?;

    let model_uri = format!("runs:/{}/model", run_id);
    let version = register_model(store, &model_uri, MODEL_NAME, REGISTRATION_WAIT).await?;

    let markdown = format!(
        "# Model Registration\n\n## Summary\nRegistered best model (run_id: {}) with a test acc of {}.",
        run_id, acc
    );
    let report = create_markdown_artifact(artifacts_dir, REPORT_KEY, &markdown)?;
    Ok((run_id, acc, version, report))
}

pub async fn main_flow(
    store: &dyn TrackingStore,
    heart_csv: &Path,
    artifacts_dir: &Path,
    num_trials: usize,
) -> Result<HyperoptOutcome> {
    let experiment_id = store.set_experiment(EXPERIMENT_NAME).await?;
    let data = prepare_data(&DataLoader::new(), heart_csv)?;
    let study = run_optimization(store, &experiment_id, num_trials, &data).await?;
    let (best_run_id, best_acc, model_version, report_path) = register_best(store, artifacts_dir).await?;
    info!(
        run_id = %best_run_id,
        acc = best_acc,
        version = %model_version.version,
        "Registered {}",
        MODEL_NAME
    );
    Ok(HyperoptOutcome {
        study,
        best_run_id,
        best_acc,
        model_version,
        report_path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::ParamValue;

    fn trial(kernel: &str) -> TrialParams {
        let mut p = TrialParams::new();
        p.insert("C".to_string(), ParamValue::Float(0.5));
        p.insert("kernel".to_string(), ParamValue::from(kernel));
        p.insert("degree".to_string(), ParamValue::Int(3));
        p.insert("gamma".to_string(), ParamValue::from("auto"));
        p.insert("probability".to_string(), ParamValue::Bool(true));
        p.insert("random_state".to_string(), ParamValue::Int(42));
        p
    }

    #[test]
    fn test_svc_params_from_trial() {
        let svc = svc_params(&trial("poly")).unwrap();
        assert_eq!(svc.c, 0.5);
        assert_eq!(svc.kernel, Kernel::Poly);
        assert_eq!(svc.degree, 3);
        assert_eq!(svc.gamma, Gamma::Auto);
        assert!(svc.probability);
        assert_eq!(svc.random_state, Some(42));
    }

    #[test]
    fn test_unknown_kernel_fails_trial() {
        assert!(svc_params(&trial("cubic")).is_err());
        let mut p = trial("rbf");
        p.remove("C");
        assert!(svc_params(&p).is_err());
    }

    #[test]
    fn test_search_space_shape() {
        let space = search_space();
        assert_eq!(space.len(), 6);
        assert!(space.validate().is_ok());
    }
}
