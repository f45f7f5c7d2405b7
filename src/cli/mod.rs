//! Command-line interface for the `mlops` binary.
//!
//! Each subcommand runs one flow start to finish.

use clap::{Parser, Subcommand};
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::config::PipelineConfig;
use crate::data::DataLoader;
use crate::flows::{heart_hyperopt, heart_monitor, rf_hpo, rf_register, rf_train, trip_duration};
use crate::notify::{EmailServerCredentials, SmtpNotifier};
use crate::orchestration::{find_dag, registered_dags};
use crate::tracking::{open_store, TrackingStore};

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString    { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn kv(key: &str, val: &str) {
    println!("  {:<18} {}", muted(key), val.white());
}

fn step_ok(msg: &str) {
    println!("  {} {}", ok("✓"), msg);
}

fn step_run(msg: &str) {
    println!("  {} {}...", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("  {} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "mlops")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Training, tuning, registration and drift-monitoring pipelines")]
#[command(long_about = None)]
pub struct Cli {
    /// JSON config file overriding the environment defaults
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Tracking server URI (`http(s)://...` or `file://...`)
    #[arg(long, global = true)]
    pub tracking_uri: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Tune an SVM on the heart-attack data and register the best model
    Hyperopt {
        /// Number of optimization trials
        #[arg(long, default_value_t = heart_hyperopt::DEFAULT_TRIALS)]
        trials: usize,
    },

    /// Check the current heart data for drift and email the result
    Monitor {
        /// Address the drift summary is sent to
        #[arg(long)]
        recipient: String,

        /// Save the drift report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Store SMTP credentials as a named block
    EmailBlock {
        /// Sender account user name
        #[arg(long)]
        sender: String,

        /// Sender account (app) password
        #[arg(long)]
        sender_password: String,

        /// Block name, defaults to the configured one
        #[arg(long)]
        name: Option<String>,
    },

    /// Fit the trip-duration linear model
    TripTrain {
        /// Trip parquet file
        #[arg(long)]
        input: Option<PathBuf>,

        /// Where the (vectorizer, model) bundle is written
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Vectorize three monthly trip files into train/val/test datasets
    Prepare {
        #[arg(long)]
        train: PathBuf,

        #[arg(long)]
        val: PathBuf,

        #[arg(long)]
        test: PathBuf,

        /// Output directory, defaults to the prepared data dir
        #[arg(long)]
        dest: Option<PathBuf>,
    },

    /// Train a random forest on the prepared trip data
    RfTrain {
        #[arg(long)]
        data_path: Option<PathBuf>,
    },

    /// Tune the random forest on the prepared trip data
    RfHpo {
        #[arg(long)]
        data_path: Option<PathBuf>,

        #[arg(long, default_value_t = rf_hpo::DEFAULT_TRIALS)]
        trials: usize,
    },

    /// Re-train the best tuning runs and register the winner
    RfRegister {
        #[arg(long)]
        data_path: Option<PathBuf>,

        /// How many tuning runs to re-train
        #[arg(long, default_value_t = 5)]
        top_n: usize,
    },

    /// Inspect or trigger DAGs
    Dag {
        #[command(subcommand)]
        action: DagAction,
    },

    /// Show the resolved configuration and, optionally, a data file summary
    Info {
        /// CSV or Parquet file to summarize
        #[arg(long)]
        data: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum DagAction {
    /// List registered DAGs
    List,
    /// Run every task of a DAG in order
    Run { dag_id: String },
}

// ─── Dispatch ──────────────────────────────────────────────────────────────────

/// Resolve the config from `--config` and `--tracking-uri`
pub fn resolve_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    if let Some(uri) = &cli.tracking_uri {
        config = config.with_tracking_uri(uri.clone());
    }
    Ok(config)
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = resolve_config(&cli)?;
    match cli.command {
        Commands::Hyperopt { trials } => cmd_hyperopt(&config, trials).await,
        Commands::Monitor { recipient, report } => {
            cmd_monitor(&config, &recipient, report.as_deref()).await
        }
        Commands::EmailBlock { sender, sender_password, name } => {
            cmd_email_block(&config, &sender, &sender_password, name.as_deref())
        }
        Commands::TripTrain { input, output } => {
            let input = input.unwrap_or_else(|| config.paths.trip_parquet.clone());
            let output = output.unwrap_or_else(|| config.paths.trip_model_output.clone());
            cmd_trip_train(&input, &output)
        }
        Commands::Prepare { train, val, test, dest } => {
            let dest = dest.unwrap_or_else(|| config.paths.prepared_dir.clone());
            cmd_prepare([&train, &val, &test], &dest)
        }
        Commands::RfTrain { data_path } => {
            let data_path = data_path.unwrap_or_else(|| config.paths.prepared_dir.clone());
            cmd_rf_train(&config, &data_path).await
        }
        Commands::RfHpo { data_path, trials } => {
            let data_path = data_path.unwrap_or_else(|| config.paths.prepared_dir.clone());
            cmd_rf_hpo(&config, &data_path, trials).await
        }
        Commands::RfRegister { data_path, top_n } => {
            let data_path = data_path.unwrap_or_else(|| config.paths.prepared_dir.clone());
            cmd_rf_register(&config, &data_path, top_n).await
        }
        Commands::Dag { action: DagAction::List } => cmd_dag_list(),
        Commands::Dag { action: DagAction::Run { dag_id } } => cmd_dag_run(&dag_id).await,
        Commands::Info { data } => cmd_info(&config, data.as_deref()),
    }
}

fn store(config: &PipelineConfig) -> anyhow::Result<Arc<dyn TrackingStore>> {
    let store = open_store(&config.tracking)?;
    step_ok(&format!("Tracking at {}", accent(&config.tracking.tracking_uri)));
    Ok(store)
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_hyperopt(config: &PipelineConfig, trials: usize) -> anyhow::Result<()> {
    section("Heart-attack hyperopt");
    let store = store(config)?;

    step_run(&format!("Running {} trials", trials));
    let start = Instant::now();
    let outcome = heart_hyperopt::main_flow(
        store.as_ref(),
        &config.paths.heart_csv,
        &config.paths.artifacts_dir,
        trials,
    )
    .await?;
    step_done(&format!("{:?}", start.elapsed()));

    println!();
    kv("Trials", &outcome.study.trials.len().to_string());
    kv("Failed", &outcome.study.n_failed().to_string());
    kv("Best run", &outcome.best_run_id);
    kv("Best acc", &format!("{:.4}", outcome.best_acc));
    kv(
        "Registered",
        &format!("{} v{}", heart_hyperopt::MODEL_NAME, outcome.model_version.version),
    );
    kv("Report", &outcome.report_path.display().to_string());
    println!();
    Ok(())
}

pub async fn cmd_monitor(
    config: &PipelineConfig,
    recipient: &str,
    report: Option<&Path>,
) -> anyhow::Result<()> {
    section("Heart-attack drift monitor");

    let creds = EmailServerCredentials::load(&config.paths.blocks_dir, &config.smtp.block_name)?;
    step_ok(&format!("Loaded credentials block {}", accent(&config.smtp.block_name)));
    let notifier = SmtpNotifier::new(creds);

    step_run("Computing drift");
    let share = heart_monitor::main_flow(
        &config.paths.heart_csv,
        &config.paths.reference_csv,
        report,
        &notifier,
        recipient,
        &config.smtp.from_address,
    )
    .await?;
    step_done(&format!("notified {}", recipient));

    println!();
    kv("Drift share", &format!("{:.5}", share));
    if let Some(path) = report {
        kv("Report", &path.display().to_string());
    }
    println!();
    Ok(())
}

pub fn cmd_email_block(
    config: &PipelineConfig,
    sender: &str,
    sender_password: &str,
    name: Option<&str>,
) -> anyhow::Result<()> {
    section("Email credentials block");
    let name = name.unwrap_or(&config.smtp.block_name);
    let creds = EmailServerCredentials::new(sender, sender_password, &config.smtp);
    let path = creds.save(&config.paths.blocks_dir, name)?;
    step_ok(&format!("Saved block {} to {}", accent(name), path.display()));
    println!();
    Ok(())
}

pub fn cmd_trip_train(input: &Path, output: &Path) -> anyhow::Result<()> {
    section("Trip duration model");

    step_run(&format!("Training on {}", input.display()));
    let start = Instant::now();
    let loader = DataLoader::new().with_memory_logging(true);
    let outcome = trip_duration::run(&loader, input, output)?;
    step_done(&format!(
        "{} rows × {} features in {:?}",
        outcome.rows,
        outcome.n_features,
        start.elapsed()
    ));

    println!();
    println!("  RMSE on training set: {:.2} minutes", outcome.rmse);
    println!("  Model saved to {}", outcome.model_path.display());
    println!();
    Ok(())
}

pub fn cmd_prepare(inputs: [&PathBuf; 3], dest: &Path) -> anyhow::Result<()> {
    section("Prepare trip datasets");

    step_run("Vectorizing");
    let start = Instant::now();
    let loader = DataLoader::new().with_memory_logging(true);
    let dv = trip_duration::prepare(
        &loader,
        [inputs[0].as_path(), inputs[1].as_path(), inputs[2].as_path()],
        dest,
    )?;
    step_done(&format!("{} features in {:?}", dv.feature_names().len(), start.elapsed()));

    kv("Output", &dest.display().to_string());
    println!();
    Ok(())
}

pub async fn cmd_rf_train(config: &PipelineConfig, data_path: &Path) -> anyhow::Result<()> {
    section("Random forest training");
    let store = store(config)?;

    step_run("Training");
    let rmse = rf_train::run_train(store.as_ref(), data_path).await?;
    step_done(&format!("experiment {}", rf_train::EXPERIMENT_NAME));

    println!();
    kv("Validation RMSE", &format!("{:.4}", rmse));
    println!();
    Ok(())
}

pub async fn cmd_rf_hpo(config: &PipelineConfig, data_path: &Path, trials: usize) -> anyhow::Result<()> {
    section("Random forest tuning");
    let store = store(config)?;

    step_run(&format!("Running {} trials", trials));
    let start = Instant::now();
    let study = rf_hpo::run_optimization(store.as_ref(), data_path, trials).await?;
    step_done(&format!("{:?}", start.elapsed()));

    println!();
    kv("Trials", &study.trials.len().to_string());
    if let Some(best) = study.best_loss() {
        kv("Best RMSE", &format!("{:.4}", best));
    }
    println!();
    Ok(())
}

pub async fn cmd_rf_register(
    config: &PipelineConfig,
    data_path: &Path,
    top_n: usize,
) -> anyhow::Result<()> {
    section("Random forest registration");
    let store = store(config)?;

    step_run(&format!("Re-training the top {} runs", top_n));
    let outcome = rf_register::run_register_model(store.as_ref(), data_path, top_n).await?;
    step_done(&format!(
        "{} v{}",
        rf_register::MODEL_NAME,
        outcome.model_version.version
    ));

    println!();
    println!("  Model registered from run {}", outcome.run_id);
    println!("  Test RMSE: {:.4}", outcome.test_rmse);
    println!();
    Ok(())
}

pub fn cmd_dag_list() -> anyhow::Result<()> {
    section("DAGs");
    for dag in registered_dags() {
        let schedule = dag.schedule.as_deref().unwrap_or("manual");
        println!(
            "  {:<16} {:<10} {}",
            accent(&dag.dag_id),
            muted(schedule),
            dag.description
        );
        for task in &dag.tasks {
            println!("    {} {}", dim("·"), task.task_id);
        }
    }
    println!();
    Ok(())
}

pub async fn cmd_dag_run(dag_id: &str) -> anyhow::Result<()> {
    section(&format!("DAG {}", dag_id));
    let dag = find_dag(dag_id)?;
    let outputs = dag.run().await?;
    for out in &outputs {
        step_ok(&format!("{} {}", out.task_id, dim(&format!("{:.2}s", out.duration_secs))));
    }
    println!();
    Ok(())
}

pub fn cmd_info(config: &PipelineConfig, data: Option<&Path>) -> anyhow::Result<()> {
    section("Configuration");
    kv("Tracking URI", &config.tracking.tracking_uri);
    kv("SMTP relay", &format!("{}:{}", config.smtp.smtp_server, config.smtp.smtp_port));
    kv("Email block", &config.smtp.block_name);
    kv("Heart data", &config.paths.heart_csv.display().to_string());
    kv("Reference data", &config.paths.reference_csv.display().to_string());
    kv("Trip data", &config.paths.trip_parquet.display().to_string());
    kv("Prepared dir", &config.paths.prepared_dir.display().to_string());
    kv("Artifacts dir", &config.paths.artifacts_dir.display().to_string());

    let Some(path) = data else {
        println!();
        return Ok(());
    };

    section("Data Info");
    let df = DataLoader::new().load_auto(path)?;
    kv("File", &path.display().to_string());
    kv("Rows", &df.height().to_string());
    kv("Columns", &df.width().to_string());
    println!();

    println!("  {:<20} {:<12} {:>6} {:>8}", muted("Column"), muted("Type"), muted("Nulls"), muted("Unique"));
    println!("  {}", dim(&"─".repeat(50)));
    for col in df.get_columns() {
        println!(
            "  {:<20} {:<12} {:>6} {:>8}",
            col.name(),
            muted(&format!("{:?}", col.dtype())),
            col.null_count(),
            col.n_unique().unwrap_or(0)
        );
    }
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "mlops",
            "hyperopt",
            "--trials",
            "3",
            "--tracking-uri",
            "file:///tmp/mlruns",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Hyperopt { trials: 3 }));
        let config = resolve_config(&cli).unwrap();
        assert_eq!(config.tracking.tracking_uri, "file:///tmp/mlruns");
    }

    #[test]
    fn test_parse_dag_run() {
        let cli = Cli::try_parse_from(["mlops", "dag", "run", "orch_hw3"]).unwrap();
        match cli.command {
            Commands::Dag { action: DagAction::Run { dag_id } } => assert_eq!(dag_id, "orch_hw3"),
            _ => panic!("expected dag run"),
        }
    }

    #[test]
    fn test_monitor_requires_recipient() {
        assert!(Cli::try_parse_from(["mlops", "monitor"]).is_err());
    }

    #[test]
    fn test_rf_register_defaults() {
        let cli = Cli::try_parse_from(["mlops", "rf-register"]).unwrap();
        assert!(matches!(cli.command, Commands::RfRegister { data_path: None, top_n: 5 }));
    }
}
