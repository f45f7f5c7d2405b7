//! mlops-pipelines - single-purpose ML pipeline flows
//!
//! This crate provides:
//! - Tabular loading, deduplication and train/test splitting
//! - SVM, random forest and linear regression estimators
//! - Hyperparameter optimization (random and TPE samplers)
//! - An experiment-tracking client with a model registry
//! - Data drift reports and email notifications
//!
//! # Modules
//!
//! ## Core
//! - [`data`] - Loaders, dedup, splits, sparse features
//! - [`preprocessing`] - Standard scaling
//! - [`training`] - Estimators and model persistence
//! - [`optimizer`] - Search spaces, samplers, studies
//!
//! ## Services
//! - [`tracking`] - Runs, metrics, artifacts and registered models
//! - [`drift`] - Column drift tests and dataset drift
//! - [`notify`] - SMTP credentials blocks and notifiers
//!
//! ## Entry points
//! - [`flows`] - The pipelines themselves
//! - [`orchestration`] - Bash-task DAGs
//! - [`cli`] - Command-line interface

// Core error handling and configuration
pub mod config;
pub mod error;

// Core ML modules
pub mod data;
pub mod memory;
pub mod optimizer;
pub mod preprocessing;
pub mod training;

// Services
pub mod drift;
pub mod notify;
pub mod tracking;

// Entry points
pub mod cli;
pub mod flows;
pub mod orchestration;

pub use error::{MlopsError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{DataPaths, PipelineConfig, SmtpSettings, SmtpType, TrackingSettings};
    pub use crate::error::{MlopsError, Result};

    pub use crate::data::{drop_duplicates, split_x_y, train_test_split, DataLoader, Dataset, DictVectorizer};
    pub use crate::preprocessing::{scale_data, StandardScaler};
    pub use crate::training::{LinearRegression, RandomForest, SvmClassifier};
    pub use crate::optimizer::{HyperOpt, SearchSpace, Study};

    pub use crate::tracking::{open_store, FileStore, MlflowClient, RunScope, TrackingStore};
    pub use crate::drift::{ColumnMapping, DatasetDriftMetric, DatasetDriftResult};
    pub use crate::notify::{EmailMessage, MemoryNotifier, Notifier, SmtpNotifier};
}
