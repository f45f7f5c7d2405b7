//! Data drift detection
//!
//! Each mapped column gets a two-sample test picked from its type, its
//! cardinality and the reference size. The dataset drifts when the share of
//! drifted columns reaches the configured drift share.

mod report;
mod stats;

pub use report::{ColumnDriftResult, ColumnKind, ColumnMapping, DatasetDriftMetric, DatasetDriftResult};
pub use stats::{
    binned_percents, category_percents, chi2_sf, chi_square_p_value, jensen_shannon_distance, ks_2samp, n_unique,
    normal_cdf, wasserstein_distance, z_test_p_value, ColumnSample, StatTest, StatTestResult,
};
