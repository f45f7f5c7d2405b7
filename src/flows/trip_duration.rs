//! Trip-duration baseline and dataset preparation

use crate::data::{
    column_to_f64, prepare_trip_datasets, read_trip_data, trip_features, DataLoader,
    DictVectorizer, TRIP_CATEGORICAL, TRIP_TARGET,
};
use crate::error::Result;
use crate::training::{root_mean_squared_error, save_model, LinearRegression};
use ndarray::Array1;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct TripModelOutcome {
    pub rows: usize,
    pub n_features: usize,
    /// Training RMSE in minutes
    pub rmse: f64,
    pub model_path: PathBuf,
}

/// Fit a linear model on one-hot pickup/dropoff zones and save the
/// `(vectorizer, model)` bundle
pub fn run(loader: &DataLoader, input: &Path, model_output: &Path) -> Result<TripModelOutcome> {
    let df = read_trip_data(loader, input)?;
    let records = trip_features(&df, &TRIP_CATEGORICAL, &[])?;

    let mut dv = DictVectorizer::new();
    let x_train = dv.fit_transform(&records)?;
    let y_train = Array1::from(column_to_f64(&df, TRIP_TARGET)?);
    info!(rows = x_train.nrows(), features = x_train.ncols(), nnz = x_train.nnz(), "Vectorized trips");

    let mut lr = LinearRegression::new();
    lr.fit_sparse(&x_train, &y_train)?;
    let y_pred = lr.predict_sparse(&x_train)?;
    let rmse = root_mean_squared_error(&y_train, &y_pred)?;

    save_model(&(dv, lr), model_output)?;
    Ok(TripModelOutcome {
        rows: x_train.nrows(),
        n_features: x_train.ncols(),
        rmse,
        model_path: model_output.to_path_buf(),
    })
}

/// Vectorize three monthly files into `train.bin`, `val.bin` and `test.bin`
pub fn prepare(loader: &DataLoader, inputs: [&Path; 3], out_dir: &Path) -> Result<DictVectorizer> {
    let dv = prepare_trip_datasets(loader, inputs, out_dir)?;
    info!(dest = %out_dir.display(), features = dv.feature_names().len(), "Prepared trip datasets");
    Ok(dv)
}
