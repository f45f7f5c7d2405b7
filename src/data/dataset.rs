//! Feature matrices persisted between pipeline stages

use super::sparse::CsrMatrix;
use crate::error::{MlopsError, Result};
use ndarray::Array1;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::info;

/// File names written by the prepare stage, in train/val/test order
pub const DATASET_FILES: [&str; 3] = ["train.bin", "val.bin", "test.bin"];

/// A feature matrix with its targets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub x: CsrMatrix,
    pub y: Array1<f64>,
    pub feature_names: Vec<String>,
}

impl Dataset {
    pub fn new(x: CsrMatrix, y: Array1<f64>, feature_names: Vec<String>) -> Result<Self> {
        if x.nrows() != y.len() {
            return Err(MlopsError::ShapeError {
                expected: format!("{} targets", x.nrows()),
                actual: format!("{} targets", y.len()),
            });
        }
        Ok(Self { x, y, feature_names })
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_bin(path, self)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let ds: Dataset = read_bin(path.as_ref())?;
        info!(
            path = %path.as_ref().display(),
            rows = ds.x.nrows(),
            cols = ds.x.ncols(),
            "loaded dataset"
        );
        Ok(ds)
    }
}

/// Serialize any value to a bincode file, creating parent directories
pub fn write_bin<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let writer = BufWriter::new(File::create(path)?);
    bincode::serialize_into(writer, value)?;
    Ok(())
}

/// Read a value written by [`write_bin`]
pub fn read_bin<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| MlopsError::DataError(format!("cannot open {}: {}", path.display(), e)))?;
    Ok(bincode::deserialize_from(BufReader::new(file))?)
}
