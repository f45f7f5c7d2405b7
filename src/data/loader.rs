//! File readers with memory logging

use crate::error::{MlopsError, Result};
use crate::memory::MemoryProbe;
use polars::prelude::*;
use std::fs::File;
use std::path::Path;
use tracing::{debug, info};

/// Reads CSV and Parquet tables into a `DataFrame`.
///
/// Every load logs process RSS before and after the read and the memory the
/// system still had available beforehand.
pub struct DataLoader {
    infer_schema_length: usize,
    log_memory: bool,
}

impl Default for DataLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DataLoader {
    pub fn new() -> Self {
        Self {
            infer_schema_length: 100,
            log_memory: true,
        }
    }

    /// Rows scanned when inferring CSV column types
    pub fn with_infer_schema_length(mut self, n: usize) -> Self {
        self.infer_schema_length = n.max(1);
        self
    }

    /// Turn memory logging on or off
    pub fn with_memory_logging(mut self, enabled: bool) -> Self {
        self.log_memory = enabled;
        self
    }

    fn open(path: &Path) -> Result<File> {
        File::open(path)
            .map_err(|e| MlopsError::DataError(format!("cannot open {}: {}", path.display(), e)))
    }

    fn observed<F>(&self, path: &Path, read: F) -> Result<DataFrame>
    where
        F: FnOnce(File) -> PolarsResult<DataFrame>,
    {
        let mut probe = self.log_memory.then(MemoryProbe::new);
        if let Some(p) = probe.as_mut() {
            let snap = p.snapshot();
            info!(
                path = %path.display(),
                available_gb = format!("{:.2}", snap.available_gb),
                rss_mb = format!("{:.2}", snap.process_rss_mb),
                "loading table"
            );
        }

        let file = Self::open(path)?;
        let df = read(file)?;

        if let Some(p) = probe.as_mut() {
            let snap = p.snapshot();
            info!(
                path = %path.display(),
                rows = df.height(),
                cols = df.width(),
                rss_mb = format!("{:.2}", snap.process_rss_mb),
                "loaded table"
            );
        } else {
            debug!(path = %path.display(), rows = df.height(), "loaded table");
        }
        Ok(df)
    }

    /// Load a CSV file with a header row
    pub fn load_csv(&self, path: impl AsRef<Path>) -> Result<DataFrame> {
        let infer = self.infer_schema_length;
        self.observed(path.as_ref(), |file| {
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(Some(infer))
                .into_reader_with_file_handle(file)
                .finish()
        })
    }

    /// Load a Parquet file
    pub fn load_parquet(&self, path: impl AsRef<Path>) -> Result<DataFrame> {
        self.observed(path.as_ref(), |file| ParquetReader::new(file).finish())
    }

    /// Pick the reader from the file extension; unknown extensions read as CSV
    pub fn load_auto(&self, path: impl AsRef<Path>) -> Result<DataFrame> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "parquet" | "pq" => self.load_parquet(path),
            _ => self.load_csv(path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_csv() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "a,b,target").unwrap();
        writeln!(file, "1,2.5,0").unwrap();
        writeln!(file, "3,4.5,1").unwrap();

        let df = DataLoader::new().load_auto(file.path()).unwrap();
        assert_eq!(df.shape(), (2, 3));
        let names: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
        assert_eq!(names, vec!["a", "b", "target"]);
    }

    #[test]
    fn test_parquet_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.parquet");
        let mut df = df! {
            "x" => &[1i64, 2, 3],
            "y" => &["a", "b", "c"],
        }
        .unwrap();
        let file = File::create(&path).unwrap();
        ParquetWriter::new(file).finish(&mut df).unwrap();

        let loaded = DataLoader::new().with_memory_logging(false).load_auto(&path).unwrap();
        assert!(loaded.equals(&df));
    }

    #[test]
    fn test_missing_file() {
        let err = DataLoader::new().load_csv("/no/such/heart.csv").unwrap_err();
        assert!(matches!(err, MlopsError::DataError(_)));
    }
}
