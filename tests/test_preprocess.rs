//! Integration test: heart-attack table deduplication

use mlops_pipelines::data::{drop_duplicates, DataLoader};
use polars::prelude::*;
use std::io::Write;

const COLUMNS: [&str; 14] = [
    "age", "sex", "cp", "trtbps", "chol", "fbs", "restecg", "thalachh", "exng", "oldpeak", "slp",
    "caa", "thall", "output",
];

fn heart_rows() -> DataFrame {
    df!(
        "age" => &[38i64, 38, 67, 67],
        "sex" => &[1i64, 1, 1, 1],
        "cp" => &[2i64, 2, 0, 0],
        "trtbps" => &[138i64, 138, 160, 120],
        "chol" => &[175i64, 175, 286, 229],
        "fbs" => &[0i64, 0, 0, 0],
        "restecg" => &[1i64, 1, 0, 0],
        "thalachh" => &[173i64, 173, 108, 129],
        "exng" => &[0i64, 0, 1, 1],
        "oldpeak" => &[0.0, 0.0, 1.5, 2.6],
        "slp" => &[2i64, 2, 1, 1],
        "caa" => &[4i64, 4, 3, 2],
        "thall" => &[2i64, 2, 2, 3],
        "output" => &[1i64, 1, 0, 0],
    )
    .unwrap()
}

fn expected_rows() -> DataFrame {
    df!(
        "age" => &[38i64, 67, 67],
        "sex" => &[1i64, 1, 1],
        "cp" => &[2i64, 0, 0],
        "trtbps" => &[138i64, 160, 120],
        "chol" => &[175i64, 286, 229],
        "fbs" => &[0i64, 0, 0],
        "restecg" => &[1i64, 0, 0],
        "thalachh" => &[173i64, 108, 129],
        "exng" => &[0i64, 1, 1],
        "oldpeak" => &[0.0, 1.5, 2.6],
        "slp" => &[2i64, 1, 1],
        "caa" => &[4i64, 3, 2],
        "thall" => &[2i64, 2, 3],
        "output" => &[1i64, 0, 0],
    )
    .unwrap()
}

#[test]
fn test_duplicate_heart_row_removed() {
    let deduped = drop_duplicates(&heart_rows()).unwrap();
    assert_eq!(deduped.height(), 3);
    let names: Vec<String> = deduped.get_column_names().iter().map(|s| s.to_string()).collect();
    assert_eq!(names, COLUMNS);
    assert!(deduped.equals(&expected_rows()));
}

#[test]
fn test_dedup_is_idempotent() {
    let once = drop_duplicates(&heart_rows()).unwrap();
    let twice = drop_duplicates(&once).unwrap();
    assert!(once.equals(&twice));
}

#[test]
fn test_dedup_after_csv_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("heart.csv");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "{}", COLUMNS.join(",")).unwrap();
    writeln!(file, "38,1,2,138,175,0,1,173,0,0.0,2,4,2,1").unwrap();
    writeln!(file, "38,1,2,138,175,0,1,173,0,0.0,2,4,2,1").unwrap();
    writeln!(file, "67,1,0,160,286,0,0,108,1,1.5,1,3,2,0").unwrap();
    writeln!(file, "67,1,0,120,229,0,0,129,1,2.6,1,2,3,0").unwrap();
    drop(file);

    let df = DataLoader::new().with_memory_logging(false).load_csv(&path).unwrap();
    let deduped = drop_duplicates(&df).unwrap();
    assert_eq!(deduped.height(), 3);
    let chol: Vec<i64> = deduped.column("chol").unwrap().i64().unwrap().into_no_null_iter().collect();
    assert_eq!(chol, vec![175, 286, 229]);
}

#[test]
fn test_dedup_keeps_rows_differing_in_late_decimals() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("precise.csv");
    std::fs::write(
        &path,
        "id,value\n1,0.123456789012\n1,0.123456789013\n1,0.123456789012\n",
    )
    .unwrap();

    let df = DataLoader::new().with_memory_logging(false).load_csv(&path).unwrap();
    let deduped = drop_duplicates(&df).unwrap();
    let values: Vec<f64> = deduped.column("value").unwrap().f64().unwrap().into_no_null_iter().collect();
    assert_eq!(values, vec![0.123456789012, 0.123456789013]);
}
