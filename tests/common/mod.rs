//! Fixtures shared by the integration tests

#![allow(dead_code)]

use mlops_pipelines::data::{CsrMatrix, Dataset};
use ndarray::{Array1, Array2};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const HEART_HEADER: &str = "age,sex,cp,trtbps,chol,fbs,restecg,thalachh,exng,oldpeak,slp,caa,thall,output";

/// Synthetic heart-attack table. `output` follows `thalachh` and `exng` so a
/// classifier has something to learn; `age_shift` moves the age distribution.
pub fn write_heart_csv(path: &Path, rows: usize, seed: u64, age_shift: i64) -> PathBuf {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut file = std::fs::File::create(path).unwrap();
    writeln!(file, "{}", HEART_HEADER).unwrap();
    for _ in 0..rows {
        let age: i64 = rng.gen_range(35..75) + age_shift;
        let sex: i64 = rng.gen_range(0..2);
        let cp: i64 = rng.gen_range(0..4);
        let trtbps: i64 = rng.gen_range(100..180);
        let chol: i64 = rng.gen_range(150..350);
        let fbs: i64 = rng.gen_range(0..2);
        let restecg: i64 = rng.gen_range(0..3);
        let thalachh: i64 = rng.gen_range(90..200);
        let exng: i64 = rng.gen_range(0..2);
        let oldpeak: f64 = (rng.gen_range(0..40) as f64) / 10.0;
        let slp: i64 = rng.gen_range(0..3);
        let caa: i64 = rng.gen_range(0..4);
        let thall: i64 = rng.gen_range(1..4);
        let output = i64::from((thalachh > 145 && exng == 0) || thalachh > 175);
        writeln!(
            file,
            "{},{},{},{},{},{},{},{},{},{:.1},{},{},{},{}",
            age, sex, cp, trtbps, chol, fbs, restecg, thalachh, exng, oldpeak, slp, caa, thall, output
        )
        .unwrap();
    }
    path.to_path_buf()
}

/// A small regression dataset where `y = 3 * x0 - 2 * x1 + noise`
pub fn regression_dataset(rows: usize, seed: u64) -> Dataset {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let x = Array2::from_shape_fn((rows, 4), |_| rng.gen_range(0.0..10.0));
    let y = Array1::from_iter(
        x.rows()
            .into_iter()
            .map(|r| 3.0 * r[0] - 2.0 * r[1] + rng.gen_range(-0.5..0.5)),
    );
    let names = (0..4).map(|i| format!("f{}", i)).collect();
    Dataset::new(CsrMatrix::from_dense(&x), y, names).unwrap()
}

/// Write `train.bin`, `val.bin` and `test.bin` under `dir`
pub fn write_prepared(dir: &Path) {
    regression_dataset(80, 1).save(dir.join("train.bin")).unwrap();
    regression_dataset(30, 2).save(dir.join("val.bin")).unwrap();
    regression_dataset(30, 3).save(dir.join("test.bin")).unwrap();
}

/// Trip parquet where the duration is set by the pickup zone:
/// zone `z` takes `5 * z` minutes. One trip per file is longer than an hour.
pub fn write_trip_parquet(path: &Path, rows: usize, seed: u64) -> PathBuf {
    use polars::prelude::*;
    const MINUTE_US: i64 = 60_000_000;

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut pickup = Vec::with_capacity(rows + 1);
    let mut dropoff = Vec::with_capacity(rows + 1);
    let mut pu = Vec::with_capacity(rows + 1);
    let mut dol = Vec::with_capacity(rows + 1);
    let mut distance = Vec::with_capacity(rows + 1);
    for i in 0..rows {
        let zone: i64 = rng.gen_range(1..6);
        let start = i as i64 * 90 * MINUTE_US;
        pickup.push(start);
        dropoff.push(start + 5 * zone * MINUTE_US);
        pu.push(zone);
        dol.push(rng.gen_range(1..4i64));
        distance.push(zone as f64 * 1.3);
    }
    pickup.push(0);
    dropoff.push(90 * MINUTE_US);
    pu.push(1);
    dol.push(1);
    distance.push(30.0);

    let mut df = df!(
        "tpep_pickup_datetime" => &pickup,
        "tpep_dropoff_datetime" => &dropoff,
        "PULocationID" => &pu,
        "DOLocationID" => &dol,
        "trip_distance" => &distance,
    )
    .unwrap();
    for name in ["tpep_pickup_datetime", "tpep_dropoff_datetime"] {
        let cast = df
            .column(name)
            .unwrap()
            .cast(&DataType::Datetime(TimeUnit::Microseconds, None))
            .unwrap();
        df.with_column(cast).unwrap();
    }
    let file = std::fs::File::create(path).unwrap();
    ParquetWriter::new(file).finish(&mut df).unwrap();
    path.to_path_buf()
}
