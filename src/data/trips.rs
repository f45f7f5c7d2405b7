//! Taxi trip records: duration target and location features

use super::dataset::{write_bin, Dataset, DATASET_FILES};
use super::loader::DataLoader;
use super::split::column_to_f64;
use super::vectorizer::{DictVectorizer, FeatureRecord, FeatureValue};
use crate::error::{MlopsError, Result};
use ndarray::Array1;
use polars::prelude::*;
use std::path::Path;
use tracing::info;

/// Location columns one-hot encoded by the vectorizer
pub const TRIP_CATEGORICAL: [&str; 2] = ["PULocationID", "DOLocationID"];
/// Regression target, trip duration in minutes
pub const TRIP_TARGET: &str = "duration";

const PICKUP: &str = "tpep_pickup_datetime";
const DROPOFF: &str = "tpep_dropoff_datetime";
const MIN_MINUTES: f64 = 1.0;
const MAX_MINUTES: f64 = 60.0;

fn epoch_ticks(df: &DataFrame, name: &str) -> Result<(Vec<Option<i64>>, f64)> {
    let column = df
        .column(name)
        .map_err(|_| MlopsError::FeatureNotFound(name.to_string()))?;
    let ticks_per_minute = match column.dtype() {
        DataType::Datetime(TimeUnit::Nanoseconds, _) => 60e9,
        DataType::Datetime(TimeUnit::Microseconds, _) => 60e6,
        DataType::Datetime(TimeUnit::Milliseconds, _) => 60e3,
        other => {
            return Err(MlopsError::DataError(format!(
                "{} must be a datetime column, found {}",
                name, other
            )))
        }
    };
    let ticks = column.cast(&DataType::Int64)?.i64()?.into_iter().collect();
    Ok((ticks, ticks_per_minute))
}

/// Add the `duration` column, keep trips of 1 to 60 minutes and turn the
/// location ids into strings (missing ids become `"-1"`).
pub fn trip_durations(df: &DataFrame) -> Result<DataFrame> {
    let (pickup, per_minute) = epoch_ticks(df, PICKUP)?;
    let (dropoff, drop_per_minute) = epoch_ticks(df, DROPOFF)?;
    if per_minute != drop_per_minute {
        return Err(MlopsError::DataError(format!(
            "{} and {} use different time units",
            PICKUP, DROPOFF
        )));
    }

    let duration: Vec<Option<f64>> = pickup
        .iter()
        .zip(dropoff.iter())
        .map(|(p, d)| match (p, d) {
            (Some(p), Some(d)) => Some((d - p) as f64 / per_minute),
            _ => None,
        })
        .collect();
    let keep: Vec<bool> = duration
        .iter()
        .map(|d| matches!(d, Some(m) if (MIN_MINUTES..=MAX_MINUTES).contains(m)))
        .collect();

    let mut out = df.clone();
    out.with_column(Series::new(TRIP_TARGET.into(), duration))?;
    let mut out = out.filter(&BooleanChunked::from_slice("keep".into(), &keep))?;

    for name in TRIP_CATEGORICAL {
        let column = out
            .column(name)
            .map_err(|_| MlopsError::FeatureNotFound(name.to_string()))?;
        let ids: Vec<String> = column
            .cast(&DataType::Float64)?
            .f64()?
            .into_iter()
            .map(|v| (v.unwrap_or(-1.0) as i64).to_string())
            .collect();
        out.with_column(Series::new(name.into(), ids))?;
    }

    info!(
        rows_in = df.height(),
        rows_out = out.height(),
        "computed trip durations"
    );
    Ok(out)
}

/// Load a monthly trip parquet file and derive its duration target
pub fn read_trip_data(loader: &DataLoader, path: impl AsRef<Path>) -> Result<DataFrame> {
    let df = loader.load_parquet(path)?;
    trip_durations(&df)
}

/// Build vectorizer records from categorical and numeric columns
pub fn trip_features(
    df: &DataFrame,
    categorical: &[&str],
    numerical: &[&str],
) -> Result<Vec<FeatureRecord>> {
    let mut records = vec![FeatureRecord::new(); df.height()];

    for &name in categorical {
        let column = df
            .column(name)
            .map_err(|_| MlopsError::FeatureNotFound(name.to_string()))?
            .cast(&DataType::String)?;
        for (record, value) in records.iter_mut().zip(column.str()?.into_iter()) {
            if let Some(v) = value {
                record.insert(name.to_string(), FeatureValue::Str(v.to_string()));
            }
        }
    }
    for &name in numerical {
        for (record, value) in records.iter_mut().zip(column_to_f64(df, name)?) {
            if !value.is_nan() {
                record.insert(name.to_string(), FeatureValue::Num(value));
            }
        }
    }
    Ok(records)
}

fn numeric_trip_columns(df: &DataFrame) -> Vec<&'static str> {
    ["trip_distance"]
        .into_iter()
        .filter(|c| df.column(c).is_ok())
        .collect()
}

/// Read three monthly files, fit the vectorizer on the first and write
/// `train.bin`, `val.bin`, `test.bin` and `dv.bin` into `out_dir`.
pub fn prepare_trip_datasets(
    loader: &DataLoader,
    inputs: [&Path; 3],
    out_dir: impl AsRef<Path>,
) -> Result<DictVectorizer> {
    let out_dir = out_dir.as_ref();
    std::fs::create_dir_all(out_dir)?;

    let frames = inputs
        .iter()
        .map(|p| read_trip_data(loader, p))
        .collect::<Result<Vec<_>>>()?;
    let numerical = numeric_trip_columns(&frames[0]);

    let mut dv = DictVectorizer::new();
    for (i, (df, file)) in frames.iter().zip(DATASET_FILES).enumerate() {
        let records = trip_features(df, &TRIP_CATEGORICAL, &numerical)?;
        let x = if i == 0 {
            dv.fit_transform(&records)?
        } else {
            dv.transform(&records)?
        };
        let y = Array1::from(column_to_f64(df, TRIP_TARGET)?);
        let dataset = Dataset::new(x, y, dv.feature_names().to_vec())?;
        dataset.save(out_dir.join(file))?;
        info!(file, rows = dataset.len(), "wrote dataset");
    }
    write_bin(out_dir.join("dv.bin"), &dv)?;
    Ok(dv)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    const MINUTE_US: i64 = 60_000_000;

    /// Trips of 0.5, 10, 61 and 30 minutes; the third has no pickup zone
    pub(crate) fn trip_frame() -> DataFrame {
        let pickup = [0i64, 0, 0, 0];
        let dropoff = [MINUTE_US / 2, 10 * MINUTE_US, 61 * MINUTE_US, 30 * MINUTE_US];
        let mut df = df! {
            PICKUP => &pickup,
            DROPOFF => &dropoff,
            "PULocationID" => &[Some(1i64), Some(43), None, Some(161)],
            "DOLocationID" => &[Some(2i64), None, Some(7), Some(236)],
            "trip_distance" => &[0.1, 2.0, 15.0, 6.5],
        }
        .unwrap();
        for name in [PICKUP, DROPOFF] {
            let cast = df
                .column(name)
                .unwrap()
                .cast(&DataType::Datetime(TimeUnit::Microseconds, None))
                .unwrap();
            df.with_column(cast).unwrap();
        }
        df
    }

    #[test]
    fn test_duration_filter() {
        let out = trip_durations(&trip_frame()).unwrap();
        assert_eq!(out.height(), 2);
        let minutes = column_to_f64(&out, TRIP_TARGET).unwrap();
        assert_eq!(minutes, vec![10.0, 30.0]);
    }

    #[test]
    fn test_missing_location_becomes_minus_one() {
        let out = trip_durations(&trip_frame()).unwrap();
        let dropoff: Vec<Option<&str>> = out
            .column("DOLocationID")
            .unwrap()
            .str()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(dropoff, vec![Some("-1"), Some("236")]);
    }

    #[test]
    fn test_non_datetime_column_is_rejected() {
        let df = df! {
            PICKUP => &[1i64],
            DROPOFF => &[2i64],
            "PULocationID" => &[1i64],
            "DOLocationID" => &[1i64],
        }
        .unwrap();
        assert!(trip_durations(&df).is_err());
    }

    #[test]
    fn test_trip_features() {
        let out = trip_durations(&trip_frame()).unwrap();
        let records = trip_features(&out, &TRIP_CATEGORICAL, &["trip_distance"]).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["PULocationID"], FeatureValue::Str("43".into()));
        assert_eq!(records[1]["trip_distance"], FeatureValue::Num(6.5));
    }
}
