//! Feature/target extraction and train/test splitting

use crate::error::{MlopsError, Result};
use ndarray::{Array1, Array2, Axis};
use polars::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Read a column as `f64`; nulls become `NaN`.
pub fn column_to_f64(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let column = df
        .column(name)
        .map_err(|_| MlopsError::FeatureNotFound(name.to_string()))?;
    let cast = column.cast(&DataType::Float64)?;
    Ok(cast
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}

/// Every column but the last becomes a feature; the last column is the target.
pub fn split_x_y(df: &DataFrame) -> Result<(Array2<f64>, Array1<f64>)> {
    if df.width() < 2 {
        return Err(MlopsError::ShapeError {
            expected: "at least 2 columns".to_string(),
            actual: format!("{} columns", df.width()),
        });
    }
    let names: Vec<String> = df.get_column_names().iter().map(|s| s.to_string()).collect();
    let (features, target) = names.split_at(names.len() - 1);

    let cols = features
        .iter()
        .map(|name| column_to_f64(df, name))
        .collect::<Result<Vec<_>>>()?;
    let x = Array2::from_shape_fn((df.height(), cols.len()), |(r, c)| cols[c][r]);
    let y = Array1::from(column_to_f64(df, &target[0])?);
    Ok((x, y))
}

/// Result of [`train_test_split`]
#[derive(Debug, Clone)]
pub struct TrainTestSplit {
    pub x_train: Array2<f64>,
    pub x_test: Array2<f64>,
    pub y_train: Array1<f64>,
    pub y_test: Array1<f64>,
}

/// Shuffle rows with a seeded RNG and hold out `ceil(n * test_size)` rows.
pub fn train_test_split(
    x: &Array2<f64>,
    y: &Array1<f64>,
    test_size: f64,
    seed: u64,
) -> Result<TrainTestSplit> {
    let n = x.nrows();
    if n != y.len() {
        return Err(MlopsError::ShapeError {
            expected: format!("{} targets", n),
            actual: format!("{} targets", y.len()),
        });
    }
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(MlopsError::invalid_param("test_size", test_size, "must be in (0, 1)"));
    }
    let n_test = (n as f64 * test_size).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(MlopsError::DataError(format!(
            "cannot split {} rows with test_size {}",
            n, test_size
        )));
    }

    let mut idx: Vec<usize> = (0..n).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    idx.shuffle(&mut rng);
    let (test_idx, train_idx) = idx.split_at(n_test);

    Ok(TrainTestSplit {
        x_train: x.select(Axis(0), train_idx),
        x_test: x.select(Axis(0), test_idx),
        y_train: y.select(Axis(0), train_idx),
        y_test: y.select(Axis(0), test_idx),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_split_x_y_takes_last_column_as_target() {
        let df = df! {
            "age" => &[38, 67],
            "chol" => &[175.0, 286.0],
            "output" => &[1, 0],
        }
        .unwrap();
        let (x, y) = split_x_y(&df).unwrap();
        assert_eq!(x, array![[38.0, 175.0], [67.0, 286.0]]);
        assert_eq!(y, array![1.0, 0.0]);
    }

    #[test]
    fn test_single_column_is_rejected() {
        let df = df! { "output" => &[1, 0] }.unwrap();
        assert!(split_x_y(&df).is_err());
    }

    #[test]
    fn test_split_sizes_and_determinism() {
        let x = Array2::from_shape_fn((10, 2), |(r, c)| (r * 2 + c) as f64);
        let y = Array1::from_iter((0..10).map(|v| v as f64));

        let a = train_test_split(&x, &y, 0.2, 0).unwrap();
        let b = train_test_split(&x, &y, 0.2, 0).unwrap();
        assert_eq!(a.x_test.nrows(), 2);
        assert_eq!(a.x_train.nrows(), 8);
        assert_eq!(a.y_test, b.y_test);

        // rows stay aligned with their targets
        for (row, target) in a.x_train.rows().into_iter().zip(a.y_train.iter()) {
            assert_eq!(row[0], target * 2.0);
        }
    }

    #[test]
    fn test_invalid_test_size() {
        let x = Array2::zeros((4, 1));
        let y = Array1::zeros(4);
        assert!(train_test_split(&x, &y, 0.0, 0).is_err());
        assert!(train_test_split(&x, &y, 1.5, 0).is_err());
    }

    #[test]
    fn test_empty_input() {
        let x = Array2::zeros((0, 1));
        let y = Array1::zeros(0);
        assert!(train_test_split(&x, &y, 0.2, 0).is_err());
    }
}
