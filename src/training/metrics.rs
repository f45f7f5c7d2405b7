//! Evaluation metrics

use crate::error::{MlopsError, Result};
use ndarray::Array1;

fn check(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Result<()> {
    if y_true.len() != y_pred.len() {
        return Err(MlopsError::ShapeError {
            expected: format!("{} predictions", y_true.len()),
            actual: format!("{} predictions", y_pred.len()),
        });
    }
    if y_true.is_empty() {
        return Err(MlopsError::EmptyResult("no samples to score".to_string()));
    }
    Ok(())
}

/// Fraction of exactly matching labels
pub fn accuracy_score(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Result<f64> {
    check(y_true, y_pred)?;
    let hits = y_true
        .iter()
        .zip(y_pred.iter())
        .filter(|(t, p)| (*t - *p).abs() < 1e-9)
        .count();
    Ok(hits as f64 / y_true.len() as f64)
}

pub fn mean_squared_error(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Result<f64> {
    check(y_true, y_pred)?;
    let sse: f64 = y_true.iter().zip(y_pred.iter()).map(|(t, p)| (t - p).powi(2)).sum();
    Ok(sse / y_true.len() as f64)
}

pub fn root_mean_squared_error(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Result<f64> {
    Ok(mean_squared_error(y_true, y_pred)?.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_accuracy() {
        let acc = accuracy_score(&array![1.0, 0.0, 1.0, 1.0], &array![1.0, 1.0, 1.0, 0.0]).unwrap();
        assert_eq!(acc, 0.5);
    }

    #[test]
    fn test_rmse() {
        let rmse = root_mean_squared_error(&array![0.0, 0.0], &array![3.0, 4.0]).unwrap();
        assert!((rmse - 12.5f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_length_mismatch_and_empty() {
        assert!(mean_squared_error(&array![1.0], &array![1.0, 2.0]).is_err());
        assert!(accuracy_score(&Array1::zeros(0), &Array1::zeros(0)).is_err());
    }
}
