//! Standard scaling (z-score) on feature matrices

use crate::error::{MlopsError, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Fitted per-column mean and scale: `(x - mean) / scale`.
///
/// Uses the population standard deviation; constant columns get a scale of
/// 1 so they map to zero instead of NaN.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Option<Array1<f64>>,
    scale: Option<Array1<f64>>,
}

impl StandardScaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fit(&mut self, x: &Array2<f64>) -> Result<&mut Self> {
        if x.nrows() == 0 {
            return Err(MlopsError::PreprocessingError(
                "cannot fit a scaler on zero rows".to_string(),
            ));
        }
        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| MlopsError::PreprocessingError("empty input".to_string()))?;
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s == 0.0 || !s.is_finite() { 1.0 } else { s });
        self.mean = Some(mean);
        self.scale = Some(scale);
        Ok(self)
    }

    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let (mean, scale) = match (&self.mean, &self.scale) {
            (Some(m), Some(s)) => (m, s),
            _ => return Err(MlopsError::ModelNotFitted),
        };
        if x.ncols() != mean.len() {
            return Err(MlopsError::ShapeError {
                expected: format!("{} columns", mean.len()),
                actual: format!("{} columns", x.ncols()),
            });
        }
        Ok((x - mean) / scale)
    }

    pub fn fit_transform(&mut self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.fit(x)?;
        self.transform(x)
    }

    pub fn inverse_transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let (mean, scale) = match (&self.mean, &self.scale) {
            (Some(m), Some(s)) => (m, s),
            _ => return Err(MlopsError::ModelNotFitted),
        };
        Ok(x * scale + mean)
    }

    pub fn is_fitted(&self) -> bool {
        self.mean.is_some()
    }

    pub fn mean(&self) -> Option<&Array1<f64>> {
        self.mean.as_ref()
    }

    pub fn scale(&self) -> Option<&Array1<f64>> {
        self.scale.as_ref()
    }
}

/// Scale `x` with `scaler`, or fit a fresh scaler when none is given.
///
/// Returns the scaled matrix and the scaler that produced it.
pub fn scale_data(
    x: &Array2<f64>,
    scaler: Option<&StandardScaler>,
) -> Result<(Array2<f64>, StandardScaler)> {
    match scaler {
        Some(s) => Ok((s.transform(x)?, s.clone())),
        None => {
            let mut s = StandardScaler::new();
            let scaled = s.fit_transform(x)?;
            Ok((scaled, s))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_zero_mean_unit_variance() {
        let x = array![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0], [4.0, 40.0]];
        let mut scaler = StandardScaler::new();
        let scaled = scaler.fit_transform(&x).unwrap();

        for col in scaled.columns() {
            assert!(col.mean().unwrap().abs() < 1e-12);
            assert!((col.std(0.0) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_constant_column() {
        let x = array![[5.0], [5.0], [5.0]];
        let (scaled, scaler) = scale_data(&x, None).unwrap();
        assert_eq!(scaler.scale().unwrap()[0], 1.0);
        assert!(scaled.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_scale_data_reuses_given_scaler() {
        let train = array![[0.0], [2.0]];
        let (_, scaler) = scale_data(&train, None).unwrap();
        let (scaled, _) = scale_data(&array![[4.0]], Some(&scaler)).unwrap();
        assert_eq!(scaled[[0, 0]], 3.0);
    }

    #[test]
    fn test_inverse_transform() {
        let x = array![[1.0, -3.0], [2.0, 0.5], [7.0, 9.0]];
        let mut scaler = StandardScaler::new();
        let scaled = scaler.fit_transform(&x).unwrap();
        let restored = scaler.inverse_transform(&scaled).unwrap();
        for (a, b) in x.iter().zip(restored.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn test_unfitted_and_wrong_width() {
        let scaler = StandardScaler::new();
        assert!(matches!(
            scaler.transform(&array![[1.0]]),
            Err(MlopsError::ModelNotFitted)
        ));

        let (_, fitted) = scale_data(&array![[1.0, 2.0], [3.0, 4.0]], None).unwrap();
        assert!(fitted.transform(&array![[1.0]]).is_err());
    }
}
