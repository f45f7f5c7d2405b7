//! Ordinary least squares with intercept

use crate::data::CsrMatrix;
use crate::error::{MlopsError, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Relative ridge added to the Gram diagonal so collinear one-hot blocks
/// still factor; small enough to leave well-posed fits unchanged.
const JITTER: f64 = 1e-10;

/// Solve the symmetric positive-definite system `a x = b` by Cholesky.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return None;
    }
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= 0.0 {
                    return None;
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }

    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let s: f64 = (0..i).map(|k| l[[i, k]] * z[k]).sum();
        z[i] = (b[i] - s) / l[[i, i]];
    }
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let s: f64 = (i + 1..n).map(|k| l[[k, i]] * x[k]).sum();
        x[i] = (z[i] - s) / l[[i, i]];
    }
    Some(x)
}

/// Solve `(G + λI) w = b`, growing λ until the factorization succeeds
fn solve_regularized(mut gram: Array2<f64>, rhs: &Array1<f64>) -> Result<Array1<f64>> {
    let n = gram.nrows();
    let mean_diag = (gram.diag().iter().map(|v| v.abs()).sum::<f64>() / n.max(1) as f64).max(1e-12);
    let mut ridge = JITTER * mean_diag;
    for _ in 0..8 {
        for i in 0..n {
            gram[[i, i]] += ridge;
        }
        if let Some(w) = cholesky_solve(&gram, rhs) {
            return Ok(w);
        }
        for i in 0..n {
            gram[[i, i]] -= ridge;
        }
        ridge *= 100.0;
    }
    Err(MlopsError::TrainingError(
        "normal equations are not positive definite".to_string(),
    ))
}

/// Linear regression fitted on the centered normal equations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearRegression {
    pub coefficients: Option<Array1<f64>>,
    pub intercept: f64,
    pub fit_intercept: bool,
}

impl Default for LinearRegression {
    fn default() -> Self {
        Self::new()
    }
}

impl LinearRegression {
    pub fn new() -> Self {
        Self {
            coefficients: None,
            intercept: 0.0,
            fit_intercept: true,
        }
    }

    pub fn with_fit_intercept(mut self, fit_intercept: bool) -> Self {
        self.fit_intercept = fit_intercept;
        self
    }

    fn check_len(n_rows: usize, y: &Array1<f64>) -> Result<()> {
        if n_rows != y.len() {
            return Err(MlopsError::ShapeError {
                expected: format!("{} targets", n_rows),
                actual: format!("{} targets", y.len()),
            });
        }
        if n_rows == 0 {
            return Err(MlopsError::TrainingError("cannot fit on zero rows".to_string()));
        }
        Ok(())
    }

    /// Solve from the raw moments `XᵀX`, `Xᵀy`, column sums and `Σy`
    fn solve_from_moments(
        &mut self,
        mut xtx: Array2<f64>,
        mut xty: Array1<f64>,
        col_sums: Array1<f64>,
        y_sum: f64,
        n: usize,
    ) -> Result<()> {
        let n = n as f64;
        let (x_mean, y_mean) = if self.fit_intercept {
            let x_mean = col_sums / n;
            let y_mean = y_sum / n;
            let outer = x_mean
                .view()
                .insert_axis(Axis(1))
                .dot(&x_mean.view().insert_axis(Axis(0)));
            xtx = xtx - outer * n;
            xty = xty - &x_mean * (n * y_mean);
            (x_mean, y_mean)
        } else {
            (Array1::zeros(xty.len()), 0.0)
        };

        let w = solve_regularized(xtx, &xty)?;
        self.intercept = y_mean - w.dot(&x_mean);
        self.coefficients = Some(w);
        Ok(())
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        Self::check_len(x.nrows(), y)?;
        let xtx = x.t().dot(x);
        let xty = x.t().dot(y);
        let col_sums = x.sum_axis(Axis(0));
        self.solve_from_moments(xtx, xty, col_sums, y.sum(), x.nrows())?;
        Ok(self)
    }

    /// Fit directly on a sparse design matrix without densifying it
    pub fn fit_sparse(&mut self, x: &CsrMatrix, y: &Array1<f64>) -> Result<&mut Self> {
        Self::check_len(x.nrows(), y)?;
        let p = x.ncols();
        let mut xtx = Array2::<f64>::zeros((p, p));
        let mut xty = Array1::<f64>::zeros(p);
        let mut col_sums = Array1::<f64>::zeros(p);

        for r in 0..x.nrows() {
            let entries: Vec<(usize, f64)> = x.row(r).collect();
            for &(i, vi) in &entries {
                xty[i] += vi * y[r];
                col_sums[i] += vi;
                for &(j, vj) in &entries {
                    xtx[[i, j]] += vi * vj;
                }
            }
        }
        self.solve_from_moments(xtx, xty, col_sums, y.sum(), x.nrows())?;
        Ok(self)
    }

    fn coefficients(&self, n_features: usize) -> Result<&Array1<f64>> {
        let w = self.coefficients.as_ref().ok_or(MlopsError::ModelNotFitted)?;
        if w.len() != n_features {
            return Err(MlopsError::ShapeError {
                expected: format!("{} features", w.len()),
                actual: format!("{} features", n_features),
            });
        }
        Ok(w)
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let w = self.coefficients(x.ncols())?;
        Ok(x.dot(w) + self.intercept)
    }

    pub fn predict_sparse(&self, x: &CsrMatrix) -> Result<Array1<f64>> {
        let w = self.coefficients(x.ncols())?;
        Ok(x.dot(w)? + self.intercept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_recovers_exact_line() {
        let x = array![[1.0, 0.0], [2.0, 1.0], [3.0, 0.0], [4.0, 2.0], [5.0, 1.0]];
        let y = x.column(0).mapv(|v| 3.0 * v) + x.column(1).mapv(|v| -2.0 * v) + 7.0;
        let mut lr = LinearRegression::new();
        lr.fit(&x, &y).unwrap();

        let w = lr.coefficients.as_ref().unwrap();
        assert!((w[0] - 3.0).abs() < 1e-6);
        assert!((w[1] + 2.0).abs() < 1e-6);
        assert!((lr.intercept - 7.0).abs() < 1e-6);
    }

    #[test]
    fn test_sparse_matches_dense() {
        let x = array![[1.0, 0.0, 0.5], [0.0, 1.0, 1.5], [1.0, 0.0, 2.0], [0.0, 1.0, 0.0], [1.0, 0.0, 3.0]];
        let y = array![2.0, 4.0, 5.0, 1.0, 7.5];

        let mut dense = LinearRegression::new();
        dense.fit(&x, &y).unwrap();
        let mut sparse = LinearRegression::new();
        sparse.fit_sparse(&CsrMatrix::from_dense(&x), &y).unwrap();

        let a = dense.predict(&x).unwrap();
        let b = sparse.predict_sparse(&CsrMatrix::from_dense(&x)).unwrap();
        for (p, q) in a.iter().zip(b.iter()) {
            assert!((p - q).abs() < 1e-6);
        }
    }

    #[test]
    fn test_collinear_one_hot_still_fits() {
        // the two columns always sum to one, like a one-hot block
        let x = array![[1.0, 0.0], [0.0, 1.0], [1.0, 0.0], [0.0, 1.0]];
        let y = array![10.0, 20.0, 10.0, 20.0];
        let mut lr = LinearRegression::new();
        lr.fit_sparse(&CsrMatrix::from_dense(&x), &y).unwrap();
        let pred = lr.predict(&x).unwrap();
        for (p, t) in pred.iter().zip(y.iter()) {
            assert!((p - t).abs() < 1e-4);
        }
    }

    #[test]
    fn test_unfitted_and_wrong_width() {
        let lr = LinearRegression::new();
        assert!(matches!(lr.predict(&array![[1.0]]), Err(MlopsError::ModelNotFitted)));

        let mut lr = LinearRegression::new();
        lr.fit(&array![[1.0], [2.0]], &array![1.0, 2.0]).unwrap();
        assert!(lr.predict(&array![[1.0, 2.0]]).is_err());
    }
}
