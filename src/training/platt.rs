//! Sigmoid calibration of decision values

use crate::error::{MlopsError, Result};
use serde::{Deserialize, Serialize};

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// `P(y = 1 | f) = 1 / (1 + exp(a * f + b))` fitted by Newton's method on
/// Platt's smoothed targets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlattScaling {
    pub a: f64,
    pub b: f64,
}

impl PlattScaling {
    const MAX_ITER: usize = 100;
    const TOL: f64 = 1e-9;

    /// Fit on raw decision values and boolean labels
    pub fn fit(decision: &[f64], positive: &[bool]) -> Result<Self> {
        if decision.len() != positive.len() || decision.is_empty() {
            return Err(MlopsError::TrainingError(
                "platt scaling needs one label per decision value".to_string(),
            ));
        }
        let n_pos = positive.iter().filter(|p| **p).count() as f64;
        let n_neg = positive.len() as f64 - n_pos;
        let hi = (n_pos + 1.0) / (n_pos + 2.0);
        let lo = 1.0 / (n_neg + 2.0);

        let mut a = 0.0;
        let mut b = ((n_neg + 1.0) / (n_pos + 1.0)).ln();

        for _ in 0..Self::MAX_ITER {
            let (mut ga, mut gb, mut haa, mut hab, mut hbb) = (0.0, 0.0, 1e-12, 0.0, 1e-12);
            for (&f, &pos) in decision.iter().zip(positive) {
                let t = if pos { hi } else { lo };
                // p = P(y = 1) under the current (a, b)
                let p = sigmoid(-(a * f + b));
                let d1 = t - p;
                let d2 = p * (1.0 - p);
                ga += f * d1;
                gb += d1;
                haa += f * f * d2;
                hab += f * d2;
                hbb += d2;
            }
            let det = haa * hbb - hab * hab;
            if det.abs() < 1e-15 {
                break;
            }
            let da = (hbb * ga - hab * gb) / det;
            let db = (haa * gb - hab * ga) / det;
            a -= da;
            b -= db;
            if da.abs() < Self::TOL && db.abs() < Self::TOL {
                break;
            }
        }
        Ok(Self { a, b })
    }

    /// Probability of the positive class for one decision value
    pub fn probability(&self, f: f64) -> f64 {
        sigmoid(-(self.a * f + self.b))
    }
}
