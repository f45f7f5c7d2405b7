//! Support vector classifier trained with SMO (Sequential Minimal Optimization)

use super::platt::PlattScaling;
use crate::error::{MlopsError, Result};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Beyond this many rows the dense kernel matrix is refused.
const MAX_KERNEL_MATRIX_SAMPLES: usize = 10_000;

/// Kernel function family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kernel {
    /// `x · y`
    Linear,
    /// `exp(-γ ||x - y||²)`
    Rbf,
    /// `(γ x · y + r)^d`
    Poly,
    /// `tanh(γ x · y + r)`
    Sigmoid,
}

impl FromStr for Kernel {
    type Err = MlopsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "linear" => Ok(Kernel::Linear),
            "rbf" => Ok(Kernel::Rbf),
            "poly" => Ok(Kernel::Poly),
            "sigmoid" => Ok(Kernel::Sigmoid),
            other => Err(MlopsError::invalid_param(
                "kernel",
                other,
                "expected linear, rbf, poly or sigmoid",
            )),
        }
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kernel::Linear => "linear",
            Kernel::Rbf => "rbf",
            Kernel::Poly => "poly",
            Kernel::Sigmoid => "sigmoid",
        };
        f.write_str(name)
    }
}

/// Kernel coefficient
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Gamma {
    /// `1 / (n_features * X.var())`
    Scale,
    /// `1 / n_features`
    Auto,
    Value(f64),
}

impl FromStr for Gamma {
    type Err = MlopsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "scale" => Ok(Gamma::Scale),
            "auto" => Ok(Gamma::Auto),
            other => other
                .parse::<f64>()
                .ok()
                .filter(|g| *g > 0.0)
                .map(Gamma::Value)
                .ok_or_else(|| {
                    MlopsError::invalid_param("gamma", other, "expected scale, auto or a positive number")
                }),
        }
    }
}

impl fmt::Display for Gamma {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gamma::Scale => f.write_str("scale"),
            Gamma::Auto => f.write_str("auto"),
            Gamma::Value(g) => write!(f, "{}", g),
        }
    }
}

impl Gamma {
    fn resolve(&self, x: &Array2<f64>) -> f64 {
        let n_features = x.ncols().max(1) as f64;
        match self {
            Gamma::Scale => {
                let var = x.var(0.0);
                if var > 0.0 {
                    1.0 / (n_features * var)
                } else {
                    1.0
                }
            }
            Gamma::Auto => 1.0 / n_features,
            Gamma::Value(g) => *g,
        }
    }
}

/// Classifier hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvcParams {
    /// Regularization strength (C)
    pub c: f64,
    pub kernel: Kernel,
    /// Polynomial degree, ignored by other kernels
    pub degree: u32,
    pub gamma: Gamma,
    pub coef0: f64,
    pub tol: f64,
    /// Cap on full SMO sweeps
    pub max_iter: usize,
    /// Fit a sigmoid on decision values so `predict_proba` is available
    pub probability: bool,
    pub random_state: Option<u64>,
}

impl Default for SvcParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            kernel: Kernel::Rbf,
            degree: 3,
            gamma: Gamma::Scale,
            coef0: 0.0,
            tol: 1e-3,
            max_iter: 1000,
            probability: false,
            random_state: None,
        }
    }
}

impl SvcParams {
    pub fn with_c(mut self, c: f64) -> Self {
        self.c = c;
        self
    }

    pub fn with_kernel(mut self, kernel: Kernel) -> Self {
        self.kernel = kernel;
        self
    }

    pub fn with_degree(mut self, degree: u32) -> Self {
        self.degree = degree;
        self
    }

    pub fn with_gamma(mut self, gamma: Gamma) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_probability(mut self, probability: bool) -> Self {
        self.probability = probability;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    fn validate(&self) -> Result<()> {
        if !(self.c > 0.0 && self.c.is_finite()) {
            return Err(MlopsError::invalid_param("C", self.c, "must be positive"));
        }
        if self.kernel == Kernel::Poly && self.degree == 0 {
            return Err(MlopsError::invalid_param("degree", self.degree, "must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct KernelFn {
    kernel: Kernel,
    gamma: f64,
    degree: i32,
    coef0: f64,
}

impl KernelFn {
    fn eval(&self, a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
        match self.kernel {
            Kernel::Linear => a.dot(&b),
            Kernel::Rbf => {
                let sq: f64 = a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum();
                (-self.gamma * sq).exp()
            }
            Kernel::Poly => (self.gamma * a.dot(&b) + self.coef0).powi(self.degree),
            Kernel::Sigmoid => (self.gamma * a.dot(&b) + self.coef0).tanh(),
        }
    }

    fn matrix(&self, x: &Array2<f64>) -> Array2<f64> {
        let n = x.nrows();
        let rows: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| (0..n).map(|j| self.eval(x.row(i), x.row(j))).collect())
            .collect();
        Array2::from_shape_fn((n, n), |(i, j)| rows[i][j])
    }
}

/// One binary machine: labels are +1 for the positive class, -1 otherwise
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BinaryMachine {
    support_vectors: Array2<f64>,
    /// `alpha_i * y_i` per support vector
    dual_coef: Array1<f64>,
    bias: f64,
    platt: Option<PlattScaling>,
}

impl BinaryMachine {
    fn decision(&self, kernel: &KernelFn, sample: ArrayView1<f64>) -> f64 {
        self.support_vectors
            .rows()
            .into_iter()
            .zip(self.dual_coef.iter())
            .map(|(sv, coef)| coef * kernel.eval(sv, sample))
            .sum::<f64>()
            + self.bias
    }
}

/// Support vector classifier.
///
/// Binary problems train one machine; more classes train one machine per
/// class against the rest and predict the highest decision value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvmClassifier {
    params: SvcParams,
    kernel: Option<KernelFn>,
    classes: Vec<i64>,
    machines: Vec<BinaryMachine>,
}

impl SvmClassifier {
    pub fn new(params: SvcParams) -> Self {
        Self {
            params,
            kernel: None,
            classes: Vec::new(),
            machines: Vec::new(),
        }
    }

    pub fn params(&self) -> &SvcParams {
        &self.params
    }

    /// Sorted class labels seen during `fit`
    pub fn classes(&self) -> &[i64] {
        &self.classes
    }

    pub fn n_support(&self) -> usize {
        self.machines.iter().map(|m| m.dual_coef.len()).sum()
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<&mut Self> {
        self.params.validate()?;
        if x.nrows() != y.len() {
            return Err(MlopsError::ShapeError {
                expected: format!("{} labels", x.nrows()),
                actual: format!("{} labels", y.len()),
            });
        }
        if x.nrows() > MAX_KERNEL_MATRIX_SAMPLES {
            return Err(MlopsError::TrainingError(format!(
                "{} samples exceed the {} row limit of the kernel matrix",
                x.nrows(),
                MAX_KERNEL_MATRIX_SAMPLES
            )));
        }
        if let Some((i, v)) = y.iter().enumerate().find(|(_, v)| (*v - v.round()).abs() > 1e-9) {
            return Err(MlopsError::TrainingError(format!(
                "class labels must be integers, sample {} has {}",
                i, v
            )));
        }

        let mut classes: Vec<i64> = y.iter().map(|v| v.round() as i64).collect();
        classes.sort_unstable();
        classes.dedup();
        if classes.len() < 2 {
            return Err(MlopsError::TrainingError(
                "at least 2 distinct classes are required".to_string(),
            ));
        }

        let kernel = KernelFn {
            kernel: self.params.kernel,
            gamma: self.params.gamma.resolve(x),
            degree: self.params.degree as i32,
            coef0: self.params.coef0,
        };
        let gram = kernel.matrix(x);

        let positives: Vec<i64> = if classes.len() == 2 {
            vec![classes[1]]
        } else {
            classes.clone()
        };
        self.machines = positives
            .iter()
            .map(|&cls| {
                let signs: Array1<f64> = y.mapv(|v| if v.round() as i64 == cls { 1.0 } else { -1.0 });
                self.train_machine(x, &signs, &gram)
            })
            .collect::<Result<Vec<_>>>()?;
        self.kernel = Some(kernel);
        self.classes = classes;
        Ok(self)
    }

    fn train_machine(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        gram: &Array2<f64>,
    ) -> Result<BinaryMachine> {
        let (alphas, bias) = smo(gram, y, &self.params);

        let support: Vec<usize> = (0..alphas.len()).filter(|&i| alphas[i] > 1e-8).collect();
        let support_vectors = x.select(Axis(0), &support);
        let dual_coef: Array1<f64> = support.iter().map(|&i| alphas[i] * y[i]).collect();

        let platt = if self.params.probability {
            let decision: Vec<f64> = (0..y.len())
                .map(|i| {
                    support
                        .iter()
                        .zip(dual_coef.iter())
                        .map(|(&s, c)| c * gram[[s, i]])
                        .sum::<f64>()
                        + bias
                })
                .collect();
            let labels: Vec<bool> = y.iter().map(|v| *v > 0.0).collect();
            Some(PlattScaling::fit(&decision, &labels)?)
        } else {
            None
        };

        Ok(BinaryMachine {
            support_vectors,
            dual_coef,
            bias,
            platt,
        })
    }

    fn fitted(&self) -> Result<&KernelFn> {
        self.kernel.as_ref().ok_or(MlopsError::ModelNotFitted)
    }

    /// Raw decision values, one column per machine
    pub fn decision_function(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let kernel = self.fitted()?;
        let n_features = self.machines[0].support_vectors.ncols();
        if x.ncols() != n_features {
            return Err(MlopsError::ShapeError {
                expected: format!("{} features", n_features),
                actual: format!("{} features", x.ncols()),
            });
        }
        let rows: Vec<Vec<f64>> = x
            .outer_iter()
            .into_par_iter()
            .map(|row| self.machines.iter().map(|m| m.decision(kernel, row)).collect())
            .collect();
        Ok(Array2::from_shape_fn((x.nrows(), self.machines.len()), |(i, j)| {
            rows[i][j]
        }))
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let scores = self.decision_function(x)?;
        let labels = scores
            .rows()
            .into_iter()
            .map(|row| {
                if self.classes.len() == 2 {
                    let cls = if row[0] >= 0.0 { self.classes[1] } else { self.classes[0] };
                    cls as f64
                } else {
                    let best = row
                        .iter()
                        .enumerate()
                        .fold((0, f64::NEG_INFINITY), |acc, (k, &s)| if s > acc.1 { (k, s) } else { acc })
                        .0;
                    self.classes[best] as f64
                }
            })
            .collect();
        Ok(labels)
    }

    /// Class probabilities, columns ordered as [`SvmClassifier::classes`].
    ///
    /// Only available when the model was trained with `probability = true`.
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if !self.params.probability {
            return Err(MlopsError::invalid_param(
                "probability",
                false,
                "predict_proba requires probability = true",
            ));
        }
        let scores = self.decision_function(x)?;
        let n_classes = self.classes.len();
        let mut proba = Array2::zeros((x.nrows(), n_classes));

        for (i, row) in scores.rows().into_iter().enumerate() {
            let per_machine: Vec<f64> = self
                .machines
                .iter()
                .zip(row.iter())
                .map(|(m, &s)| m.platt.map(|p| p.probability(s)).unwrap_or(0.5))
                .collect();
            if n_classes == 2 {
                proba[[i, 1]] = per_machine[0];
                proba[[i, 0]] = 1.0 - per_machine[0];
            } else {
                let total: f64 = per_machine.iter().sum();
                for (k, p) in per_machine.iter().enumerate() {
                    proba[[i, k]] = if total > 0.0 { p / total } else { 1.0 / n_classes as f64 };
                }
            }
        }
        Ok(proba)
    }
}

/// Simplified SMO on a precomputed Gram matrix; returns `(alphas, bias)`.
fn smo(gram: &Array2<f64>, y: &Array1<f64>, params: &SvcParams) -> (Array1<f64>, f64) {
    let n = y.len();
    let c = params.c;
    let tol = params.tol;
    let mut alphas = Array1::<f64>::zeros(n);
    let mut bias = 0.0;
    if n < 2 {
        return (alphas, bias);
    }

    let mut rng = match params.random_state {
        Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
        None => Xoshiro256PlusPlus::from_entropy(),
    };
    let output = |alphas: &Array1<f64>, bias: f64, idx: usize| -> f64 {
        (0..n)
            .filter(|&k| alphas[k] != 0.0)
            .map(|k| alphas[k] * y[k] * gram[[k, idx]])
            .sum::<f64>()
            + bias
    };

    let max_passes = 5;
    let (mut passes, mut sweeps) = (0, 0);
    while passes < max_passes && sweeps < params.max_iter {
        let mut changed = 0;
        for i in 0..n {
            let e_i = output(&alphas, bias, i) - y[i];
            let violates = (y[i] * e_i < -tol && alphas[i] < c) || (y[i] * e_i > tol && alphas[i] > 0.0);
            if !violates {
                continue;
            }

            let j = loop {
                let j = rng.gen_range(0..n);
                if j != i {
                    break j;
                }
            };
            let e_j = output(&alphas, bias, j) - y[j];
            let (ai_old, aj_old) = (alphas[i], alphas[j]);

            let (lo, hi) = if y[i] != y[j] {
                ((aj_old - ai_old).max(0.0), (c + aj_old - ai_old).min(c))
            } else {
                ((ai_old + aj_old - c).max(0.0), (ai_old + aj_old).min(c))
            };
            if (hi - lo).abs() < 1e-10 {
                continue;
            }

            let eta = 2.0 * gram[[i, j]] - gram[[i, i]] - gram[[j, j]];
            if eta >= 0.0 {
                continue;
            }

            let aj = (aj_old - y[j] * (e_i - e_j) / eta).clamp(lo, hi);
            if (aj - aj_old).abs() < 1e-5 {
                continue;
            }
            let ai = ai_old + y[i] * y[j] * (aj_old - aj);
            alphas[i] = ai;
            alphas[j] = aj;

            let b1 = bias - e_i - y[i] * (ai - ai_old) * gram[[i, i]] - y[j] * (aj - aj_old) * gram[[i, j]];
            let b2 = bias - e_j - y[i] * (ai - ai_old) * gram[[i, j]] - y[j] * (aj - aj_old) * gram[[j, j]];
            bias = if ai > 0.0 && ai < c {
                b1
            } else if aj > 0.0 && aj < c {
                b2
            } else {
                (b1 + b2) / 2.0
            };
            changed += 1;
        }

        sweeps += 1;
        passes = if changed == 0 { passes + 1 } else { 0 };
    }
    (alphas, bias)
}
