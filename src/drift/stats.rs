//! Two-sample statistical tests used to decide per-column drift

use crate::error::{MlopsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Number of histogram bins for numeric Jensen-Shannon distance
const JS_BINS: usize = 30;

/// Floor applied to empty histogram cells before computing distances
const EMPTY_CELL: f64 = 1e-4;

/// Values of one column with nulls removed
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnSample {
    Numeric(Vec<f64>),
    Categorical(Vec<String>),
}

impl ColumnSample {
    pub fn len(&self) -> usize {
        match self {
            ColumnSample::Numeric(v) => v.len(),
            ColumnSample::Categorical(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values as category labels
    pub fn labels(&self) -> Vec<String> {
        match self {
            ColumnSample::Numeric(v) => v.iter().map(|x| x.to_string()).collect(),
            ColumnSample::Categorical(v) => v.clone(),
        }
    }

    fn numeric(&self) -> Result<&[f64]> {
        match self {
            ColumnSample::Numeric(v) => Ok(v.as_slice()),
            ColumnSample::Categorical(_) => Err(MlopsError::DataError(
                "numeric test applied to a categorical column".to_string(),
            )),
        }
    }
}

/// Number of distinct values across both samples
pub fn n_unique(reference: &ColumnSample, current: &ColumnSample) -> usize {
    let mut seen: BTreeSet<String> = reference.labels().into_iter().collect();
    seen.extend(current.labels());
    seen.len()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatTest {
    /// Pearson chi-square on category frequencies, p-value
    ChiSquare,
    /// Two-proportion z-test for binary columns, p-value
    ZTest,
    /// Two-sample Kolmogorov-Smirnov, p-value
    Ks,
    /// Jensen-Shannon distance
    JensenShannon,
    /// Wasserstein distance divided by the reference standard deviation
    WassersteinNormed,
}

impl StatTest {
    /// Test chosen for a column: small references get a hypothesis test,
    /// large ones a distance.
    pub fn select(is_numeric: bool, reference_rows: usize, n_unique: usize) -> Self {
        if reference_rows <= 1000 {
            match (is_numeric, n_unique) {
                (true, n) if n > 5 => StatTest::Ks,
                (_, n) if n > 2 => StatTest::ChiSquare,
                _ => StatTest::ZTest,
            }
        } else if is_numeric && n_unique > 5 {
            StatTest::WassersteinNormed
        } else {
            StatTest::JensenShannon
        }
    }

    pub fn default_threshold(&self) -> f64 {
        match self {
            StatTest::ChiSquare | StatTest::ZTest | StatTest::Ks => 0.05,
            StatTest::JensenShannon | StatTest::WassersteinNormed => 0.1,
        }
    }

    /// p-value tests drift below the threshold, distances at or above it
    pub fn is_p_value(&self) -> bool {
        matches!(self, StatTest::ChiSquare | StatTest::ZTest | StatTest::Ks)
    }

    pub fn run(
        &self,
        reference: &ColumnSample,
        current: &ColumnSample,
        threshold: f64,
    ) -> Result<StatTestResult> {
        if reference.is_empty() || current.is_empty() {
            return Err(MlopsError::DataError(
                "cannot test drift on an empty column".to_string(),
            ));
        }
        let score = match self {
            StatTest::ChiSquare => chi_square_p_value(&reference.labels(), &current.labels()),
            StatTest::ZTest => z_test_p_value(&reference.labels(), &current.labels()),
            StatTest::Ks => ks_2samp(reference.numeric()?, current.numeric()?).1,
            StatTest::JensenShannon => match (reference, current) {
                (ColumnSample::Numeric(r), ColumnSample::Numeric(c)) => {
                    let (p, q) = binned_percents(r, c, JS_BINS);
                    jensen_shannon_distance(&p, &q)
                }
                _ => {
                    let (p, q) = category_percents(&reference.labels(), &current.labels());
                    jensen_shannon_distance(&p, &q)
                }
            },
            StatTest::WassersteinNormed => {
                let r = reference.numeric()?;
                let norm = population_std(r).max(0.001);
                wasserstein_distance(r, current.numeric()?) / norm
            }
        };
        let drift_detected = if self.is_p_value() {
            score < threshold
        } else {
            score >= threshold
        };
        Ok(StatTestResult {
            stattest: *self,
            score,
            threshold,
            drift_detected,
        })
    }
}

impl fmt::Display for StatTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatTest::ChiSquare => "chi-square p_value",
            StatTest::ZTest => "Z-test p_value",
            StatTest::Ks => "K-S p_value",
            StatTest::JensenShannon => "Jensen-Shannon distance",
            StatTest::WassersteinNormed => "Wasserstein distance (normed)",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatTestResult {
    pub stattest: StatTest,
    pub score: f64,
    pub threshold: f64,
    pub drift_detected: bool,
}

fn counts(values: &[String]) -> BTreeMap<&str, usize> {
    let mut out = BTreeMap::new();
    for v in values {
        *out.entry(v.as_str()).or_insert(0) += 1;
    }
    out
}

/// Pearson chi-square of current frequencies against reference
/// proportions rescaled to the current size
pub fn chi_square_p_value(reference: &[String], current: &[String]) -> f64 {
    let ref_counts = counts(reference);
    let cur_counts = counts(current);
    let keys: BTreeSet<&str> = ref_counts.keys().chain(cur_counts.keys()).copied().collect();
    if keys.len() < 2 {
        return 1.0;
    }
    let k_norm = current.len() as f64 / reference.len() as f64;
    let mut stat = 0.0;
    for key in &keys {
        let observed = *cur_counts.get(key).unwrap_or(&0) as f64;
        let expected = *ref_counts.get(key).unwrap_or(&0) as f64 * k_norm;
        if expected == 0.0 {
            if observed > 0.0 {
                return 0.0;
            }
            continue;
        }
        stat += (observed - expected).powi(2) / expected;
    }
    chi2_sf(stat, (keys.len() - 1) as f64)
}

/// Two-sided two-proportion z-test on the share of the first category
pub fn z_test_p_value(reference: &[String], current: &[String]) -> f64 {
    let keys: BTreeSet<&str> = reference.iter().chain(current).map(String::as_str).collect();
    let Some(first) = keys.iter().next() else {
        return 1.0;
    };
    if keys.len() == 1 {
        return 1.0;
    }
    let share = |v: &[String]| v.iter().filter(|x| x.as_str() != *first).count() as f64 / v.len() as f64;
    let (n1, n2) = (reference.len() as f64, current.len() as f64);
    let (p1, p2) = (share(reference), share(current));
    let pooled = (p1 * n1 + p2 * n2) / (n1 + n2);
    let denom = (pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2)).sqrt();
    if denom == 0.0 {
        return 1.0;
    }
    let z = (p1 - p2) / denom;
    2.0 * (1.0 - normal_cdf(z.abs()))
}

/// Largest sample size for which the KS p-value is computed exactly
const KS_EXACT_MAX_N: usize = 10_000;

/// KS statistic and two-sided p-value.
///
/// The p-value is exact when both samples have at most
/// [`KS_EXACT_MAX_N`] values and asymptotic otherwise.
pub fn ks_2samp(reference: &[f64], current: &[f64]) -> (f64, f64) {
    let mut a = reference.to_vec();
    let mut b = current.to_vec();
    a.sort_by(f64::total_cmp);
    b.sort_by(f64::total_cmp);
    let (n1, n2) = (a.len(), b.len());

    let (mut i, mut j) = (0, 0);
    let mut d: f64 = 0.0;
    while i < n1 && j < n2 {
        let x = a[i].min(b[j]);
        while i < n1 && a[i] <= x {
            i += 1;
        }
        while j < n2 && b[j] <= x {
            j += 1;
        }
        d = d.max((i as f64 / n1 as f64 - j as f64 / n2 as f64).abs());
    }

    let p = if n1.max(n2) <= KS_EXACT_MAX_N {
        ks_exact_p_value(n1, n2, d)
    } else {
        let en = ((n1 * n2) as f64 / (n1 + n2) as f64).sqrt();
        kolmogorov_sf((en + 0.12 + 0.11 / en) * d)
    };
    (d, p)
}

fn gcd(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// `P(D >= d)` under the null, by walking the lattice of merged orderings.
///
/// A uniformly random interleaving of the two samples is a path from `(0, 0)`
/// to `(n1, n2)`; the statistic stays below `d` exactly when every point keeps
/// `|i / n1 - j / n2| < d`. Path probabilities are carried instead of counts.
fn ks_exact_p_value(n1: usize, n2: usize, d: f64) -> f64 {
    let g = gcd(n1, n2);
    let (step_i, step_j) = ((n2 / g) as i64, (n1 / g) as i64);
    let lcm = (n1 / g * n2) as f64;
    // d is a multiple of 1 / lcm up to rounding
    let h = (d * lcm).round() as i64;
    if h <= 0 {
        return 1.0;
    }
    let inside = |i: usize, j: usize| (i as i64 * step_i - j as i64 * step_j).abs() < h;

    let mut row = vec![0.0; n2 + 1];
    let mut next = vec![0.0; n2 + 1];
    row[0] = 1.0;
    for i in 0..=n1 {
        next.iter_mut().for_each(|v| *v = 0.0);
        for j in 0..=n2 {
            if !inside(i, j) {
                row[j] = 0.0;
                continue;
            }
            let p = row[j];
            let remaining = (n1 - i + n2 - j) as f64;
            if p == 0.0 || remaining == 0.0 {
                continue;
            }
            if i < n1 {
                next[j] += p * (n1 - i) as f64 / remaining;
            }
            if j < n2 {
                row[j + 1] += p * (n2 - j) as f64 / remaining;
            }
        }
        if i == n1 {
            return (1.0 - row[n2]).clamp(0.0, 1.0);
        }
        std::mem::swap(&mut row, &mut next);
    }
    1.0
}

/// Survival function of the Kolmogorov distribution
fn kolmogorov_sf(lambda: f64) -> f64 {
    if lambda < 1e-3 {
        return 1.0;
    }
    let mut sum = 0.0;
    let mut sign = 1.0;
    for k in 1..=100 {
        let term = sign * (-2.0 * (k as f64).powi(2) * lambda * lambda).exp();
        sum += term;
        if term.abs() < 1e-12 {
            break;
        }
        sign = -sign;
    }
    (2.0 * sum).clamp(0.0, 1.0)
}

/// First Wasserstein distance between two empirical distributions
pub fn wasserstein_distance(u: &[f64], v: &[f64]) -> f64 {
    let mut u = u.to_vec();
    let mut v = v.to_vec();
    u.sort_by(f64::total_cmp);
    v.sort_by(f64::total_cmp);
    let mut all: Vec<f64> = u.iter().chain(&v).copied().collect();
    all.sort_by(f64::total_cmp);

    let cdf = |sorted: &[f64], x: f64| sorted.partition_point(|&s| s <= x) as f64 / sorted.len() as f64;
    all.windows(2)
        .map(|w| (cdf(&u, w[0]) - cdf(&v, w[0])).abs() * (w[1] - w[0]))
        .sum()
}

fn population_std(x: &[f64]) -> f64 {
    let n = x.len() as f64;
    let mean = x.iter().sum::<f64>() / n;
    (x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

fn fill_empty(percents: &mut [f64]) {
    let min_non_zero = percents
        .iter()
        .copied()
        .filter(|p| *p > 0.0)
        .fold(f64::INFINITY, f64::min);
    let fill = if min_non_zero <= EMPTY_CELL {
        min_non_zero / 1e6
    } else {
        EMPTY_CELL
    };
    for p in percents.iter_mut().filter(|p| **p == 0.0) {
        *p = fill;
    }
}

/// Shares of each category, over the union of categories
pub fn category_percents(reference: &[String], current: &[String]) -> (Vec<f64>, Vec<f64>) {
    let ref_counts = counts(reference);
    let cur_counts = counts(current);
    let keys: BTreeSet<&str> = ref_counts.keys().chain(cur_counts.keys()).copied().collect();
    let share = |c: &BTreeMap<&str, usize>, n: usize| -> Vec<f64> {
        keys.iter()
            .map(|k| *c.get(k).unwrap_or(&0) as f64 / n as f64)
            .collect()
    };
    let mut p = share(&ref_counts, reference.len());
    let mut q = share(&cur_counts, current.len());
    fill_empty(&mut p);
    fill_empty(&mut q);
    (p, q)
}

/// Shares of each sample in equal-width bins spanning both samples
pub fn binned_percents(reference: &[f64], current: &[f64], bins: usize) -> (Vec<f64>, Vec<f64>) {
    let (lo, hi) = reference
        .iter()
        .chain(current)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &x| (lo.min(x), hi.max(x)));
    let (lo, hi) = if hi > lo { (lo, hi) } else { (lo - 0.5, hi + 0.5) };
    let width = (hi - lo) / bins as f64;
    let histogram = |data: &[f64]| -> Vec<f64> {
        let mut counts = vec![0usize; bins];
        for &x in data {
            let bin = (((x - lo) / width).floor() as usize).min(bins - 1);
            counts[bin] += 1;
        }
        counts.iter().map(|&c| c as f64 / data.len() as f64).collect()
    };
    let mut p = histogram(reference);
    let mut q = histogram(current);
    fill_empty(&mut p);
    fill_empty(&mut q);
    (p, q)
}

/// Square root of the Jensen-Shannon divergence (natural log)
pub fn jensen_shannon_distance(p: &[f64], q: &[f64]) -> f64 {
    let (sp, sq) = (p.iter().sum::<f64>(), q.iter().sum::<f64>());
    let kl = |a: &[f64], sa: f64, m: &[f64]| -> f64 {
        a.iter()
            .zip(m)
            .map(|(&ai, &mi)| {
                let ai = ai / sa;
                if ai > 0.0 {
                    ai * (ai / mi).ln()
                } else {
                    0.0
                }
            })
            .sum()
    };
    let m: Vec<f64> = p
        .iter()
        .zip(q)
        .map(|(&pi, &qi)| (pi / sp + qi / sq) / 2.0)
        .collect();
    ((kl(p, sp, &m) + kl(q, sq, &m)) / 2.0).max(0.0).sqrt()
}

/// Standard normal CDF
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / std::f64::consts::SQRT_2)
}

/// Complementary error function, Chebyshev fit with relative error < 1.2e-7
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = -z * z - 1.265_512_23
        + t * (1.000_023_68
            + t * (0.374_091_96
                + t * (0.096_784_18
                    + t * (-0.186_288_06
                        + t * (0.278_868_07
                            + t * (-1.135_203_98
                                + t * (1.488_515_87 + t * (-0.822_152_23 + t * 0.170_872_77))))))));
    let r = t * poly.exp();
    if x >= 0.0 {
        r
    } else {
        2.0 - r
    }
}

/// Upper tail of the chi-square distribution
pub fn chi2_sf(stat: f64, dof: f64) -> f64 {
    if stat <= 0.0 {
        return 1.0;
    }
    if !stat.is_finite() {
        return 0.0;
    }
    gamma_q(dof / 2.0, stat / 2.0)
}

fn ln_gamma(x: f64) -> f64 {
    const COF: [f64; 6] = [
        76.180_091_729_471_46,
        -86.505_320_329_416_77,
        24.014_098_240_830_91,
        -1.231_739_572_450_155,
        0.120_865_097_386_617_9e-2,
        -0.539_523_938_495_3e-5,
    ];
    let tmp = x + 5.5 - (x + 0.5) * (x + 5.5).ln();
    let mut ser = 1.000_000_000_190_015;
    let mut y = x;
    for c in COF {
        y += 1.0;
        ser += c / y;
    }
    -tmp + (2.506_628_274_631_000_5 * ser / x).ln()
}

/// Regularized upper incomplete gamma Q(a, x)
fn gamma_q(a: f64, x: f64) -> f64 {
    const EPS: f64 = 1e-14;
    const MAX_ITER: usize = 500;
    let gln = ln_gamma(a);
    if x < a + 1.0 {
        // series for P(a, x)
        let mut ap = a;
        let mut del = 1.0 / a;
        let mut sum = del;
        for _ in 0..MAX_ITER {
            ap += 1.0;
            del *= x / ap;
            sum += del;
            if del.abs() < sum.abs() * EPS {
                break;
            }
        }
        1.0 - sum * (-x + a * x.ln() - gln).exp()
    } else {
        // Lentz continued fraction for Q(a, x)
        let tiny = 1e-300;
        let mut b = x + 1.0 - a;
        let mut c = 1.0 / tiny;
        let mut d = 1.0 / b;
        let mut h = d;
        for i in 1..=MAX_ITER {
            let an = -(i as f64) * (i as f64 - a);
            b += 2.0;
            d = an * d + b;
            if d.abs() < tiny {
                d = tiny;
            }
            c = b + an / c;
            if c.abs() < tiny {
                c = tiny;
            }
            d = 1.0 / d;
            let delta = d * c;
            h *= delta;
            if (delta - 1.0).abs() < EPS {
                break;
            }
        }
        (-x + a * x.ln() - gln).exp() * h
    }
}
