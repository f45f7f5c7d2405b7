//! Sampling strategies for hyperparameter optimization

use super::search_space::{Distribution, ParamValue, Parameter, SearchSpace, TrialParams};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::f64::consts::PI;

/// Proposes the next trial from the completed `(params, loss)` history
pub trait Sampler: Send {
    fn sample(&mut self, space: &SearchSpace, history: &[(TrialParams, f64)]) -> TrialParams;

    fn name(&self) -> &'static str;
}

fn seeded(seed: Option<u64>) -> Xoshiro256PlusPlus {
    match seed {
        Some(s) => Xoshiro256PlusPlus::seed_from_u64(s),
        None => Xoshiro256PlusPlus::from_entropy(),
    }
}

/// Draws every trial from the prior
#[derive(Debug)]
pub struct RandomSampler {
    rng: Xoshiro256PlusPlus,
}

impl RandomSampler {
    pub fn new(seed: Option<u64>) -> Self {
        Self { rng: seeded(seed) }
    }
}

impl Sampler for RandomSampler {
    fn sample(&mut self, space: &SearchSpace, _history: &[(TrialParams, f64)]) -> TrialParams {
        space.sample(&mut self.rng)
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

/// Tree-structured Parzen Estimator.
///
/// After `n_startup_trials` prior draws, the history is split at the
/// `gamma` quantile of the loss into good and bad trials. Each parameter gets
/// a Parzen density for both groups; candidates are drawn from the good
/// density and the one maximizing `l(x) / g(x)` is proposed.
#[derive(Debug)]
pub struct TpeSampler {
    rng: Xoshiro256PlusPlus,
    n_startup_trials: usize,
    gamma: f64,
    n_candidates: usize,
}

impl TpeSampler {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: seeded(seed),
            n_startup_trials: 10,
            gamma: 0.25,
            n_candidates: 24,
        }
    }

    pub fn with_n_startup(mut self, n: usize) -> Self {
        self.n_startup_trials = n;
        self
    }

    /// Quantile separating good from bad trials
    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma.clamp(0.01, 0.99);
        self
    }

    pub fn with_n_candidates(mut self, n: usize) -> Self {
        self.n_candidates = n.max(1);
        self
    }
}

fn std_normal(rng: &mut impl Rng) -> f64 {
    // Box-Muller
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Parzen density of one parameter over one group of trials
enum Parzen {
    Numeric {
        centers: Vec<f64>,
        sigma: f64,
        lo: f64,
        hi: f64,
    },
    Categorical {
        /// Smoothed probability per option
        weights: Vec<f64>,
    },
    Constant,
}

impl Parzen {
    fn fit(param: &Parameter, values: &[&ParamValue]) -> Self {
        match &param.distribution {
            Distribution::Choice(options) => {
                let mut weights = vec![1.0; options.len()];
                for v in values {
                    if let Some(i) = options.iter().position(|o| o == *v) {
                        weights[i] += 1.0;
                    }
                }
                let total: f64 = weights.iter().sum();
                Parzen::Categorical {
                    weights: weights.into_iter().map(|w| w / total).collect(),
                }
            }
            Distribution::Fixed(_) => Parzen::Constant,
            _ => {
                let (lo, hi) = param.bounds().unwrap_or((0.0, 1.0));
                let centers: Vec<f64> = values.iter().filter_map(|v| param.to_internal(v)).collect();
                let sigma = (hi - lo) / (1.0 + centers.len() as f64).sqrt();
                Parzen::Numeric {
                    centers,
                    sigma: sigma.max(1e-12),
                    lo,
                    hi,
                }
            }
        }
    }

    /// Mixture of the uniform prior and one Gaussian per observation
    fn log_density(&self, param: &Parameter, value: &ParamValue) -> f64 {
        match self {
            Parzen::Numeric { centers, sigma, lo, hi } => {
                let Some(z) = param.to_internal(value) else {
                    return 0.0;
                };
                let prior = 1.0 / (hi - lo);
                let kernels: f64 = centers
                    .iter()
                    .map(|c| {
                        let u = (z - c) / sigma;
                        (-0.5 * u * u).exp() / (sigma * (2.0 * PI).sqrt())
                    })
                    .sum();
                ((prior + kernels) / (centers.len() as f64 + 1.0)).max(1e-300).ln()
            }
            Parzen::Categorical { weights } => match &param.distribution {
                Distribution::Choice(options) => options
                    .iter()
                    .position(|o| o == value)
                    .map(|i| weights[i].ln())
                    .unwrap_or(f64::NEG_INFINITY),
                _ => 0.0,
            },
            Parzen::Constant => 0.0,
        }
    }

    fn draw(&self, param: &Parameter, rng: &mut impl Rng) -> ParamValue {
        match self {
            Parzen::Numeric { centers, sigma, lo, hi } => {
                let pick = rng.gen_range(0..=centers.len());
                let z = if pick == centers.len() {
                    rng.gen_range(*lo..=*hi)
                } else {
                    (centers[pick] + sigma * std_normal(rng)).clamp(*lo, *hi)
                };
                param.from_internal(z)
            }
            Parzen::Categorical { weights } => {
                let mut u: f64 = rng.gen();
                let mut idx = weights.len() - 1;
                for (i, w) in weights.iter().enumerate() {
                    if u < *w {
                        idx = i;
                        break;
                    }
                    u -= w;
                }
                match &param.distribution {
                    Distribution::Choice(options) => options[idx].clone(),
                    _ => param.sample(rng),
                }
            }
            Parzen::Constant => param.sample(rng),
        }
    }
}

fn group_values<'a>(group: &[&'a (TrialParams, f64)], name: &str) -> Vec<&'a ParamValue> {
    group.iter().copied().filter_map(|(t, _)| t.get(name)).collect()
}

impl Sampler for TpeSampler {
    fn sample(&mut self, space: &SearchSpace, history: &[(TrialParams, f64)]) -> TrialParams {
        if history.len() < self.n_startup_trials.max(2) {
            return space.sample(&mut self.rng);
        }

        let mut sorted: Vec<&(TrialParams, f64)> = history.iter().collect();
        sorted.sort_by(|a, b| a.1.total_cmp(&b.1));
        let n_good = ((sorted.len() as f64 * self.gamma).ceil() as usize).clamp(1, sorted.len() - 1);
        let (good, bad) = sorted.split_at(n_good);

        let models: Vec<(&Parameter, Parzen, Parzen)> = space
            .parameters()
            .iter()
            .map(|p| {
                let l = Parzen::fit(p, &group_values(good, &p.name));
                let g = Parzen::fit(p, &group_values(bad, &p.name));
                (p, l, g)
            })
            .collect();

        let mut best: Option<(f64, TrialParams)> = None;
        for _ in 0..self.n_candidates {
            let mut candidate = TrialParams::new();
            let mut score = 0.0;
            for (p, l, g) in &models {
                let v = l.draw(p, &mut self.rng);
                score += l.log_density(p, &v) - g.log_density(p, &v);
                candidate.insert(p.name.clone(), v);
            }
            if best.as_ref().map_or(true, |(s, _)| score > *s) {
                best = Some((score, candidate));
            }
        }
        match best {
            Some((_, params)) => params,
            None => space.sample(&mut self.rng),
        }
    }

    fn name(&self) -> &'static str {
        "tpe"
    }
}
