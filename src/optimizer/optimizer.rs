//! Ask/tell hyperparameter optimizer

use super::samplers::{RandomSampler, Sampler, TpeSampler};
use super::search_space::{SearchSpace, TrialParams};
use crate::error::{MlopsError, Result};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, warn};

/// Outcome of a trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrialStatus {
    Ok,
    Failed(String),
}

/// One evaluated trial
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trial {
    pub number: usize,
    pub params: TrialParams,
    /// `None` when the trial failed
    pub loss: Option<f64>,
    pub status: TrialStatus,
    pub duration_secs: f64,
}

/// All trials of one optimization, lowest loss is best
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Study {
    pub trials: Vec<Trial>,
    pub best_trial_idx: Option<usize>,
}

impl Study {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn best_trial(&self) -> Option<&Trial> {
        self.best_trial_idx.map(|i| &self.trials[i])
    }

    pub fn best_loss(&self) -> Option<f64> {
        self.best_trial().and_then(|t| t.loss)
    }

    pub fn best_params(&self) -> Option<&TrialParams> {
        self.best_trial().map(|t| &t.params)
    }

    pub fn n_failed(&self) -> usize {
        self.trials
            .iter()
            .filter(|t| matches!(t.status, TrialStatus::Failed(_)))
            .count()
    }

    /// Record a trial; failed trials never become best
    pub fn add_trial(&mut self, trial: Trial) {
        let idx = self.trials.len();
        if let (TrialStatus::Ok, Some(loss)) = (&trial.status, trial.loss) {
            let better = match self.best_loss() {
                None => true,
                Some(best) => loss < best,
            };
            if better {
                self.best_trial_idx = Some(idx);
            }
        }
        self.trials.push(trial);
    }

    /// `(params, loss)` of every successful trial, the sampler's history
    pub fn history(&self) -> Vec<(TrialParams, f64)> {
        self.trials
            .iter()
            .filter_map(|t| match (&t.status, t.loss) {
                (TrialStatus::Ok, Some(l)) => Some((t.params.clone(), l)),
                _ => None,
            })
            .collect()
    }
}

/// Minimizes a loss over a [`SearchSpace`].
///
/// Use [`HyperOpt::minimize`] for a synchronous objective, or drive the loop
/// yourself with [`HyperOpt::ask`] and [`HyperOpt::tell`] when the objective
/// is async.
pub struct HyperOpt {
    space: SearchSpace,
    sampler: Box<dyn Sampler>,
    study: Study,
    pending: Option<(TrialParams, Instant)>,
}

impl HyperOpt {
    pub fn new(space: SearchSpace, sampler: Box<dyn Sampler>) -> Result<Self> {
        space.validate()?;
        Ok(Self {
            space,
            sampler,
            study: Study::new(),
            pending: None,
        })
    }

    /// TPE with the default startup and quantile settings
    pub fn tpe(space: SearchSpace, seed: u64) -> Result<Self> {
        Self::new(space, Box::new(TpeSampler::new(Some(seed))))
    }

    pub fn random(space: SearchSpace, seed: u64) -> Result<Self> {
        Self::new(space, Box::new(RandomSampler::new(Some(seed))))
    }

    pub fn study(&self) -> &Study {
        &self.study
    }

    pub fn into_study(self) -> Study {
        self.study
    }

    /// Propose the next parameters to evaluate
    pub fn ask(&mut self) -> TrialParams {
        let history = self.study.history();
        let params = self.sampler.sample(&self.space, &history);
        self.pending = Some((params.clone(), Instant::now()));
        params
    }

    /// Report the outcome of `params`; non-finite losses count as failures
    pub fn tell(&mut self, params: TrialParams, outcome: Result<f64>) -> &Trial {
        let started = match self.pending.take() {
            Some((pending, t)) if pending == params => Some(t),
            _ => None,
        };
        let duration_secs = started.map_or(0.0, |t| t.elapsed().as_secs_f64());
        let number = self.study.trials.len();

        let (loss, status) = match outcome {
            Ok(l) if l.is_finite() => (Some(l), TrialStatus::Ok),
            Ok(l) => (None, TrialStatus::Failed(format!("non-finite loss {}", l))),
            Err(e) => (None, TrialStatus::Failed(e.to_string())),
        };
        match &status {
            TrialStatus::Ok => info!(trial = number, loss = loss.unwrap_or(f64::NAN), "trial finished"),
            TrialStatus::Failed(reason) => warn!(trial = number, %reason, "trial failed"),
        }

        self.study.add_trial(Trial {
            number,
            params,
            loss,
            status,
            duration_secs,
        });
        &self.study.trials[number]
    }

    /// Run `n_trials` evaluations of `objective`.
    ///
    /// Errors only when every trial failed.
    pub fn minimize<F>(&mut self, n_trials: usize, mut objective: F) -> Result<&Study>
    where
        F: FnMut(&TrialParams) -> Result<f64>,
    {
        for _ in 0..n_trials {
            let params = self.ask();
            let outcome = objective(&params);
            self.tell(params, outcome);
        }
        self.finish()
    }

    /// The study, or an error if no trial succeeded
    pub fn finish(&self) -> Result<&Study> {
        if self.study.best_trial().is_none() {
            return Err(MlopsError::OptimizationError(format!(
                "all {} trials failed",
                self.study.trials.len()
            )));
        }
        Ok(&self.study)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quadratic(params: &TrialParams) -> Result<f64> {
        let x = params["x"].as_float().unwrap_or(0.0);
        Ok((x - 1.0).powi(2))
    }

    #[test]
    fn test_minimize_records_every_trial() {
        let space = SearchSpace::new().uniform("x", -5.0, 5.0);
        let mut opt = HyperOpt::tpe(space, 42).unwrap();
        let study = opt.minimize(30, quadratic).unwrap();

        assert_eq!(study.trials.len(), 30);
        let best = study.best_loss().unwrap();
        assert!(study.trials.iter().all(|t| t.loss.unwrap() >= best));
        assert!(best < 0.5);
    }

    #[test]
    fn test_failed_trials_never_best() {
        let space = SearchSpace::new().uniform("x", 0.0, 1.0);
        let mut opt = HyperOpt::random(space, 0).unwrap();
        let mut calls = 0;
        let study = opt
            .minimize(6, |p| {
                calls += 1;
                if calls % 2 == 0 {
                    Err(MlopsError::TrainingError("boom".to_string()))
                } else {
                    quadratic(p)
                }
            })
            .unwrap();
        assert_eq!(study.n_failed(), 3);
        assert_eq!(study.best_trial().unwrap().status, TrialStatus::Ok);
    }

    #[test]
    fn test_all_failed_is_error() {
        let space = SearchSpace::new().uniform("x", 0.0, 1.0);
        let mut opt = HyperOpt::random(space, 0).unwrap();
        let err = opt.minimize(3, |_| Ok(f64::NAN)).unwrap_err();
        assert!(matches!(err, MlopsError::OptimizationError(_)));
    }

    #[test]
    fn test_ask_tell() {
        let space = SearchSpace::new().choice("k", vec!["a", "b"]);
        let mut opt = HyperOpt::tpe(space, 7).unwrap();
        for i in 0..4 {
            let p = opt.ask();
            let t = opt.tell(p, Ok(i as f64));
            assert_eq!(t.number, i);
        }
        assert_eq!(opt.study().best_loss(), Some(0.0));
    }

    #[test]
    fn test_invalid_space() {
        assert!(HyperOpt::tpe(SearchSpace::new(), 0).is_err());
    }
}
