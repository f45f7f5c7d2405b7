//! Hyperparameter optimization
//!
//! Search spaces in the usual hyperopt vocabulary (`loguniform`, `quniform`,
//! `choice`), random and TPE samplers, and an ask/tell optimizer that keeps
//! every trial in a [`Study`].

mod optimizer;
mod samplers;
mod search_space;

pub use optimizer::{HyperOpt, Study, Trial, TrialStatus};
pub use samplers::{RandomSampler, Sampler, TpeSampler};
pub use search_space::{Distribution, ParamValue, Parameter, SearchSpace, TrialParams};
