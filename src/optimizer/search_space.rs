//! Search space definition for hyperparameters

use crate::error::{MlopsError, Result};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One sampled value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Float(f64),
    Int(i64),
    Str(String),
    Bool(bool),
}

impl ParamValue {
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            ParamValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Str(v) => f.write_str(v),
            ParamValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

/// Parameter name to sampled value, ordered by name
pub type TrialParams = BTreeMap<String, ParamValue>;

/// Prior of a single parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Distribution {
    /// `low..high`, uniform
    Uniform { low: f64, high: f64 },
    /// `exp(uniform(ln low, ln high))`
    LogUniform { low: f64, high: f64 },
    /// `round(uniform(low, high) / q) * q`, reported as an integer
    QUniform { low: f64, high: f64, q: f64 },
    /// One of the listed options
    Choice(Vec<ParamValue>),
    /// Always this value
    Fixed(ParamValue),
}

impl Distribution {
    /// Bounds of the internal sampling space (log space for `LogUniform`)
    fn internal_bounds(&self) -> Option<(f64, f64)> {
        match self {
            Distribution::Uniform { low, high } | Distribution::QUniform { low, high, .. } => Some((*low, *high)),
            Distribution::LogUniform { low, high } => Some((low.ln(), high.ln())),
            _ => None,
        }
    }
}

/// A named hyperparameter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub distribution: Distribution,
}

impl Parameter {
    /// Draw from the prior
    pub fn sample(&self, rng: &mut impl Rng) -> ParamValue {
        match &self.distribution {
            Distribution::Choice(options) => options[rng.gen_range(0..options.len())].clone(),
            Distribution::Fixed(v) => v.clone(),
            _ => {
                let (lo, hi) = self.distribution.internal_bounds().unwrap_or((0.0, 1.0));
                self.from_internal(rng.gen_range(lo..=hi))
            }
        }
    }

    /// Map a point of the internal space back to a parameter value
    pub(crate) fn from_internal(&self, z: f64) -> ParamValue {
        match &self.distribution {
            Distribution::Uniform { low, high } => ParamValue::Float(z.clamp(*low, *high)),
            Distribution::LogUniform { low, high } => ParamValue::Float(z.exp().clamp(*low, *high)),
            Distribution::QUniform { low, high, q } => {
                let v = (z.clamp(*low, *high) / q).round() * q;
                ParamValue::Int(v as i64)
            }
            Distribution::Choice(options) => options[0].clone(),
            Distribution::Fixed(v) => v.clone(),
        }
    }

    /// Position of a value in the internal space, for numeric priors
    pub(crate) fn to_internal(&self, value: &ParamValue) -> Option<f64> {
        let v = value.as_float()?;
        match &self.distribution {
            Distribution::LogUniform { .. } => (v > 0.0).then(|| v.ln()),
            Distribution::Uniform { .. } | Distribution::QUniform { .. } => Some(v),
            _ => None,
        }
    }

    pub(crate) fn bounds(&self) -> Option<(f64, f64)> {
        self.distribution.internal_bounds()
    }
}

/// Search space for hyperparameter optimization
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchSpace {
    parameters: Vec<Parameter>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(mut self, name: impl Into<String>, distribution: Distribution) -> Self {
        self.parameters.push(Parameter {
            name: name.into(),
            distribution,
        });
        self
    }

    pub fn uniform(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.add(name, Distribution::Uniform { low, high })
    }

    pub fn loguniform(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.add(name, Distribution::LogUniform { low, high })
    }

    pub fn quniform(self, name: impl Into<String>, low: f64, high: f64, q: f64) -> Self {
        self.add(name, Distribution::QUniform { low, high, q })
    }

    pub fn choice<V: Into<ParamValue>>(self, name: impl Into<String>, options: Vec<V>) -> Self {
        self.add(name, Distribution::Choice(options.into_iter().map(Into::into).collect()))
    }

    pub fn fixed(self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.add(name, Distribution::Fixed(value.into()))
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Reject empty, inverted or non-positive log ranges before any trial runs
    pub fn validate(&self) -> Result<()> {
        if self.parameters.is_empty() {
            return Err(MlopsError::OptimizationError("search space is empty".to_string()));
        }
        for p in &self.parameters {
            let ok = match &p.distribution {
                Distribution::Uniform { low, high } => low < high,
                Distribution::LogUniform { low, high } => *low > 0.0 && low < high,
                Distribution::QUniform { low, high, q } => low < high && *q > 0.0,
                Distribution::Choice(options) => !options.is_empty(),
                Distribution::Fixed(_) => true,
            };
            if !ok {
                return Err(MlopsError::invalid_param(
                    &p.name,
                    format!("{:?}", p.distribution),
                    "invalid range",
                ));
            }
        }
        Ok(())
    }

    /// Draw every parameter from its prior
    pub fn sample(&self, rng: &mut impl Rng) -> TrialParams {
        self.parameters
            .iter()
            .map(|p| (p.name.clone(), p.sample(rng)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn space() -> SearchSpace {
        SearchSpace::new()
            .loguniform("C", 1e-3, 1e2)
            .choice("kernel", vec!["linear", "rbf", "poly", "sigmoid"])
            .quniform("degree", 2.0, 5.0, 1.0)
            .choice("probability", vec![true, false])
            .fixed("random_state", 42i64)
    }

    #[test]
    fn test_samples_stay_in_range() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(0);
        let space = space();
        space.validate().unwrap();
        for _ in 0..200 {
            let p = space.sample(&mut rng);
            let c = p["C"].as_float().unwrap();
            assert!((1e-3..=1e2).contains(&c));
            let degree = p["degree"].as_int().unwrap();
            assert!((2..=5).contains(&degree));
            assert!(p["probability"].as_bool().is_some());
            assert_eq!(p["random_state"], ParamValue::Int(42));
        }
    }

    #[test]
    fn test_invalid_ranges() {
        assert!(SearchSpace::new().validate().is_err());
        assert!(SearchSpace::new().loguniform("C", 0.0, 1.0).validate().is_err());
        assert!(SearchSpace::new().quniform("d", 5.0, 2.0, 1.0).validate().is_err());
        assert!(SearchSpace::new().choice::<&str>("k", vec![]).validate().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(ParamValue::Float(0.5).to_string(), "0.5");
        assert_eq!(ParamValue::from("rbf").to_string(), "rbf");
        assert_eq!(ParamValue::Bool(true).to_string(), "true");
    }
}
