//! Dictionary-of-features vectorizer

use super::sparse::CsrMatrix;
use crate::error::{MlopsError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single feature value in a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeatureValue {
    /// One-hot encoded as `name=value`
    Str(String),
    /// Kept as a numeric column named `name`
    Num(f64),
}

impl From<&str> for FeatureValue {
    fn from(v: &str) -> Self {
        FeatureValue::Str(v.to_string())
    }
}

impl From<String> for FeatureValue {
    fn from(v: String) -> Self {
        FeatureValue::Str(v)
    }
}

impl From<f64> for FeatureValue {
    fn from(v: f64) -> Self {
        FeatureValue::Num(v)
    }
}

/// One input record: feature name to value
pub type FeatureRecord = BTreeMap<String, FeatureValue>;

fn feature_key(name: &str, value: &FeatureValue) -> String {
    match value {
        FeatureValue::Str(s) => format!("{}={}", name, s),
        FeatureValue::Num(_) => name.to_string(),
    }
}

/// Turns feature records into a sparse matrix.
///
/// String features are one-hot encoded, numeric features pass through. The
/// vocabulary is sorted by feature name and values never seen during `fit`
/// are dropped by `transform`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DictVectorizer {
    vocabulary: BTreeMap<String, usize>,
    feature_names: Vec<String>,
}

impl DictVectorizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Learn the vocabulary
    pub fn fit(&mut self, records: &[FeatureRecord]) -> &mut Self {
        let mut names: Vec<String> = records
            .iter()
            .flat_map(|r| r.iter().map(|(k, v)| feature_key(k, v)))
            .collect();
        names.sort();
        names.dedup();

        self.vocabulary = names.iter().enumerate().map(|(i, n)| (n.clone(), i)).collect();
        self.feature_names = names;
        self
    }

    pub fn transform(&self, records: &[FeatureRecord]) -> Result<CsrMatrix> {
        if self.feature_names.is_empty() {
            return Err(MlopsError::ModelNotFitted);
        }
        let mut out = CsrMatrix::new(self.feature_names.len());
        for record in records {
            let entries = record.iter().filter_map(|(k, v)| {
                let col = *self.vocabulary.get(&feature_key(k, v))?;
                Some(match v {
                    FeatureValue::Str(_) => (col, 1.0),
                    FeatureValue::Num(x) => (col, *x),
                })
            });
            out.push_row(entries)?;
        }
        Ok(out)
    }

    pub fn fit_transform(&mut self, records: &[FeatureRecord]) -> Result<CsrMatrix> {
        self.fit(records);
        self.transform(records)
    }

    /// Output column names in order
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn is_fitted(&self) -> bool {
        !self.feature_names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn record(pu: &str, dist: f64) -> FeatureRecord {
        let mut r = FeatureRecord::new();
        r.insert("PULocationID".into(), pu.into());
        r.insert("trip_distance".into(), dist.into());
        r
    }

    #[test]
    fn test_sorted_vocabulary() {
        let mut dv = DictVectorizer::new();
        dv.fit(&[record("43", 1.0), record("161", 2.0), record("43", 3.0)]);
        assert_eq!(
            dv.feature_names(),
            &["PULocationID=161", "PULocationID=43", "trip_distance"]
        );
    }

    #[test]
    fn test_transform_one_hot_and_numeric() {
        let mut dv = DictVectorizer::new();
        let x = dv.fit_transform(&[record("43", 1.5), record("161", 2.0)]).unwrap();
        assert_eq!(x.to_dense(), array![[0.0, 1.0, 1.5], [1.0, 0.0, 2.0]]);
    }

    #[test]
    fn test_unseen_value_is_ignored() {
        let mut dv = DictVectorizer::new();
        dv.fit(&[record("43", 1.0)]);
        let x = dv.transform(&[record("999", 4.0)]).unwrap();
        assert_eq!(x.to_dense(), array![[0.0, 4.0]]);
    }

    #[test]
    fn test_unfitted() {
        let dv = DictVectorizer::new();
        assert!(matches!(dv.transform(&[]), Err(MlopsError::ModelNotFitted)));
    }
}
