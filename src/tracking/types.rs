//! Tracking server entities, shaped like the REST API's JSON

use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;

/// Accepts int64 fields sent either as JSON numbers or as strings
fn lenient_i64<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(i64),
        Str(String),
    }
    match Raw::deserialize(d)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

fn lenient_opt_i64<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    #[derive(Deserialize)]
    struct Wrap(#[serde(deserialize_with = "lenient_i64")] i64);
    Ok(Option::<Wrap>::deserialize(d)?.map(|w| w.0))
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub experiment_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_location: Option<String>,
    #[serde(default = "active")]
    pub lifecycle_stage: String,
}

fn active() -> String {
    "active".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Scheduled,
    Finished,
    Failed,
    Killed,
}

/// Which runs a search returns, by lifecycle stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViewType {
    #[default]
    ActiveOnly,
    DeletedOnly,
    All,
}

impl ViewType {
    pub fn admits(&self, lifecycle_stage: &str) -> bool {
        match self {
            ViewType::ActiveOnly => lifecycle_stage == "active",
            ViewType::DeletedOnly => lifecycle_stage == "deleted",
            ViewType::All => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    pub experiment_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_name: Option<String>,
    pub status: RunStatus,
    #[serde(deserialize_with = "lenient_i64")]
    pub start_time: i64,
    #[serde(default, deserialize_with = "lenient_opt_i64", skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    pub artifact_uri: String,
    #[serde(default = "active")]
    pub lifecycle_stage: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub key: String,
    pub value: f64,
    #[serde(deserialize_with = "lenient_i64")]
    pub timestamp: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub step: i64,
}

impl Metric {
    pub fn new(key: impl Into<String>, value: f64) -> Self {
        Self {
            key: key.into(),
            value,
            timestamp: now_millis(),
            step: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub key: String,
    pub value: String,
}

impl Param {
    pub fn new(key: impl Into<String>, value: impl ToString) -> Self {
        Self {
            key: key.into(),
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTag {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunData {
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub params: Vec<Param>,
    #[serde(default)]
    pub tags: Vec<RunTag>,
}

impl RunData {
    /// Latest value logged for `key`
    pub fn metric(&self, key: &str) -> Option<f64> {
        self.metrics
            .iter()
            .filter(|m| m.key == key)
            .max_by_key(|m| (m.step, m.timestamp))
            .map(|m| m.value)
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.iter().find(|p| p.key == key).map(|p| p.value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub info: RunInfo,
    #[serde(default)]
    pub data: RunData,
}

/// One `order_by` clause: `metrics.<key> ASC|DESC`, `params.<key>` or
/// `attributes.<field>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub kind: OrderKind,
    pub key: String,
    pub ascending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKind {
    Metric,
    Param,
    Attribute,
}

impl OrderBy {
    pub fn parse(clause: &str) -> Option<Self> {
        let mut parts = clause.split_whitespace();
        let field = parts.next()?;
        let ascending = match parts.next().map(|d| d.to_ascii_uppercase()) {
            None => true,
            Some(d) if d == "ASC" => true,
            Some(d) if d == "DESC" => false,
            Some(_) => return None,
        };
        let (prefix, key) = field.split_once('.')?;
        let kind = match prefix {
            "metrics" | "metric" => OrderKind::Metric,
            "params" | "param" => OrderKind::Param,
            "attributes" | "attribute" | "attr" => OrderKind::Attribute,
            _ => return None,
        };
        Some(Self {
            kind,
            key: key.trim_matches('`').to_string(),
            ascending,
        })
    }

    /// Compare two runs; runs missing the key always sort last
    pub fn compare(&self, a: &Run, b: &Run) -> Ordering {
        match self.kind {
            OrderKind::Metric => cmp_missing_last(a.data.metric(&self.key), b.data.metric(&self.key), |x, y| x.total_cmp(y), self.ascending),
            OrderKind::Param => cmp_missing_last(a.data.param(&self.key), b.data.param(&self.key), |x, y| x.cmp(y), self.ascending),
            OrderKind::Attribute => match self.key.as_str() {
                "start_time" => directed(a.info.start_time.cmp(&b.info.start_time), self.ascending),
                "end_time" => cmp_missing_last(a.info.end_time, b.info.end_time, |x, y| x.cmp(y), self.ascending),
                "run_name" => cmp_missing_last(a.info.run_name.as_deref(), b.info.run_name.as_deref(), |x, y| x.cmp(y), self.ascending),
                _ => directed(a.info.run_id.cmp(&b.info.run_id), self.ascending),
            },
        }
    }
}

fn directed(ord: Ordering, ascending: bool) -> Ordering {
    if ascending {
        ord
    } else {
        ord.reverse()
    }
}

fn cmp_missing_last<T>(a: Option<T>, b: Option<T>, cmp: impl Fn(&T, &T) -> Ordering, ascending: bool) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => directed(cmp(&x, &y), ascending),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Parameters of a run search
#[derive(Debug, Clone, Serialize)]
pub struct SearchQuery {
    pub experiment_ids: Vec<String>,
    pub run_view_type: ViewType,
    pub max_results: usize,
    pub order_by: Vec<String>,
}

impl SearchQuery {
    pub fn new(experiment_id: impl Into<String>) -> Self {
        Self {
            experiment_ids: vec![experiment_id.into()],
            run_view_type: ViewType::ActiveOnly,
            max_results: 1000,
            order_by: Vec::new(),
        }
    }

    pub fn view_type(mut self, view: ViewType) -> Self {
        self.run_view_type = view;
        self
    }

    pub fn max_results(mut self, n: usize) -> Self {
        self.max_results = n;
        self
    }

    pub fn order_by(mut self, clause: impl Into<String>) -> Self {
        self.order_by.push(clause.into());
        self
    }

    pub(crate) fn parsed_order(&self) -> Vec<OrderBy> {
        self.order_by.iter().filter_map(|c| OrderBy::parse(c)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelVersionStatus {
    PendingRegistration,
    FailedRegistration,
    Ready,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub name: String,
    pub version: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub status: ModelVersionStatus,
    #[serde(default, deserialize_with = "lenient_opt_i64", skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredModel {
    pub name: String,
    #[serde(default, deserialize_with = "lenient_opt_i64", skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<i64>,
}
