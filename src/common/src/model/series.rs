use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::telemetry::TelemetryFieldKey;
use super::value::Value;

/// The shape of result a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Scalar,
    #[default]
    TimeSeries,
    Raw,
    Trace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub key: TelemetryFieldKey,
    pub value: Value,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: TelemetryFieldKey::new(name),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesValue {
    pub timestamp: i64,
    pub value: f64,
    /// Set on points whose bucket was still open when the query ran.
    #[serde(default)]
    pub partial: bool,
}

impl TimeSeriesValue {
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self {
            timestamp,
            value,
            partial: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub labels: Vec<Label>,
    pub values: Vec<TimeSeriesValue>,
}

impl TimeSeries {
    pub fn new(labels: Vec<Label>, values: Vec<TimeSeriesValue>) -> Self {
        Self { labels, values }
    }

    pub fn label(&self, name: &str) -> Option<&Value> {
        self.labels
            .iter()
            .find(|label| label.key.name == name)
            .map(|label| &label.value)
    }

    /// Deterministic identity of the label set, independent of label order.
    pub fn series_key(&self) -> String {
        series_key(&self.labels)
    }
}

/// Sorted `name=value` pairs joined with `,`.
pub fn series_key(labels: &[Label]) -> String {
    let sorted: BTreeMap<&str, String> = labels
        .iter()
        .map(|label| (label.key.name.as_str(), label.value.to_string()))
        .collect();
    sorted
        .into_iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// True when every label of `subset` appears in `superset` with the same value.
pub fn is_label_subset(superset: &[Label], subset: &[Label]) -> bool {
    subset.iter().all(|needle| {
        superset
            .iter()
            .any(|label| label.key.name == needle.key.name && label.value == needle.value)
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationBucket {
    pub index: usize,
    pub alias: String,
    pub series: Vec<TimeSeries>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesData {
    pub query_name: String,
    pub aggregations: Vec<AggregationBucket>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Group,
    Aggregation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub name: String,
    pub query_name: String,
    pub aggregation_index: usize,
    pub column_type: ColumnType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalarData {
    pub query_name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub data: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawData {
    pub query_name: String,
    pub rows: Vec<BTreeMap<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultValue {
    TimeSeries(TimeSeriesData),
    Scalar(ScalarData),
    Raw(RawData),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecStats {
    pub rows_scanned: u64,
    pub bytes_scanned: u64,
    pub duration_ms: u64,
}

impl std::ops::AddAssign for ExecStats {
    fn add_assign(&mut self, other: Self) {
        self.rows_scanned += other.rows_scanned;
        self.bytes_scanned += other.bytes_scanned;
        self.duration_ms += other.duration_ms;
    }
}

/// The execution-time result of one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub request_type: RequestType,
    pub value: Option<ResultValue>,
    pub stats: ExecStats,
    pub warnings: Vec<String>,
}

impl QueryResult {
    pub fn time_series(data: TimeSeriesData) -> Self {
        Self {
            request_type: RequestType::TimeSeries,
            value: Some(ResultValue::TimeSeries(data)),
            ..Self::default()
        }
    }

    pub fn as_time_series(&self) -> Option<&TimeSeriesData> {
        match &self.value {
            Some(ResultValue::TimeSeries(data)) => Some(data),
            _ => None,
        }
    }

    pub fn as_time_series_mut(&mut self) -> Option<&mut TimeSeriesData> {
        match &mut self.value {
            Some(ResultValue::TimeSeries(data)) => Some(data),
            _ => None,
        }
    }
}

/// A half-open `[from, to)` window in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: u64,
    pub to: u64,
}

impl TimeRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_key_is_order_independent() {
        let a = vec![Label::new("service", "redis"), Label::new("host", "a")];
        let b = vec![Label::new("host", "a"), Label::new("service", "redis")];
        assert_eq!(series_key(&a), series_key(&b));
        assert_eq!(series_key(&a), "host=a,service=redis");
    }

    #[test]
    fn test_label_subset() {
        let full = vec![Label::new("service", "redis"), Label::new("op", "GET")];
        let part = vec![Label::new("service", "redis")];
        let other = vec![Label::new("service", "mysql")];
        assert!(is_label_subset(&full, &part));
        assert!(is_label_subset(&full, &[]));
        assert!(!is_label_subset(&part, &full));
        assert!(!is_label_subset(&full, &other));
    }
}
