//! Query builder request types.
//!
//! A request carries a list of [`QueryEnvelope`]s. Builder queries are generic
//! over their aggregation kind so trace, log and metric queries share the
//! filter/group-by/order/limit plumbing.

use std::collections::HashMap;
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};

use super::series::RequestType;
use super::telemetry::{Signal, TelemetryFieldKey};

/// Key used to order series by their representative value.
pub const DEFAULT_ORDER_BY_KEY: &str = "__result";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub expression: String,
}

impl Filter {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupByKey(pub TelemetryFieldKey);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub key: TelemetryFieldKey,
    #[serde(default)]
    pub direction: OrderDirection,
}

impl OrderBy {
    pub fn new(name: impl Into<String>, direction: OrderDirection) -> Self {
        Self {
            key: TelemetryFieldKey::new(name),
            direction,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Having {
    pub expression: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecondaryAggregation {
    pub expression: String,
    pub alias: String,
    pub limit: usize,
    pub order: Vec<OrderBy>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReduceTo {
    #[default]
    #[serde(rename = "")]
    Unknown,
    Sum,
    Count,
    Avg,
    Min,
    Max,
    Last,
    Median,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceAggregation {
    pub expression: String,
    pub alias: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogAggregation {
    pub expression: String,
    pub alias: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Temporality {
    Delta,
    Cumulative,
    #[default]
    #[serde(rename = "")]
    Unspecified,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeAggregation {
    Latest,
    Sum,
    Avg,
    Min,
    Max,
    Count,
    CountDistinct,
    Rate,
    Increase,
    #[default]
    #[serde(rename = "")]
    Unspecified,
}

impl TimeAggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeAggregation::Latest => "latest",
            TimeAggregation::Sum => "sum",
            TimeAggregation::Avg => "avg",
            TimeAggregation::Min => "min",
            TimeAggregation::Max => "max",
            TimeAggregation::Count => "count",
            TimeAggregation::CountDistinct => "count_distinct",
            TimeAggregation::Rate => "rate",
            TimeAggregation::Increase => "increase",
            TimeAggregation::Unspecified => "",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpaceAggregation {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    P50,
    P75,
    P90,
    P95,
    P99,
    #[default]
    #[serde(rename = "")]
    Unspecified,
}

impl SpaceAggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpaceAggregation::Sum => "sum",
            SpaceAggregation::Avg => "avg",
            SpaceAggregation::Min => "min",
            SpaceAggregation::Max => "max",
            SpaceAggregation::Count => "count",
            SpaceAggregation::P50 => "p50",
            SpaceAggregation::P75 => "p75",
            SpaceAggregation::P90 => "p90",
            SpaceAggregation::P95 => "p95",
            SpaceAggregation::P99 => "p99",
            SpaceAggregation::Unspecified => "",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricAggregation {
    pub metric_name: String,
    pub temporality: Temporality,
    pub time_aggregation: TimeAggregation,
    pub space_aggregation: SpaceAggregation,
    pub reduce_to: ReduceTo,
}

/// Post-processing function names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FunctionName {
    CutOffMin,
    CutOffMax,
    ClampMin,
    ClampMax,
    Absolute,
    RunningDiff,
    Log2,
    Log10,
    CumulativeSum,
    Ewma3,
    Ewma5,
    Ewma7,
    Median3,
    Median5,
    Median7,
    TimeShift,
    Anomaly,
    FillZero,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FunctionArgValue {
    Number(f64),
    Text(String),
}

impl FunctionArgValue {
    /// Numeric view of the argument; text is parsed leniently.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FunctionArgValue::Number(v) => Some(*v),
            FunctionArgValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionArg {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub value: FunctionArgValue,
}

impl FunctionArg {
    pub fn number(value: f64) -> Self {
        Self {
            name: None,
            value: FunctionArgValue::Number(value),
        }
    }

    pub fn named(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: Some(name.into()),
            value: FunctionArgValue::Number(value),
        }
    }
}

/// One declarative post-processing step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: FunctionName,
    #[serde(default)]
    pub args: Vec<FunctionArg>,
}

impl Function {
    pub fn new(name: FunctionName) -> Self {
        Self {
            name,
            args: Vec::new(),
        }
    }

    pub fn with_args(name: FunctionName, args: impl IntoIterator<Item = f64>) -> Self {
        Self {
            name,
            args: args.into_iter().map(FunctionArg::number).collect(),
        }
    }
}

/// A builder query, generic over its aggregation kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(deserialize = "A: Deserialize<'de>"))]
pub struct QueryBuilderQuery<A> {
    pub name: String,
    #[serde(default, with = "humantime_serde")]
    pub step_interval: Option<Duration>,
    #[serde(default)]
    pub signal: Signal,
    #[serde(default)]
    pub aggregations: Vec<A>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub filter: Option<Filter>,
    #[serde(default)]
    pub group_by: Vec<GroupByKey>,
    #[serde(default)]
    pub order: Vec<OrderBy>,
    #[serde(default)]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub having: Option<Having>,
    #[serde(default)]
    pub functions: Vec<Function>,
    #[serde(default)]
    pub secondary_aggregations: Vec<SecondaryAggregation>,
}

impl<A> QueryBuilderQuery<A> {
    pub fn new(name: impl Into<String>, signal: Signal) -> Self {
        Self {
            name: name.into(),
            step_interval: None,
            signal,
            aggregations: Vec::new(),
            disabled: false,
            filter: None,
            group_by: Vec::new(),
            order: Vec::new(),
            limit: 0,
            offset: 0,
            having: None,
            functions: Vec::new(),
            secondary_aggregations: Vec::new(),
        }
    }

    pub fn with_filter(mut self, expression: impl Into<String>) -> Self {
        self.filter = Some(Filter::new(expression));
        self
    }

    pub fn with_step(mut self, step: Duration) -> Self {
        self.step_interval = Some(step);
        self
    }

    pub fn with_aggregation(mut self, aggregation: A) -> Self {
        self.aggregations.push(aggregation);
        self
    }

    pub fn filter_expression(&self) -> Option<&str> {
        self.filter.as_ref().map(|f| f.expression.as_str())
    }
}

/// Builder query specs, one variant per aggregation kind.
///
/// On the wire the variant is selected by the query's `signal` field.
#[derive(Debug, Clone, PartialEq)]
pub enum BuilderSpec {
    Traces(QueryBuilderQuery<TraceAggregation>),
    Logs(QueryBuilderQuery<LogAggregation>),
    Metrics(QueryBuilderQuery<MetricAggregation>),
}

impl BuilderSpec {
    pub fn name(&self) -> &str {
        match self {
            BuilderSpec::Traces(q) => &q.name,
            BuilderSpec::Logs(q) => &q.name,
            BuilderSpec::Metrics(q) => &q.name,
        }
    }

    pub fn signal(&self) -> Signal {
        match self {
            BuilderSpec::Traces(_) => Signal::Traces,
            BuilderSpec::Logs(_) => Signal::Logs,
            BuilderSpec::Metrics(_) => Signal::Metrics,
        }
    }

    pub fn step_interval(&self) -> Option<Duration> {
        match self {
            BuilderSpec::Traces(q) => q.step_interval,
            BuilderSpec::Logs(q) => q.step_interval,
            BuilderSpec::Metrics(q) => q.step_interval,
        }
    }

    pub fn is_disabled(&self) -> bool {
        match self {
            BuilderSpec::Traces(q) => q.disabled,
            BuilderSpec::Logs(q) => q.disabled,
            BuilderSpec::Metrics(q) => q.disabled,
        }
    }

    /// Whether a formula may treat this query's missing series as zero.
    ///
    /// Counting and summing aggregations have a natural zero; averages,
    /// percentiles and gauges do not.
    pub fn can_default_zero(&self) -> bool {
        fn counting_expression(expression: &str) -> bool {
            let lowered = expression.trim().to_ascii_lowercase();
            ["count", "count_distinct", "sum", "rate"]
                .iter()
                .any(|f| lowered.starts_with(&format!("{f}(")))
        }

        match self {
            BuilderSpec::Traces(q) => q
                .aggregations
                .first()
                .is_some_and(|a| counting_expression(&a.expression)),
            BuilderSpec::Logs(q) => q
                .aggregations
                .first()
                .is_some_and(|a| counting_expression(&a.expression)),
            BuilderSpec::Metrics(q) => q.aggregations.first().is_some_and(|a| {
                matches!(
                    a.time_aggregation,
                    TimeAggregation::Count
                        | TimeAggregation::CountDistinct
                        | TimeAggregation::Sum
                        | TimeAggregation::Rate
                        | TimeAggregation::Increase
                ) && matches!(
                    a.space_aggregation,
                    SpaceAggregation::Sum | SpaceAggregation::Count | SpaceAggregation::Unspecified
                )
            }),
        }
    }
}

impl Serialize for BuilderSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            BuilderSpec::Traces(q) => q.serialize(serializer),
            BuilderSpec::Logs(q) => q.serialize(serializer),
            BuilderSpec::Metrics(q) => q.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for BuilderSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        let signal = raw
            .get("signal")
            .cloned()
            .map(serde_json::from_value::<Signal>)
            .transpose()
            .map_err(de::Error::custom)?
            .unwrap_or_default();

        let spec = match signal {
            Signal::Traces => serde_json::from_value(raw).map(BuilderSpec::Traces),
            Signal::Logs => serde_json::from_value(raw).map(BuilderSpec::Logs),
            Signal::Metrics => serde_json::from_value(raw).map(BuilderSpec::Metrics),
            Signal::Unspecified => {
                return Err(de::Error::custom("builder query is missing its signal"));
            }
        };
        spec.map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryBuilderFormula {
    pub name: String,
    pub expression: String,
    pub disabled: bool,
    pub order: Vec<OrderBy>,
    pub limit: usize,
    pub functions: Vec<Function>,
    pub having: Option<Having>,
}

impl QueryBuilderFormula {
    pub fn new(name: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expression: expression.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryBuilderJoin {
    pub name: String,
    pub disabled: bool,
    pub left: String,
    pub right: String,
    pub on: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromQuery {
    pub name: String,
    pub query: String,
    pub disabled: bool,
    #[serde(with = "humantime_serde")]
    pub step: Option<Duration>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickHouseQuery {
    pub name: String,
    pub query: String,
    pub disabled: bool,
}

/// One query of a composite request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "spec")]
pub enum QueryEnvelope {
    #[serde(rename = "builder_query")]
    Builder(BuilderSpec),
    #[serde(rename = "builder_formula")]
    Formula(QueryBuilderFormula),
    #[serde(rename = "builder_join")]
    Join(QueryBuilderJoin),
    #[serde(rename = "promql")]
    PromQL(PromQuery),
    #[serde(rename = "clickhouse_sql")]
    ClickHouseSql(ClickHouseQuery),
}

impl QueryEnvelope {
    pub fn name(&self) -> &str {
        match self {
            QueryEnvelope::Builder(spec) => spec.name(),
            QueryEnvelope::Formula(f) => &f.name,
            QueryEnvelope::Join(j) => &j.name,
            QueryEnvelope::PromQL(p) => &p.name,
            QueryEnvelope::ClickHouseSql(c) => &c.name,
        }
    }

    pub fn is_disabled(&self) -> bool {
        match self {
            QueryEnvelope::Builder(spec) => spec.is_disabled(),
            QueryEnvelope::Formula(f) => f.disabled,
            QueryEnvelope::Join(j) => j.disabled,
            QueryEnvelope::PromQL(p) => p.disabled,
            QueryEnvelope::ClickHouseSql(c) => c.disabled,
        }
    }

    pub fn step_interval(&self) -> Option<Duration> {
        match self {
            QueryEnvelope::Builder(spec) => spec.step_interval(),
            QueryEnvelope::PromQL(p) => p.step,
            _ => None,
        }
    }

    /// Stable identity of the query, excluding its time window.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        let digest = Sha256::digest(canonical.as_bytes());
        hex::encode(digest)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    Query,
    #[default]
    Custom,
    Textbox,
    Dynamic,
}

/// A dashboard variable value supplied with a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableItem {
    #[serde(rename = "type", default)]
    pub kind: VariableType,
    pub value: serde_json::Value,
}

impl VariableItem {
    pub fn new(kind: VariableType, value: serde_json::Value) -> Self {
        Self { kind, value }
    }

    /// Dynamic variables set to `__all__` disable the filter that uses them.
    pub fn selects_all(&self) -> bool {
        self.kind == VariableType::Dynamic && self.value.as_str() == Some("__all__")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompositeQuery {
    pub queries: Vec<QueryEnvelope>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormatOptions {
    pub fill_gaps: bool,
}

/// A query range request; `start`/`end` are epoch milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryRangeRequest {
    pub start: u64,
    pub end: u64,
    pub request_type: RequestType,
    pub composite_query: CompositeQuery,
    pub variables: HashMap<String, VariableItem>,
    pub no_cache: bool,
    pub format_options: FormatOptions,
}

impl QueryRangeRequest {
    /// Per query name, whether formulas may default its missing series to zero.
    pub fn queries_supporting_zero_default(&self) -> HashMap<String, bool> {
        self.composite_query
            .queries
            .iter()
            .filter_map(|query| match query {
                QueryEnvelope::Builder(spec) => {
                    Some((spec.name().to_string(), spec.can_default_zero()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn find_query(&self, name: &str) -> Option<&QueryEnvelope> {
        self.composite_query.queries.iter().find(|q| q.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_json_selects_builder_variant_by_signal() {
        let json = r#"{
            "type": "builder_query",
            "spec": {
                "name": "A",
                "signal": "logs",
                "stepInterval": "60s",
                "aggregations": [{"expression": "count()"}],
                "filter": {"expression": "service.name = 'redis'"}
            }
        }"#;
        let envelope: QueryEnvelope = serde_json::from_str(json).unwrap();
        match &envelope {
            QueryEnvelope::Builder(BuilderSpec::Logs(q)) => {
                assert_eq!(q.name, "A");
                assert_eq!(q.step_interval, Some(Duration::from_secs(60)));
                assert_eq!(q.filter_expression(), Some("service.name = 'redis'"));
            }
            other => panic!("unexpected envelope {other:?}"),
        }
        assert_eq!(envelope.name(), "A");
        assert!(envelope.fingerprint().len() == 64);
    }

    #[test]
    fn test_builder_without_signal_is_rejected() {
        let json = r#"{"type": "builder_query", "spec": {"name": "A"}}"#;
        assert!(serde_json::from_str::<QueryEnvelope>(json).is_err());
    }

    #[test]
    fn test_formula_envelope() {
        let json = r#"{"type": "builder_formula", "spec": {"name": "F1", "expression": "A / B"}}"#;
        let envelope: QueryEnvelope = serde_json::from_str(json).unwrap();
        assert!(matches!(envelope, QueryEnvelope::Formula(ref f) if f.expression == "A / B"));
    }

    #[test]
    fn test_fingerprint_tracks_query_content() {
        let a = QueryEnvelope::Builder(BuilderSpec::Traces(
            QueryBuilderQuery::new("A", Signal::Traces).with_filter("service.name = 'redis'"),
        ));
        let b = QueryEnvelope::Builder(BuilderSpec::Traces(
            QueryBuilderQuery::new("A", Signal::Traces).with_filter("service.name = 'mysql'"),
        ));
        assert_eq!(a.fingerprint(), a.clone().fingerprint());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_zero_default_support() {
        let request = QueryRangeRequest {
            composite_query: CompositeQuery {
                queries: vec![
                    QueryEnvelope::Builder(BuilderSpec::Traces(
                        QueryBuilderQuery::new("A", Signal::Traces).with_aggregation(
                            TraceAggregation {
                                expression: "count()".into(),
                                alias: String::new(),
                            },
                        ),
                    )),
                    QueryEnvelope::Builder(BuilderSpec::Traces(
                        QueryBuilderQuery::new("B", Signal::Traces).with_aggregation(
                            TraceAggregation {
                                expression: "avg(duration_nano)".into(),
                                alias: String::new(),
                            },
                        ),
                    )),
                ],
            },
            ..QueryRangeRequest::default()
        };
        let support = request.queries_supporting_zero_default();
        assert_eq!(support.get("A"), Some(&true));
        assert_eq!(support.get("B"), Some(&false));
    }

    #[test]
    fn test_variable_all_selection() {
        let all = VariableItem::new(VariableType::Dynamic, serde_json::json!("__all__"));
        let custom = VariableItem::new(VariableType::Custom, serde_json::json!("__all__"));
        assert!(all.selects_all());
        assert!(!custom.selects_all());
    }
}
