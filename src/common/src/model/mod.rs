//! Data model shared by the compiler, post-processing and cache layers.

pub mod query;
pub mod series;
pub mod telemetry;
pub mod value;

pub use query::{
    BuilderSpec, ClickHouseQuery, CompositeQuery, DEFAULT_ORDER_BY_KEY, Filter, FormatOptions,
    Function, FunctionArg, FunctionArgValue, FunctionName, GroupByKey, Having, LogAggregation,
    MetricAggregation, OrderBy, OrderDirection, PromQuery, QueryBuilderFormula, QueryBuilderJoin,
    QueryBuilderQuery, QueryEnvelope, QueryRangeRequest, ReduceTo, SecondaryAggregation,
    SpaceAggregation, Temporality, TimeAggregation, TraceAggregation, VariableItem, VariableType,
};
pub use series::{
    AggregationBucket, ColumnDescriptor, ColumnType, ExecStats, Label, QueryResult, RawData,
    RequestType, ResultValue, ScalarData, TimeRange, TimeSeries, TimeSeriesData, TimeSeriesValue,
    is_label_subset, series_key,
};
pub use telemetry::{FieldContext, FieldDataType, Signal, TelemetryFieldKey};
pub use value::Value;
