use std::collections::HashMap;
use std::sync::Arc;

use common::model::{
    FieldContext, FieldDataType, QueryBuilderQuery, RequestType, Signal, TelemetryFieldKey,
    TraceAggregation, Value,
};
use querier::query::ConditionBuilder;
use querier::query::error::QueryError;
use querier::query::keys::InMemoryMetadataStore;
use querier::query::operator::FilterOperator;
use querier::query::resource_filter::{
    ResourceConditionBuilder, ResourceFieldMapper, ResourceFilterStatementBuilder,
};
use querier::query::statement::{SqlBuilder, Statement};

const START: u64 = 1747947419000000000;
const END: u64 = 1747983448000000000;

const ALL_OPERATORS: [FilterOperator; 20] = [
    FilterOperator::Equal,
    FilterOperator::NotEqual,
    FilterOperator::GreaterThan,
    FilterOperator::GreaterThanOrEq,
    FilterOperator::LessThan,
    FilterOperator::LessThanOrEq,
    FilterOperator::Like,
    FilterOperator::NotLike,
    FilterOperator::ILike,
    FilterOperator::NotILike,
    FilterOperator::Between,
    FilterOperator::NotBetween,
    FilterOperator::In,
    FilterOperator::NotIn,
    FilterOperator::Exists,
    FilterOperator::NotExists,
    FilterOperator::Regexp,
    FilterOperator::NotRegexp,
    FilterOperator::Contains,
    FilterOperator::NotContains,
];

fn condition_builder() -> ResourceConditionBuilder {
    ResourceConditionBuilder::new(ResourceFieldMapper::new())
}

fn statement_builder() -> ResourceFilterStatementBuilder {
    let store: InMemoryMetadataStore = [
        TelemetryFieldKey::resource("service.name").with_data_type(FieldDataType::String),
        TelemetryFieldKey::attribute("http.method").with_data_type(FieldDataType::String),
    ]
    .into_iter()
    .collect();
    ResourceFilterStatementBuilder::new(Signal::Traces, Arc::new(store))
}

fn compile(filter: &str) -> Statement {
    let query: QueryBuilderQuery<TraceAggregation> =
        QueryBuilderQuery::new("A", Signal::Traces).with_filter(filter);
    statement_builder()
        .build(START, END, RequestType::TimeSeries, &query, &HashMap::new())
        .unwrap()
}

#[test]
fn test_non_resource_keys_always_pass_through() {
    let contexts = [
        FieldContext::Attribute,
        FieldContext::Span,
        FieldContext::Log,
        FieldContext::Scope,
        FieldContext::Body,
        FieldContext::Metric,
        FieldContext::Unspecified,
    ];
    let values = [
        Value::from("redis"),
        Value::Int64(3),
        Value::List(vec![Value::from("a")]),
    ];
    let builder = condition_builder();

    for context in contexts {
        let key = TelemetryFieldKey::new("service.name").with_context(context);
        for operator in ALL_OPERATORS {
            for value in &values {
                let mut sb = SqlBuilder::new();
                let condition = builder.condition_for(&key, operator, value, &mut sb).unwrap();
                assert_eq!(condition, "true", "{context:?} {operator:?} {value:?}");
                assert!(sb.args().is_empty());
            }
        }
    }
}

#[test]
fn test_between_needs_exactly_two_values() {
    let key = TelemetryFieldKey::resource("service.name");
    let builder = condition_builder();
    let bad = [
        Value::from("x"),
        Value::List(vec![Value::Int64(1)]),
        Value::List(vec![Value::Int64(1), Value::Int64(2), Value::Int64(3)]),
    ];

    for operator in [FilterOperator::Between, FilterOperator::NotBetween] {
        for value in &bad {
            let err = builder
                .condition_for(&key, operator, value, &mut SqlBuilder::new())
                .unwrap_err();
            assert_eq!(err, QueryError::BetweenValues);
        }
        let ok = Value::List(vec![Value::Int64(1), Value::Int64(2)]);
        assert!(
            builder
                .condition_for(&key, operator, &ok, &mut SqlBuilder::new())
                .is_ok()
        );
    }
}

#[test]
fn test_negated_passthrough_matches_plain_form() {
    for inner in ["unknown.key = 'v'", "attribute.http.method = 'GET'"] {
        let plain = compile(inner);
        let negated = compile(&format!("NOT ({inner})"));
        assert_eq!(negated, plain);
        assert!(!negated.query.contains("NOT (true)"));
    }
}

#[test]
fn test_bucket_window_bounds() {
    let stmt = compile("");
    assert_eq!(
        stmt.args,
        vec![Value::Int64(1747945619), Value::Int64(1747983448)]
    );
    assert!(
        stmt.query
            .ends_with("seen_at_ts_bucket_start >= ? AND seen_at_ts_bucket_start <= ?")
    );
}

#[test]
fn test_equality_statement_shape() {
    let stmt = compile("service.name = 'redis-manual'");
    assert_eq!(
        stmt.query,
        "SELECT fingerprint FROM signoz_traces.distributed_traces_v3_resource WHERE (extract(labels,'service.name') = ? AND labels LIKE ? AND labels LIKE ?) AND seen_at_ts_bucket_start >= ? AND seen_at_ts_bucket_start <= ?"
    );
    assert_eq!(
        stmt.args,
        vec![
            Value::from("redis-manual"),
            Value::from("%service.name%"),
            Value::from("%service.name\":\"redis-manual%"),
            Value::Int64(1747945619),
            Value::Int64(1747983448),
        ]
    );
}

#[test]
fn test_mixed_filter_keeps_only_resource_conditions() {
    let stmt = compile("service.name = 'redis' AND http.method = 'GET'");
    let plain = compile("service.name = 'redis'");
    assert_eq!(stmt.query, plain.query);
    assert_eq!(stmt.args, plain.args);
}
