use std::collections::HashMap;
use std::time::Duration;

use common::model::{
    BuilderSpec, CompositeQuery, Function, FunctionName, QueryBuilderFormula, QueryBuilderQuery,
    QueryEnvelope, QueryRangeRequest, RequestType, Signal, TimeSeries, TimeSeriesData,
    TraceAggregation,
};
use common::testing::{series, time_series_data, time_series_result, values};
use querier::postprocess::PostProcessor;
use querier::postprocess::formula::FormulaEvaluator;
use querier::postprocess::functions::{apply_functions, fill_zero, median};
use querier::postprocess::limit::apply_limit;

fn formula_inputs() -> HashMap<String, TimeSeriesData> {
    HashMap::from([
        (
            "A".to_string(),
            time_series_data("A", vec![series(&[("service", "api")], &[(60_000, 4.0)])]),
        ),
        (
            "B".to_string(),
            time_series_data("B", vec![series(&[("service", "db")], &[(60_000, 6.0)])]),
        ),
    ])
}

#[test]
fn test_formula_exclusion_without_default_zero() {
    let defaults = HashMap::from([("A".to_string(), false), ("B".to_string(), false)]);
    let evaluator = FormulaEvaluator::new("A + B", &defaults).unwrap();
    assert!(evaluator.evaluate(&formula_inputs()).is_empty());
}

#[test]
fn test_formula_default_zero_fills_missing_side() {
    let defaults = HashMap::from([("A".to_string(), true), ("B".to_string(), true)]);
    let evaluator = FormulaEvaluator::new("A + B", &defaults).unwrap();
    let out = evaluator.evaluate(&formula_inputs());

    assert_eq!(out.len(), 2);
    let mut sums: Vec<f64> = out.iter().flat_map(values).collect();
    sums.sort_by(f64::total_cmp);
    assert_eq!(sums, vec![4.0, 6.0]);
}

#[test]
fn test_cutoff_then_cumulative_sum() {
    let input = series(
        &[],
        &[(1, 0.5), (2, 0.2), (3, 0.1), (4, 0.4), (5, 0.3)],
    );
    let functions = vec![
        Function::with_args(FunctionName::CutOffMin, [0.3]),
        Function::new(FunctionName::CumulativeSum),
    ];
    let out = apply_functions(&functions, &input);

    let expected = [0.5, 0.5, 0.5, 0.9, 1.2];
    assert_eq!(out.values.len(), expected.len());
    for (got, want) in values(&out).iter().zip(expected) {
        assert!((got - want).abs() < 1e-9, "{got} != {want}");
    }
}

#[test]
fn test_median_keeps_edges() {
    let input = series(
        &[],
        &[(1, 5.0), (2, 3.0), (3, 8.0), (4, 2.0), (5, 7.0)],
    );
    assert_eq!(values(&median(&input, 3)), vec![5.0, 5.0, 3.0, 7.0, 7.0]);

    let via_function = apply_functions(&[Function::new(FunctionName::Median3)], &input);
    assert_eq!(values(&via_function), vec![5.0, 5.0, 3.0, 7.0, 7.0]);
}

#[test]
fn test_fill_zero_aligns_to_step() {
    let input = series(&[], &[(60_000, 1.0), (120_000, 2.0), (240_000, 4.0)]);
    let out = fill_zero(&input, 50_000, 250_000, 60_000);

    let points: Vec<(i64, f64)> = out.values.iter().map(|p| (p.timestamp, p.value)).collect();
    assert_eq!(
        points,
        vec![
            (0, 0.0),
            (60_000, 1.0),
            (120_000, 2.0),
            (180_000, 0.0),
            (240_000, 4.0),
            (300_000, 0.0),
        ]
    );
}

fn ranked(name: &str, value: f64) -> TimeSeries {
    series(&[("service", name)], &[(0, value)])
}

#[test]
fn test_limit_orders_by_value_descending() {
    let input = vec![
        ranked("a", 10.0),
        ranked("b", 50.0),
        ranked("c", 30.0),
        ranked("d", 20.0),
    ];
    let out = apply_limit(&input, &[], 2);
    assert_eq!(out.len(), 2);
    assert_eq!(values(&out[0]), vec![50.0]);
    assert_eq!(values(&out[1]), vec![30.0]);

    // same input, same answer
    assert_eq!(apply_limit(&input, &[], 2), out);
}

#[test]
fn test_request_with_formula_and_hidden_inputs() {
    let query = |name: &str| {
        let mut q: QueryBuilderQuery<TraceAggregation> = QueryBuilderQuery::new(name, Signal::Traces)
            .with_step(Duration::from_secs(60))
            .with_aggregation(TraceAggregation {
                expression: "count()".into(),
                alias: String::new(),
            });
        q.disabled = true;
        QueryEnvelope::Builder(BuilderSpec::Traces(q))
    };
    let mut formula = QueryBuilderFormula::new("F1", "A * 100 / B");
    formula.functions = vec![Function::with_args(FunctionName::ClampMax, [50.0])];

    let request = QueryRangeRequest {
        start: 0,
        end: 120_000,
        request_type: RequestType::TimeSeries,
        composite_query: CompositeQuery {
            queries: vec![query("A"), query("B"), QueryEnvelope::Formula(formula)],
        },
        ..QueryRangeRequest::default()
    };
    let results = HashMap::from([
        (
            "A".to_string(),
            time_series_result("A", vec![series(&[], &[(0, 1.0), (60_000, 3.0)])]),
        ),
        (
            "B".to_string(),
            time_series_result("B", vec![series(&[], &[(0, 4.0), (60_000, 4.0)])]),
        ),
    ]);

    let out = PostProcessor::default().process(results, &request);
    assert_eq!(out.len(), 1);
    let data = out["F1"].as_time_series().unwrap();
    assert_eq!(values(&data.aggregations[0].series[0]), vec![25.0, 50.0]);
}
