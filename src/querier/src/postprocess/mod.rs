//! Result post-processing.
//!
//! Once every query of a request has produced its result, the post processor
//! applies per-query series limits and functions, reduces metric results
//! for scalar requests, evaluates formulas over the other results and drops
//! the results of disabled queries.

use std::collections::HashMap;
use std::time::Duration;

use common::config::PostProcessConfig;
use common::model::{
    AggregationBucket, BuilderSpec, ColumnDescriptor, ColumnType, DEFAULT_ORDER_BY_KEY, Function,
    FunctionName, Label, OrderBy, QueryBuilderFormula, QueryEnvelope, QueryRangeRequest,
    QueryResult, ReduceTo, RequestType, ResultValue, ScalarData, TimeSeries, TimeSeriesData,
    TimeSeriesValue, Value,
};
use log::{debug, warn};

pub mod formula;
pub mod functions;
pub mod limit;
pub mod reduce;

use formula::FormulaEvaluator;
use functions::{apply_functions_to_result, prepare_fill_zero_args};
use limit::apply_limit_to_result;
use reduce::{reduce_data, to_scalar};

/// Applies the post-processing stages of a query range request.
#[derive(Debug, Clone)]
pub struct PostProcessor {
    default_step: Duration,
}

impl Default for PostProcessor {
    fn default() -> Self {
        Self::new(&PostProcessConfig::default())
    }
}

fn millis(step: Option<Duration>) -> u64 {
    step.map(|s| s.as_millis() as u64).unwrap_or(0)
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 { a } else { gcd(b, a % b) }
}

/// Order keys naming the query's own aggregation mean "the series value".
fn rewrite_order(order: &[OrderBy], aliases: &[String]) -> Vec<OrderBy> {
    order
        .iter()
        .map(|o| {
            let mut o = o.clone();
            if aliases.iter().any(|a| *a == o.key.name) {
                o.key.name = DEFAULT_ORDER_BY_KEY.to_string();
            }
            o
        })
        .collect()
}

impl PostProcessor {
    pub fn new(config: &PostProcessConfig) -> Self {
        Self {
            default_step: config.default_step,
        }
    }

    /// Process `results`, keyed by query name, for `request`.
    pub fn process(
        &self,
        mut results: HashMap<String, QueryResult>,
        request: &QueryRangeRequest,
    ) -> HashMap<String, QueryResult> {
        for query in &request.composite_query.queries {
            if let QueryEnvelope::Builder(spec) = query
                && let Some(result) = results.get_mut(spec.name())
            {
                self.process_builder_query(result, spec, request);
            }
        }

        for query in &request.composite_query.queries {
            if let QueryEnvelope::Formula(formula) = query
                && let Some(result) = self.process_formula(&results, formula, request)
            {
                results.insert(formula.name.clone(), result);
            }
        }

        let mut results = Self::filter_disabled(results, request);

        if request.request_type == RequestType::TimeSeries && request.format_options.fill_gaps {
            for (name, result) in results.iter_mut() {
                let step = self.step_for_query(name, request);
                self.fill_gaps(result, step, request);
            }
        }

        results
    }

    fn process_builder_query(&self, result: &mut QueryResult, spec: &BuilderSpec, request: &QueryRangeRequest) {
        let (order, limit, functions) = match spec {
            BuilderSpec::Traces(q) => (q.order.clone(), q.limit, &q.functions),
            BuilderSpec::Logs(q) => (q.order.clone(), q.limit, &q.functions),
            BuilderSpec::Metrics(q) => {
                let aliases = q
                    .aggregations
                    .first()
                    .map(|a| {
                        let space = a.space_aggregation.as_str();
                        let time = a.time_aggregation.as_str();
                        vec![
                            format!("{space}({})", a.metric_name),
                            format!("{time}({})", a.metric_name),
                            format!("{space}({time}({}))", a.metric_name),
                        ]
                    })
                    .unwrap_or_default();
                (rewrite_order(&q.order, &aliases), q.limit, &q.functions)
            }
        };

        apply_limit_to_result(result, &order, limit);

        if !functions.is_empty() {
            let step = millis(spec.step_interval());
            let functions = prepare_fill_zero_args(functions, request.start, request.end, step);
            apply_functions_to_result(&functions, result);
        }

        if let BuilderSpec::Metrics(q) = spec
            && request.request_type == RequestType::Scalar
            && let Some(reduce_to) = q.aggregations.first().map(|a| a.reduce_to)
            && reduce_to != ReduceTo::Unknown
        {
            Self::reduce_to_scalar(result, reduce_to);
        }
    }

    fn reduce_to_scalar(result: &mut QueryResult, reduce_to: ReduceTo) {
        let Some(data) = result.as_time_series() else {
            return;
        };
        let scalar = to_scalar(&reduce_data(data, reduce_to));
        result.request_type = RequestType::Scalar;
        result.value = Some(ResultValue::Scalar(scalar));
    }

    fn process_formula(
        &self,
        results: &HashMap<String, QueryResult>,
        formula: &QueryBuilderFormula,
        request: &QueryRangeRequest,
    ) -> Option<QueryResult> {
        let aliases = [formula.name.clone(), formula.expression.clone()];
        let order = rewrite_order(&formula.order, &aliases);

        let evaluator = match FormulaEvaluator::new(
            &formula.expression,
            &request.queries_supporting_zero_default(),
        ) {
            Ok(evaluator) => evaluator,
            Err(e) => {
                warn!("Failed to create evaluator for formula {}: {e}", formula.name);
                return None;
            }
        };

        let mut result = match request.request_type {
            RequestType::TimeSeries => {
                let data: HashMap<String, TimeSeriesData> = results
                    .iter()
                    .filter_map(|(name, r)| r.as_time_series().map(|d| (name.clone(), d.clone())))
                    .collect();
                let series = evaluator.evaluate(&data);
                let mut result = QueryResult::time_series(TimeSeriesData {
                    query_name: formula.name.clone(),
                    aggregations: vec![AggregationBucket {
                        index: 0,
                        alias: String::new(),
                        series,
                    }],
                });
                if !formula.functions.is_empty() {
                    let step = self.formula_step(&evaluator, request);
                    let functions =
                        prepare_fill_zero_args(&formula.functions, request.start, request.end, step);
                    apply_functions_to_result(&functions, &mut result);
                }
                result
            }
            RequestType::Scalar => {
                let data: HashMap<String, TimeSeriesData> = results
                    .iter()
                    .filter_map(|(name, r)| match &r.value {
                        Some(ResultValue::Scalar(scalar)) => {
                            Some((name.clone(), scalar_to_time_series(scalar)))
                        }
                        _ => None,
                    })
                    .collect();
                let series = evaluator.evaluate(&data);
                QueryResult {
                    request_type: RequestType::Scalar,
                    value: Some(ResultValue::Scalar(formula_scalar(&formula.name, &series))),
                    ..QueryResult::default()
                }
            }
            other => {
                debug!("Skipping formula {} for {other:?} request", formula.name);
                return None;
            }
        };

        apply_limit_to_result(&mut result, &order, formula.limit);
        Some(result)
    }

    /// Greatest common divisor of the steps of the queries a formula reads.
    fn formula_step(&self, evaluator: &FormulaEvaluator, request: &QueryRangeRequest) -> u64 {
        let step = evaluator
            .query_names()
            .into_iter()
            .filter_map(|name| request.find_query(name))
            .map(|q| millis(q.step_interval()))
            .filter(|step| *step > 0)
            .fold(0, gcd);
        if step == 0 {
            self.default_step.as_millis() as u64
        } else {
            step
        }
    }

    fn step_for_query(&self, name: &str, request: &QueryRangeRequest) -> u64 {
        match request.find_query(name) {
            Some(QueryEnvelope::Formula(formula)) => {
                match FormulaEvaluator::new(&formula.expression, &HashMap::new()) {
                    Ok(evaluator) => self.formula_step(&evaluator, request),
                    Err(_) => self.default_step.as_millis() as u64,
                }
            }
            Some(query) => match millis(query.step_interval()) {
                0 => self.default_step.as_millis() as u64,
                step => step,
            },
            None => self.default_step.as_millis() as u64,
        }
    }

    fn fill_gaps(&self, result: &mut QueryResult, step: u64, request: &QueryRangeRequest) {
        let Some(data) = result.as_time_series_mut() else {
            return;
        };
        if data.aggregations.is_empty() {
            data.aggregations.push(AggregationBucket {
                index: 0,
                alias: String::new(),
                series: vec![TimeSeries::default()],
            });
        }
        let functions = prepare_fill_zero_args(
            &[Function::new(FunctionName::FillZero)],
            request.start,
            request.end,
            step,
        );
        apply_functions_to_result(&functions, result);
    }

    /// Keep only results of enabled queries named in the request.
    fn filter_disabled(
        mut results: HashMap<String, QueryResult>,
        request: &QueryRangeRequest,
    ) -> HashMap<String, QueryResult> {
        request
            .composite_query
            .queries
            .iter()
            .filter(|q| !q.is_disabled())
            .filter_map(|q| results.remove_entry(q.name()))
            .collect()
    }
}

/// Series view of a scalar table: one bucket per aggregation column, one
/// single-point series at timestamp 0 per row.
fn scalar_to_time_series(scalar: &ScalarData) -> TimeSeriesData {
    let group_columns: Vec<(usize, &ColumnDescriptor)> = scalar
        .columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.column_type == ColumnType::Group)
        .collect();

    let mut aggregations: Vec<AggregationBucket> = scalar
        .columns
        .iter()
        .enumerate()
        .filter(|(_, c)| c.column_type == ColumnType::Aggregation)
        .map(|(position, column)| AggregationBucket {
            index: column.aggregation_index,
            alias: column.name.clone(),
            series: scalar
                .data
                .iter()
                .filter_map(|row| {
                    let value = row.get(position)?.as_f64().filter(|v| !v.is_nan())?;
                    let labels = group_columns
                        .iter()
                        .filter_map(|(i, c)| row.get(*i).map(|v| Label::new(c.name.clone(), v.clone())))
                        .collect();
                    Some(TimeSeries::new(labels, vec![TimeSeriesValue::new(0, value)]))
                })
                .collect(),
        })
        .collect();
    aggregations.sort_by_key(|b| b.index);

    TimeSeriesData {
        query_name: scalar.query_name.clone(),
        aggregations,
    }
}

/// Scalar table of formula output: the first series' labels as group
/// columns and a single `__result` column.
fn formula_scalar(name: &str, series: &[TimeSeries]) -> ScalarData {
    let mut columns: Vec<ColumnDescriptor> = series
        .first()
        .map(|s| {
            s.labels
                .iter()
                .map(|l| ColumnDescriptor {
                    name: l.key.name.clone(),
                    query_name: name.to_string(),
                    aggregation_index: 0,
                    column_type: ColumnType::Group,
                })
                .collect()
        })
        .unwrap_or_default();
    columns.push(ColumnDescriptor {
        name: DEFAULT_ORDER_BY_KEY.to_string(),
        query_name: name.to_string(),
        aggregation_index: 0,
        column_type: ColumnType::Aggregation,
    });

    let data = series
        .iter()
        .map(|s| {
            let mut row: Vec<Value> = vec![Value::from("n/a"); columns.len()];
            for (i, label) in s.labels.iter().enumerate().take(columns.len() - 1) {
                row[i] = label.value.clone();
            }
            if let Some(point) = s.values.first() {
                row[columns.len() - 1] = Value::from(point.value);
            }
            row
        })
        .collect();

    ScalarData {
        query_name: name.to_string(),
        columns,
        data,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::model::{
        CompositeQuery, FormatOptions, MetricAggregation, OrderDirection, QueryBuilderQuery,
        Signal, SpaceAggregation, TimeAggregation, TraceAggregation,
    };
    use common::testing::{TestConfigBuilder, series, time_series_result, values};

    fn trace_query(name: &str, expression: &str) -> QueryBuilderQuery<TraceAggregation> {
        QueryBuilderQuery::new(name, Signal::Traces)
            .with_step(Duration::from_secs(60))
            .with_aggregation(TraceAggregation {
                expression: expression.into(),
                alias: String::new(),
            })
    }

    fn request(request_type: RequestType, queries: Vec<QueryEnvelope>) -> QueryRangeRequest {
        QueryRangeRequest {
            start: 0,
            end: 180_000,
            request_type,
            composite_query: CompositeQuery { queries },
            ..QueryRangeRequest::default()
        }
    }

    fn series_of<'a>(results: &'a HashMap<String, QueryResult>, name: &str) -> &'a [TimeSeries] {
        &results[name].as_time_series().unwrap().aggregations[0].series
    }

    #[test]
    fn test_builder_limit_and_functions() {
        let mut query = trace_query("A", "count()");
        query.limit = 1;
        query.functions = vec![Function::with_args(FunctionName::ClampMax, [5.0])];
        let req = request(
            RequestType::TimeSeries,
            vec![QueryEnvelope::Builder(BuilderSpec::Traces(query))],
        );
        let results = HashMap::from([(
            "A".to_string(),
            time_series_result(
                "A",
                vec![
                    series(&[("svc", "a")], &[(0, 1.0)]),
                    series(&[("svc", "b")], &[(0, 9.0)]),
                ],
            ),
        )]);

        let out = PostProcessor::default().process(results, &req);
        let a = series_of(&out, "A");
        assert_eq!(a.len(), 1);
        assert_eq!(values(&a[0]), vec![5.0]);
    }

    #[test]
    fn test_fill_zero_uses_query_step() {
        let mut query = trace_query("A", "count()");
        query.functions = vec![Function::new(FunctionName::FillZero)];
        let req = request(
            RequestType::TimeSeries,
            vec![QueryEnvelope::Builder(BuilderSpec::Traces(query))],
        );
        let results = HashMap::from([(
            "A".to_string(),
            time_series_result("A", vec![series(&[], &[(60_000, 2.0)])]),
        )]);

        let out = PostProcessor::default().process(results, &req);
        assert_eq!(values(&series_of(&out, "A")[0]), vec![0.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn test_formula_and_disabled_queries() {
        let mut a = trace_query("A", "count()");
        a.disabled = true;
        let b = trace_query("B", "count()");
        let mut formula = QueryBuilderFormula::new("F1", "A / B");
        formula.functions = vec![Function::new(FunctionName::FillZero)];
        let req = request(
            RequestType::TimeSeries,
            vec![
                QueryEnvelope::Builder(BuilderSpec::Traces(a)),
                QueryEnvelope::Builder(BuilderSpec::Traces(b)),
                QueryEnvelope::Formula(formula),
            ],
        );
        let results = HashMap::from([
            ("A".to_string(), time_series_result("A", vec![series(&[], &[(60_000, 1.0)])])),
            ("B".to_string(), time_series_result("B", vec![series(&[], &[(60_000, 4.0)])])),
        ]);

        let out = PostProcessor::default().process(results, &req);
        assert!(!out.contains_key("A"));
        assert!(out.contains_key("B"));
        let f = series_of(&out, "F1");
        assert_eq!(values(&f[0]), vec![0.0, 0.25, 0.0, 0.0]);
        assert_eq!(out["F1"].as_time_series().unwrap().query_name, "F1");
    }

    #[test]
    fn test_invalid_formula_is_skipped() {
        let req = request(
            RequestType::TimeSeries,
            vec![QueryEnvelope::Formula(QueryBuilderFormula::new("F1", "A +"))],
        );
        let out = PostProcessor::default().process(HashMap::new(), &req);
        assert!(out.is_empty());
    }

    #[test]
    fn test_formula_order_by_its_name() {
        let a = trace_query("A", "count()");
        let mut formula = QueryBuilderFormula::new("F1", "A * 2");
        formula.order = vec![OrderBy::new("F1", OrderDirection::Asc)];
        formula.limit = 1;
        let req = request(
            RequestType::TimeSeries,
            vec![
                QueryEnvelope::Builder(BuilderSpec::Traces(a)),
                QueryEnvelope::Formula(formula),
            ],
        );
        let results = HashMap::from([(
            "A".to_string(),
            time_series_result(
                "A",
                vec![
                    series(&[("svc", "a")], &[(0, 9.0)]),
                    series(&[("svc", "b")], &[(0, 1.0)]),
                ],
            ),
        )]);

        let out = PostProcessor::default().process(results, &req);
        let f = series_of(&out, "F1");
        assert_eq!(f.len(), 1);
        assert_eq!(values(&f[0]), vec![2.0]);
    }

    #[test]
    fn test_metric_reduce_to_scalar() {
        let mut query = QueryBuilderQuery::new("A", Signal::Metrics).with_aggregation(MetricAggregation {
            metric_name: "requests".into(),
            time_aggregation: TimeAggregation::Rate,
            space_aggregation: SpaceAggregation::Sum,
            reduce_to: ReduceTo::Sum,
            ..MetricAggregation::default()
        });
        query.order = vec![OrderBy::new("sum(rate(requests))", OrderDirection::Asc)];
        query.limit = 1;
        let req = request(
            RequestType::Scalar,
            vec![QueryEnvelope::Builder(BuilderSpec::Metrics(query))],
        );
        let results = HashMap::from([(
            "A".to_string(),
            time_series_result(
                "A",
                vec![
                    series(&[("svc", "a")], &[(0, 5.0), (60_000, 5.0)]),
                    series(&[("svc", "b")], &[(0, 1.0), (60_000, 2.0)]),
                ],
            ),
        )]);

        let out = PostProcessor::default().process(results, &req);
        let Some(ResultValue::Scalar(scalar)) = &out["A"].value else {
            panic!("expected scalar result");
        };
        assert_eq!(out["A"].request_type, RequestType::Scalar);
        assert_eq!(scalar.data, vec![vec![Value::from("b"), Value::from(3.0)]]);
    }

    #[test]
    fn test_scalar_formula() {
        let scalar = |name: &str, rows: Vec<(&str, f64)>| QueryResult {
            request_type: RequestType::Scalar,
            value: Some(ResultValue::Scalar(ScalarData {
                query_name: name.into(),
                columns: vec![
                    ColumnDescriptor {
                        name: "svc".into(),
                        query_name: name.into(),
                        aggregation_index: 0,
                        column_type: ColumnType::Group,
                    },
                    ColumnDescriptor {
                        name: "__result_0".into(),
                        query_name: name.into(),
                        aggregation_index: 0,
                        column_type: ColumnType::Aggregation,
                    },
                ],
                data: rows
                    .into_iter()
                    .map(|(svc, v)| vec![Value::from(svc), Value::from(v)])
                    .collect(),
            })),
            ..QueryResult::default()
        };
        let req = request(
            RequestType::Scalar,
            vec![
                QueryEnvelope::Builder(BuilderSpec::Traces(trace_query("A", "count()"))),
                QueryEnvelope::Builder(BuilderSpec::Traces(trace_query("B", "count()"))),
                QueryEnvelope::Formula(QueryBuilderFormula::new("F1", "A + B")),
            ],
        );
        let results = HashMap::from([
            ("A".to_string(), scalar("A", vec![("x", 1.0)])),
            ("B".to_string(), scalar("B", vec![("x", 2.0)])),
        ]);

        let out = PostProcessor::default().process(results, &req);
        let Some(ResultValue::Scalar(f)) = &out["F1"].value else {
            panic!("expected scalar formula result");
        };
        assert_eq!(f.columns.last().unwrap().name, "__result");
        assert_eq!(f.data, vec![vec![Value::from("x"), Value::from(3.0)]]);
    }

    #[test]
    fn test_fill_gaps() {
        let req = QueryRangeRequest {
            format_options: FormatOptions { fill_gaps: true },
            ..request(
                RequestType::TimeSeries,
                vec![QueryEnvelope::Builder(BuilderSpec::Traces(trace_query("A", "count()")))],
            )
        };
        let results = HashMap::from([(
            "A".to_string(),
            QueryResult::time_series(TimeSeriesData {
                query_name: "A".into(),
                aggregations: Vec::new(),
            }),
        )]);

        let out = PostProcessor::default().process(results, &req);
        assert_eq!(values(&series_of(&out, "A")[0]), vec![0.0; 4]);
    }

    #[test]
    fn test_formula_step_is_gcd() {
        let a = trace_query("A", "count()").with_step(Duration::from_secs(60));
        let b = trace_query("B", "count()").with_step(Duration::from_secs(90));
        let req = request(
            RequestType::TimeSeries,
            vec![
                QueryEnvelope::Builder(BuilderSpec::Traces(a)),
                QueryEnvelope::Builder(BuilderSpec::Traces(b)),
            ],
        );
        let processor = PostProcessor::default();
        let evaluator = FormulaEvaluator::new("A + B.0", &HashMap::new()).unwrap();
        assert_eq!(processor.formula_step(&evaluator, &req), 30_000);

        let evaluator = FormulaEvaluator::new("C * 2", &HashMap::new()).unwrap();
        assert_eq!(processor.formula_step(&evaluator, &req), 60_000);

        let config = TestConfigBuilder::new()
            .with_default_step(Duration::from_secs(15))
            .build();
        let processor = PostProcessor::new(&config.postprocess);
        assert_eq!(processor.formula_step(&evaluator, &req), 15_000);
    }
}
