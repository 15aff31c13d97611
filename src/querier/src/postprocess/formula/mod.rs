//! Formula evaluation across query results.
//!
//! A formula such as `A / B * 100` names other queries of the request. Series
//! from each named query are joined on their labels: a series whose labels
//! are a subset of another's joins with it, so `{service}` results combine
//! with `{service, operation}` results.

use std::collections::{BTreeMap, HashMap};

use common::model::{Label, TimeSeries, TimeSeriesData, TimeSeriesValue, is_label_subset};
use thiserror::Error;

pub mod expr;

use expr::{Expr, parse_expression};

#[derive(Debug, Error)]
pub enum FormulaError {
    #[error("invalid formula at position {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("invalid aggregation reference `{0}`")]
    InvalidReference(String),

    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    #[error("function `{function}` takes {expected} argument(s), got {found}")]
    Arity {
        function: String,
        expected: usize,
        found: usize,
    },
}

/// Which aggregation of a query a variable reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregationRef {
    Index(usize),
    Alias(String),
}

/// A formula variable split into query name and aggregation.
///
/// `A` reads aggregation 0 of query `A`, `A.2` aggregation 2 and
/// `A.errors` the aggregation aliased `errors`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableRef {
    pub variable: String,
    pub query_name: String,
    pub aggregation: AggregationRef,
}

impl VariableRef {
    pub fn parse(variable: &str) -> Result<Self, FormulaError> {
        let mut parts = variable.split('.');
        let query_name = parts.next().unwrap_or_default();
        let aggregation = match (parts.next(), parts.next()) {
            (None, _) => AggregationRef::Index(0),
            (Some(part), None) if !part.is_empty() => match part.parse::<usize>() {
                Ok(index) => AggregationRef::Index(index),
                Err(_) => AggregationRef::Alias(part.to_string()),
            },
            _ => return Err(FormulaError::InvalidReference(variable.to_string())),
        };
        if query_name.is_empty() {
            return Err(FormulaError::InvalidReference(variable.to_string()));
        }
        Ok(Self {
            variable: variable.to_string(),
            query_name: query_name.to_string(),
            aggregation,
        })
    }

    fn series<'a>(&self, data: &'a HashMap<String, TimeSeriesData>) -> &'a [TimeSeries] {
        let Some(result) = data.get(&self.query_name) else {
            return &[];
        };
        let bucket = match &self.aggregation {
            AggregationRef::Index(index) => result.aggregations.iter().find(|b| b.index == *index),
            AggregationRef::Alias(alias) => result.aggregations.iter().find(|b| b.alias == *alias),
        };
        bucket.map(|b| b.series.as_slice()).unwrap_or(&[])
    }
}

/// A compiled formula.
#[derive(Debug, Clone)]
pub struct FormulaEvaluator {
    expression: Expr,
    references: Vec<VariableRef>,
    default_zero: Vec<bool>,
}

struct SeriesEntry<'a> {
    variable: usize,
    labels: &'a [Label],
    points: BTreeMap<i64, f64>,
}

impl FormulaEvaluator {
    /// Compile `expression`. `can_default_zero` says, per variable or query
    /// name, whether a missing value may be read as zero.
    pub fn new(expression: &str, can_default_zero: &HashMap<String, bool>) -> Result<Self, FormulaError> {
        let expression = parse_expression(expression)?;
        let references = expression
            .variables()
            .iter()
            .map(|v| VariableRef::parse(v))
            .collect::<Result<Vec<_>, _>>()?;
        let default_zero = references
            .iter()
            .map(|r| {
                can_default_zero
                    .get(&r.variable)
                    .or_else(|| can_default_zero.get(&r.query_name))
                    .copied()
                    .unwrap_or(false)
            })
            .collect();
        Ok(Self {
            expression,
            references,
            default_zero,
        })
    }

    pub fn references(&self) -> &[VariableRef] {
        &self.references
    }

    /// Names of the queries the formula reads.
    pub fn query_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for r in &self.references {
            if !names.contains(&r.query_name.as_str()) {
                names.push(&r.query_name);
            }
        }
        names
    }

    /// Evaluate over the results of the referenced queries, keyed by query
    /// name. Produces one series per maximal label set that yields at least
    /// one finite value.
    pub fn evaluate(&self, data: &HashMap<String, TimeSeriesData>) -> Vec<TimeSeries> {
        let entries: Vec<SeriesEntry<'_>> = self
            .references
            .iter()
            .enumerate()
            .flat_map(|(variable, reference)| {
                reference.series(data).iter().map(move |series| SeriesEntry {
                    variable,
                    labels: &series.labels,
                    points: series.values.iter().map(|p| (p.timestamp, p.value)).collect(),
                })
            })
            .collect();

        self.label_sets(&entries)
            .into_iter()
            .filter_map(|target| self.evaluate_label_set(target, &entries))
            .collect()
    }

    /// Label sets not contained in a larger one, largest first. Ties keep
    /// the order in which the sets were seen.
    fn label_sets<'a>(&self, entries: &[SeriesEntry<'a>]) -> Vec<&'a [Label]> {
        let mut all: Vec<&'a [Label]> = entries.iter().map(|e| e.labels).collect();
        all.sort_by(|a, b| b.len().cmp(&a.len()));

        let mut unique: Vec<&'a [Label]> = Vec::new();
        for set in all {
            if !unique.iter().any(|kept| is_label_subset(kept, set)) {
                unique.push(set);
            }
        }
        unique
    }

    fn evaluate_label_set(&self, target: &[Label], entries: &[SeriesEntry<'_>]) -> Option<TimeSeries> {
        let matched: Vec<Option<&BTreeMap<i64, f64>>> = (0..self.references.len())
            .map(|variable| {
                entries
                    .iter()
                    .find(|e| e.variable == variable && is_label_subset(target, e.labels))
                    .map(|e| &e.points)
            })
            .collect();

        let mut timestamps: Vec<i64> = matched
            .iter()
            .flatten()
            .flat_map(|points| points.keys().copied())
            .collect();
        timestamps.sort_unstable();
        timestamps.dedup();

        let mut values = Vec::new();
        let mut current = vec![0.0; self.references.len()];
        'timestamps: for ts in timestamps {
            for (variable, points) in matched.iter().enumerate() {
                match points.and_then(|p| p.get(&ts)) {
                    Some(value) => current[variable] = *value,
                    None if self.default_zero[variable] => current[variable] = 0.0,
                    None => continue 'timestamps,
                }
            }
            let value = self.expression.eval(&|name: &str| {
                self.references
                    .iter()
                    .position(|r| r.variable == name)
                    .map(|i| current[i])
            });
            if value.is_finite() {
                values.push(TimeSeriesValue::new(ts, value));
            }
        }

        if values.is_empty() {
            None
        } else {
            Some(TimeSeries::new(target.to_vec(), values))
        }
    }
}
