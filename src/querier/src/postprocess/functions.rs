//! Numeric transforms applied to materialized series.
//!
//! Every transform takes a series by reference and returns a new one; the
//! input is never modified.

use std::collections::HashMap;

use common::model::{Function, FunctionArg, FunctionName, QueryResult, TimeSeries, TimeSeriesValue};
use log::debug;

fn map_values(series: &TimeSeries, f: impl Fn(f64) -> f64) -> TimeSeries {
    TimeSeries {
        labels: series.labels.clone(),
        values: series
            .values
            .iter()
            .map(|point| TimeSeriesValue {
                value: f(point.value),
                ..*point
            })
            .collect(),
    }
}

fn with_values(series: &TimeSeries, values: Vec<TimeSeriesValue>) -> TimeSeries {
    TimeSeries {
        labels: series.labels.clone(),
        values,
    }
}

/// Values below `threshold` become NaN.
pub fn cutoff_min(series: &TimeSeries, threshold: f64) -> TimeSeries {
    map_values(series, |v| if v < threshold { f64::NAN } else { v })
}

/// Values above `threshold` become NaN.
pub fn cutoff_max(series: &TimeSeries, threshold: f64) -> TimeSeries {
    map_values(series, |v| if v > threshold { f64::NAN } else { v })
}

pub fn clamp_min(series: &TimeSeries, threshold: f64) -> TimeSeries {
    map_values(series, |v| if v < threshold { threshold } else { v })
}

pub fn clamp_max(series: &TimeSeries, threshold: f64) -> TimeSeries {
    map_values(series, |v| if v > threshold { threshold } else { v })
}

pub fn absolute(series: &TimeSeries) -> TimeSeries {
    map_values(series, f64::abs)
}

pub fn log2(series: &TimeSeries) -> TimeSeries {
    map_values(series, f64::log2)
}

pub fn log10(series: &TimeSeries) -> TimeSeries {
    map_values(series, f64::log10)
}

/// Difference to the previous point. The first point has no predecessor and
/// is dropped.
pub fn running_diff(series: &TimeSeries) -> TimeSeries {
    let values = series
        .values
        .windows(2)
        .map(|pair| TimeSeriesValue {
            value: pair[1].value - pair[0].value,
            ..pair[1]
        })
        .collect();
    with_values(series, values)
}

/// Running total. NaN points add nothing and report the total so far.
pub fn cumulative_sum(series: &TimeSeries) -> TimeSeries {
    let mut total = 0.0;
    let values = series
        .values
        .iter()
        .map(|point| {
            if !point.value.is_nan() {
                total += point.value;
            }
            TimeSeriesValue {
                value: total,
                ..*point
            }
        })
        .collect();
    with_values(series, values)
}

/// Exponentially weighted moving average.
///
/// Points before the first non-NaN value are left as they are. After that a
/// NaN point takes the current average without updating it.
pub fn ewma(series: &TimeSeries, alpha: f64) -> TimeSeries {
    let mut average: Option<f64> = None;
    let values = series
        .values
        .iter()
        .map(|point| {
            let value = match average {
                None if point.value.is_nan() => point.value,
                None => {
                    average = Some(point.value);
                    point.value
                }
                Some(current) if point.value.is_nan() => current,
                Some(current) => {
                    let next = alpha * point.value + (1.0 - alpha) * current;
                    average = Some(next);
                    next
                }
            };
            TimeSeriesValue { value, ..*point }
        })
        .collect();
    with_values(series, values)
}

fn median_of(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Moving median over `window` points, ignoring NaN.
///
/// Points closer than half a window to either end keep their value.
pub fn median(series: &TimeSeries, window: usize) -> TimeSeries {
    let half = window / 2;
    let len = series.values.len();
    let mut values = series.values.clone();
    if len > 2 * half {
        for i in half..len - half {
            let mut neighbours: Vec<f64> = series.values[i - half..=i + half]
                .iter()
                .map(|p| p.value)
                .filter(|v| !v.is_nan())
                .collect();
            values[i].value = median_of(&mut neighbours);
        }
    }
    with_values(series, values)
}

/// Shift every timestamp by `seconds`.
pub fn time_shift(series: &TimeSeries, seconds: f64) -> TimeSeries {
    let shift = (seconds * 1000.0) as i64;
    let values = series
        .values
        .iter()
        .map(|point| TimeSeriesValue {
            timestamp: point.timestamp.saturating_add(shift),
            ..*point
        })
        .collect();
    with_values(series, values)
}

/// Rebuild the series on the step grid covering `[start, end]`, with the
/// bounds aligned outwards to the step. Grid slots without a point get
/// zero; points off the grid are dropped.
pub fn fill_zero(series: &TimeSeries, start: i64, end: i64, step: i64) -> TimeSeries {
    if step <= 0 {
        return series.clone();
    }
    let aligned_start = start.div_euclid(step) * step;
    let aligned_end = end.div_euclid(step) * step + if end.rem_euclid(step) == 0 { 0 } else { step };
    if aligned_start > aligned_end {
        return series.clone();
    }

    let existing: HashMap<i64, &TimeSeriesValue> = series
        .values
        .iter()
        .map(|point| (point.timestamp, point))
        .collect();

    let mut values = Vec::new();
    let mut ts = aligned_start;
    while ts <= aligned_end {
        match existing.get(&ts) {
            Some(point) => values.push(**point),
            None => values.push(TimeSeriesValue::new(ts, 0.0)),
        }
        ts += step;
    }
    with_values(series, values)
}

fn arg(args: &[FunctionArg], index: usize) -> Option<f64> {
    args.get(index).and_then(|a| a.value.as_f64())
}

fn ewma_alpha(args: &[FunctionArg], window: f64) -> f64 {
    arg(args, 0).unwrap_or(2.0 / (window + 1.0))
}

/// Apply one function. Functions missing a required argument leave the
/// series unchanged.
pub fn apply_function(function: &Function, series: &TimeSeries) -> TimeSeries {
    let args = &function.args;
    match function.name {
        FunctionName::CutOffMin => arg(args, 0).map_or_else(|| series.clone(), |t| cutoff_min(series, t)),
        FunctionName::CutOffMax => arg(args, 0).map_or_else(|| series.clone(), |t| cutoff_max(series, t)),
        FunctionName::ClampMin => arg(args, 0).map_or_else(|| series.clone(), |t| clamp_min(series, t)),
        FunctionName::ClampMax => arg(args, 0).map_or_else(|| series.clone(), |t| clamp_max(series, t)),
        FunctionName::Absolute => absolute(series),
        FunctionName::RunningDiff => running_diff(series),
        FunctionName::Log2 => log2(series),
        FunctionName::Log10 => log10(series),
        FunctionName::CumulativeSum => cumulative_sum(series),
        FunctionName::Ewma3 => ewma(series, ewma_alpha(args, 3.0)),
        FunctionName::Ewma5 => ewma(series, ewma_alpha(args, 5.0)),
        FunctionName::Ewma7 => ewma(series, ewma_alpha(args, 7.0)),
        FunctionName::Median3 => median(series, 3),
        FunctionName::Median5 => median(series, 5),
        FunctionName::Median7 => median(series, 7),
        FunctionName::TimeShift => arg(args, 0).map_or_else(|| series.clone(), |s| time_shift(series, s)),
        FunctionName::Anomaly => series.clone(),
        FunctionName::FillZero => match (arg(args, 0), arg(args, 1), arg(args, 2)) {
            (Some(start), Some(end), Some(step)) => {
                fill_zero(series, start as i64, end as i64, step as i64)
            }
            _ => {
                debug!("fillZero without start, end and step, leaving series unchanged");
                series.clone()
            }
        },
    }
}

/// Apply `functions` in order.
pub fn apply_functions(functions: &[Function], series: &TimeSeries) -> TimeSeries {
    functions
        .iter()
        .fold(series.clone(), |acc, function| apply_function(function, &acc))
}

/// Apply `functions` to every series of a time series result. Other result
/// kinds are left alone.
pub fn apply_functions_to_result(functions: &[Function], result: &mut QueryResult) {
    if functions.is_empty() {
        return;
    }
    let Some(data) = result.as_time_series_mut() else {
        return;
    };
    for bucket in &mut data.aggregations {
        for series in &mut bucket.series {
            *series = apply_functions(functions, series);
        }
    }
}

/// Give argument-less `fillZero` entries the request window and step.
pub fn prepare_fill_zero_args(functions: &[Function], start: u64, end: u64, step_ms: u64) -> Vec<Function> {
    functions
        .iter()
        .map(|function| {
            if function.name == FunctionName::FillZero && function.args.is_empty() {
                Function::with_args(
                    FunctionName::FillZero,
                    [start as f64, end as f64, step_ms as f64],
                )
            } else {
                function.clone()
            }
        })
        .collect()
}
