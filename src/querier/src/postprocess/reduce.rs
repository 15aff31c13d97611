//! Collapsing series to a single point, and the scalar table view of
//! series results.

use common::model::{
    ColumnDescriptor, ColumnType, ReduceTo, ScalarData, TimeSeries, TimeSeriesData,
    TimeSeriesValue, Value,
};

fn single(series: &TimeSeries, timestamp: i64, value: f64) -> TimeSeries {
    TimeSeries::new(series.labels.clone(), vec![TimeSeriesValue::new(timestamp, value)])
}

/// Reduce a series to one point.
///
/// Sum, average and count are stamped with the last timestamp; min and max
/// keep the timestamp of the extreme point and median that of the middle
/// point. NaN values are ignored. Empty series are returned as they are.
pub fn reduce_series(series: &TimeSeries, reduce_to: ReduceTo) -> TimeSeries {
    let Some(last) = series.values.last() else {
        return series.clone();
    };
    let finite = || series.values.iter().filter(|p| !p.value.is_nan());

    match reduce_to {
        ReduceTo::Unknown => series.clone(),
        ReduceTo::Last => single(series, last.timestamp, last.value),
        ReduceTo::Sum => single(series, last.timestamp, finite().map(|p| p.value).sum()),
        ReduceTo::Count => single(series, last.timestamp, finite().count() as f64),
        ReduceTo::Avg => {
            let count = finite().count();
            let avg = if count == 0 {
                f64::NAN
            } else {
                finite().map(|p| p.value).sum::<f64>() / count as f64
            };
            single(series, last.timestamp, avg)
        }
        ReduceTo::Min => match finite().min_by(|a, b| a.value.total_cmp(&b.value)) {
            Some(p) => single(series, p.timestamp, p.value),
            None => single(series, last.timestamp, f64::NAN),
        },
        ReduceTo::Max => match finite().max_by(|a, b| a.value.total_cmp(&b.value)) {
            Some(p) => single(series, p.timestamp, p.value),
            None => single(series, last.timestamp, f64::NAN),
        },
        ReduceTo::Median => {
            let mut points: Vec<&TimeSeriesValue> = finite().collect();
            if points.is_empty() {
                return single(series, last.timestamp, f64::NAN);
            }
            points.sort_by(|a, b| a.value.total_cmp(&b.value));
            let mid = points.len() / 2;
            if points.len() % 2 == 0 {
                let (a, b) = (points[mid - 1], points[mid]);
                single(series, (a.timestamp + b.timestamp) / 2, (a.value + b.value) / 2.0)
            } else {
                single(series, points[mid].timestamp, points[mid].value)
            }
        }
    }
}

/// Reduce every series of every aggregation.
pub fn reduce_data(data: &TimeSeriesData, reduce_to: ReduceTo) -> TimeSeriesData {
    let mut reduced = data.clone();
    for bucket in &mut reduced.aggregations {
        for series in &mut bucket.series {
            *series = reduce_series(series, reduce_to);
        }
    }
    reduced
}

/// Name of the value column for an aggregation.
pub fn aggregation_column_name(alias: &str, index: usize) -> String {
    if alias.is_empty() {
        format!("__result_{index}")
    } else {
        alias.to_string()
    }
}

/// Table view of series data: one group column per label of the first
/// series, one value column per aggregation, one row per series holding the
/// last value of each.
pub fn to_scalar(data: &TimeSeriesData) -> ScalarData {
    let mut columns = Vec::new();

    let group_labels: Vec<String> = data
        .aggregations
        .iter()
        .find_map(|bucket| bucket.series.first())
        .map(|series| series.labels.iter().map(|l| l.key.name.clone()).collect())
        .unwrap_or_default();

    for name in &group_labels {
        columns.push(ColumnDescriptor {
            name: name.clone(),
            query_name: data.query_name.clone(),
            aggregation_index: 0,
            column_type: ColumnType::Group,
        });
    }
    for bucket in &data.aggregations {
        columns.push(ColumnDescriptor {
            name: aggregation_column_name(&bucket.alias, bucket.index),
            query_name: data.query_name.clone(),
            aggregation_index: bucket.index,
            column_type: ColumnType::Aggregation,
        });
    }

    // Rows are keyed by label set; aggregations sharing a label set share a row.
    let mut rows: Vec<(String, Vec<Value>)> = Vec::new();
    for (position, bucket) in data.aggregations.iter().enumerate() {
        for series in &bucket.series {
            let key = series.series_key();
            let row_index = match rows.iter().position(|(k, _)| *k == key) {
                Some(i) => i,
                None => {
                    let mut row: Vec<Value> = group_labels
                        .iter()
                        .map(|name| series.label(name).cloned().unwrap_or(Value::from("n/a")))
                        .collect();
                    row.extend(std::iter::repeat_n(Value::from("n/a"), data.aggregations.len()));
                    rows.push((key, row));
                    rows.len() - 1
                }
            };
            if let Some(last) = series.values.last() {
                rows[row_index].1[group_labels.len() + position] = Value::from(last.value);
            }
        }
    }

    ScalarData {
        query_name: data.query_name.clone(),
        columns,
        data: rows.into_iter().map(|(_, row)| row).collect(),
    }
}
