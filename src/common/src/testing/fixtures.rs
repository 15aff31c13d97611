//! Shorthand constructors for result series.

use crate::model::{
    AggregationBucket, Label, QueryResult, TimeSeries, TimeSeriesData, TimeSeriesValue,
};

/// A series with string labels and `(timestamp_ms, value)` points.
pub fn series(labels: &[(&str, &str)], points: &[(i64, f64)]) -> TimeSeries {
    TimeSeries::new(
        labels
            .iter()
            .map(|(name, value)| Label::new(*name, *value))
            .collect(),
        points
            .iter()
            .map(|(ts, value)| TimeSeriesValue::new(*ts, *value))
            .collect(),
    )
}

/// Series data holding a single aggregation at index 0.
pub fn time_series_data(query_name: &str, series: Vec<TimeSeries>) -> TimeSeriesData {
    TimeSeriesData {
        query_name: query_name.to_string(),
        aggregations: vec![AggregationBucket {
            index: 0,
            alias: String::new(),
            series,
        }],
    }
}

pub fn time_series_result(query_name: &str, series: Vec<TimeSeries>) -> QueryResult {
    QueryResult::time_series(time_series_data(query_name, series))
}

/// The values of a series, in order.
pub fn values(series: &TimeSeries) -> Vec<f64> {
    series.values.iter().map(|p| p.value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_fixture() {
        let s = series(&[("service", "redis")], &[(1000, 1.5), (2000, 2.5)]);
        assert_eq!(s.series_key(), "service=redis");
        assert_eq!(values(&s), vec![1.5, 2.5]);
        assert_eq!(s.values[1].timestamp, 2000);
    }

    #[test]
    fn test_result_fixture() {
        let result = time_series_result("A", vec![series(&[], &[(0, 1.0)])]);
        let data = result.as_time_series().unwrap();
        assert_eq!(data.query_name, "A");
        assert_eq!(data.aggregations[0].series.len(), 1);
    }
}
