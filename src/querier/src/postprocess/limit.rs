//! Ordering and truncation of result series.

use std::cmp::Ordering;

use common::model::{DEFAULT_ORDER_BY_KEY, OrderBy, OrderDirection, QueryResult, TimeSeries};

/// The value a series is ranked by: its only point, otherwise the mean of
/// its finite points, otherwise zero.
pub fn representative_value(series: &TimeSeries) -> f64 {
    if let [point] = series.values.as_slice() {
        return point.value;
    }
    let (sum, count) = series
        .values
        .iter()
        .filter(|p| p.value.is_finite())
        .fold((0.0, 0usize), |(sum, count), p| (sum + p.value, count + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

fn directed(ordering: Ordering, direction: OrderDirection) -> Ordering {
    match direction {
        OrderDirection::Asc => ordering,
        OrderDirection::Desc => ordering.reverse(),
    }
}

fn compare(a: &Ranked<'_>, b: &Ranked<'_>, order: &[OrderBy]) -> Ordering {
    for (position, order_by) in order.iter().enumerate() {
        let ordering = if order_by.key.name == DEFAULT_ORDER_BY_KEY {
            directed(a.value.total_cmp(&b.value), order_by.direction)
        } else {
            // A missing label sorts first in either direction.
            match (&a.labels[position], &b.labels[position]) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => directed(x.cmp(y), order_by.direction),
            }
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

struct Ranked<'a> {
    series: &'a TimeSeries,
    value: f64,
    labels: Vec<Option<String>>,
}

/// Sort `series` by `order` and keep the first `limit`. An empty `order`
/// ranks by representative value, highest first. A `limit` of zero keeps
/// everything.
pub fn apply_limit(series: &[TimeSeries], order: &[OrderBy], limit: usize) -> Vec<TimeSeries> {
    let default_order = [OrderBy::new(DEFAULT_ORDER_BY_KEY, OrderDirection::Desc)];
    let order = if order.is_empty() { &default_order[..] } else { order };

    let mut ranked: Vec<Ranked<'_>> = series
        .iter()
        .map(|s| Ranked {
            series: s,
            value: representative_value(s),
            labels: order
                .iter()
                .map(|o| s.label(&o.key.name).map(ToString::to_string))
                .collect(),
        })
        .collect();
    ranked.sort_by(|a, b| compare(a, b, order));

    let keep = if limit == 0 { ranked.len() } else { limit.min(ranked.len()) };
    ranked
        .into_iter()
        .take(keep)
        .map(|r| r.series.clone())
        .collect()
}

/// Limit every aggregation of a time series result.
pub fn apply_limit_to_result(result: &mut QueryResult, order: &[OrderBy], limit: usize) {
    let Some(data) = result.as_time_series_mut() else {
        return;
    };
    for bucket in &mut data.aggregations {
        bucket.series = apply_limit(&bucket.series, order, limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::model::{Label, TimeSeriesValue};
    use common::testing::{series, time_series_result};

    fn service(s: &TimeSeries) -> String {
        s.label("service").map(ToString::to_string).unwrap_or_default()
    }

    #[test]
    fn test_representative_value() {
        assert_eq!(representative_value(&series(&[], &[(1, 7.0)])), 7.0);
        assert_eq!(representative_value(&series(&[], &[(1, 10.0), (2, 20.0)])), 15.0);
        assert_eq!(
            representative_value(&series(&[], &[(1, f64::NAN), (2, 4.0), (3, f64::INFINITY)])),
            4.0
        );
        assert_eq!(representative_value(&series(&[], &[])), 0.0);
    }

    #[test]
    fn test_default_order_keeps_highest() {
        let input = vec![
            series(&[("service", "a")], &[(1, 10.0)]),
            series(&[("service", "b")], &[(1, 50.0)]),
            series(&[("service", "c")], &[(1, 30.0)]),
            series(&[("service", "d")], &[(1, 20.0)]),
        ];
        let out = apply_limit(&input, &[], 2);
        assert_eq!(out.iter().map(service).collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[test]
    fn test_mean_ranking() {
        let input = vec![
            series(&[("service", "service1")], &[(1000, 10.0), (2000, 20.0)]),
            series(&[("service", "service2")], &[(1000, 30.0), (2000, 40.0)]),
            series(&[("service", "service3")], &[(1000, 5.0), (2000, 10.0)]),
        ];
        let out = apply_limit(&input, &[], 2);
        assert_eq!(
            out.iter().map(service).collect::<Vec<_>>(),
            vec!["service2", "service1"]
        );
    }

    #[test]
    fn test_label_order_with_missing_label() {
        let input = vec![
            series(&[("service", "b")], &[(1, 1.0)]),
            series(&[], &[(1, 1.0)]),
            series(&[("service", "a")], &[(1, 1.0)]),
        ];
        let asc = apply_limit(&input, &[OrderBy::new("service", OrderDirection::Asc)], 0);
        assert_eq!(asc.iter().map(service).collect::<Vec<_>>(), vec!["", "a", "b"]);

        let desc = apply_limit(&input, &[OrderBy::new("service", OrderDirection::Desc)], 0);
        assert_eq!(desc.iter().map(service).collect::<Vec<_>>(), vec!["", "b", "a"]);
    }

    #[test]
    fn test_tie_breakers_and_stability() {
        let input = vec![
            series(&[("env", "prod"), ("service", "x")], &[(1, 1.0)]),
            series(&[("env", "dev"), ("service", "y")], &[(1, 2.0)]),
            series(&[("env", "prod"), ("service", "z")], &[(1, 3.0)]),
            series(&[("env", "prod"), ("service", "w")], &[(1, 1.0)]),
        ];
        let order = vec![
            OrderBy::new("env", OrderDirection::Desc),
            OrderBy::new(DEFAULT_ORDER_BY_KEY, OrderDirection::Asc),
        ];
        let out = apply_limit(&input, &order, 0);
        assert_eq!(out.iter().map(service).collect::<Vec<_>>(), vec!["x", "w", "z", "y"]);
    }

    #[test]
    fn test_numeric_labels_compare_as_text() {
        let input = vec![
            TimeSeries::new(vec![Label::new("code", 500i64)], vec![TimeSeriesValue::new(1, 1.0)]),
            TimeSeries::new(vec![Label::new("code", 1000i64)], vec![TimeSeriesValue::new(1, 1.0)]),
        ];
        let out = apply_limit(&input, &[OrderBy::new("code", OrderDirection::Asc)], 0);
        assert_eq!(out[0].label("code").map(ToString::to_string).as_deref(), Some("1000"));
    }

    #[test]
    fn test_limit_result() {
        let mut result = time_series_result(
            "A",
            vec![series(&[], &[(1, 1.0)]), series(&[], &[(1, 2.0)])],
        );
        apply_limit_to_result(&mut result, &[], 1);
        let data = result.as_time_series().unwrap();
        assert_eq!(data.aggregations[0].series[0].values[0].value, 2.0);
        assert_eq!(data.aggregations[0].series.len(), 1);
    }
}
