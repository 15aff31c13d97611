//! Time-bucketed caching of query results.
//!
//! Each query fingerprint maps to one payload holding the buckets of its
//! window that were already computed. Data younger than the flux interval
//! is never stored, since late arriving points could still change it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use common::config::CacheConfig;
use common::model::{
    AggregationBucket, ExecStats, QueryEnvelope, QueryResult, RequestType, ResultValue, TimeRange,
    TimeSeriesData,
};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{Cache, CacheError, CacheResult};

/// One cached stretch of a query's window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedBucket {
    pub start_ms: u64,
    pub end_ms: u64,
    pub request_type: RequestType,
    pub value: TimeSeriesData,
    pub stats: ExecStats,
}

/// Everything cached for one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedData {
    pub buckets: Vec<CachedBucket>,
    pub warnings: Vec<String>,
}

impl CachedData {
    pub fn encode(&self) -> CacheResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| CacheError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> CacheResult<Self> {
        bincode::deserialize(bytes).map_err(|e| CacheError::Decode(e.to_string()))
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

fn cache_key(query: &QueryEnvelope) -> String {
    format!("v5:query:{}", query.fingerprint())
}

/// Caches time series results per query in time buckets.
pub struct BucketCache {
    cache: Arc<dyn Cache>,
    enabled: bool,
    ttl: Duration,
    flux_interval: Duration,
    // serialises read-modify-write cycles of `put`
    write_lock: Mutex<()>,
}

impl BucketCache {
    pub fn new(cache: Arc<dyn Cache>, config: &CacheConfig) -> Self {
        Self {
            cache,
            enabled: config.enabled,
            ttl: config.ttl,
            flux_interval: config.flux_interval,
            write_lock: Mutex::new(()),
        }
    }

    fn flux_boundary(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.flux_interval.as_millis() as u64)
    }

    async fn load(&self, org_id: &str, key: &str) -> Option<CachedData> {
        match self.cache.get(org_id, key).await {
            Ok(bytes) => match CachedData::decode(&bytes) {
                Ok(data) => Some(data),
                Err(e) => {
                    warn!("Discarding cache entry {key}: {e}");
                    None
                }
            },
            Err(CacheError::NotFound(_)) => None,
            Err(e) => {
                warn!("Failed to read cache entry {key}: {e}");
                None
            }
        }
    }

    /// Cached data for `window` and the ranges that still have to be
    /// executed. Together they cover the window exactly.
    pub async fn get_miss_ranges(
        &self,
        org_id: &str,
        query: &QueryEnvelope,
        window: TimeRange,
        step: Duration,
    ) -> (Option<QueryResult>, Vec<TimeRange>) {
        self.get_miss_ranges_at(org_id, query, window, step, now_ms()).await
    }

    pub(crate) async fn get_miss_ranges_at(
        &self,
        org_id: &str,
        query: &QueryEnvelope,
        window: TimeRange,
        step: Duration,
        now_ms: u64,
    ) -> (Option<QueryResult>, Vec<TimeRange>) {
        let whole = vec![window];
        if !self.enabled {
            return (None, whole);
        }

        let key = cache_key(query);
        debug!("Looking up {key} for {}..{}", window.from, window.to);

        let Some(mut data) = self.load(org_id, &key).await else {
            return (None, whole);
        };

        let step_ms = step.as_millis() as u64;
        data.buckets.sort_by_key(|b| b.start_ms);
        let missing = find_missing_ranges(
            &data.buckets,
            window.from,
            window.to,
            step_ms,
            self.flux_boundary(now_ms),
        );
        debug!("Missing ranges for {key}: {missing:?} (step {step_ms}ms)");

        let relevant: Vec<&CachedBucket> = data
            .buckets
            .iter()
            .filter(|b| b.end_ms > window.from && b.start_ms < window.to)
            .collect();
        if relevant.is_empty() {
            return (None, missing);
        }

        let merged = merge_buckets(&relevant, data.warnings);
        (Some(restrict_to_window(merged, window)), missing)
    }

    /// Store a freshly executed result for `window`.
    pub async fn put(
        &self,
        org_id: &str,
        query: &QueryEnvelope,
        window: TimeRange,
        step: Duration,
        fresh: &QueryResult,
    ) {
        self.put_at(org_id, query, window, step, fresh, now_ms()).await
    }

    pub(crate) async fn put_at(
        &self,
        org_id: &str,
        query: &QueryEnvelope,
        window: TimeRange,
        step: Duration,
        fresh: &QueryResult,
        now_ms: u64,
    ) {
        if !self.enabled {
            return;
        }

        let flux_boundary = self.flux_boundary(now_ms);
        if window.from >= flux_boundary {
            debug!(
                "Window {}..{} lies within the flux interval (boundary {flux_boundary}), not caching",
                window.from, window.to
            );
            return;
        }
        let mut start = window.from;
        let mut end = window.to.min(flux_boundary);
        let step_ms = step.as_millis() as u64;
        if step_ms > 0 {
            if start % step_ms != 0 {
                start = (start / step_ms + 1) * step_ms;
            }
            end -= end % step_ms;
        }
        if start >= end {
            debug!("No complete step interval in {}..{}, not caching", window.from, window.to);
            return;
        }

        let Some(trimmed) = trim_to_range(fresh, start, end) else {
            debug!("Not caching {:?} result", fresh.request_type);
            return;
        };

        let key = cache_key(query);
        let _guard = self.write_lock.lock().await;
        let existing = self.load(org_id, &key).await.unwrap_or_default();

        let fresh_bucket = to_bucket(&trimmed, start, end);
        if fresh_bucket.is_none() && existing.buckets.is_empty() {
            return;
        }

        let mut by_range: BTreeMap<(u64, u64), CachedBucket> = existing
            .buckets
            .into_iter()
            .map(|b| ((b.start_ms, b.end_ms), b))
            .collect();
        if let Some(bucket) = fresh_bucket {
            by_range.insert((bucket.start_ms, bucket.end_ms), bucket);
        }

        let mut seen = HashSet::new();
        let warnings = existing
            .warnings
            .into_iter()
            .chain(trimmed.warnings.iter().cloned())
            .filter(|w| seen.insert(w.clone()))
            .collect();

        let updated = CachedData {
            buckets: by_range.into_values().collect(),
            warnings,
        };
        let stored = match updated.encode() {
            Ok(bytes) => self.cache.set(org_id, &key, bytes, self.ttl).await,
            Err(e) => Err(e),
        };
        if let Err(e) = stored {
            warn!("Failed to store cache entry {key}: {e}");
        }
    }
}

/// Ranges of `[start, end)` not covered by `buckets`, which must be sorted
/// by start.
///
/// With a step, ranges are aligned so that cached data is only used for
/// complete intervals and an unaligned start becomes its own partial range.
/// Without one (or for windows shorter than a step) the final gap is split
/// at `flux_boundary`.
pub fn find_missing_ranges(
    buckets: &[CachedBucket],
    start: u64,
    end: u64,
    step: u64,
    flux_boundary: u64,
) -> Vec<TimeRange> {
    if step == 0 || start + step > end {
        return find_missing_ranges_basic(buckets, start, end, flux_boundary);
    }

    let mut missing = Vec::new();
    let mut current = start;

    if start % step != 0 {
        let next = start - start % step + step;
        missing.push(TimeRange::new(start, next.min(end)));
        current = next;
    }

    for bucket in buckets {
        if bucket.end_ms <= current {
            continue;
        }
        if bucket.start_ms >= end {
            break;
        }

        let aligned_start = if bucket.start_ms % step != 0 {
            bucket.start_ms - bucket.start_ms % step + step
        } else {
            bucket.start_ms
        };
        if current < aligned_start && current < end {
            missing.push(TimeRange::new(current, aligned_start.min(end)));
        }

        let mut bucket_end = bucket.end_ms.min(end);
        if bucket_end % step != 0 && bucket_end < end {
            bucket_end -= bucket_end % step;
        }
        current = current.max(bucket_end);
    }

    if current < end {
        missing.push(TimeRange::new(current, end));
    }
    missing
}

fn find_missing_ranges_basic(
    buckets: &[CachedBucket],
    start: u64,
    end: u64,
    flux_boundary: u64,
) -> Vec<TimeRange> {
    let mut missing = Vec::new();
    let mut current = start;

    for bucket in buckets {
        if bucket.end_ms <= start {
            continue;
        }
        if bucket.start_ms >= end {
            break;
        }
        if current < bucket.start_ms {
            missing.push(TimeRange::new(current, bucket.start_ms.min(end)));
        }
        current = current.max(bucket.end_ms.min(end));
    }

    if current < end {
        if current < flux_boundary {
            missing.push(TimeRange::new(current, end.min(flux_boundary)));
            if end > flux_boundary {
                missing.push(TimeRange::new(flux_boundary, end));
            }
        } else {
            missing.push(TimeRange::new(current, end));
        }
    }
    missing
}

/// Time series results only, keeping complete points in `[start, end)`.
/// Series and aggregations left empty are kept.
fn trim_to_range(result: &QueryResult, start: u64, end: u64) -> Option<QueryResult> {
    if result.request_type != RequestType::TimeSeries {
        return None;
    }
    let value = result.as_time_series().map(|data| {
        let mut data = data.clone();
        for bucket in &mut data.aggregations {
            for series in &mut bucket.series {
                series
                    .values
                    .retain(|p| {
                        !p.partial
                            && p.timestamp >= 0
                            && (p.timestamp as u64) >= start
                            && (p.timestamp as u64) < end
                    });
            }
        }
        ResultValue::TimeSeries(data)
    });
    Some(QueryResult {
        request_type: result.request_type,
        value,
        stats: result.stats,
        warnings: result.warnings.clone(),
    })
}

/// `(empty, filtered)`: a filtered result had series and lost all points
/// to filtering, and is still worth caching.
fn emptiness(result: &QueryResult) -> (bool, bool) {
    let Some(data) = result.as_time_series() else {
        return (true, false);
    };
    if data.aggregations.is_empty() {
        return (true, false);
    }
    let total: usize = data.aggregations.iter().map(|b| b.series.len()).sum();
    if total == 0 {
        return (true, true);
    }
    let has_values = data
        .aggregations
        .iter()
        .flat_map(|b| &b.series)
        .any(|s| !s.values.is_empty());
    (!has_values, !has_values)
}

fn to_bucket(result: &QueryResult, start: u64, end: u64) -> Option<CachedBucket> {
    let (empty, filtered) = emptiness(result);
    if empty && !filtered {
        debug!("Skipping cache for empty result");
        return None;
    }
    Some(CachedBucket {
        start_ms: start,
        end_ms: end,
        request_type: result.request_type,
        value: result.as_time_series().cloned().unwrap_or_default(),
        stats: result.stats,
    })
}

/// Merge overlapping buckets: stats are summed and series with the same
/// aggregation index and labels are joined, keeping the first point seen for
/// each timestamp.
fn merge_buckets(buckets: &[&CachedBucket], warnings: Vec<String>) -> QueryResult {
    let mut stats = ExecStats::default();
    let mut query_name = String::new();
    let mut aggregations: BTreeMap<usize, AggregationBucket> = BTreeMap::new();
    let mut positions: HashMap<(usize, String), usize> = HashMap::new();

    for bucket in buckets {
        stats += bucket.stats;
        if query_name.is_empty() {
            query_name = bucket.value.query_name.clone();
        }
        for agg in &bucket.value.aggregations {
            let merged = aggregations.entry(agg.index).or_insert_with(|| AggregationBucket {
                index: agg.index,
                alias: agg.alias.clone(),
                series: Vec::new(),
            });
            for series in &agg.series {
                let id = (agg.index, series.series_key());
                match positions.get(&id) {
                    Some(&position) => {
                        let existing = &mut merged.series[position];
                        let known: HashSet<i64> =
                            existing.values.iter().map(|p| p.timestamp).collect();
                        existing
                            .values
                            .extend(series.values.iter().filter(|p| !known.contains(&p.timestamp)));
                    }
                    None => {
                        positions.insert(id, merged.series.len());
                        merged.series.push(series.clone());
                    }
                }
            }
        }
    }

    let mut aggregations: Vec<AggregationBucket> = aggregations.into_values().collect();
    for agg in &mut aggregations {
        for series in &mut agg.series {
            series.values.sort_by_key(|p| p.timestamp);
        }
    }

    QueryResult {
        request_type: RequestType::TimeSeries,
        value: Some(ResultValue::TimeSeries(TimeSeriesData {
            query_name,
            aggregations,
        })),
        stats,
        warnings,
    }
}

/// Drop points outside `[window.from, window.to)`.
fn restrict_to_window(mut result: QueryResult, window: TimeRange) -> QueryResult {
    if let Some(data) = result.as_time_series_mut() {
        for bucket in &mut data.aggregations {
            for series in &mut bucket.series {
                series.values.retain(|p| {
                    p.timestamp >= 0
                        && (p.timestamp as u64) >= window.from
                        && (p.timestamp as u64) < window.to
                });
            }
        }
        data.aggregations.retain(|b| !b.series.is_empty());
    }
    result
}

impl std::fmt::Debug for BucketCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketCache")
            .field("enabled", &self.enabled)
            .field("ttl", &self.ttl)
            .field("flux_interval", &self.flux_interval)
            .finish()
    }
}
