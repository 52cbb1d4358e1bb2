//! Response-time metrics
//!
//! Records `(timestamp, latency, status)` per endpoint in bounded ring
//! buffers. Statistics are derived on every query and never stored.

use crate::infrastructure::ring_buffer::RingBuffer;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use time::OffsetDateTime;

/// Records kept per endpoint before the oldest is evicted
pub const DEFAULT_MAX_RECORDS_PER_ENDPOINT: usize = 1000;

/// One measured request
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub response_time_ms: f64,
    pub status_code: u16,
}

impl MetricRecord {
    /// 2xx and 3xx count as success
    #[inline]
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status_code)
    }
}

/// Derived statistics for one endpoint
///
/// Latencies are rounded to two decimals. `success_rate` is a percentage in
/// `[0, 100]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointStats {
    pub endpoint: String,
    pub count: usize,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub success_rate: f64,
}

impl EndpointStats {
    /// All-zero statistics for an endpoint with no records
    pub fn empty(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            count: 0,
            avg_ms: 0.0,
            min_ms: 0.0,
            max_ms: 0.0,
            p50_ms: 0.0,
            p95_ms: 0.0,
            p99_ms: 0.0,
            success_rate: 0.0,
        }
    }

    /// Compute statistics over a window of records
    pub fn from_records<'a, I>(endpoint: &str, records: I) -> Self
    where
        I: IntoIterator<Item = &'a MetricRecord>,
    {
        let mut times = Vec::new();
        let mut successful = 0usize;
        for record in records {
            times.push(record.response_time_ms);
            if record.is_success() {
                successful += 1;
            }
        }

        if times.is_empty() {
            return Self::empty(endpoint);
        }

        let count = times.len();
        let sum: f64 = times.iter().sum();
        times.sort_by(|a, b| a.total_cmp(b));

        Self {
            endpoint: endpoint.to_string(),
            count,
            avg_ms: round2(sum / count as f64),
            min_ms: round2(times[0]),
            max_ms: round2(times[count - 1]),
            p50_ms: round2(nearest_rank(&times, 0.50)),
            p95_ms: round2(nearest_rank(&times, 0.95)),
            p99_ms: round2(nearest_rank(&times, 0.99)),
            success_rate: round2(successful as f64 / count as f64 * 100.0),
        }
    }
}

/// Aggregate view across all endpoints
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerSummary {
    pub total_endpoints: usize,
    pub total_requests: usize,
    pub overall_avg_ms: f64,
    pub overall_success_rate: f64,
    pub endpoints: BTreeMap<String, EndpointStats>,
}

/// Nearest-rank percentile over ascending samples: `sorted[floor(len * p)]`
///
/// Returns 0 for an empty slice.
pub fn nearest_rank(sorted: &[f64], percentile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = (sorted.len() as f64 * percentile).floor() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[inline]
fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Per-endpoint response time tracker
///
/// Thread-safe: every append happens under the write lock, so readers never
/// observe a partially written record.
pub struct ResponseTimeTracker {
    metrics: RwLock<HashMap<String, RingBuffer<MetricRecord>>>,
    max_records_per_endpoint: usize,
}

impl ResponseTimeTracker {
    /// Create tracker with the default per-endpoint cap
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_RECORDS_PER_ENDPOINT)
    }

    /// Create tracker keeping at most `max_records_per_endpoint` records per endpoint
    pub fn with_capacity(max_records_per_endpoint: usize) -> Self {
        Self {
            metrics: RwLock::new(HashMap::new()),
            max_records_per_endpoint: max_records_per_endpoint.max(1),
        }
    }

    /// Record a response time measurement stamped with the current time
    pub fn record(&self, endpoint: &str, response_time_ms: f64, status_code: u16) {
        self.record_at(endpoint, response_time_ms, status_code, OffsetDateTime::now_utc());
    }

    /// Record a response time measurement with an explicit timestamp
    pub fn record_at(
        &self,
        endpoint: &str,
        response_time_ms: f64,
        status_code: u16,
        timestamp: OffsetDateTime,
    ) {
        let record = MetricRecord {
            timestamp,
            response_time_ms,
            status_code,
        };

        let mut metrics = self.metrics.write();
        match metrics.get_mut(endpoint) {
            Some(buffer) => {
                buffer.push(record);
            }
            None => {
                let mut buffer = RingBuffer::new(self.max_records_per_endpoint);
                buffer.push(record);
                metrics.insert(endpoint.to_string(), buffer);
            }
        }
    }

    /// Statistics for one endpoint; unknown endpoints yield `count == 0`
    pub fn stats(&self, endpoint: &str) -> EndpointStats {
        let metrics = self.metrics.read();
        match metrics.get(endpoint) {
            Some(buffer) => EndpointStats::from_records(endpoint, buffer),
            None => EndpointStats::empty(endpoint),
        }
    }

    /// Statistics for every known endpoint, keyed by endpoint
    pub fn all_stats(&self) -> BTreeMap<String, EndpointStats> {
        let metrics = self.metrics.read();
        metrics
            .iter()
            .map(|(endpoint, buffer)| {
                (endpoint.clone(), EndpointStats::from_records(endpoint, buffer))
            })
            .collect()
    }

    /// Request-weighted averages across all endpoints
    ///
    /// With no recorded requests the overall success rate reads 100.
    pub fn summary(&self) -> TrackerSummary {
        let endpoints = self.all_stats();
        let total_requests: usize = endpoints.values().map(|s| s.count).sum();

        let (overall_avg_ms, overall_success_rate) = if total_requests > 0 {
            let weighted_avg: f64 = endpoints.values().map(|s| s.avg_ms * s.count as f64).sum();
            let weighted_success: f64 = endpoints
                .values()
                .map(|s| s.success_rate * s.count as f64)
                .sum();
            (
                round2(weighted_avg / total_requests as f64),
                round2(weighted_success / total_requests as f64),
            )
        } else {
            (0.0, 100.0)
        };

        TrackerSummary {
            total_endpoints: endpoints.len(),
            total_requests,
            overall_avg_ms,
            overall_success_rate,
            endpoints,
        }
    }

    /// Raw records for one endpoint, oldest first
    pub fn time_series(&self, endpoint: &str) -> Vec<MetricRecord> {
        self.metrics
            .read()
            .get(endpoint)
            .map(RingBuffer::to_vec)
            .unwrap_or_default()
    }

    /// Drop records for one endpoint, or for all endpoints when `None`
    pub fn clear(&self, endpoint: Option<&str>) {
        let mut metrics = self.metrics.write();
        match endpoint {
            Some(endpoint) => {
                metrics.remove(endpoint);
            }
            None => metrics.clear(),
        }
    }

    /// Number of endpoints with at least one record
    pub fn endpoint_count(&self) -> usize {
        self.metrics.read().len()
    }

    /// Per-endpoint record cap
    pub fn max_records_per_endpoint(&self) -> usize {
        self.max_records_per_endpoint
    }
}

impl Default for ResponseTimeTracker {
    fn default() -> Self {
        Self::new()
    }
}
