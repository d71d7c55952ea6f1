use hdrhistogram::Histogram;
use serde::Serialize;

/// A percentile breakdown for one latency population.
/// Units are whatever the source recorded: nanoseconds for bucket
/// reservoirs, microseconds for the store-wide histogram.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PercentileSet {
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub p50: u64,
    pub p95: u64,
    pub p99: u64,
    pub p999: u64,
    pub count: u64,
}

impl PercentileSet {
    /// Extract a full percentile set from an HdrHistogram.
    /// Returns zeroed values if the histogram is empty.
    pub fn from_histogram(hist: &Histogram<u64>) -> Self {
        if hist.len() == 0 {
            return Self::empty();
        }

        Self {
            min: hist.min(),
            max: hist.max(),
            mean: hist.mean(),
            p50: hist.value_at_percentile(50.0),
            p95: hist.value_at_percentile(95.0),
            p99: hist.value_at_percentile(99.0),
            p999: hist.value_at_percentile(99.9),
            count: hist.len(),
        }
    }

    /// Nearest-rank percentiles over an already sorted sample.
    pub fn from_sorted(sorted: &[u64]) -> Self {
        let (Some(&min), Some(&max)) = (sorted.first(), sorted.last()) else {
            return Self::empty();
        };

        let sum: u128 = sorted.iter().map(|&v| v as u128).sum();

        Self {
            min,
            max,
            mean: sum as f64 / sorted.len() as f64,
            p50: nearest_rank(sorted, 50.0).unwrap_or(0),
            p95: nearest_rank(sorted, 95.0).unwrap_or(0),
            p99: nearest_rank(sorted, 99.0).unwrap_or(0),
            p999: nearest_rank(sorted, 99.9).unwrap_or(0),
            count: sorted.len() as u64,
        }
    }

    /// All-zero placeholder used before any samples are recorded.
    pub fn empty() -> Self {
        Self {
            min: 0,
            max: 0,
            mean: 0.0,
            p50: 0,
            p95: 0,
            p99: 0,
            p999: 0,
            count: 0,
        }
    }

    pub fn has_data(&self) -> bool {
        self.count > 0
    }
}

/// Smallest value such that at least `pct` percent of the sample is <= it.
pub fn nearest_rank(sorted: &[u64], pct: f64) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let n = sorted.len();
    let rank = ((pct / 100.0) * n as f64).ceil() as usize;
    Some(sorted[rank.clamp(1, n) - 1])
}
