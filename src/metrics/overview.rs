use hdrhistogram::Histogram;
use serde::Serialize;

use super::percentiles::PercentileSet;

// ─── Configuration ───────────────────────────────────────────────

/// HdrHistogram range: 1 μs → 60 s, 3 significant figures
const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 60_000_000;
const HIST_SIGFIG: u8 = 3;

/// Distribution bucket boundaries (μs), sized for calls that leave the
/// process: sub-millisecond loopback up to multi-second slow backends.
const DIST_BOUNDARIES: &[u64] = &[
    500, 1_000, 2_500, 5_000, 10_000, 25_000, 50_000, 100_000, 250_000,
    500_000, 1_000_000, 2_500_000, 5_000_000, 10_000_000,
];

/// A bucket in the latency distribution histogram.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistBucket {
    pub range_start_us: u64,
    pub range_end_us: u64,
    pub count: u64,
}

/// Store-wide latency histogram across every endpoint and context.
///
/// Per-bucket reservoirs answer "how slow is this endpoint on this
/// screen"; this answers "how slow is the network overall" with fixed
/// memory regardless of how many buckets come and go.
pub struct LatencyOverview {
    hist: Histogram<u64>,
}

impl LatencyOverview {
    pub fn new() -> Self {
        Self {
            hist: Histogram::<u64>::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG)
                .expect("histogram creation"),
        }
    }

    /// Clamped to the histogram range so outliers land in the top bucket.
    pub fn record(&mut self, duration_nanos: u64) {
        let us = (duration_nanos / 1_000).clamp(HIST_LOW, HIST_HIGH);
        self.hist.saturating_record(us);
    }

    pub fn reset(&mut self) {
        self.hist.reset();
    }

    pub fn summary(&self) -> PercentileSet {
        PercentileSet::from_histogram(&self.hist)
    }

    /// Bar-chart view of the histogram, skipping empty buckets.
    pub fn distribution(&self) -> Vec<DistBucket> {
        if self.hist.len() == 0 {
            return Vec::new();
        }

        let bounds = DIST_BOUNDARIES;
        let mut counts = vec![0u64; bounds.len() + 1]; // +1 for overflow

        for iv in self.hist.iter_recorded() {
            let val = iv.value_iterated_to();
            // first boundary >= val
            let idx = match bounds.binary_search(&val) {
                Ok(i) | Err(i) => i,
            };
            counts[idx.min(bounds.len())] += iv.count_at_value();
        }

        let mut result = Vec::with_capacity(counts.len());
        let mut prev = 0u64;
        for (i, &boundary) in bounds.iter().enumerate() {
            if counts[i] > 0 {
                result.push(DistBucket {
                    range_start_us: prev,
                    range_end_us: boundary,
                    count: counts[i],
                });
            }
            prev = boundary;
        }
        if counts[bounds.len()] > 0 {
            result.push(DistBucket {
                range_start_us: prev,
                range_end_us: self.hist.max(),
                count: counts[bounds.len()],
            });
        }

        result
    }
}

impl Default for LatencyOverview {
    fn default() -> Self {
        Self::new()
    }
}
