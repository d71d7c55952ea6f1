use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use super::overview::DistBucket;
use super::percentiles::PercentileSet;
use super::recent::RecentCall;
use super::reservoir::Reservoir;
use super::{BucketKey, CallRecord};

// ─── Public types ────────────────────────────────────────────────

/// Concurrent, bounded-memory aggregation keyed by (endpoint, backend, context).
///
/// Each bucket sits behind its own mutex; the map lock is only taken for
/// writing when a key is created, evicted or cleared. Records for
/// different keys therefore never wait on each other, and records for the
/// same key serialize on that bucket alone.
pub struct MetricsStore {
    buckets: RwLock<HashMap<BucketKey, Arc<Mutex<Bucket>>>>,
    max_keys: usize,
    reservoir_size: usize,
    bucket_ttl: Option<Duration>,
    /// Logical clock used to order updates when instants tie.
    clock: AtomicU64,
    accepted: AtomicU64,
    evicted: AtomicU64,
}

/// Which buckets a query should return. Empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub endpoint_key: Option<String>,
    pub backend: Option<String>,
    pub context_tag: Option<String>,
    /// Only buckets updated at or after this wall-clock time.
    pub since: Option<DateTime<Utc>>,
}

impl QueryFilter {
    pub fn endpoint(key: impl Into<String>) -> Self {
        Self {
            endpoint_key: Some(key.into()),
            ..Self::default()
        }
    }

    pub fn context(tag: impl Into<String>) -> Self {
        Self {
            context_tag: Some(tag.into()),
            ..Self::default()
        }
    }

    pub fn backend(label: impl Into<String>) -> Self {
        Self {
            backend: Some(label.into()),
            ..Self::default()
        }
    }

    fn matches_key(&self, key: &BucketKey) -> bool {
        self.endpoint_key
            .as_ref()
            .map_or(true, |e| *e == key.endpoint_key)
            && self
                .backend
                .as_ref()
                .map_or(true, |b| key.backend.as_ref() == Some(b))
            && self
                .context_tag
                .as_ref()
                .map_or(true, |c| *c == key.context_tag)
    }
}

/// Point-in-time copy of one bucket. Owns all of its data.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub endpoint_key: String,
    pub backend: Option<String>,
    pub context_tag: String,
    /// User behind the most recent call in this bucket
    pub user: String,
    pub count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub total_duration_nanos: u64,
    pub min_nanos: u64,
    pub max_nanos: u64,
    pub mean_nanos: f64,
    pub last_duration_nanos: u64,
    /// Nearest-rank estimates over the bucket's reservoir (nanoseconds)
    pub percentiles: PercentileSet,
    pub last_status: Option<u16>,
    pub updated_at: DateTime<Utc>,
}

impl MetricsSnapshot {
    pub fn min(&self) -> Duration {
        Duration::from_nanos(self.min_nanos)
    }

    pub fn max(&self) -> Duration {
        Duration::from_nanos(self.max_nanos)
    }

    pub fn mean(&self) -> Duration {
        Duration::from_nanos(self.mean_nanos.round() as u64)
    }

    pub fn p50(&self) -> Duration {
        Duration::from_nanos(self.percentiles.p50)
    }

    pub fn p95(&self) -> Duration {
        Duration::from_nanos(self.percentiles.p95)
    }

    pub fn p99(&self) -> Duration {
        Duration::from_nanos(self.percentiles.p99)
    }

    pub fn last_duration(&self) -> Duration {
        Duration::from_nanos(self.last_duration_nanos)
    }
}

/// Full dump for dashboards and offline analysis.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsExport {
    pub timestamp: DateTime<Utc>,
    pub total_requests: u64,
    pub metrics: Vec<MetricsSnapshot>,
    pub summary: ExportSummary,
    /// Last few settled calls, newest first
    pub recent: Vec<RecentCall>,
    /// Store-wide latency percentiles (microseconds)
    pub overview: PercentileSet,
    pub distribution: Vec<DistBucket>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub total_endpoints: usize,
    /// Distinct labelled backends among live buckets
    pub backend_count: usize,
    pub distinct_contexts: usize,
    pub lifetime_requests: u64,
    pub evicted_buckets: u64,
    pub dropped_records: u64,
}

// ─── Internal state ──────────────────────────────────────────────

struct Bucket {
    count: u64,
    error_count: u64,
    total_duration_nanos: u64,
    min_nanos: u64,
    max_nanos: u64,
    last_duration_nanos: u64,
    reservoir: Reservoir,
    last_status: Option<u16>,
    last_user: String,
    last_updated: Instant,
    updated_at: DateTime<Utc>,
    tick: u64,
    /// Set once the bucket has left the map; writers holding a stale
    /// handle must go back through the map.
    retired: bool,
}

impl Bucket {
    fn new(reservoir_size: usize) -> Self {
        Self {
            count: 0,
            error_count: 0,
            total_duration_nanos: 0,
            min_nanos: u64::MAX,
            max_nanos: 0,
            last_duration_nanos: 0,
            reservoir: Reservoir::new(reservoir_size),
            last_status: None,
            last_user: String::new(),
            last_updated: Instant::now(),
            updated_at: Utc::now(),
            tick: 0,
            retired: false,
        }
    }

    fn apply(&mut self, record: &CallRecord, tick: u64) {
        let d = record.duration_nanos;

        self.count += 1;
        if record.outcome.is_error() {
            self.error_count += 1;
        }
        self.total_duration_nanos = self.total_duration_nanos.saturating_add(d);
        self.min_nanos = self.min_nanos.min(d);
        self.max_nanos = self.max_nanos.max(d);
        self.last_duration_nanos = d;
        self.reservoir.insert(d, &mut rand::thread_rng());
        if let Some(status) = record.outcome.status() {
            self.last_status = Some(status);
        }
        if self.last_user != record.user {
            self.last_user.clone_from(&record.user);
        }
        self.last_updated = Instant::now();
        self.updated_at = Utc::now();
        self.tick = tick;
    }

    fn snapshot(&self, key: &BucketKey) -> MetricsSnapshot {
        MetricsSnapshot {
            endpoint_key: key.endpoint_key.clone(),
            backend: key.backend.clone(),
            context_tag: key.context_tag.clone(),
            user: self.last_user.clone(),
            count: self.count,
            success_count: self.count - self.error_count,
            error_count: self.error_count,
            total_duration_nanos: self.total_duration_nanos,
            min_nanos: self.min_nanos,
            max_nanos: self.max_nanos,
            mean_nanos: self.total_duration_nanos as f64 / self.count as f64,
            last_duration_nanos: self.last_duration_nanos,
            percentiles: PercentileSet::from_sorted(&self.reservoir.sorted()),
            last_status: self.last_status,
            updated_at: self.updated_at,
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_updated)
    }
}

// ─── MetricsStore impl ───────────────────────────────────────────

impl MetricsStore {
    /// `bucket_ttl` of `None` disables idle eviction.
    pub fn new(max_keys: usize, reservoir_size: usize, bucket_ttl: Option<Duration>) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            max_keys: max_keys.max(1),
            reservoir_size: reservoir_size.max(1),
            bucket_ttl,
            clock: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    /// Fold one settled call into its bucket. Never fails.
    pub fn record(&self, record: CallRecord) {
        let key = record.key();

        // Fast path: bucket exists, only its own lock is needed.
        let existing = self.buckets.read().get(&key).cloned();
        if let Some(bucket) = existing {
            let mut b = bucket.lock();
            if !b.retired {
                b.apply(&record, self.next_tick());
                self.accepted.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        // Slow path: create the bucket (or find one another writer just
        // created) under the map write lock. A bucket in the map is never
        // retired while the write lock is held.
        let mut map = self.buckets.write();
        if let Some(bucket) = map.get(&key) {
            bucket.lock().apply(&record, self.next_tick());
            self.accepted.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mut bucket = Bucket::new(self.reservoir_size);
        bucket.apply(&record, self.next_tick());
        map.insert(key.clone(), Arc::new(Mutex::new(bucket)));
        self.accepted.fetch_add(1, Ordering::Relaxed);

        self.enforce_capacity(&mut map, &key);
    }

    /// One snapshot per matching bucket, ordered by endpoint, backend, context.
    pub fn query(&self, filter: &QueryFilter) -> Vec<MetricsSnapshot> {
        let now = Instant::now();
        let handles: Vec<(BucketKey, Arc<Mutex<Bucket>>)> = self
            .buckets
            .read()
            .iter()
            .filter(|(k, _)| filter.matches_key(k))
            .map(|(k, b)| (k.clone(), Arc::clone(b)))
            .collect();

        let mut out: Vec<MetricsSnapshot> = handles
            .iter()
            .filter_map(|(key, bucket)| {
                let b = bucket.lock();
                if b.retired || self.is_expired(&b, now) {
                    return None;
                }
                if filter.since.is_some_and(|since| b.updated_at < since) {
                    return None;
                }
                Some(b.snapshot(key))
            })
            .collect();

        out.sort_by(|a, b| {
            (&a.endpoint_key, &a.backend, &a.context_tag)
                .cmp(&(&b.endpoint_key, &b.backend, &b.context_tag))
        });
        out
    }

    /// Sum of `count` over live buckets.
    pub fn total_requests(&self) -> u64 {
        let now = Instant::now();
        self.buckets
            .read()
            .values()
            .map(|bucket| {
                let b = bucket.lock();
                if self.is_expired(&b, now) {
                    0
                } else {
                    b.count
                }
            })
            .sum()
    }

    /// Every record ever accepted, including ones whose bucket was evicted.
    pub fn lifetime_requests(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn evicted_buckets(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Number of live buckets.
    pub fn len(&self) -> usize {
        self.buckets.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.read().is_empty()
    }

    pub fn max_keys(&self) -> usize {
        self.max_keys
    }

    /// Wipe every bucket. The lifetime counter restarts too.
    pub fn clear(&self) {
        let mut map = self.buckets.write();
        for bucket in map.values() {
            bucket.lock().retired = true;
        }
        map.clear();
        self.accepted.store(0, Ordering::Relaxed);
        self.evicted.store(0, Ordering::Relaxed);
    }

    /// Drop buckets idle for longer than the TTL. Returns how many went.
    pub fn sweep_idle(&self) -> usize {
        let Some(ttl) = self.bucket_ttl else {
            return 0;
        };
        let now = Instant::now();

        let mut map = self.buckets.write();
        let before = map.len();
        map.retain(|_, bucket| {
            let mut b = bucket.lock();
            if b.idle_for(now) > ttl {
                b.retired = true;
                false
            } else {
                true
            }
        });
        let swept = before - map.len();
        if swept > 0 {
            self.evicted.fetch_add(swept as u64, Ordering::Relaxed);
            debug!(swept, remaining = map.len(), "idle buckets evicted");
        }
        swept
    }

    // ── internals ───────────────────────────────────────────────

    fn next_tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn is_expired(&self, b: &Bucket, now: Instant) -> bool {
        self.bucket_ttl.is_some_and(|ttl| b.idle_for(now) > ttl)
    }

    /// Evict least-recently-updated buckets until back at `max_keys`.
    /// `keep` is the bucket that was just created.
    fn enforce_capacity(&self, map: &mut HashMap<BucketKey, Arc<Mutex<Bucket>>>, keep: &BucketKey) {
        while map.len() > self.max_keys {
            let victim = map
                .iter()
                .filter(|(k, _)| *k != keep)
                .map(|(k, bucket)| {
                    let b = bucket.lock();
                    ((b.last_updated, b.tick), k)
                })
                .min_by(|a, b| a.0.cmp(&b.0))
                .map(|(_, k)| k.clone());

            let Some(victim) = victim else { break };
            if let Some(bucket) = map.remove(&victim) {
                bucket.lock().retired = true;
                self.evicted.fetch_add(1, Ordering::Relaxed);
                debug!(
                    endpoint = %victim.endpoint_key,
                    backend = victim.backend.as_deref().unwrap_or("-"),
                    context = %victim.context_tag,
                    "bucket evicted at capacity"
                );
            }
        }
    }
}
