//! Wiring between the recorder and the store.
//!
//! Recorded calls go through a bounded queue to a single aggregator task.
//! The recording side only ever `try_send`s, so a slow or saturated
//! aggregator costs the caller nothing; overflow is counted and dropped.
//! The same task runs the watchdog that force-finalizes calls stuck
//! pending past the settle timeout and evicts idle buckets.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::config::MonitorConfig;
use crate::context::{context_or_default, user_or_default, ContextProvider, SharedUser, UserProvider};
use crate::error::{ConfigError, RecordingFailure};
use crate::interceptor::recorder::{CallTicket, PendingCall, PendingCalls};
use crate::interceptor::CallSpec;
use crate::metrics::collector::ExportSummary;
use crate::metrics::overview::LatencyOverview;
use crate::metrics::{
    CallRecord, MetricsExport, MetricsSnapshot, MetricsStore, Outcome, PercentileSet, QueryFilter,
    RecentCall, RecentCalls,
};

enum Envelope {
    Record(CallRecord),
    /// Acknowledged once everything queued before it has been applied.
    Flush(oneshot::Sender<()>),
}

struct Shared {
    config: MonitorConfig,
    store: Arc<MetricsStore>,
    overview: Arc<Mutex<LatencyOverview>>,
    recent: Arc<Mutex<RecentCalls>>,
    pending: Arc<PendingCalls>,
    context: Arc<dyn ContextProvider>,
    user: Arc<dyn UserProvider>,
    queue: mpsc::Sender<Envelope>,
    sequence: AtomicU64,
    dropped: AtomicU64,
}

/// Handle to one metrics pipeline. Cheap to clone.
#[derive(Clone)]
pub struct Monitor {
    shared: Arc<Shared>,
}

impl Monitor {
    /// Build the store and spawn the aggregator task on the current runtime.
    /// Every call is attributed to the anonymous user.
    ///
    /// The task exits once every clone of the returned `Monitor` (including
    /// the ones held by installed wrappers) is gone.
    pub fn start(
        config: MonitorConfig,
        context: Arc<dyn ContextProvider>,
    ) -> Result<(Self, JoinHandle<()>), ConfigError> {
        Self::start_with_user(config, context, Arc::new(SharedUser::new()))
    }

    /// Like [`Monitor::start`], with `user` asked for the signed-in user
    /// each time a call is issued.
    pub fn start_with_user(
        config: MonitorConfig,
        context: Arc<dyn ContextProvider>,
        user: Arc<dyn UserProvider>,
    ) -> Result<(Self, JoinHandle<()>), ConfigError> {
        config.validate()?;

        let store = Arc::new(MetricsStore::new(
            config.max_keys,
            config.reservoir_size,
            config.bucket_ttl(),
        ));
        let overview = Arc::new(Mutex::new(LatencyOverview::new()));
        let recent = Arc::new(Mutex::new(RecentCalls::new(
            config.recent_capacity,
            config.recent_max_age(),
        )));
        let pending = Arc::new(PendingCalls::default());
        let (tx, rx) = mpsc::channel(config.queue_capacity);

        let worker = Aggregator {
            rx,
            store: Arc::clone(&store),
            overview: Arc::clone(&overview),
            recent: Arc::clone(&recent),
            pending: Arc::clone(&pending),
            settle_timeout: config.settle_timeout(),
            watchdog_interval: config.watchdog_interval(),
        };
        let handle = tokio::spawn(worker.run());

        info!(
            max_keys = config.max_keys,
            reservoir_size = config.reservoir_size,
            settle_timeout_ms = config.settle_timeout_ms,
            "metrics monitor started"
        );

        let monitor = Self {
            shared: Arc::new(Shared {
                config,
                store,
                overview,
                recent,
                pending,
                context,
                user,
                queue: tx,
                sequence: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        };
        Ok((monitor, handle))
    }

    // ── recording side ──────────────────────────────────────────

    /// Open a pending call: snapshot the context tag, the user and the
    /// start time.
    pub(crate) fn begin(&self, spec: &CallSpec) -> CallTicket {
        let id = self.shared.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let context = context_or_default(self.shared.context.as_ref());
        let user = user_or_default(self.shared.user.as_ref());
        self.shared
            .pending
            .register(id, PendingCall::new(spec, context, user));
        CallTicket::new(id, self.clone())
    }

    /// Close a pending call. Silent if the watchdog already closed it.
    pub(crate) fn finish(&self, id: u64, outcome: Outcome) {
        match self.shared.pending.settle(id, outcome) {
            Some(record) => {
                // Failure is already logged and counted inside `submit`.
                let _ = self.submit(record);
            }
            None => trace!(id, "call already finalized by watchdog"),
        }
    }

    /// Hand a finished record to the aggregator without waiting.
    pub fn submit(&self, record: CallRecord) -> Result<(), RecordingFailure> {
        let err = match self.shared.queue.try_send(Envelope::Record(record)) {
            Ok(()) => return Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => RecordingFailure::QueueFull,
            Err(mpsc::error::TrySendError::Closed(_)) => RecordingFailure::Closed,
        };

        let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        match err {
            RecordingFailure::QueueFull => debug!(dropped, "record queue full; record dropped"),
            RecordingFailure::Closed => warn!(dropped, "aggregator gone; record dropped"),
        }
        Err(err)
    }

    /// Wait until every record submitted so far has reached the store.
    pub async fn flush(&self) -> Result<(), RecordingFailure> {
        let (tx, rx) = oneshot::channel();
        self.shared
            .queue
            .send(Envelope::Flush(tx))
            .await
            .map_err(|_| RecordingFailure::Closed)?;
        rx.await.map_err(|_| RecordingFailure::Closed)
    }

    // ── query side ──────────────────────────────────────────────

    pub fn query(&self, filter: &QueryFilter) -> Vec<MetricsSnapshot> {
        self.shared.store.query(filter)
    }

    pub fn total_requests(&self) -> u64 {
        self.shared.store.total_requests()
    }

    /// Store-wide latency percentiles in microseconds.
    pub fn overview(&self) -> PercentileSet {
        self.shared.overview.lock().summary()
    }

    /// Last few settled calls, newest first.
    pub fn recent_calls(&self) -> Vec<RecentCall> {
        self.shared.recent.lock().snapshot()
    }

    pub fn export(&self) -> MetricsExport {
        let metrics = self.shared.store.query(&QueryFilter::default());
        let (summary, distribution) = {
            let overview = self.shared.overview.lock();
            (overview.summary(), overview.distribution())
        };
        let distinct_contexts = metrics
            .iter()
            .map(|m| m.context_tag.as_str())
            .collect::<HashSet<_>>()
            .len();
        let backend_count = metrics
            .iter()
            .filter_map(|m| m.backend.as_deref())
            .collect::<HashSet<_>>()
            .len();

        MetricsExport {
            timestamp: Utc::now(),
            total_requests: metrics.iter().map(|m| m.count).sum(),
            summary: ExportSummary {
                total_endpoints: metrics.len(),
                backend_count,
                distinct_contexts,
                lifetime_requests: self.shared.store.lifetime_requests(),
                evicted_buckets: self.shared.store.evicted_buckets(),
                dropped_records: self.dropped_records(),
            },
            metrics,
            recent: self.recent_calls(),
            overview: summary,
            distribution,
        }
    }

    pub fn clear(&self) {
        self.shared.store.clear();
        self.shared.overview.lock().reset();
        self.shared.recent.lock().clear();
        info!("metrics cleared");
    }

    pub fn store(&self) -> &Arc<MetricsStore> {
        &self.shared.store
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.shared.config
    }

    /// Calls issued but not yet finalized.
    pub fn pending_calls(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn dropped_records(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

// ─── Aggregator task ─────────────────────────────────────────────

struct Aggregator {
    rx: mpsc::Receiver<Envelope>,
    store: Arc<MetricsStore>,
    overview: Arc<Mutex<LatencyOverview>>,
    recent: Arc<Mutex<RecentCalls>>,
    pending: Arc<PendingCalls>,
    settle_timeout: Duration,
    watchdog_interval: Duration,
}

impl Aggregator {
    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.watchdog_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                envelope = self.rx.recv() => match envelope {
                    Some(Envelope::Record(record)) => self.apply(record),
                    Some(Envelope::Flush(done)) => {
                        let _ = done.send(());
                    }
                    None => break,
                },
                _ = ticker.tick() => self.watchdog(),
            }
        }

        debug!("aggregator stopped");
    }

    fn apply(&self, record: CallRecord) {
        self.overview.lock().record(record.duration_nanos);
        self.recent.lock().push(&record);
        self.store.record(record);
    }

    fn watchdog(&self) {
        for record in self.pending.expire(self.settle_timeout) {
            warn!(
                endpoint = %record.endpoint_key,
                backend = record.backend.as_deref().unwrap_or("-"),
                context = %record.context_tag,
                id = record.sequence_id,
                "call did not settle in time; finalized as timeout"
            );
            self.apply(record);
        }
        let swept = self.store.sweep_idle();
        if swept > 0 {
            trace!(swept, "watchdog swept idle buckets");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::StaticContext;
    use crate::metrics::FailureKind;
    use tokio::time::Instant;

    fn record(endpoint: &str, ms: u64, outcome: Outcome) -> CallRecord {
        CallRecord {
            endpoint_key: endpoint.into(),
            backend: None,
            method: "GET".into(),
            start_time: Instant::now(),
            duration_nanos: ms * 1_000_000,
            outcome,
            context_tag: "Dashboard".into(),
            user: "Anonymous".into(),
            sequence_id: 0,
        }
    }

    fn on(backend: &str, mut record: CallRecord) -> CallRecord {
        record.backend = Some(backend.into());
        record
    }

    fn start(config: MonitorConfig) -> (Monitor, JoinHandle<()>) {
        Monitor::start(config, Arc::new(StaticContext("Dashboard".into()))).unwrap()
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let config = MonitorConfig {
            reservoir_size: 0,
            ..MonitorConfig::default()
        };
        let err = Monitor::start(config, Arc::new(StaticContext("X".into()))).err();
        assert_eq!(err, Some(ConfigError::Zero("reservoir_size")));
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let (monitor, _task) = start(MonitorConfig {
            queue_capacity: 2,
            ..MonitorConfig::default()
        });

        // The aggregator has not been polled yet on this single-threaded runtime.
        assert_eq!(monitor.submit(record("GET /a", 1, Outcome::Success(200))), Ok(()));
        assert_eq!(monitor.submit(record("GET /a", 1, Outcome::Success(200))), Ok(()));
        assert_eq!(
            monitor.submit(record("GET /a", 1, Outcome::Success(200))),
            Err(RecordingFailure::QueueFull)
        );
        assert_eq!(monitor.dropped_records(), 1);

        monitor.flush().await.unwrap();
        assert_eq!(monitor.total_requests(), 2);
        assert_eq!(monitor.export().summary.dropped_records, 1);
    }

    #[tokio::test]
    async fn closed_aggregator_is_contained() {
        let (monitor, task) = start(MonitorConfig::default());
        task.abort();
        let _ = task.await;

        assert_eq!(
            monitor.submit(record("GET /a", 1, Outcome::Success(200))),
            Err(RecordingFailure::Closed)
        );
        assert_eq!(monitor.flush().await, Err(RecordingFailure::Closed));
        assert_eq!(monitor.dropped_records(), 1);
    }

    #[tokio::test]
    async fn export_and_clear() {
        let (monitor, _task) = start(MonitorConfig::default());
        monitor.submit(record("GET /api/positions", 10, Outcome::Success(200))).unwrap();
        monitor.submit(record("GET /api/positions", 30, Outcome::Success(200))).unwrap();
        monitor
            .submit(record("GET /api/funnel", 5, Outcome::Failure(FailureKind::Status(500))))
            .unwrap();
        monitor.flush().await.unwrap();

        let export = monitor.export();
        assert_eq!(export.total_requests, 3);
        assert_eq!(export.metrics.len(), 2);
        assert_eq!(export.summary.total_endpoints, 2);
        assert_eq!(export.summary.distinct_contexts, 1);
        assert_eq!(export.summary.lifetime_requests, 3);
        assert_eq!(export.overview.count, 3);
        assert_eq!(export.overview.min, 5_000);
        assert!(!export.distribution.is_empty());

        let json = serde_json::to_value(&export).unwrap();
        assert_eq!(json["metrics"][0]["endpoint_key"], "GET /api/funnel");
        assert_eq!(json["metrics"][0]["error_count"], 1);

        assert_eq!(export.recent.len(), 3);
        assert_eq!(export.recent[0].endpoint_key, "GET /api/funnel");
        assert_eq!(json["recent"][0]["success"], false);

        monitor.clear();
        assert_eq!(monitor.total_requests(), 0);
        assert!(!monitor.overview().has_data());
        assert!(monitor.recent_calls().is_empty());
    }

    #[tokio::test]
    async fn export_counts_labelled_backends() {
        let (monitor, _task) = start(MonitorConfig::default());
        monitor.submit(on("SQLSERVER", record("GET /api/positions", 4, Outcome::Success(200)))).unwrap();
        monitor.submit(on("SQLSERVER", record("GET /api/funnel", 4, Outcome::Success(200)))).unwrap();
        monitor.submit(on("POSTGRES", record("GET /api/positions", 4, Outcome::Success(200)))).unwrap();
        monitor.submit(record("GET /health", 1, Outcome::Success(200))).unwrap();
        monitor.flush().await.unwrap();

        let export = monitor.export();
        assert_eq!(export.summary.total_endpoints, 4);
        assert_eq!(export.summary.backend_count, 2);
        assert_eq!(
            monitor.query(&QueryFilter::backend("SQLSERVER")).len(),
            2
        );
        assert_eq!(
            monitor.query(&QueryFilter::endpoint("GET /api/positions")).len(),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_sweeps_idle_buckets() {
        let (monitor, _task) = start(MonitorConfig {
            bucket_ttl_ms: 1_000,
            watchdog_interval_ms: 100,
            ..MonitorConfig::default()
        });
        monitor.submit(record("GET /api/stale", 1, Outcome::Success(200))).unwrap();
        monitor.flush().await.unwrap();
        assert_eq!(monitor.store().len(), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        monitor.submit(record("GET /api/fresh", 1, Outcome::Success(200))).unwrap();
        monitor.flush().await.unwrap();

        // stale passes its TTL, fresh does not; a few watchdog ticks later
        // only stale has left the map
        tokio::time::sleep(Duration::from_millis(700)).await;
        monitor.flush().await.unwrap();
        assert_eq!(monitor.store().len(), 1);
        assert_eq!(monitor.store().evicted_buckets(), 1);
        assert_eq!(
            monitor.query(&QueryFilter::default())[0].endpoint_key,
            "GET /api/fresh"
        );

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        monitor.flush().await.unwrap();
        assert!(monitor.store().is_empty());
        assert_eq!(monitor.store().evicted_buckets(), 2);
    }
}
