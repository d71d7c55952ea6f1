//! Transparent instrumentation for outbound calls.
//!
//! Every call issued through an installed [`interceptor::EntryPoint`] is
//! timed, tagged with the context and user that issued it, and folded
//! into a bounded [`metrics::MetricsStore`], without changing what the
//! caller sees. The binary exposes the store over HTTP for dashboards.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub mod config;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod handlers;
pub mod interceptor;
pub mod metrics;
pub mod monitor;
pub mod probe;
pub mod server;

pub use context::{ContextProvider, SharedContext, SharedUser, UserProvider, DEFAULT_CONTEXT, DEFAULT_USER};
pub use interceptor::{CallPrimitive, CallSpec, EntryPoint};
pub use metrics::{CallRecord, FailureKind, MetricsSnapshot, Outcome, QueryFilter, RecentCall};
pub use monitor::Monitor;

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Metrics pipeline the installed interceptor records into.
    pub monitor: Monitor,

    /// Context tag attached to calls as they are issued.
    pub context: Arc<SharedContext>,

    /// Signed-in user attached to calls as they are issued.
    pub user: Arc<SharedUser>,

    /// Process-wide outbound entry point.
    pub entry: &'static EntryPoint<interceptor::HttpPrimitive>,

    pub normalizer: Arc<endpoint::EndpointNormalizer>,

    pub probe_targets: Vec<String>,

    /// Flag checked by every probe worker on each iteration.
    pub probe_running: Arc<AtomicBool>,

    /// Handle to the spawned probe task so we can await clean shutdown.
    pub probe_handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl AppState {
    pub fn new(
        monitor: Monitor,
        context: Arc<SharedContext>,
        user: Arc<SharedUser>,
        entry: &'static EntryPoint<interceptor::HttpPrimitive>,
        normalizer: Arc<endpoint::EndpointNormalizer>,
        probe_targets: Vec<String>,
    ) -> Self {
        Self {
            monitor,
            context,
            user,
            entry,
            normalizer,
            probe_targets,
            probe_running: Arc::new(AtomicBool::new(false)),
            probe_handle: tokio::sync::Mutex::new(None),
        }
    }
}

#[cfg(test)]
impl AppState {
    /// State around a fresh monitor and a private, uninstalled entry point.
    pub(crate) fn for_tests(probe_targets: Vec<String>) -> Arc<Self> {
        let context = Arc::new(SharedContext::new());
        let user = Arc::new(SharedUser::new());
        let (monitor, _task) = Monitor::start_with_user(
            config::MonitorConfig::default(),
            context.clone(),
            user.clone(),
        )
        .unwrap();
        let entry: &'static EntryPoint<interceptor::HttpPrimitive> =
            Box::leak(Box::new(EntryPoint::new(interceptor::HttpPrimitive::new())));
        Arc::new(Self::new(
            monitor,
            context,
            user,
            entry,
            Arc::new(endpoint::EndpointNormalizer::default()),
            probe_targets,
        ))
    }
}
