//! The instrumented wrapper around a [`CallPrimitive`].
//!
//! Each call gets a ticket the moment it is issued. Whoever takes the
//! ticket's pending entry out of the registry first (the settle path, the
//! ticket's `Drop`, or the watchdog) emits the one and only record for it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

use super::{CallPrimitive, CallSpec};
use crate::metrics::{nanos, CallRecord, FailureKind, Outcome};
use crate::monitor::Monitor;

// ─── Pending registry ───────────────────────────────────────────

/// A call that has been issued but not yet finalized.
#[derive(Debug, Clone)]
pub(crate) struct PendingCall {
    endpoint_key: String,
    backend: Option<String>,
    method: String,
    context_tag: String,
    user: String,
    start: Instant,
}

impl PendingCall {
    pub(crate) fn new(spec: &CallSpec, context_tag: String, user: String) -> Self {
        Self {
            endpoint_key: spec.endpoint_key.clone(),
            backend: spec.backend.clone(),
            method: spec.method.as_str().to_string(),
            context_tag,
            user,
            start: Instant::now(),
        }
    }

    fn finish(self, sequence_id: u64, outcome: Outcome, now: Instant) -> CallRecord {
        CallRecord {
            endpoint_key: self.endpoint_key,
            backend: self.backend,
            method: self.method,
            start_time: self.start,
            duration_nanos: nanos(now.saturating_duration_since(self.start)),
            outcome,
            context_tag: self.context_tag,
            user: self.user,
            sequence_id,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct PendingCalls {
    calls: Mutex<HashMap<u64, PendingCall>>,
}

impl PendingCalls {
    pub(crate) fn register(&self, id: u64, call: PendingCall) {
        self.calls.lock().insert(id, call);
    }

    /// Finalize `id` with `outcome`, unless someone already did.
    pub(crate) fn settle(&self, id: u64, outcome: Outcome) -> Option<CallRecord> {
        let call = self.calls.lock().remove(&id)?;
        Some(call.finish(id, outcome, Instant::now()))
    }

    /// Force-finalize every call pending for at least `ceiling`.
    pub(crate) fn expire(&self, ceiling: Duration) -> Vec<CallRecord> {
        let now = Instant::now();
        let mut calls = self.calls.lock();

        let overdue: Vec<u64> = calls
            .iter()
            .filter(|(_, c)| now.saturating_duration_since(c.start) >= ceiling)
            .map(|(&id, _)| id)
            .collect();

        overdue
            .into_iter()
            .filter_map(|id| {
                let call = calls.remove(&id)?;
                Some(call.finish(id, Outcome::Failure(FailureKind::Timeout), now))
            })
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.lock().len()
    }
}

// ─── Ticket ─────────────────────────────────────────────────────

/// Proof that a call is in flight. Dropping it unsettled means the caller
/// abandoned the call, which is recorded as `Cancelled`.
pub(crate) struct CallTicket {
    id: u64,
    monitor: Monitor,
    settled: bool,
}

impl CallTicket {
    pub(crate) fn new(id: u64, monitor: Monitor) -> Self {
        Self {
            id,
            monitor,
            settled: false,
        }
    }

    pub(crate) fn settle(mut self, outcome: Outcome) {
        self.settled = true;
        self.monitor.finish(self.id, outcome);
    }
}

impl Drop for CallTicket {
    fn drop(&mut self) {
        if !self.settled {
            trace!(id = self.id, "call abandoned before settling");
            self.monitor.finish(self.id, Outcome::Cancelled);
        }
    }
}

// ─── Wrapper ────────────────────────────────────────────────────

/// Records every call made through `inner` and passes its result through
/// untouched.
pub struct Instrumented<P> {
    inner: Arc<P>,
    monitor: Monitor,
}

impl<P: CallPrimitive> Instrumented<P> {
    pub fn new(inner: Arc<P>, monitor: Monitor) -> Self {
        Self { inner, monitor }
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }
}

impl<P: CallPrimitive> CallPrimitive for Instrumented<P> {
    type Output = P::Output;
    type Error = P::Error;

    fn call(&self, spec: CallSpec) -> BoxFuture<'static, Result<P::Output, P::Error>> {
        // Context, user and start time are taken now, at issue time, not
        // when the future is first polled or when it settles.
        let ticket = self.monitor.begin(&spec);
        let inner = Arc::clone(&self.inner);
        let fut = inner.call(spec);

        async move {
            let result = fut.await;
            let outcome = match &result {
                Ok(output) => inner.classify_output(output),
                Err(error) => inner.classify_error(error),
            };
            ticket.settle(outcome);
            result
        }
        .boxed()
    }

    fn classify_output(&self, output: &P::Output) -> Outcome {
        self.inner.classify_output(output)
    }

    fn classify_error(&self, error: &P::Error) -> Outcome {
        self.inner.classify_error(error)
    }
}
