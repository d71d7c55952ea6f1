use axum::{
    extract::State,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::probe::ProbePlan;
use crate::AppState;

use super::AppError;

// ─── Request / response types ────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeConfig {
    /// Number of concurrent Tokio tasks issuing calls
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// How long the probe runs (seconds)
    #[serde(default = "default_duration")]
    pub duration_secs: u64,

    /// Pause between calls on each worker (milliseconds)
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,
}

fn default_concurrency() -> u32 {
    4
}
fn default_duration() -> u64 {
    30
}
fn default_pacing_ms() -> u64 {
    250
}

impl ProbeConfig {
    fn validate(&self) -> Result<(), AppError> {
        if self.concurrency == 0 || self.concurrency > 100 {
            return Err(AppError::BadRequest(
                "concurrency must be between 1 and 100".into(),
            ));
        }
        if self.duration_secs == 0 || self.duration_secs > 300 {
            return Err(AppError::BadRequest(
                "duration_secs must be between 1 and 300".into(),
            ));
        }
        if self.pacing_ms < 10 {
            return Err(AppError::BadRequest(
                "pacing_ms must be at least 10".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct ProbeStatus {
    pub running: bool,
    pub message: String,
}

// ─── POST /api/probe/start ───────────────────────────────────────

pub async fn start_probe(
    State(state): State<Arc<AppState>>,
    Json(config): Json<ProbeConfig>,
) -> Result<Json<ProbeStatus>, AppError> {
    config.validate()?;
    if state.probe_targets.is_empty() {
        return Err(AppError::BadRequest(
            "no probe targets configured (OBSERVATORY__PROBE_TARGETS)".into(),
        ));
    }

    // Only one probe at a time. Claiming the flag BEFORE spawning also
    // lets the workers see it immediately.
    if state
        .probe_running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(AppError::AlreadyRunning);
    }

    let msg = format!(
        "Started: {} workers × {}s against {} targets, {}ms pacing",
        config.concurrency,
        config.duration_secs,
        state.probe_targets.len(),
        config.pacing_ms,
    );

    let plan = ProbePlan {
        targets: state.probe_targets.clone(),
        concurrency: config.concurrency,
        duration: Duration::from_secs(config.duration_secs),
        pacing: Duration::from_millis(config.pacing_ms),
    };
    let running = state.probe_running.clone();
    let entry = state.entry.current();
    let normalizer = state.normalizer.clone();

    let handle = tokio::spawn(async move {
        crate::probe::run(running, entry, normalizer, plan).await;
    });

    // Stash the handle so `stop` can await clean shutdown
    let mut guard = state.probe_handle.lock().await;
    *guard = Some(handle);

    Ok(Json(ProbeStatus {
        running: true,
        message: msg,
    }))
}

// ─── POST /api/probe/stop ────────────────────────────────────────

pub async fn stop_probe(
    State(state): State<Arc<AppState>>,
) -> Json<ProbeStatus> {
    if !state.probe_running.load(Ordering::SeqCst) {
        return Json(ProbeStatus {
            running: false,
            message: "No probe is running".into(),
        });
    }

    // Signal all workers to stop
    state.probe_running.store(false, Ordering::SeqCst);

    // Await the probe task so we know it's fully stopped
    let mut guard = state.probe_handle.lock().await;
    if let Some(handle) = guard.take() {
        // Ignore JoinError; the task may have already finished
        let _ = handle.await;
    }

    Json(ProbeStatus {
        running: false,
        message: "Probe stopped".into(),
    })
}

// ─── GET /api/probe/status ───────────────────────────────────────

pub async fn probe_status(
    State(state): State<Arc<AppState>>,
) -> Json<ProbeStatus> {
    let running = state.probe_running.load(Ordering::SeqCst);
    Json(ProbeStatus {
        running,
        message: if running {
            "Probe in progress".into()
        } else {
            "Idle".into()
        },
    })
}
