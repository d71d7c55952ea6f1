use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::endpoint::EndpointNormalizer;
use crate::interceptor::{CallSpec, SharedPrimitive};

/// Shape of one probe run.
#[derive(Debug, Clone)]
pub struct ProbePlan {
    pub targets: Vec<String>,
    pub concurrency: u32,
    pub duration: Duration,
    /// Pause between calls on each worker
    pub pacing: Duration,
}

// ─── Public entry point ──────────────────────────────────────────

/// Spawns `concurrency` Tokio tasks that call the configured targets
/// through `entry` until the deadline or the `running` flag is cleared.
/// Calls go through whatever is installed, so they show up in the metrics
/// exactly like application traffic. Returns how many calls were issued.
pub async fn run<O, E>(
    running: Arc<AtomicBool>,
    entry: SharedPrimitive<O, E>,
    normalizer: Arc<EndpointNormalizer>,
    plan: ProbePlan,
) -> u64
where
    O: Send + 'static,
    E: Send + 'static,
{
    let deadline = Instant::now() + plan.duration;
    let targets = Arc::new(plan.targets);

    let mut handles = Vec::with_capacity(plan.concurrency as usize);

    for worker_id in 0..plan.concurrency {
        let running = running.clone();
        let entry = entry.clone();
        let normalizer = normalizer.clone();
        let targets = targets.clone();
        let pacing = plan.pacing;

        handles.push(tokio::spawn(async move {
            worker(worker_id, running, entry, normalizer, targets, deadline, pacing).await
        }));
    }

    let mut issued = 0;
    for h in handles {
        issued += h.await.unwrap_or(0);
    }

    running.store(false, Ordering::SeqCst);
    info!(issued, "probe run finished");
    issued
}

// ─── Worker loop ─────────────────────────────────────────────────

async fn worker<O, E>(
    id: u32,
    running: Arc<AtomicBool>,
    entry: SharedPrimitive<O, E>,
    normalizer: Arc<EndpointNormalizer>,
    targets: Arc<Vec<String>>,
    deadline: Instant,
    pacing: Duration,
) -> u64
where
    O: Send + 'static,
    E: Send + 'static,
{
    if targets.is_empty() {
        return 0;
    }

    // Each worker gets its own deterministic RNG seeded uniquely.
    let mut rng = StdRng::seed_from_u64(1000 + id as u64);
    let mut issued = 0u64;

    while running.load(Ordering::Relaxed) && Instant::now() < deadline {
        let target = &targets[rng.gen_range(0..targets.len())];
        let spec = CallSpec::get(target.as_str()).normalized_with(&normalizer);
        let endpoint = spec.endpoint_key.clone();

        let ok = entry.call(spec).await.is_ok();
        issued += 1;
        debug!(worker = id, endpoint = %endpoint, ok, "probe call settled");

        if !pacing.is_zero() {
            tokio::time::sleep(pacing).await;
        }
    }

    issued
}
