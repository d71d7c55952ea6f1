pub mod collector;
pub mod overview;
pub mod percentiles;
pub mod recent;
pub mod reservoir;
pub mod stream;

use serde::Serialize;
use tokio::time::Instant;

pub use collector::{MetricsExport, MetricsSnapshot, MetricsStore, QueryFilter};
pub use percentiles::PercentileSet;
pub use recent::{RecentCall, RecentCalls};

/// One settled outbound call.
/// Write side: the recorder builds these and hands them to the store.
#[derive(Debug, Clone)]
pub struct CallRecord {
    /// e.g. "GET /api/positions"
    pub endpoint_key: String,
    /// Label of the backend the call went to, e.g. "SQLSERVER"
    pub backend: Option<String>,
    pub method: String,
    /// Monotonic instant the call was issued
    pub start_time: Instant,
    pub duration_nanos: u64,
    pub outcome: Outcome,
    /// Screen / workflow that issued the call, captured at issue time
    pub context_tag: String,
    /// Signed-in user when the call was issued
    pub user: String,
    pub sequence_id: u64,
}

impl CallRecord {
    pub fn key(&self) -> BucketKey {
        BucketKey {
            endpoint_key: self.endpoint_key.clone(),
            backend: self.backend.clone(),
            context_tag: self.context_tag.clone(),
        }
    }
}

/// Terminal state of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    Success(u16),
    Failure(FailureKind),
    Cancelled,
}

impl Outcome {
    /// 2xx is a success, anything else is a `Status` failure.
    pub fn from_status(code: u16) -> Self {
        if (200..300).contains(&code) {
            Self::Success(code)
        } else {
            Self::Failure(FailureKind::Status(code))
        }
    }

    pub fn is_error(&self) -> bool {
        !matches!(self, Self::Success(_))
    }

    /// HTTP status carried by the outcome, if the call got that far.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Success(code) | Self::Failure(FailureKind::Status(code)) => Some(*code),
            _ => None,
        }
    }
}

/// Coarse classification of a failed call. Only the kind is aggregated,
/// the caller still receives the original error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Connect,
    Status(u16),
    Request,
    Body,
    Decode,
    Redirect,
    Other,
}

/// Aggregation key: one bucket per (endpoint, backend, context).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    pub endpoint_key: String,
    pub backend: Option<String>,
    pub context_tag: String,
}

/// Saturating nanosecond count for a `Duration`.
pub(crate) fn nanos(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
