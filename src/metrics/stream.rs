use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;

use super::collector::{MetricsExport, MetricsSnapshot, QueryFilter};
use super::recent::RecentCall;
use crate::AppState;

/// `?endpoint=GET%20/api/positions&backend=SQLSERVER&context=Dashboard&since=2026-10-16T12:00:00Z`
#[derive(Debug, Default, Deserialize)]
pub struct MetricsQuery {
    pub endpoint: Option<String>,
    pub backend: Option<String>,
    pub context: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

impl From<MetricsQuery> for QueryFilter {
    fn from(q: MetricsQuery) -> Self {
        Self {
            endpoint_key: q.endpoint,
            backend: q.backend,
            context_tag: q.context,
            since: q.since,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TotalRequests {
    pub total_requests: u64,
    pub lifetime_requests: u64,
    pub pending_calls: usize,
    pub dropped_records: u64,
}

// ─── GET /api/metrics ────────────────────────────────────────────
/// One snapshot per matching (endpoint, context) bucket.

pub async fn get_metrics(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MetricsQuery>,
) -> Json<Vec<MetricsSnapshot>> {
    Json(state.monitor.query(&query.into()))
}

// ─── GET /api/metrics/total ──────────────────────────────────────

pub async fn get_total_requests(
    State(state): State<Arc<AppState>>,
) -> Json<TotalRequests> {
    let monitor = &state.monitor;
    Json(TotalRequests {
        total_requests: monitor.total_requests(),
        lifetime_requests: monitor.store().lifetime_requests(),
        pending_calls: monitor.pending_calls(),
        dropped_records: monitor.dropped_records(),
    })
}

// ─── GET /api/metrics/recent ─────────────────────────────────────
/// Live call feed, newest first.

pub async fn recent_calls(State(state): State<Arc<AppState>>) -> Json<Vec<RecentCall>> {
    Json(state.monitor.recent_calls())
}

// ─── GET /api/metrics/export ─────────────────────────────────────

pub async fn export_metrics(
    State(state): State<Arc<AppState>>,
) -> Json<MetricsExport> {
    Json(state.monitor.export())
}

// ─── DELETE /api/metrics ─────────────────────────────────────────

pub async fn clear_metrics(State(state): State<Arc<AppState>>) -> StatusCode {
    state.monitor.clear();
    StatusCode::NO_CONTENT
}

// ─── GET /api/metrics/stream ─────────────────────────────────────
/// Server-Sent Events endpoint.
/// Pushes a full `MetricsExport` as JSON every 500 ms.

pub async fn metrics_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let interval = tokio::time::interval(Duration::from_millis(500));

    let stream = IntervalStream::new(interval).map(move |_| {
        let export = state.monitor.export();
        let json = serde_json::to_string(&export).unwrap_or_default();
        Ok(Event::default().data(json))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_string_maps_to_filter() {
        let q: MetricsQuery = serde_json::from_value(serde_json::json!({
            "endpoint": "GET /api/positions",
            "backend": "SQLSERVER",
            "since": "2026-10-16T12:00:00Z",
        }))
        .unwrap();
        let filter: QueryFilter = q.into();
        assert_eq!(filter.endpoint_key.as_deref(), Some("GET /api/positions"));
        assert_eq!(filter.backend.as_deref(), Some("SQLSERVER"));
        assert_eq!(filter.context_tag, None);
        assert_eq!(
            filter.since.map(|s| s.to_rfc3339()),
            Some("2026-10-16T12:00:00+00:00".to_string())
        );
    }
}
