use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::metrics::stream;
use crate::AppState;

/// Builds the full Axum `Router` with the query API, context and user hooks
/// and probe control.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // ── Metrics query surface ───────────────────────────────
        .route(
            "/api/metrics",
            get(stream::get_metrics).delete(stream::clear_metrics),
        )
        .route("/api/metrics/total", get(stream::get_total_requests))
        .route("/api/metrics/recent", get(stream::recent_calls))
        .route("/api/metrics/export", get(stream::export_metrics))
        .route("/api/metrics/stream", get(stream::metrics_stream))
        // ── Context tag and user (navigation / login hooks) ─────
        .route(
            "/api/context",
            get(handlers::context::get_context).put(handlers::context::set_context),
        )
        .route(
            "/api/user",
            get(handlers::user::get_user).put(handlers::user::set_user),
        )
        // ── Probe control ───────────────────────────────────────
        .route("/api/probe/start", post(handlers::probe::start_probe))
        .route("/api/probe/stop", post(handlers::probe::stop_probe))
        .route("/api/probe/status", get(handlers::probe::probe_status))
        // ── Provide shared state to all routes above ────────────
        .with_state(state)
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{self, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tokio::time::Instant;
    use tower::ServiceExt;

    use crate::metrics::{CallRecord, Outcome};

    fn record(endpoint: &str, backend: Option<&str>, ms: u64) -> CallRecord {
        CallRecord {
            endpoint_key: endpoint.into(),
            backend: backend.map(str::to_string),
            method: "GET".into(),
            start_time: Instant::now(),
            duration_nanos: ms * 1_000_000,
            outcome: Outcome::Success(200),
            context_tag: "Dashboard".into(),
            user: "Anonymous".into(),
            sequence_id: 0,
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn fetch(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn put_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("PUT")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn metrics_routes_filter_and_count() {
        let state = AppState::for_tests(Vec::new());
        let monitor = state.monitor.clone();
        let app = create_router(state);

        monitor.submit(record("GET /api/positions", Some("SQLSERVER"), 10)).unwrap();
        monitor.submit(record("GET /api/positions", Some("SQLSERVER"), 30)).unwrap();
        monitor.submit(record("GET /api/positions", Some("POSTGRES"), 5)).unwrap();
        monitor.submit(record("GET /api/funnel", None, 1)).unwrap();
        monitor.flush().await.unwrap();

        let (status, body) = send(&app, fetch("/api/metrics?endpoint=GET%20/api/positions")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().map(Vec::len), Some(2));

        let (_, body) = send(
            &app,
            fetch("/api/metrics?endpoint=GET%20/api/positions&backend=SQLSERVER"),
        )
        .await;
        assert_eq!(body[0]["count"], 2);
        assert_eq!(body[0]["backend"], "SQLSERVER");
        assert_eq!(body[0]["last_duration_nanos"], 30_000_000);

        let (status, body) = send(&app, fetch("/api/metrics/total")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_requests"], 4);
        assert_eq!(body["pending_calls"], 0);

        let (_, body) = send(&app, fetch("/api/metrics/export")).await;
        assert_eq!(body["summary"]["backend_count"], 2);
        assert_eq!(body["recent"].as_array().map(Vec::len), Some(4));

        let (_, body) = send(&app, fetch("/api/metrics/recent")).await;
        assert_eq!(body[0]["endpoint_key"], "GET /api/funnel");

        let clear = Request::builder()
            .method("DELETE")
            .uri("/api/metrics")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, clear).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, body) = send(&app, fetch("/api/metrics/total")).await;
        assert_eq!(body["total_requests"], 0);
    }

    #[tokio::test]
    async fn context_and_user_hooks() {
        let state = AppState::for_tests(Vec::new());
        let app = create_router(state.clone());

        let (_, body) = send(&app, fetch("/api/user")).await;
        assert_eq!(body, json!({ "user": "Anonymous", "signed_in": false }));

        let (status, body) = send(
            &app,
            put_json("/api/user", json!({ "email": "ana@desk.io", "name": "Ana" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"], "ana@desk.io");
        assert_eq!(state.user.get().as_deref(), Some("ana@desk.io"));

        let (_, body) = send(&app, put_json("/api/user", Value::Null)).await;
        assert_eq!(body["user"], "Anonymous");
        assert_eq!(body["signed_in"], false);

        let (_, body) = send(&app, put_json("/api/context", json!({ "tag": " Funnel " }))).await;
        assert_eq!(body["tag"], "Funnel");
        let (_, body) = send(&app, fetch("/api/context")).await;
        assert_eq!(body["tag"], "Funnel");
    }
}
