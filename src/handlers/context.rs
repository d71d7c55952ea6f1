use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::context::{context_or_default, DEFAULT_CONTEXT};
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBody {
    /// `null` resets to the default tag
    pub tag: Option<String>,
}

// ─── GET /api/context ────────────────────────────────────────────

pub async fn get_context(State(state): State<Arc<AppState>>) -> Json<ContextBody> {
    Json(ContextBody {
        tag: Some(context_or_default(state.context.as_ref())),
    })
}

// ─── PUT /api/context ────────────────────────────────────────────
/// Navigation hook: calls issued after this are attributed to `tag`.

pub async fn set_context(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ContextBody>,
) -> Json<ContextBody> {
    match body.tag.filter(|t| !t.trim().is_empty()) {
        Some(tag) => {
            debug!(context = %tag, "context changed");
            state.context.set(tag.trim());
        }
        None => {
            debug!(context = DEFAULT_CONTEXT, "context reset");
            state.context.clear();
        }
    }

    Json(ContextBody {
        tag: Some(context_or_default(state.context.as_ref())),
    })
}
