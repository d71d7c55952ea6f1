use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::context::user_or_default;
use crate::AppState;

/// Login payload. Any subset of the fields may be present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignIn {
    pub email: Option<String>,
    pub name: Option<String>,
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserView {
    pub user: String,
    pub signed_in: bool,
}

fn view(state: &AppState) -> UserView {
    UserView {
        user: user_or_default(state.user.as_ref()),
        signed_in: state.user.get().is_some(),
    }
}

// ─── GET /api/user ───────────────────────────────────────────────

pub async fn get_user(State(state): State<Arc<AppState>>) -> Json<UserView> {
    Json(view(&state))
}

// ─── PUT /api/user ───────────────────────────────────────────────
/// Login hook: calls issued after this are attributed to the new user.
/// A `null` body signs out.

pub async fn set_user(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Option<SignIn>>,
) -> Json<UserView> {
    match body {
        Some(who) => {
            state
                .user
                .sign_in(who.email.as_deref(), who.name.as_deref(), who.id.as_deref());
        }
        None => state.user.sign_out(),
    }

    let current = view(&state);
    debug!(user = %current.user, "user changed");
    Json(current)
}
