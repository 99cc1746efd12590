//! Admin API for account and refresh-policy inspection
//!
//! Runs on a separate listener (`admin_listen_addr`, default port 9090),
//! mirroring the main proxy's convention of keeping operator surfaces off
//! the client-facing port. Read-only: account mutation happens through the
//! Refresh Coordinator at request time, not through this API.
//!
//! Endpoints:
//! - GET /admin/accounts — list registry accounts and their status (tokens
//!   are never included in the response)
//! - GET /admin/pool     — status breakdown summary

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;

use warp_pool::AccountRegistry;

#[derive(Clone)]
pub struct AdminState {
    registry: Option<Arc<AccountRegistry>>,
}

impl AdminState {
    pub fn new(registry: Option<Arc<AccountRegistry>>) -> Self {
        Self { registry }
    }
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/accounts", get(list_accounts))
        .route("/admin/pool", get(pool_status))
        .with_state(state)
}

/// GET /admin/accounts — every account's email and status. Refresh
/// tokens are never serialized here.
async fn list_accounts(State(state): State<AdminState>) -> impl IntoResponse {
    let Some(registry) = &state.registry else {
        return json_ok(serde_json::json!({ "accounts": [], "mode": "refresh_token_only" }));
    };

    let accounts = registry.snapshot().await;
    let rendered: Vec<_> = accounts
        .iter()
        .map(|a| {
            serde_json::json!({
                "email": a.email,
                "status": a.status.label(),
            })
        })
        .collect();

    json_ok(serde_json::json!({ "accounts": rendered }))
}

/// GET /admin/pool — status breakdown, the same counts the Account
/// Registry logs on a `pick_available` miss.
async fn pool_status(State(state): State<AdminState>) -> impl IntoResponse {
    let Some(registry) = &state.registry else {
        return json_ok(serde_json::json!({
            "mode": "refresh_token_only",
            "accounts_total": 0,
        }));
    };

    let (available, quota_exhausted, refresh_failed, invalid_token) = registry.status_counts().await;

    json_ok(serde_json::json!({
        "mode": "account_registry",
        "accounts_total": available + quota_exhausted + refresh_failed + invalid_token,
        "accounts_available": available,
        "accounts_quota_exhausted": quota_exhausted,
        "accounts_refresh_failed": refresh_failed,
        "accounts_invalid_token": invalid_token,
        "status": if available > 0 { "healthy" } else { "unhealthy" },
    }))
}

fn json_ok(body: serde_json::Value) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}
