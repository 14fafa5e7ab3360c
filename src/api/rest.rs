// =============================================================================
// REST API Endpoints — Axum 0.8
// =============================================================================
//
// All endpoints live under `/api/v1/`.  Health is public; everything else
// requires the `AuthBearer` extractor.  Read-only apart from cycle
// cancellation: the pipeline is advisory and the API never places orders.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/signals", get(signals))
        .route("/api/v1/decisions", get(decisions))
        .route("/api/v1/cycles", get(cycles))
        .route("/api/v1/portfolio", get(portfolio))
        .route("/api/v1/watchdog", get(watchdog))
        .route("/api/v1/control/cancel-cycle", post(cancel_cycle))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    uptime_secs: u64,
    last_heartbeat: String,
    cycle_running: bool,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        uptime_secs: state.uptime_secs(),
        last_heartbeat: state.heartbeat.last().to_rfc3339(),
        cycle_running: state.current_cycle.read().is_some(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Read models (authenticated)
// =============================================================================

#[derive(Debug, Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

impl LimitQuery {
    fn take(&self) -> usize {
        self.limit.unwrap_or(50).min(500)
    }
}

/// Most recent first.
async fn signals(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(q): Query<LimitQuery>,
) -> impl IntoResponse {
    let out: Vec<_> = state.recent_signals.read().iter().rev().take(q.take()).cloned().collect();
    Json(out)
}

async fn decisions(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(q): Query<LimitQuery>,
) -> impl IntoResponse {
    let out: Vec<_> = state.recent_decisions.read().iter().rev().take(q.take()).cloned().collect();
    Json(out)
}

async fn cycles(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(q): Query<LimitQuery>,
) -> impl IntoResponse {
    let out: Vec<_> = state.recent_cycles.read().iter().rev().take(q.take()).cloned().collect();
    Json(out)
}

async fn portfolio(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.risk.report(chrono::Utc::now().date_naive()))
}

async fn watchdog(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.watchdog.read().clone())
}

// =============================================================================
// Control (authenticated)
// =============================================================================

#[derive(Serialize)]
struct ControlResponse {
    cancelled: bool,
    message: String,
}

async fn cancel_cycle(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let cancelled = state.cancel_current_cycle();
    info!(cancelled, "cancel-cycle requested via API");
    Json(ControlResponse {
        cancelled,
        message: if cancelled {
            "cycle cancellation requested".to_string()
        } else {
            "no cycle running".to_string()
        },
    })
}

// =============================================================================
// Tests
// =============================================================================
