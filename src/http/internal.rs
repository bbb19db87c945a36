//! Operator endpoints.

use axum::{
    Json, Router,
    extract::State,
    http::HeaderMap,
    routing::{get, post},
};

use super::extract::bearer_matches;
use super::routes::RouteModule;
use super::state::AppState;
use crate::billing::ReconcileSummary;
use crate::error::{ConsignError, Result};
use crate::health::HealthResponse;
use crate::reconcile::run_sweep;

/// Run a reconciliation sweep now and return its summary.
async fn trigger_reconcile(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ReconcileSummary>> {
    let Some(expected) = state.reconcile_token.as_ref() else {
        return Err(ConsignError::forbidden("Manual reconciliation is disabled"));
    };
    if !bearer_matches(&headers, expected) {
        return Err(ConsignError::unauthorized("Invalid reconcile token"));
    }

    tracing::info!(target: "consign::reconcile", "manual reconcile sweep requested");
    let summary = run_sweep(&state.manager, &state.reconcile_status).await?;
    Ok(Json(summary))
}

async fn health(State(state): State<AppState>) -> HealthResponse {
    state.health.check_health().await
}

/// `/internal/reconcile` and `/health`.
pub struct OperatorRoutes;

impl RouteModule for OperatorRoutes {
    fn routes(&self) -> Router<AppState> {
        Router::new()
            .route("/internal/reconcile", post(trigger_reconcile))
            .route("/health", get(health))
    }
}
