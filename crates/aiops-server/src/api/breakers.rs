use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use aiops_persistence::models::CircuitBreaker;
use aiops_safety::breaker::{clear_manual_override, manually_open};
use aiops_types::{BreakerScope, CircuitState};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub async fn get(State(state): State<AppState>, Path(runbook_id): Path<String>) -> ApiResult<Json<CircuitBreaker>> {
    Ok(Json(state.store.get_or_create_breaker(BreakerScope::Runbook, &runbook_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct OverrideRequest {
    pub state: CircuitState,
    #[serde(default)]
    pub manually_opened: bool,
}

/// `POST /api/remediation/circuit-breaker/{runbook_id}/override` — an
/// operator forcing a breaker open or closed outside the normal
/// failure/success accounting (spec.md §6).
pub async fn override_state(
    State(app): State<AppState>,
    Path(runbook_id): Path<String>,
    Json(req): Json<OverrideRequest>,
) -> ApiResult<Json<CircuitBreaker>> {
    let mut breaker = app.store.get_or_create_breaker(BreakerScope::Runbook, &runbook_id).await?;
    let now = chrono::Utc::now();

    match req.state {
        CircuitState::Open => manually_open(&mut breaker, now),
        CircuitState::Closed => {
            clear_manual_override(&mut breaker);
            breaker.state = CircuitState::Closed;
            breaker.failure_count = 0;
            breaker.success_count = 0;
            breaker.opened_at = None;
            breaker.half_open_at = None;
        }
        CircuitState::HalfOpen => return Err(ApiError::validation("cannot force a breaker directly into half_open")),
    }
    breaker.manually_opened = req.manually_opened && req.state == CircuitState::Open;

    app.store.save_breaker(&breaker).await?;
    Ok(Json(breaker))
}
