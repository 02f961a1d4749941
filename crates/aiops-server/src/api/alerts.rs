use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;

use aiops_llm::AlertSummary;
use aiops_persistence::models::Alert;

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<Alert>>> {
    Ok(Json(state.store.list_alerts(200).await?))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Alert>> {
    Ok(Json(state.store.get_alert(&id).await?))
}

#[derive(Debug, Deserialize, Default)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub llm_provider_id: Option<String>,
}

/// `POST /api/alerts/{id}/analyze` — spec.md §6. `llm_provider_id` is accepted
/// for forward compatibility with multi-provider routing but this build only
/// ever dispatches to the configured analyzer.
pub async fn analyze(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AnalyzeRequest>,
) -> ApiResult<Json<Alert>> {
    let alert = state.store.get_alert(&id).await?;
    if alert.analyzed && !req.force {
        return Ok(Json(alert));
    }

    let summary = AlertSummary::from(&alert);
    let analysis = state.analyzer.analyze(&summary).await.ok();
    state.store.record_alert_analysis(&id, analysis.as_ref()).await?;
    Ok(Json(state.store.get_alert(&id).await?))
}
