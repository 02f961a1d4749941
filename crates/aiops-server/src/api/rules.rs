use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use aiops_persistence::models::AutoAnalyzeRule;

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<AutoAnalyzeRule>>> {
    Ok(Json(state.store.list_rules().await?))
}

pub async fn create(State(state): State<AppState>, Json(mut rule): Json<AutoAnalyzeRule>) -> ApiResult<Json<AutoAnalyzeRule>> {
    if rule.id.is_empty() {
        rule.id = uuid::Uuid::new_v4().to_string();
    }
    state.store.create_rule(&rule).await?;
    Ok(Json(rule))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut rule): Json<AutoAnalyzeRule>,
) -> ApiResult<Json<AutoAnalyzeRule>> {
    rule.id = id;
    state.store.update_rule(&rule).await?;
    Ok(Json(state.store.get_rule(&rule.id).await?))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.store.delete_rule(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
