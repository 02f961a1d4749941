use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use aiops_persistence::models::{Runbook, RunbookStep, RunbookTrigger};

use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct RunbookView {
    #[serde(flatten)]
    pub runbook: Runbook,
    pub steps: Vec<RunbookStep>,
    pub triggers: Vec<RunbookTrigger>,
}

async fn load_view(state: &AppState, id: &str) -> ApiResult<RunbookView> {
    let runbook = state.store.get_runbook(id).await?;
    let steps = state.store.list_runbook_steps(id).await?;
    let triggers = state.store.list_triggers_for_runbook(id).await?;
    Ok(RunbookView { runbook, steps, triggers })
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<Runbook>>> {
    Ok(Json(state.store.list_runbooks().await?))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<RunbookView>> {
    Ok(Json(load_view(&state, &id).await?))
}

pub async fn create(State(state): State<AppState>, Json(mut req): Json<RunbookView>) -> ApiResult<Json<RunbookView>> {
    if req.runbook.id.is_empty() {
        req.runbook.id = uuid::Uuid::new_v4().to_string();
    }
    req.runbook.version = 1;
    for step in &mut req.steps {
        step.runbook_id = req.runbook.id.clone();
    }
    for trigger in &mut req.triggers {
        trigger.runbook_id = req.runbook.id.clone();
        if trigger.id.is_empty() {
            trigger.id = uuid::Uuid::new_v4().to_string();
        }
        trigger.created_at = chrono::Utc::now();
    }

    state.store.create_runbook(&req.runbook).await?;
    state.store.replace_runbook_steps(&req.runbook.id, &req.steps).await?;
    state.store.replace_runbook_triggers(&req.runbook.id, &req.triggers).await?;

    Ok(Json(load_view(&state, &req.runbook.id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut req): Json<RunbookView>,
) -> ApiResult<Json<RunbookView>> {
    req.runbook.id = id.clone();
    for step in &mut req.steps {
        step.runbook_id = id.clone();
    }
    for trigger in &mut req.triggers {
        trigger.runbook_id = id.clone();
        if trigger.id.is_empty() {
            trigger.id = uuid::Uuid::new_v4().to_string();
        }
    }

    let updated = state.store.update_runbook(&req.runbook).await?;
    state.store.replace_runbook_steps(&id, &req.steps).await?;
    state.store.replace_runbook_triggers(&id, &req.triggers).await?;

    let steps = state.store.list_runbook_steps(&id).await?;
    let triggers = state.store.list_triggers_for_runbook(&id).await?;
    Ok(Json(RunbookView { runbook: updated, steps, triggers }))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.store.delete_runbook(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn export_yaml(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<String> {
    let view = load_view(&state, &id).await?;
    Ok(crate::yaml::export(&view.runbook, &view.steps, &view.triggers))
}

pub async fn import_yaml(State(state): State<AppState>, body: String) -> ApiResult<Json<RunbookView>> {
    let (mut runbook, mut steps, mut triggers) = crate::yaml::import(&body)?;
    if runbook.id.is_empty() {
        runbook.id = uuid::Uuid::new_v4().to_string();
    }
    runbook.version = 1;
    for step in &mut steps {
        step.runbook_id = runbook.id.clone();
    }
    for trigger in &mut triggers {
        trigger.runbook_id = runbook.id.clone();
        if trigger.id.is_empty() {
            trigger.id = uuid::Uuid::new_v4().to_string();
        }
        trigger.created_at = chrono::Utc::now();
    }

    state.store.create_runbook(&runbook).await?;
    state.store.replace_runbook_steps(&runbook.id, &steps).await?;
    state.store.replace_runbook_triggers(&runbook.id, &triggers).await?;

    Ok(Json(load_view(&state, &runbook.id).await?))
}
