use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use aiops_persistence::models::Schedule;

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<Schedule>>> {
    Ok(Json(state.store.list_schedules().await?))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Schedule>> {
    Ok(Json(state.store.get_schedule(&id).await?))
}

pub async fn create(State(state): State<AppState>, Json(mut schedule): Json<Schedule>) -> ApiResult<Json<Schedule>> {
    if schedule.id.is_empty() {
        schedule.id = uuid::Uuid::new_v4().to_string();
    }
    if schedule.next_fire_at.is_none() {
        schedule.next_fire_at = crate::scheduler::compute_next_fire(&schedule, chrono::Utc::now());
    }
    state.store.create_schedule(&schedule).await?;
    Ok(Json(schedule))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut schedule): Json<Schedule>,
) -> ApiResult<Json<Schedule>> {
    schedule.id = id;
    Ok(Json(state.store.update_schedule(&schedule).await?))
}

pub async fn delete(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<StatusCode> {
    state.store.delete_schedule(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
