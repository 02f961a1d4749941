use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use aiops_persistence::executions::ExecutionStatusPatch;
use aiops_persistence::models::{AuditEvent, RunbookExecution, StepExecution};
use aiops_persistence::Store;
use aiops_safety::approval::role_can_approve;
use aiops_safety::{check, BypassFlags};
use aiops_types::{ErrorKind, ExecutionMode, ExecutionStatus};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct ExecuteRequest {
    pub server_id: Option<String>,
    pub alert_id: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    #[serde(default)]
    pub bypass_cooldown: bool,
    #[serde(default)]
    pub bypass_blackout: bool,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub execution_id: String,
    pub status: ExecutionStatus,
}

/// Caller identity for approval/override actions, taken from request
/// headers the way the teacher's auth middleware plumbs an actor through
/// (`X-Actor` / `X-Actor-Role`); there is no login flow in this build.
struct Actor {
    name: String,
    role: String,
    is_admin: bool,
}

fn actor_from_headers(headers: &HeaderMap) -> Actor {
    let name = headers.get("x-actor").and_then(|v| v.to_str().ok()).unwrap_or("unknown").to_string();
    let role = headers.get("x-actor-role").and_then(|v| v.to_str().ok()).unwrap_or("operator").to_string();
    let is_admin = role == "admin";
    Actor { name, role, is_admin }
}

/// `POST /api/remediation/runbooks/{id}/execute` — spec.md §6. Runs the
/// full composed safety check (§4.6) before a row ever lands in the store,
/// so a rejected attempt leaves no trace beyond the audit log.
pub async fn execute(
    State(state): State<AppState>,
    Path(runbook_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<ExecuteRequest>,
) -> ApiResult<Json<ExecuteResponse>> {
    let runbook = state.store.get_runbook(&runbook_id).await?;
    if !runbook.enabled {
        return Err(ApiError::validation("runbook is disabled"));
    }

    let actor = actor_from_headers(&headers);
    let now = Utc::now();
    let bypass = BypassFlags {
        bypass_cooldown: req.bypass_cooldown && actor.is_admin,
        bypass_blackout: req.bypass_blackout && actor.is_admin,
        actor_is_admin: actor.is_admin,
    };

    check(&state.store, &runbook, req.server_id.as_deref(), now, &bypass).await?;

    let status = if runbook.requires_approval_gate() {
        ExecutionStatus::PendingApproval
    } else {
        ExecutionStatus::Pending
    };

    let execution = RunbookExecution {
        id: uuid::Uuid::new_v4().to_string(),
        runbook_id: runbook.id.clone(),
        runbook_version: runbook.version,
        server_id: req.server_id.or_else(|| runbook.default_server_id.clone()),
        alert_id: req.alert_id,
        trigger_id: None,
        status,
        mode: ExecutionMode::Manual,
        started_at: None,
        completed_at: None,
        duration_ms: None,
        initiated_by: Some(actor.name.clone()),
        approved_by: None,
        approved_at: None,
        variables: req.variables,
        extracted_values: BTreeMap::new(),
        error_message: None,
        is_dry_run: req.dry_run,
        created_at: now,
    };
    state.store.create_execution(&execution).await?;

    audit(&state, &actor.name, "execution.requested", &execution.id, serde_json::json!({"runbook_id": runbook.id})).await;

    if execution.status == ExecutionStatus::Pending {
        state.execution_queue.push(execution.id.clone()).await;
    }

    Ok(Json(ExecuteResponse { execution_id: execution.id, status: execution.status }))
}

#[derive(Debug, Serialize)]
pub struct ExecutionView {
    #[serde(flatten)]
    pub execution: RunbookExecution,
    pub steps: Vec<StepExecution>,
}

pub async fn get(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<ExecutionView>> {
    let execution = state.store.get_execution(&id).await?;
    let steps = state.store.list_step_executions(&id).await?;
    Ok(Json(ExecutionView { execution, steps }))
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<RunbookExecution>>> {
    Ok(Json(state.store.list_executions(200).await?))
}

/// `POST /api/remediation/executions/{id}/approve` — spec.md §6 and §8
/// scenario 2: a non-`approval_roles` actor gets 403, a matching one moves
/// the execution to `approved` and enqueues it.
pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<RunbookExecution>> {
    let execution = state.store.get_execution(&id).await?;
    let runbook = state.store.get_runbook(&execution.runbook_id).await?;
    let actor = actor_from_headers(&headers);

    if !role_can_approve(&runbook.approval_roles, &actor.role) {
        return Err(ApiError::new(ErrorKind::Forbidden, "actor role is not permitted to approve this runbook"));
    }

    let approved = state
        .store
        .transition_execution_status(
            &id,
            ExecutionStatus::Approved,
            ExecutionStatusPatch {
                approved_by: Some(actor.name.clone()),
                approved_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await?;

    audit(&state, &actor.name, "execution.approved", &id, serde_json::json!({})).await;
    state.execution_queue.push(id).await;

    Ok(Json(approved))
}

/// `POST /api/remediation/executions/{id}/cancel` — trips the execution's
/// cancellation token if a worker already claimed it, otherwise transitions
/// it straight to `cancelled`.
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<RunbookExecution>> {
    let actor = actor_from_headers(&headers);

    if state.cancellations.cancel(&id).await {
        audit(&state, &actor.name, "execution.cancel_requested", &id, serde_json::json!({})).await;
        return Ok(Json(state.store.get_execution(&id).await?));
    }

    let cancelled = state
        .store
        .transition_execution_status(&id, ExecutionStatus::Cancelled, ExecutionStatusPatch {
            completed_at: Some(Utc::now()),
            ..Default::default()
        })
        .await?;
    audit(&state, &actor.name, "execution.cancelled", &id, serde_json::json!({})).await;
    Ok(Json(cancelled))
}

async fn audit(state: &AppState, actor: &str, action: &str, execution_id: &str, details: Value) {
    state
        .audit
        .record(AuditEvent {
            id: Store::new_audit_id(),
            ts: Utc::now(),
            actor: actor.to_string(),
            action: action.to_string(),
            resource_type: "execution".to_string(),
            resource_id: execution_id.to_string(),
            details,
            ip: None,
        })
        .await;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::{HeaderName, HeaderValue, StatusCode};
    use axum::response::IntoResponse;

    use aiops_executors::{ApiExecutor, SpyExecutor};
    use aiops_llm::NullAnalyzer;
    use aiops_orchestrator::ExecutorSet;
    use aiops_persistence::models::Runbook;
    use aiops_types::TargetOs;

    use super::*;
    use crate::state::{AuditSink, CancellationRegistry, ExecutionQueue, FingerprintLocks};

    async fn test_state() -> AppState {
        let (execution_queue, _queue_receiver) = ExecutionQueue::new(16);
        let (audit, _audit_receiver) = AuditSink::new(16);
        AppState {
            store: Store::in_memory().await,
            settings: Arc::new(aiops_config::Settings::default()),
            executors: ExecutorSet {
                ssh: Arc::new(SpyExecutor::new()),
                winrm: Arc::new(SpyExecutor::new()),
                api: Arc::new(ApiExecutor::new(true)),
            },
            analyzer: Arc::new(NullAnalyzer),
            execution_queue,
            cancellations: CancellationRegistry::default(),
            audit,
            fingerprint_locks: FingerprintLocks::default(),
        }
    }

    fn gated_runbook() -> Runbook {
        Runbook {
            id: "rb1".to_string(),
            name: "restart-nginx".to_string(),
            description: String::new(),
            tags: vec![],
            target_os: TargetOs::Any,
            enabled: true,
            auto_execute: false,
            approval_required: true,
            approval_roles: vec!["admin".to_string()],
            approval_timeout_minutes: 60,
            max_executions_per_hour: 10,
            cooldown_minutes: 0,
            default_server_id: None,
            target_from_alert: false,
            target_alert_label: "instance".to_string(),
            version: 1,
            embedding: None,
        }
    }

    fn headers_for(actor: &str, role: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("x-actor"), HeaderValue::from_str(actor).unwrap());
        headers.insert(HeaderName::from_static("x-actor-role"), HeaderValue::from_str(role).unwrap());
        headers
    }

    /// spec.md §8 scenario 2: a non-admin approve attempt is rejected with
    /// 403, an admin approve moves the execution to `approved`.
    #[tokio::test]
    async fn approval_gate_rejects_non_admin_then_admin_succeeds() {
        let state = test_state().await;
        state.store.create_runbook(&gated_runbook()).await.unwrap();

        let execution = RunbookExecution {
            id: "e1".to_string(),
            runbook_id: "rb1".to_string(),
            runbook_version: 1,
            server_id: None,
            alert_id: None,
            trigger_id: None,
            status: ExecutionStatus::PendingApproval,
            mode: ExecutionMode::Manual,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            initiated_by: Some("operator".to_string()),
            approved_by: None,
            approved_at: None,
            variables: BTreeMap::new(),
            extracted_values: BTreeMap::new(),
            error_message: None,
            is_dry_run: false,
            created_at: Utc::now(),
        };
        state.store.create_execution(&execution).await.unwrap();

        let denied = approve(
            State(state.clone()),
            Path("e1".to_string()),
            headers_for("bob", "operator"),
        )
        .await
        .unwrap_err();
        assert_eq!(denied.into_response().status(), StatusCode::FORBIDDEN);

        let approved = approve(
            State(state.clone()),
            Path("e1".to_string()),
            headers_for("alice", "admin"),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(approved.status, ExecutionStatus::Approved);
        assert_eq!(approved.approved_by.as_deref(), Some("alice"));
    }
}
