use std::collections::BTreeMap;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use aiops_persistence::models::{AuditEvent, Runbook, RunbookExecution};
use aiops_persistence::Store;
use aiops_rules::{evaluate, match_alert};
use aiops_safety::{check, BypassFlags};
use aiops_types::{AlertStatus, ExecutionMode, ExecutionStatus, RuleAction};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Alertmanager-compatible webhook payload (spec.md §6).
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub group_key: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub receiver: Option<String>,
    #[serde(default)]
    pub common_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub common_annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub external_url: Option<String>,
    pub alerts: Vec<WebhookAlert>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookAlert {
    pub status: String,
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    pub starts_at: DateTime<Utc>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub generator_url: Option<String>,
    #[serde(default)]
    pub fingerprint: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub alert_ids: Vec<String>,
}

/// `POST /webhook/alerts` — spec.md §4.8 step 1-5. Ingestion itself is
/// synchronous and fast; rule evaluation, trigger matching, and execution
/// creation run on a spawned task so the webhook caller never waits on them.
pub async fn ingest(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> ApiResult<Json<IngestResponse>> {
    if payload.alerts.is_empty() {
        return Err(ApiError::validation("webhook payload has no alerts"));
    }

    let mut alert_ids = Vec::with_capacity(payload.alerts.len());

    for raw in payload.alerts {
        let status = match raw.status.as_str() {
            "resolved" => AlertStatus::Resolved,
            "firing" => AlertStatus::Firing,
            other => return Err(ApiError::validation(format!("unknown alert status '{other}'"))),
        };

        let name = raw
            .labels
            .get("alertname")
            .cloned()
            .ok_or_else(|| ApiError::validation("alert is missing the 'alertname' label"))?;
        let instance = raw.labels.get("instance").cloned().unwrap_or_default();
        let job = raw.labels.get("job").cloned().unwrap_or_default();
        let fingerprint = raw
            .fingerprint
            .clone()
            .unwrap_or_else(|| fallback_fingerprint(&name, &raw.labels));

        let lock = state.fingerprint_locks.acquire(&fingerprint).await;
        let _guard = lock.lock().await;

        let raw_payload: Value = serde_json::json!({
            "labels": raw.labels,
            "annotations": raw.annotations,
            "generatorURL": raw.generator_url,
        });

        let ingested = state
            .store
            .upsert_alert_by_fingerprint(
                &fingerprint,
                &name,
                raw.labels.get("severity").map(String::as_str).unwrap_or("none"),
                &instance,
                &job,
                &raw.labels,
                &raw.annotations,
                status,
                raw.starts_at,
                raw.ends_at,
                &raw_payload,
            )
            .await?;

        alert_ids.push(ingested.alert.id.clone());

        let state = state.clone();
        let alert_id = ingested.alert.id.clone();
        tokio::spawn(async move {
            if let Err(err) = evaluate_alert(&state, &alert_id).await {
                tracing::warn!(alert_id = %alert_id, error = %err, "alert evaluation task failed");
            }
        });
    }

    Ok(Json(IngestResponse { alert_ids }))
}

/// `Evaluate(alert)` from spec.md §4.8: rules, optional analysis, trigger
/// matching, and a guarded attempt to create a `RunbookExecution`.
async fn evaluate_alert(state: &AppState, alert_id: &str) -> Result<(), ApiError> {
    let alert = state.store.get_alert(alert_id).await?;
    let rules = state.store.list_enabled_rules().await?;
    let decision = evaluate(&alert, &rules);

    audit(
        state,
        "system",
        "alert.rule_evaluated",
        "alert",
        alert_id,
        serde_json::json!({
            "action": decision.action,
            "matched_rule_id": decision.matched_rule_id,
        }),
    )
    .await;

    if decision.action != RuleAction::AutoAnalyze {
        return Ok(());
    }

    let summary = aiops_llm::AlertSummary::from(&alert);
    match state.analyzer.analyze(&summary).await {
        Ok(analysis) => {
            state.store.record_alert_analysis(alert_id, Some(&analysis)).await?;
        }
        Err(err) => {
            tracing::warn!(alert_id, error = %err, "llm analysis failed, leaving alert unanalyzed");
            state.store.record_alert_analysis(alert_id, None).await?;
        }
    }

    let now = Utc::now();
    let Some(trigger) = match_alert(&state.store, &alert, now).await? else {
        return Ok(());
    };

    let runbook = state.store.get_runbook(&trigger.runbook_id).await?;
    if !runbook.enabled {
        return Ok(());
    }

    try_create_triggered_execution(state, &runbook, &alert, &trigger.id, now).await
}

async fn try_create_triggered_execution(
    state: &AppState,
    runbook: &Runbook,
    alert: &aiops_persistence::models::Alert,
    trigger_id: &str,
    now: DateTime<Utc>,
) -> Result<(), ApiError> {
    if let Err(kind) = check(&state.store, runbook, None, now, &BypassFlags::none()).await {
        audit(
            state,
            "system",
            "execution.blocked",
            "runbook",
            &runbook.id,
            serde_json::json!({"kind": kind, "alert_id": alert.id}),
        )
        .await;
        return Ok(());
    }

    let status = if runbook.requires_approval_gate() {
        ExecutionStatus::PendingApproval
    } else {
        ExecutionStatus::Pending
    };

    let execution = RunbookExecution {
        id: uuid::Uuid::new_v4().to_string(),
        runbook_id: runbook.id.clone(),
        runbook_version: runbook.version,
        server_id: None,
        alert_id: Some(alert.id.clone()),
        trigger_id: Some(trigger_id.to_string()),
        status,
        mode: ExecutionMode::Auto,
        started_at: None,
        completed_at: None,
        duration_ms: None,
        initiated_by: None,
        approved_by: None,
        approved_at: None,
        variables: BTreeMap::new(),
        extracted_values: BTreeMap::new(),
        error_message: None,
        is_dry_run: false,
        created_at: now,
    };
    state.store.create_execution(&execution).await?;

    audit(
        state,
        "system",
        "execution.created",
        "execution",
        &execution.id,
        serde_json::json!({"runbook_id": runbook.id, "status": execution.status}),
    )
    .await;

    if execution.status == ExecutionStatus::Pending {
        state.execution_queue.push(execution.id).await;
    }

    Ok(())
}

async fn audit(state: &AppState, actor: &str, action: &str, resource_type: &str, resource_id: &str, details: Value) {
    state
        .audit
        .record(AuditEvent {
            id: Store::new_audit_id(),
            ts: Utc::now(),
            actor: actor.to_string(),
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            details,
            ip: None,
        })
        .await;
}

/// spec.md §4.8 step 2: hash of `name + sorted labels`, used only when the
/// payload omits its own `fingerprint`.
fn fallback_fingerprint(name: &str, labels: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    for (key, value) in labels {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b";");
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_fingerprint_is_stable_under_label_reordering() {
        let mut a = BTreeMap::new();
        a.insert("instance".to_string(), "t-01".to_string());
        a.insert("severity".to_string(), "critical".to_string());

        let mut b = BTreeMap::new();
        b.insert("severity".to_string(), "critical".to_string());
        b.insert("instance".to_string(), "t-01".to_string());

        assert_eq!(fallback_fingerprint("NginxDown", &a), fallback_fingerprint("NginxDown", &b));
    }

    #[test]
    fn fallback_fingerprint_differs_on_label_value_change() {
        let mut a = BTreeMap::new();
        a.insert("instance".to_string(), "t-01".to_string());
        let mut b = BTreeMap::new();
        b.insert("instance".to_string(), "t-02".to_string());

        assert_ne!(fallback_fingerprint("NginxDown", &a), fallback_fingerprint("NginxDown", &b));
    }
}
