use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;

use aiops_persistence::models::{AuditEvent, RunbookExecution, Schedule};
use aiops_persistence::Store;
use aiops_safety::approval::is_overdue;
use aiops_safety::breaker::enter_half_open;
use aiops_types::{ExecutionMode, ExecutionStatus, ScheduleType};

use crate::state::AppState;

/// Computes the next fire time for a schedule, spec.md §4.9. `Date`
/// schedules fire once at `run_at` and are left with `next_fire_at = None`
/// afterwards (the scheduler tick clears it via [`advance`]).
pub fn compute_next_fire(schedule: &Schedule, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match schedule.schedule_type {
        ScheduleType::Cron => {
            let expr = schedule.cron_expression.as_deref()?;
            let parsed = CronSchedule::from_str(expr).ok()?;
            parsed.after(&now).next()
        }
        ScheduleType::Interval => {
            let minutes = schedule.interval_minutes?;
            Some(now + chrono::Duration::minutes(minutes))
        }
        ScheduleType::Date => {
            let run_at = schedule.run_at?;
            if run_at > now {
                Some(run_at)
            } else {
                None
            }
        }
    }
}

/// `Tick()` from spec.md §4.9: due schedules fire a new auto execution,
/// half-open-eligible breakers are probed, and overdue approvals time out.
/// Runs on a fixed interval for the lifetime of the process.
pub async fn run(state: AppState, tick: std::time::Duration) {
    let mut interval = tokio::time::interval(tick);
    loop {
        interval.tick().await;
        if let Err(err) = tick_once(&state).await {
            tracing::error!(error = %err, "scheduler tick failed");
        }
    }
}

async fn tick_once(state: &AppState) -> Result<(), aiops_persistence::StoreError> {
    let now = Utc::now();

    for schedule in state.store.list_due_schedules(now).await? {
        fire_schedule(state, &schedule, now).await?;
    }

    for mut breaker in state.store.list_breakers_due_for_half_open(now).await? {
        enter_half_open(&mut breaker, now);
        state.store.save_breaker(&breaker).await?;
        tracing::info!(scope = ?breaker.scope, scope_id = %breaker.scope_id, "circuit breaker entered half-open probe");
    }

    for execution in state.store.list_executions(500).await? {
        if execution.status != ExecutionStatus::PendingApproval {
            continue;
        }
        let runbook = match state.store.get_runbook(&execution.runbook_id).await {
            Ok(rb) => rb,
            Err(_) => continue,
        };
        if is_overdue(execution.created_at, runbook.approval_timeout_minutes, now) {
            timeout_execution(state, &execution, now).await?;
        }
    }

    Ok(())
}

async fn fire_schedule(state: &AppState, schedule: &Schedule, now: DateTime<Utc>) -> Result<(), aiops_persistence::StoreError> {
    let next = compute_next_fire(schedule, now);
    state.store.record_schedule_fired(&schedule.id, now, next).await?;

    let runbook = match state.store.get_runbook(&schedule.runbook_id).await {
        Ok(rb) if rb.enabled => rb,
        _ => return Ok(()),
    };

    let status = if runbook.requires_approval_gate() {
        ExecutionStatus::PendingApproval
    } else {
        ExecutionStatus::Pending
    };

    let execution = RunbookExecution {
        id: uuid::Uuid::new_v4().to_string(),
        runbook_id: runbook.id.clone(),
        runbook_version: runbook.version,
        server_id: runbook.default_server_id.clone(),
        alert_id: None,
        trigger_id: None,
        status,
        mode: ExecutionMode::Auto,
        started_at: None,
        completed_at: None,
        duration_ms: None,
        initiated_by: None,
        approved_by: None,
        approved_at: None,
        variables: Default::default(),
        extracted_values: Default::default(),
        error_message: None,
        is_dry_run: false,
        created_at: now,
    };
    state.store.create_execution(&execution).await?;

    state
        .audit
        .record(AuditEvent {
            id: Store::new_audit_id(),
            ts: now,
            actor: "scheduler".to_string(),
            action: "execution.scheduled".to_string(),
            resource_type: "execution".to_string(),
            resource_id: execution.id.clone(),
            details: serde_json::json!({"schedule_id": schedule.id, "runbook_id": runbook.id}),
            ip: None,
        })
        .await;

    if execution.status == ExecutionStatus::Pending {
        state.execution_queue.push(execution.id).await;
    }

    Ok(())
}

async fn timeout_execution(
    state: &AppState,
    execution: &RunbookExecution,
    now: DateTime<Utc>,
) -> Result<(), aiops_persistence::StoreError> {
    state
        .store
        .transition_execution_status(
            &execution.id,
            ExecutionStatus::Timeout,
            aiops_persistence::executions::ExecutionStatusPatch {
                completed_at: Some(now),
                error_message: Some("approval window elapsed".to_string()),
                ..Default::default()
            },
        )
        .await?;

    state
        .audit
        .record(AuditEvent {
            id: Store::new_audit_id(),
            ts: now,
            actor: "scheduler".to_string(),
            action: "execution.approval_timed_out".to_string(),
            resource_type: "execution".to_string(),
            resource_id: execution.id.clone(),
            details: serde_json::json!({}),
            ip: None,
        })
        .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiops_types::MisfirePolicy;

    fn interval_schedule() -> Schedule {
        Schedule {
            id: "s1".to_string(),
            runbook_id: "rb-1".to_string(),
            schedule_type: ScheduleType::Interval,
            cron_expression: None,
            interval_minutes: Some(15),
            run_at: None,
            enabled: true,
            misfire_policy: MisfirePolicy::RunOnce,
            max_instances: 1,
            next_fire_at: None,
            last_fired_at: None,
        }
    }

    #[test]
    fn interval_schedule_advances_by_interval_minutes() {
        let now = Utc::now();
        let next = compute_next_fire(&interval_schedule(), now).unwrap();
        assert_eq!(next, now + chrono::Duration::minutes(15));
    }

    #[test]
    fn past_date_schedule_never_fires_again() {
        let mut schedule = interval_schedule();
        schedule.schedule_type = ScheduleType::Date;
        schedule.run_at = Some(Utc::now() - chrono::Duration::hours(1));
        assert!(compute_next_fire(&schedule, Utc::now()).is_none());
    }
}
