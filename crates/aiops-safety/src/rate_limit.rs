use chrono::{DateTime, Utc};

use aiops_persistence::models::{Runbook, RunbookExecution};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allow,
    RateLimited,
    InCooldown,
}

/// spec.md §4.6 step 2: hourly cap, then an explicit cooldown window.
/// `recent` must already be scoped to this runbook; `now` is passed in so
/// the windows are computed against a single consistent clock per call.
pub fn evaluate(runbook: &Runbook, recent: &[RunbookExecution], now: DateTime<Utc>) -> RateDecision {
    let hour_ago = now - chrono::Duration::hours(1);
    let started_in_last_hour = recent
        .iter()
        .filter(|e| e.started_at.map(|s| s >= hour_ago).unwrap_or(false))
        .count() as i64;
    if started_in_last_hour >= runbook.max_executions_per_hour {
        return RateDecision::RateLimited;
    }

    if runbook.cooldown_minutes > 0 {
        let cooldown_start = now - chrono::Duration::minutes(runbook.cooldown_minutes);
        let in_cooldown = recent
            .iter()
            .any(|e| e.started_at.map(|s| s >= cooldown_start).unwrap_or(false));
        if in_cooldown {
            return RateDecision::InCooldown;
        }
    }

    RateDecision::Allow
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiops_types::{ExecutionMode, ExecutionStatus};

    fn runbook(max_per_hour: i64, cooldown_minutes: i64) -> Runbook {
        Runbook {
            id: "rb1".to_string(),
            name: "restart-nginx".to_string(),
            description: String::new(),
            tags: vec![],
            target_os: aiops_types::TargetOs::Any,
            enabled: true,
            auto_execute: true,
            approval_required: false,
            approval_roles: vec![],
            approval_timeout_minutes: 60,
            max_executions_per_hour: max_per_hour,
            cooldown_minutes,
            default_server_id: None,
            target_from_alert: false,
            target_alert_label: "instance".to_string(),
            version: 1,
            embedding: None,
        }
    }

    fn execution_started(ago_minutes: i64, now: DateTime<Utc>) -> RunbookExecution {
        RunbookExecution {
            id: "e".to_string(),
            runbook_id: "rb1".to_string(),
            runbook_version: 1,
            server_id: None,
            alert_id: None,
            trigger_id: None,
            status: ExecutionStatus::Completed,
            mode: ExecutionMode::Auto,
            started_at: Some(now - chrono::Duration::minutes(ago_minutes)),
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
        }
    }

    #[test]
    fn rejects_when_hourly_cap_reached() {
        let now = Utc::now();
        let runbook = runbook(2, 0);
        let recent = vec![execution_started(10, now), execution_started(30, now)];
        assert_eq!(evaluate(&runbook, &recent, now), RateDecision::RateLimited);
    }

    #[test]
    fn rejects_within_cooldown_window() {
        let now = Utc::now();
        let runbook = runbook(100, 15);
        let recent = vec![execution_started(5, now)];
        assert_eq!(evaluate(&runbook, &recent, now), RateDecision::InCooldown);
    }

    #[test]
    fn allows_when_under_both_thresholds() {
        let now = Utc::now();
        let runbook = runbook(100, 15);
        let recent = vec![execution_started(120, now)];
        assert_eq!(evaluate(&runbook, &recent, now), RateDecision::Allow);
    }
}
