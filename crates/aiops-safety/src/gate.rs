use chrono::{DateTime, Utc};

use aiops_persistence::models::Runbook;
use aiops_persistence::{Store, StoreError};
use aiops_types::{BreakerScope, ErrorKind};

use crate::{blackout, breaker, rate_limit};

pub struct BypassFlags {
    pub bypass_cooldown: bool,
    pub bypass_blackout: bool,
    pub actor_is_admin: bool,
}

impl BypassFlags {
    pub fn none() -> Self {
        Self {
            bypass_cooldown: false,
            bypass_blackout: false,
            actor_is_admin: false,
        }
    }
}

/// Runs the composed checks from spec.md §4.6 in order (breaker, rate
/// limit, blackout) for a runbook about to execute against `server_id`.
/// Bypass flags only take effect when `actor_is_admin`; the caller is
/// responsible for auditing their use regardless of outcome.
pub async fn check(
    store: &Store,
    runbook: &Runbook,
    server_id: Option<&str>,
    now: DateTime<Utc>,
    bypass: &BypassFlags,
) -> Result<(), ErrorKind> {
    check_breaker(store, BreakerScope::Runbook, &runbook.id, now).await?;
    if let Some(server_id) = server_id {
        check_breaker(store, BreakerScope::Server, server_id, now).await?;
    }
    check_breaker(store, BreakerScope::Global, "global", now).await?;

    let recent = store
        .list_executions_for_runbook_since(&runbook.id, now - chrono::Duration::hours(1))
        .await
        .map_err(|err| err.kind())?;
    match rate_limit::evaluate(runbook, &recent, now) {
        rate_limit::RateDecision::Allow => {}
        rate_limit::RateDecision::RateLimited => return Err(ErrorKind::RateLimited),
        rate_limit::RateDecision::InCooldown => {
            if !(bypass.bypass_cooldown && bypass.actor_is_admin) {
                return Err(ErrorKind::InCooldown);
            }
        }
    }

    let windows = store.list_enabled_blackouts().await.map_err(|err| err.kind())?;
    if let Some(_active) = blackout::any_active(&windows, now, Some(&runbook.id)) {
        if !(bypass.bypass_blackout && bypass.actor_is_admin) {
            return Err(ErrorKind::Blackout);
        }
    }

    Ok(())
}

async fn check_breaker(
    store: &Store,
    scope: BreakerScope,
    scope_id: &str,
    now: DateTime<Utc>,
) -> Result<(), ErrorKind> {
    let mut b = store
        .get_or_create_breaker(scope, scope_id)
        .await
        .map_err(StoreError::kind)?;
    match breaker::gate_decision(&b) {
        breaker::GateDecision::Allow => Ok(()),
        breaker::GateDecision::Reject => Err(ErrorKind::CircuitOpen),
        breaker::GateDecision::AllowAsProbe => {
            b.half_open_probe_in_flight = true;
            store.save_breaker(&b).await.map_err(|e| e.kind())?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiops_types::TargetOs;

    fn runbook() -> Runbook {
        Runbook {
            id: "rb1".to_string(),
            name: "restart-nginx".to_string(),
            description: String::new(),
            tags: vec![],
            target_os: TargetOs::Any,
            enabled: true,
            auto_execute: true,
            approval_required: false,
            approval_roles: vec![],
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

    #[tokio::test]
    async fn passes_when_nothing_is_gating() {
        let store = Store::in_memory().await;
        store.create_runbook(&runbook()).await.unwrap();
        let result = check(&store, &runbook(), None, Utc::now(), &BypassFlags::none()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn open_runbook_breaker_rejects_with_circuit_open() {
        let store = Store::in_memory().await;
        store.create_runbook(&runbook()).await.unwrap();
        let mut b = store
            .get_or_create_breaker(BreakerScope::Runbook, "rb1")
            .await
            .unwrap();
        breaker::manually_open(&mut b, Utc::now());
        store.save_breaker(&b).await.unwrap();

        let result = check(&store, &runbook(), None, Utc::now(), &BypassFlags::none()).await;
        assert_eq!(result.unwrap_err(), ErrorKind::CircuitOpen);
    }
}
