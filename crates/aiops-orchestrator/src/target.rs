use aiops_persistence::models::{Runbook, RunbookExecution, ServerCredential};
use aiops_persistence::{Store, StoreError};

use crate::error::OrchestratorError;

/// spec.md §4.7 step 2: pick the server an execution runs against. When
/// `target_from_alert` is set, the alert's `target_alert_label` value is
/// matched against `server.hostname` or `server.name`; otherwise the
/// execution's own `server_id` wins, falling back to the runbook default.
pub async fn resolve_target(
    store: &Store,
    runbook: &Runbook,
    execution: &RunbookExecution,
) -> Result<ServerCredential, OrchestratorError> {
    if runbook.target_from_alert {
        let alert_id = execution.alert_id.as_deref().ok_or(OrchestratorError::ServerUnresolved)?;
        let alert = store.get_alert(alert_id).await?;
        let label_value = alert
            .labels
            .get(&runbook.target_alert_label)
            .ok_or(OrchestratorError::ServerUnresolved)?;

        let servers = store.list_servers().await?;
        return servers
            .into_iter()
            .find(|s| &s.hostname == label_value || &s.name == label_value)
            .ok_or(OrchestratorError::ServerUnresolved);
    }

    let server_id = execution
        .server_id
        .clone()
        .or_else(|| runbook.default_server_id.clone())
        .ok_or(OrchestratorError::ServerUnresolved)?;

    match store.get_server(&server_id).await {
        Ok(server) => Ok(server),
        Err(StoreError::NotFound(_)) => Err(OrchestratorError::ServerUnresolved),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiops_types::{AlertStatus, AuthType, ExecutionMode, ExecutionStatus, HostOs, Protocol, TargetOs};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn runbook(target_from_alert: bool, default_server_id: Option<&str>) -> Runbook {
        Runbook {
            id: "rb1".to_string(),
            name: "restart".to_string(),
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
            default_server_id: default_server_id.map(str::to_string),
            target_from_alert,
            target_alert_label: "instance".to_string(),
            version: 1,
            embedding: None,
        }
    }

    fn execution(server_id: Option<&str>, alert_id: Option<&str>) -> RunbookExecution {
        RunbookExecution {
            id: "e1".to_string(),
            runbook_id: "rb1".to_string(),
            runbook_version: 1,
            server_id: server_id.map(str::to_string),
            alert_id: alert_id.map(str::to_string),
            trigger_id: None,
            status: ExecutionStatus::Pending,
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
            created_at: Utc::now(),
        }
    }

    fn server(id: &str, hostname: &str) -> ServerCredential {
        ServerCredential {
            id: id.to_string(),
            name: hostname.to_string(),
            protocol: Protocol::Ssh,
            hostname: hostname.to_string(),
            port: 22,
            username: "deploy".to_string(),
            os_type: HostOs::Linux,
            auth_type: AuthType::Key,
            secret_material_encrypted: String::new(),
            tags: vec![],
            environment: "prod".to_string(),
            winrm_transport: None,
            api_base_url: None,
            api_auth_type: None,
            api_verify_ssl: true,
            api_timeout_seconds: 30,
        }
    }

    #[tokio::test]
    async fn explicit_server_id_wins_over_runbook_default() {
        let store = Store::in_memory().await;
        store.create_server(&server("s1", "web-01")).await.unwrap();
        store.create_server(&server("s2", "web-02")).await.unwrap();

        let rb = runbook(false, Some("s2"));
        let exec = execution(Some("s1"), None);
        let resolved = resolve_target(&store, &rb, &exec).await.unwrap();
        assert_eq!(resolved.id, "s1");
    }

    #[tokio::test]
    async fn falls_back_to_runbook_default_server() {
        let store = Store::in_memory().await;
        store.create_server(&server("s2", "web-02")).await.unwrap();

        let rb = runbook(false, Some("s2"));
        let exec = execution(None, None);
        let resolved = resolve_target(&store, &rb, &exec).await.unwrap();
        assert_eq!(resolved.id, "s2");
    }

    #[tokio::test]
    async fn target_from_alert_matches_hostname_label() {
        let store = Store::in_memory().await;
        store.create_server(&server("s1", "web-01")).await.unwrap();

        let mut labels = BTreeMap::new();
        labels.insert("instance".to_string(), "web-01".to_string());
        let ingested = store
            .upsert_alert_by_fingerprint(
                "fp-1",
                "NginxDown",
                "critical",
                "web-01",
                "web",
                &labels,
                &BTreeMap::new(),
                AlertStatus::Firing,
                Utc::now(),
                None,
                &serde_json::json!({}),
            )
            .await
            .unwrap();

        let rb = runbook(true, None);
        let exec = execution(None, Some(&ingested.alert.id));
        let resolved = resolve_target(&store, &rb, &exec).await.unwrap();
        assert_eq!(resolved.id, "s1");
    }

    #[tokio::test]
    async fn no_server_anywhere_is_unresolved() {
        let store = Store::in_memory().await;
        let rb = runbook(false, None);
        let exec = execution(None, None);
        let err = resolve_target(&store, &rb, &exec).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ServerUnresolved));
    }
}
