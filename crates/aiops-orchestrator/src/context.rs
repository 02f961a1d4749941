use aiops_persistence::models::{Alert, RunbookExecution, ServerCredential};
use aiops_template::{AlertContext, ExecutionContext, ServerContext, TemplateContext};

/// Assembles the context a step's templated fields render against
/// (spec.md §4.3): alert, server, runtime variables, and whatever has
/// already been extracted by earlier steps in this execution.
pub fn build_context(
    execution: &RunbookExecution,
    server: Option<&ServerCredential>,
    alert: Option<&Alert>,
) -> TemplateContext {
    let mut ctx = TemplateContext::new(ExecutionContext {
        id: execution.id.clone(),
        mode: format!("{:?}", execution.mode).to_lowercase(),
        dry_run: execution.is_dry_run,
    })
    .with_vars(execution.variables.clone());

    if let Some(alert) = alert {
        ctx = ctx.with_alert(AlertContext {
            name: alert.name.clone(),
            severity: alert.severity.clone(),
            instance: alert.instance.clone(),
            job: alert.job.clone(),
            labels: alert.labels.clone(),
            annotations: alert.annotations.clone(),
        });
    }

    if let Some(server) = server {
        ctx = ctx.with_server(ServerContext {
            hostname: server.hostname.clone(),
            os_type: format!("{:?}", server.os_type).to_lowercase(),
            environment: server.environment.clone(),
            tags: server.tags.clone(),
        });
    }

    for (key, value) in &execution.extracted_values {
        ctx.bind_extracted(key.clone(), value.clone());
    }

    ctx
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiops_types::{ExecutionMode, ExecutionStatus, HostOs, Protocol, AuthType};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn execution() -> RunbookExecution {
        let mut vars = BTreeMap::new();
        vars.insert("threshold".to_string(), serde_json::json!(90));
        RunbookExecution {
            id: "e1".to_string(),
            runbook_id: "rb1".to_string(),
            runbook_version: 1,
            server_id: None,
            alert_id: None,
            trigger_id: None,
            status: ExecutionStatus::Running,
            mode: ExecutionMode::Auto,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            initiated_by: None,
            approved_by: None,
            approved_at: None,
            variables: vars,
            extracted_values: BTreeMap::new(),
            error_message: None,
            is_dry_run: true,
            created_at: Utc::now(),
        }
    }

    fn server() -> ServerCredential {
        ServerCredential {
            id: "s1".to_string(),
            name: "web-01".to_string(),
            protocol: Protocol::Ssh,
            hostname: "web-01".to_string(),
            port: 22,
            username: "deploy".to_string(),
            os_type: HostOs::Linux,
            auth_type: AuthType::Key,
            secret_material_encrypted: String::new(),
            tags: vec!["prod".to_string()],
            environment: "prod".to_string(),
            winrm_transport: None,
            api_base_url: None,
            api_auth_type: None,
            api_verify_ssl: true,
            api_timeout_seconds: 30,
        }
    }

    #[test]
    fn context_carries_execution_mode_and_dry_run_flag() {
        let ctx = build_context(&execution(), Some(&server()), None);
        assert_eq!(ctx.execution.mode, "auto");
        assert!(ctx.execution.dry_run);
        assert_eq!(ctx.server.unwrap().hostname, "web-01");
    }

    #[test]
    fn vars_and_extracted_are_both_visible() {
        let mut exec = execution();
        exec.extracted_values.insert("disk_pct".to_string(), serde_json::json!(87));
        let ctx = build_context(&exec, None, None);
        assert_eq!(ctx.vars.get("threshold"), Some(&serde_json::json!(90)));
        assert_eq!(ctx.extracted.get("disk_pct"), Some(&serde_json::json!(87)));
    }
}
