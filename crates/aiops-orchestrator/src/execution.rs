use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use aiops_executors::{run_scoped, CommandResult, ExecutorError};
use aiops_observability::{emit_event, ObservabilityEvent, ProcessKind};
use aiops_persistence::executions::ExecutionStatusPatch;
use aiops_persistence::models::{RunbookStep, ServerCredential, StepExecution};
use aiops_persistence::{Store, StoreError};
use aiops_safety::breaker;
use aiops_template::{render, TemplateContext};
use aiops_types::{BreakerScope, ExecutionStatus, HostOs, StepStatus, StepType};

use crate::context::build_context;
use crate::drivers::ExecutorSet;
use crate::error::OrchestratorError;
use crate::step::{
    extract_api_value, extract_with_pattern, select_command, select_rollback_command, step_succeeded,
};
use crate::target::resolve_target;

/// Drives one execution through spec.md §4.7 steps 1-6 to a terminal
/// state. Returns `Ok(())` immediately, without side effects, if another
/// worker already claimed this execution.
pub async fn run_execution(
    store: &Store,
    executors: &ExecutorSet,
    execution_id: &str,
    cancel: &CancellationToken,
) -> Result<(), OrchestratorError> {
    let started_at = Utc::now();

    let execution = match store
        .transition_execution_status(
            execution_id,
            ExecutionStatus::Running,
            ExecutionStatusPatch {
                started_at: Some(started_at),
                ..Default::default()
            },
        )
        .await
    {
        Ok(execution) => execution,
        Err(StoreError::InvalidTransition { .. }) => return Ok(()),
        Err(err) => return Err(err.into()),
    };

    let runbook = store.get_runbook(&execution.runbook_id).await?;

    let server = match resolve_target(store, &runbook, &execution).await {
        Ok(server) => server,
        Err(err) => {
            finalize(
                store,
                &runbook.id,
                None,
                execution_id,
                started_at,
                ExecutionStatus::Failed,
                Some(err.to_string()),
            )
            .await?;
            return Err(err);
        }
    };

    let alert = match &execution.alert_id {
        Some(id) => Some(store.get_alert(id).await?),
        None => None,
    };

    let mut ctx = build_context(&execution, Some(&server), alert.as_ref());
    let steps = store.list_runbook_steps(&runbook.id).await?;

    let mut completed: Vec<(RunbookStep, StepExecution)> = Vec::new();
    let mut final_status = ExecutionStatus::Completed;
    let mut final_error: Option<String> = None;

    for step in steps {
        if cancel.is_cancelled() {
            final_status = ExecutionStatus::Cancelled;
            final_error = Some("cancelled by operator".to_string());
            break;
        }

        if !step.step_target_os.compatible_with(server.os_type) {
            continue;
        }

        let outcome = run_one_step(executors, &server, &step, &ctx, execution.is_dry_run, cancel).await;

        let step_execution = StepExecution {
            execution_id: execution_id.to_string(),
            step_order: step.step_order,
            step_name: step.name.clone(),
            status: outcome.status,
            started_at: Some(outcome.started_at),
            completed_at: Some(Utc::now()),
            duration_ms: Some(outcome.duration_ms),
            exit_code: outcome.exit_code.map(i64::from),
            stdout: outcome.stdout.clone(),
            stderr: outcome.stderr.clone(),
            retry_attempt: outcome.attempts,
            rollback_performed: false,
            error_message: outcome.error_message.clone(),
        };
        store.upsert_step_execution(&step_execution).await?;

        for (key, value) in &outcome.extracted {
            store.bind_extracted_value(execution_id, key, value).await?;
            ctx.bind_extracted(key.clone(), value.clone());
        }

        let step_completed = outcome.status == StepStatus::Completed;
        completed.push((step.clone(), step_execution));

        if !step_completed {
            if step.continue_on_fail {
                continue;
            }
            final_status = if outcome.status == StepStatus::Timeout {
                ExecutionStatus::Timeout
            } else {
                ExecutionStatus::Failed
            };
            final_error = outcome
                .error_message
                .or_else(|| Some(format!("step '{}' failed", step.name)));

            emit_event(
                tracing::Level::WARN,
                ProcessKind::Engine,
                ObservabilityEvent {
                    event: "step_failed_rolling_back",
                    component: "orchestrator",
                    alert_id: execution.alert_id.as_deref(),
                    execution_id: Some(execution_id),
                    runbook_id: Some(&runbook.id),
                    step_order: Some(step.step_order),
                    status: None,
                    error_code: None,
                    detail: final_error.as_deref(),
                },
            );

            run_rollback(store, executors, &server, &ctx, &completed).await;
            break;
        }
    }

    finalize(
        store,
        &runbook.id,
        Some(&server.id),
        execution_id,
        started_at,
        final_status,
        final_error,
    )
    .await
}

struct StepRunOutcome {
    status: StepStatus,
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
    error_message: Option<String>,
    extracted: Vec<(String, serde_json::Value)>,
    started_at: DateTime<Utc>,
    duration_ms: i64,
    attempts: i64,
}

struct RenderedStep {
    command: Option<String>,
    endpoint: Option<String>,
    headers: BTreeMap<String, String>,
    query: BTreeMap<String, String>,
    body: Option<String>,
}

fn render_step(
    step: &RunbookStep,
    ctx: &TemplateContext,
    os: HostOs,
) -> Result<RenderedStep, aiops_template::TemplateError> {
    match step.step_type {
        StepType::Command => {
            let template = select_command(step, os).unwrap_or("");
            let command = render(template, ctx, false)?;
            Ok(RenderedStep {
                command: Some(command),
                endpoint: None,
                headers: BTreeMap::new(),
                query: BTreeMap::new(),
                body: None,
            })
        }
        StepType::Api => {
            let endpoint = render(step.api_endpoint.as_deref().unwrap_or(""), ctx, false)?;

            let mut headers = BTreeMap::new();
            for (key, value) in &step.api_headers {
                headers.insert(key.clone(), render(value, ctx, false)?);
            }
            let mut query = BTreeMap::new();
            for (key, value) in &step.api_query_params {
                query.insert(key.clone(), render(value, ctx, false)?);
            }
            let body = match &step.api_body {
                Some(body) => Some(render(body, ctx, false)?),
                None => None,
            };

            Ok(RenderedStep {
                command: None,
                endpoint: Some(endpoint),
                headers,
                query,
                body,
            })
        }
    }
}

async fn dispatch(
    executors: &ExecutorSet,
    server: &ServerCredential,
    step: &RunbookStep,
    rendered: &RenderedStep,
    timeout: Duration,
) -> Result<CommandResult, ExecutorError> {
    match step.step_type {
        StepType::Command => {
            let driver = executors.command_driver(server.protocol).ok_or_else(|| {
                ExecutorError::Protocol("server protocol does not support command steps".to_string())
            })?;
            let command = rendered.command.clone().unwrap_or_default();
            run_scoped(driver.as_ref(), server, &command, timeout, step.requires_elevation).await
        }
        StepType::Api => {
            let endpoint = rendered.endpoint.clone().unwrap_or_default();
            executors
                .api
                .call(server, step, &endpoint, &rendered.headers, &rendered.query, rendered.body.as_deref(), timeout)
                .await
        }
    }
}

fn extract_outputs(step: &RunbookStep, result: &CommandResult) -> Vec<(String, serde_json::Value)> {
    match step.step_type {
        StepType::Command => match &step.output_variable {
            Some(key) => {
                let value = extract_with_pattern(step.output_extract_pattern.as_deref(), &result.stdout);
                vec![(key.clone(), serde_json::Value::String(value))]
            }
            None => vec![],
        },
        StepType::Api => step
            .api_response_extract
            .iter()
            .filter_map(|(name, selector)| extract_api_value(selector, &result.stdout).map(|v| (name.clone(), v)))
            .collect(),
    }
}

async fn run_one_step(
    executors: &ExecutorSet,
    server: &ServerCredential,
    step: &RunbookStep,
    ctx: &TemplateContext,
    is_dry_run: bool,
    cancel: &CancellationToken,
) -> StepRunOutcome {
    let started_at = Utc::now();

    let rendered = match render_step(step, ctx, server.os_type) {
        Ok(rendered) => rendered,
        Err(err) => {
            return StepRunOutcome {
                status: StepStatus::Failed,
                exit_code: None,
                stdout: String::new(),
                stderr: String::new(),
                error_message: Some(format!("TemplateResolution: {err}")),
                extracted: vec![],
                started_at,
                duration_ms: 0,
                attempts: 0,
            }
        }
    };

    if is_dry_run {
        let preview = rendered
            .command
            .clone()
            .or_else(|| rendered.endpoint.clone())
            .unwrap_or_default();
        return StepRunOutcome {
            status: StepStatus::Completed,
            exit_code: Some(0),
            stdout: format!("[dry-run] {preview}"),
            stderr: String::new(),
            error_message: None,
            extracted: vec![],
            started_at,
            duration_ms: 0,
            attempts: 0,
        };
    }

    let timeout = Duration::from_secs(step.timeout_seconds.max(0) as u64);
    let mut attempts = 0i64;
    let result = loop {
        if cancel.is_cancelled() {
            break Err(ExecutorError::Protocol("cancelled".to_string()));
        }
        let attempt = dispatch(executors, server, step, &rendered, timeout).await;
        if attempt.is_ok() || attempts >= step.retry_count {
            break attempt;
        }
        attempts += 1;
        tokio::time::sleep(Duration::from_secs(step.retry_delay_seconds.max(0) as u64)).await;
    };

    let duration_ms = (Utc::now() - started_at).num_milliseconds();

    match result {
        Ok(command_result) => {
            let succeeded = step_succeeded(step, command_result.exit_code, &command_result.stdout);
            let extracted = if succeeded { extract_outputs(step, &command_result) } else { vec![] };
            StepRunOutcome {
                status: if succeeded { StepStatus::Completed } else { StepStatus::Failed },
                exit_code: Some(command_result.exit_code),
                stdout: command_result.stdout,
                stderr: command_result.stderr,
                error_message: if succeeded {
                    None
                } else {
                    Some("step output did not match expectations".to_string())
                },
                extracted,
                started_at,
                duration_ms,
                attempts,
            }
        }
        Err(err) => StepRunOutcome {
            status: if matches!(err, ExecutorError::Timeout) { StepStatus::Timeout } else { StepStatus::Failed },
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            error_message: Some(err.to_string()),
            extracted: vec![],
            started_at,
            duration_ms,
            attempts,
        },
    }
}

/// spec.md §4.7.4g: for every previously completed step with a non-empty
/// rollback command, in reverse order, run it with the same context.
/// Rollback failures are logged but never abort the sweep.
async fn run_rollback(
    store: &Store,
    executors: &ExecutorSet,
    server: &ServerCredential,
    ctx: &TemplateContext,
    completed: &[(RunbookStep, StepExecution)],
) {
    for (step, step_execution) in completed.iter().rev() {
        let Some(rollback_template) = select_rollback_command(step, server.os_type) else {
            continue;
        };
        let rendered = match render(rollback_template, ctx, false) {
            Ok(command) => command,
            Err(err) => {
                warn!(step = %step.name, error = %err, "rollback template render failed");
                continue;
            }
        };
        let driver = executors.command_driver(server.protocol);
        let Some(driver) = driver else { continue };

        let timeout = Duration::from_secs(step.timeout_seconds.max(0) as u64);
        if let Err(err) = run_scoped(driver.as_ref(), server, &rendered, timeout, step.requires_elevation).await {
            warn!(step = %step.name, error = %err, "rollback command failed");
        }

        let mut updated = step_execution.clone();
        updated.rollback_performed = true;
        if let Err(err) = store.upsert_step_execution(&updated).await {
            warn!(step = %step.name, error = %err, "failed to record rollback");
        }
    }
}

async fn finalize(
    store: &Store,
    runbook_id: &str,
    server_id: Option<&str>,
    execution_id: &str,
    started_at: DateTime<Utc>,
    status: ExecutionStatus,
    error_message: Option<String>,
) -> Result<(), OrchestratorError> {
    let now = Utc::now();
    let duration_ms = (now - started_at).num_milliseconds();

    store
        .transition_execution_status(
            execution_id,
            status,
            ExecutionStatusPatch {
                completed_at: Some(now),
                duration_ms: Some(duration_ms),
                error_message,
                ..Default::default()
            },
        )
        .await?;

    notify_breakers(store, runbook_id, server_id, status, now).await?;

    emit_event(
        if status == ExecutionStatus::Completed { tracing::Level::INFO } else { tracing::Level::WARN },
        ProcessKind::Engine,
        ObservabilityEvent {
            event: "execution_finalized",
            component: "orchestrator",
            alert_id: None,
            execution_id: Some(execution_id),
            runbook_id: Some(runbook_id),
            step_order: None,
            status: Some(status_label(status)),
            error_code: None,
            detail: None,
        },
    );

    Ok(())
}

fn status_label(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Failed => "failed",
        ExecutionStatus::Timeout => "timeout",
        ExecutionStatus::Cancelled => "cancelled",
        _ => "unknown",
    }
}

/// spec.md §4.7 step 6 / §4.6 step 1: every execution outcome feeds the
/// runbook, server, and global breakers.
async fn notify_breakers(
    store: &Store,
    runbook_id: &str,
    server_id: Option<&str>,
    status: ExecutionStatus,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let success = status == ExecutionStatus::Completed;
    let mut scopes = vec![(BreakerScope::Runbook, runbook_id.to_string())];
    if let Some(server_id) = server_id {
        scopes.push((BreakerScope::Server, server_id.to_string()));
    }
    scopes.push((BreakerScope::Global, "global".to_string()));

    for (scope, scope_id) in scopes {
        let mut b = store.get_or_create_breaker(scope, &scope_id).await?;
        if success {
            breaker::record_success(&mut b, now);
        } else {
            breaker::record_failure(&mut b, now);
        }
        store.save_breaker(&b).await?;
    }
    Ok(())
}

#[cfg(test)]
mod execution_scenarios {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use aiops_executors::{ApiExecutor, SpyExecutor};
    use aiops_persistence::models::{RunbookExecution, ServerCredential};
    use aiops_safety::gate::{check, BypassFlags};
    use aiops_types::{AuthType, CircuitState, ExecutionMode, Protocol};

    use super::*;

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
            tags: vec![],
            environment: "prod".to_string(),
            winrm_transport: None,
            api_base_url: None,
            api_auth_type: None,
            api_verify_ssl: true,
            api_timeout_seconds: 30,
        }
    }

    fn runbook() -> aiops_persistence::models::Runbook {
        aiops_persistence::models::Runbook {
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
            max_executions_per_hour: 100,
            cooldown_minutes: 0,
            default_server_id: Some("s1".to_string()),
            target_from_alert: false,
            target_alert_label: "instance".to_string(),
            version: 1,
            embedding: None,
        }
    }

    fn step(command: &str) -> RunbookStep {
        RunbookStep {
            runbook_id: "rb1".to_string(),
            step_order: 1,
            name: "restart".to_string(),
            step_type: StepType::Command,
            timeout_seconds: 5,
            continue_on_fail: false,
            retry_count: 0,
            retry_delay_seconds: 0,
            expected_exit_code: 0,
            expected_output_pattern: None,
            output_variable: None,
            output_extract_pattern: None,
            requires_elevation: false,
            working_directory: None,
            environment: BTreeMap::new(),
            rollback_command_linux: None,
            rollback_command_windows: None,
            command_linux: Some(command.to_string()),
            command_windows: Some(command.to_string()),
            step_target_os: aiops_types::TargetOs::Any,
            api_method: None,
            api_endpoint: None,
            api_headers: BTreeMap::new(),
            api_body: None,
            api_body_type: None,
            api_query_params: BTreeMap::new(),
            api_expected_status_codes: vec![],
            api_response_extract: BTreeMap::new(),
            api_follow_redirects: false,
            api_retry_on_status_codes: vec![],
            api_credential_profile_id: None,
        }
    }

    fn pending_execution(is_dry_run: bool) -> RunbookExecution {
        RunbookExecution {
            id: uuid::Uuid::new_v4().to_string(),
            runbook_id: "rb1".to_string(),
            runbook_version: 1,
            server_id: None,
            alert_id: None,
            trigger_id: None,
            status: ExecutionStatus::Pending,
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
            is_dry_run,
            created_at: Utc::now(),
        }
    }

    fn executors(spy: SpyExecutor) -> ExecutorSet {
        ExecutorSet {
            ssh: Arc::new(spy),
            winrm: Arc::new(SpyExecutor::new()),
            api: Arc::new(ApiExecutor::new(true)),
        }
    }

    async fn seed(store: &Store) {
        store.create_server(&server()).await.unwrap();
        store.create_runbook(&runbook()).await.unwrap();
    }

    /// spec.md §8 scenario 1: a runbook with one always-succeeding step
    /// reaches `completed` with one `completed` `StepExecution`.
    #[tokio::test]
    async fn happy_path_execution_completes() {
        let store = Store::in_memory().await;
        seed(&store).await;
        store.replace_runbook_steps("rb1", &[step("systemctl restart nginx")]).await.unwrap();

        let execution = pending_execution(false);
        store.create_execution(&execution).await.unwrap();

        let executors = executors(SpyExecutor::new());
        let cancel = tokio_util::sync::CancellationToken::new();
        run_execution(&store, &executors, &execution.id, &cancel).await.unwrap();

        let finished = store.get_execution(&execution.id).await.unwrap();
        assert_eq!(finished.status, ExecutionStatus::Completed);

        let steps = store.list_step_executions(&execution.id).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].status, StepStatus::Completed);
        assert_eq!(steps[0].exit_code, Some(0));
    }

    /// spec.md §8 scenario 3: five failing runs open the runbook breaker;
    /// a sixth `check()` call is rejected with `CircuitOpen` before any
    /// new execution row would be created.
    #[tokio::test]
    async fn breaker_opens_after_five_failures() {
        let store = Store::in_memory().await;
        seed(&store).await;
        let spy = SpyExecutor::new();
        spy.push_result(aiops_executors::CommandResult {
            exit_code: 1,
            stdout: String::new(),
            stderr: "boom".to_string(),
            duration_ms: 1,
        });
        store.replace_runbook_steps("rb1", &[step("false")]).await.unwrap();
        let executors = executors(spy);

        for _ in 0..5 {
            let execution = pending_execution(false);
            store.create_execution(&execution).await.unwrap();
            let cancel = tokio_util::sync::CancellationToken::new();
            run_execution(&store, &executors, &execution.id, &cancel).await.unwrap();
        }

        let breaker = store
            .get_or_create_breaker(BreakerScope::Runbook, "rb1")
            .await
            .unwrap();
        assert_eq!(breaker.state, CircuitState::Open);

        let rb = store.get_runbook("rb1").await.unwrap();
        let result = check(&store, &rb, None, Utc::now(), &BypassFlags::none()).await;
        assert_eq!(result.unwrap_err(), aiops_types::ErrorKind::CircuitOpen);
    }

    /// spec.md §8 scenario 4: a dry-run execution never calls the
    /// executor driver and prefixes recorded stdout with `[dry-run]`.
    #[tokio::test]
    async fn dry_run_never_invokes_the_driver() {
        let store = Store::in_memory().await;
        seed(&store).await;
        store.replace_runbook_steps("rb1", &[step("systemctl restart nginx")]).await.unwrap();

        let execution = pending_execution(true);
        store.create_execution(&execution).await.unwrap();

        let spy = SpyExecutor::new();
        let executors = executors(spy.clone());
        let cancel = tokio_util::sync::CancellationToken::new();
        run_execution(&store, &executors, &execution.id, &cancel).await.unwrap();

        let finished = store.get_execution(&execution.id).await.unwrap();
        assert_eq!(finished.status, ExecutionStatus::Completed);
        assert!(spy.invocations().is_empty());

        let steps = store.list_step_executions(&execution.id).await.unwrap();
        assert!(steps[0].stdout.starts_with("[dry-run]"));
    }

    /// spec.md §8 scenario 6: a step referencing an undefined template
    /// variable fails with a `TemplateResolution` error and rolls back
    /// the prior successful step.
    #[tokio::test]
    async fn undefined_template_variable_fails_and_rolls_back() {
        let store = Store::in_memory().await;
        seed(&store).await;

        let mut first = step("systemctl restart nginx");
        first.step_order = 1;
        first.rollback_command_linux = Some("systemctl start nginx".to_string());
        first.rollback_command_windows = Some("systemctl start nginx".to_string());

        let mut second = step("echo {{ vars.missing }}");
        second.step_order = 2;

        store.replace_runbook_steps("rb1", &[first, second]).await.unwrap();

        let execution = pending_execution(false);
        store.create_execution(&execution).await.unwrap();

        let spy = SpyExecutor::new();
        let executors = executors(spy.clone());
        let cancel = tokio_util::sync::CancellationToken::new();
        run_execution(&store, &executors, &execution.id, &cancel).await.unwrap();

        let finished = store.get_execution(&execution.id).await.unwrap();
        assert_eq!(finished.status, ExecutionStatus::Failed);
        assert!(finished.error_message.unwrap().contains("TemplateResolution"));

        let steps = store.list_step_executions(&execution.id).await.unwrap();
        let second_step = steps.iter().find(|s| s.step_order == 2).unwrap();
        assert_eq!(second_step.status, StepStatus::Failed);

        // the first step's rollback command was issued against the driver
        let invocations = spy.invocations();
        assert!(invocations.iter().any(|i| i.command == "systemctl start nginx"));
    }
}
