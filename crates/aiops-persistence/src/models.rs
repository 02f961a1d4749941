use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use aiops_types::{
    AlertStatus, ApiBodyType, ApiMethod, AppliesTo, AuthType, BreakerScope, CircuitState,
    ExecutionMode, ExecutionStatus, MisfirePolicy, Protocol, Recurrence, RuleAction, ScheduleType,
    StepStatus, StepType, TargetOs,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub fingerprint: String,
    pub name: String,
    pub severity: String,
    pub instance: String,
    pub job: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub status: AlertStatus,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
    pub raw_payload: Value,
    pub occurrence_count: i64,
    pub analyzed: bool,
    pub analysis: Option<AlertAnalysis>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertAnalysis {
    pub root_cause: String,
    pub impact: String,
    pub recommendations: Vec<AlertRecommendation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecommendation {
    pub title: String,
    pub commands: Vec<String>,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoAnalyzeRule {
    pub id: String,
    pub name: String,
    pub priority: i64,
    pub enabled: bool,
    pub alert_name_pattern: String,
    pub severity_pattern: String,
    pub instance_pattern: String,
    pub job_pattern: String,
    pub json_logic: Option<Value>,
    pub action: RuleAction,
}

impl AutoAnalyzeRule {
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runbook {
    pub id: String,
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub target_os: TargetOs,
    pub enabled: bool,
    pub auto_execute: bool,
    pub approval_required: bool,
    pub approval_roles: Vec<String>,
    pub approval_timeout_minutes: i64,
    pub max_executions_per_hour: i64,
    pub cooldown_minutes: i64,
    pub default_server_id: Option<String>,
    pub target_from_alert: bool,
    pub target_alert_label: String,
    pub version: i64,
    pub embedding: Option<Vec<f32>>,
}

impl Runbook {
    /// spec.md §3: if not auto-executable (or approval is required),
    /// triggered executions enter `pending_approval` rather than `pending`.
    pub fn requires_approval_gate(&self) -> bool {
        !self.auto_execute || self.approval_required
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunbookStep {
    pub runbook_id: String,
    pub step_order: i64,
    pub name: String,
    pub step_type: StepType,
    pub timeout_seconds: i64,
    pub continue_on_fail: bool,
    pub retry_count: i64,
    pub retry_delay_seconds: i64,
    pub expected_exit_code: i64,
    pub expected_output_pattern: Option<String>,
    pub output_variable: Option<String>,
    pub output_extract_pattern: Option<String>,
    pub requires_elevation: bool,
    pub working_directory: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub rollback_command_linux: Option<String>,
    pub rollback_command_windows: Option<String>,
    pub command_linux: Option<String>,
    pub command_windows: Option<String>,
    pub step_target_os: TargetOs,
    pub api_method: Option<ApiMethod>,
    pub api_endpoint: Option<String>,
    pub api_headers: BTreeMap<String, String>,
    pub api_body: Option<String>,
    pub api_body_type: Option<ApiBodyType>,
    pub api_query_params: BTreeMap<String, String>,
    pub api_expected_status_codes: Vec<i64>,
    pub api_response_extract: BTreeMap<String, String>,
    pub api_follow_redirects: bool,
    pub api_retry_on_status_codes: Vec<i64>,
    pub api_credential_profile_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunbookTrigger {
    pub id: String,
    pub runbook_id: String,
    pub priority: i64,
    pub enabled: bool,
    pub alert_name_pattern: String,
    pub severity_pattern: String,
    pub instance_pattern: String,
    pub job_pattern: String,
    pub label_matchers: BTreeMap<String, String>,
    pub annotation_matchers: BTreeMap<String, String>,
    pub min_duration_seconds: i64,
    pub min_occurrences: i64,
    pub cooldown_seconds: i64,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCredential {
    pub id: String,
    pub name: String,
    pub protocol: Protocol,
    pub hostname: String,
    pub port: i64,
    pub username: String,
    pub os_type: aiops_types::HostOs,
    pub auth_type: AuthType,
    #[serde(skip_serializing)]
    pub secret_material_encrypted: String,
    pub tags: Vec<String>,
    pub environment: String,
    pub winrm_transport: Option<String>,
    pub api_base_url: Option<String>,
    pub api_auth_type: Option<AuthType>,
    pub api_verify_ssl: bool,
    pub api_timeout_seconds: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunbookExecution {
    pub id: String,
    pub runbook_id: String,
    pub runbook_version: i64,
    pub server_id: Option<String>,
    pub alert_id: Option<String>,
    pub trigger_id: Option<String>,
    pub status: ExecutionStatus,
    pub mode: ExecutionMode,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub initiated_by: Option<String>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub variables: BTreeMap<String, Value>,
    pub extracted_values: BTreeMap<String, Value>,
    pub error_message: Option<String>,
    pub is_dry_run: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub execution_id: String,
    pub step_order: i64,
    pub step_name: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub exit_code: Option<i64>,
    pub stdout: String,
    pub stderr: String,
    pub retry_attempt: i64,
    pub rollback_performed: bool,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreaker {
    pub scope: BreakerScope,
    pub scope_id: String,
    pub state: CircuitState,
    pub failure_count: i64,
    pub success_count: i64,
    pub failure_threshold: i64,
    pub success_threshold: i64,
    pub failure_window_minutes: i64,
    pub open_duration_minutes: i64,
    pub opened_at: Option<DateTime<Utc>>,
    pub half_open_at: Option<DateTime<Utc>>,
    pub manually_opened: bool,
    pub half_open_probe_in_flight: bool,
}

impl CircuitBreaker {
    pub fn closed(scope: BreakerScope, scope_id: impl Into<String>) -> Self {
        Self {
            scope,
            scope_id: scope_id.into(),
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            failure_threshold: 5,
            success_threshold: 3,
            failure_window_minutes: 10,
            open_duration_minutes: 5,
            opened_at: None,
            half_open_at: None,
            manually_opened: false,
            half_open_probe_in_flight: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlackoutWindow {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub recurrence: Recurrence,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub daily_start: Option<String>,
    pub daily_end: Option<String>,
    pub days_of_week: Vec<i64>,
    pub days_of_month: Vec<i64>,
    pub timezone: String,
    pub applies_to: AppliesTo,
    pub applies_to_runbook_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub ts: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub details: Value,
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub runbook_id: String,
    pub schedule_type: ScheduleType,
    pub cron_expression: Option<String>,
    pub interval_minutes: Option<i64>,
    pub run_at: Option<DateTime<Utc>>,
    pub enabled: bool,
    pub misfire_policy: MisfirePolicy,
    pub max_instances: i64,
    pub next_fire_at: Option<DateTime<Utc>>,
    pub last_fired_at: Option<DateTime<Utc>>,
}
