use regex::Regex;

use aiops_persistence::models::RunbookStep;
use aiops_types::HostOs;

/// `command_linux` vs `command_windows`, per spec.md §4.7.4b.
pub fn select_command(step: &RunbookStep, os: HostOs) -> Option<&str> {
    match os {
        HostOs::Linux => step.command_linux.as_deref(),
        HostOs::Windows => step.command_windows.as_deref(),
    }
}

pub fn select_rollback_command(step: &RunbookStep, os: HostOs) -> Option<&str> {
    match os {
        HostOs::Linux => step.rollback_command_linux.as_deref(),
        HostOs::Windows => step.rollback_command_windows.as_deref(),
    }
}

/// spec.md §4.7.4d: a step that the driver reported as exiting is still a
/// failure if its exit code or stdout doesn't match what the step declared.
pub fn step_succeeded(step: &RunbookStep, exit_code: i32, stdout: &str) -> bool {
    if exit_code as i64 != step.expected_exit_code {
        return false;
    }
    if let Some(pattern) = &step.expected_output_pattern {
        return Regex::new(pattern).map(|re| re.is_match(stdout)).unwrap_or(false);
    }
    true
}

/// `output_extract_pattern`: a regex with one capture group, falling back
/// to the entire stdout when the pattern has no match or no group.
pub fn extract_with_pattern(pattern: Option<&str>, stdout: &str) -> String {
    let Some(pattern) = pattern else { return stdout.to_string() };
    let Ok(re) = Regex::new(pattern) else { return stdout.to_string() };
    re.captures(stdout)
        .and_then(|caps| caps.get(1).or_else(|| caps.get(0)))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| stdout.to_string())
}

/// `api_response_extract` entries: a leading `$` marks a JSONPath
/// expression against the parsed response body; anything else is a regex
/// with an optional capture group.
pub fn extract_api_value(selector: &str, body: &str) -> Option<serde_json::Value> {
    if selector.starts_with('$') {
        let json: serde_json::Value = serde_json::from_str(body).ok()?;
        let results = jsonpath_lib::select(&json, selector).ok()?;
        return results.first().map(|v| (*v).clone());
    }
    let re = Regex::new(selector).ok()?;
    let caps = re.captures(body)?;
    let matched = caps.get(1).or_else(|| caps.get(0))?;
    Some(serde_json::Value::String(matched.as_str().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiops_types::{ApiBodyType, ApiMethod, StepType, TargetOs};
    use std::collections::BTreeMap;

    fn step() -> RunbookStep {
        RunbookStep {
            runbook_id: "rb1".to_string(),
            step_order: 0,
            name: "check-disk".to_string(),
            step_type: StepType::Command,
            timeout_seconds: 30,
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
            rollback_command_linux: Some("systemctl start nginx".to_string()),
            rollback_command_windows: None,
            command_linux: Some("systemctl stop nginx".to_string()),
            command_windows: Some("Stop-Service nginx".to_string()),
            step_target_os: TargetOs::Any,
            api_method: Some(ApiMethod::Get),
            api_endpoint: None,
            api_headers: BTreeMap::new(),
            api_body: None,
            api_body_type: Some(ApiBodyType::Json),
            api_query_params: BTreeMap::new(),
            api_expected_status_codes: vec![],
            api_response_extract: BTreeMap::new(),
            api_follow_redirects: true,
            api_retry_on_status_codes: vec![],
            api_credential_profile_id: None,
        }
    }

    #[test]
    fn selects_command_by_os() {
        let s = step();
        assert_eq!(select_command(&s, HostOs::Linux), Some("systemctl stop nginx"));
        assert_eq!(select_command(&s, HostOs::Windows), Some("Stop-Service nginx"));
    }

    #[test]
    fn rollback_falls_back_to_none_when_os_has_no_command() {
        let s = step();
        assert_eq!(select_rollback_command(&s, HostOs::Windows), None);
    }

    #[test]
    fn expected_exit_code_mismatch_fails_the_step() {
        let mut s = step();
        s.expected_exit_code = 0;
        assert!(!step_succeeded(&s, 1, ""));
        assert!(step_succeeded(&s, 0, ""));
    }

    #[test]
    fn expected_output_pattern_must_match_stdout() {
        let mut s = step();
        s.expected_output_pattern = Some("OK".to_string());
        assert!(!step_succeeded(&s, 0, "FAIL"));
        assert!(step_succeeded(&s, 0, "status: OK"));
    }

    #[test]
    fn extract_with_pattern_uses_capture_group() {
        let out = extract_with_pattern(Some(r"disk: (\d+)%"), "disk: 87%");
        assert_eq!(out, "87");
    }

    #[test]
    fn extract_with_pattern_falls_back_to_full_stdout() {
        let out = extract_with_pattern(Some(r"nomatch"), "disk: 87%");
        assert_eq!(out, "disk: 87%");
    }

    #[test]
    fn extract_api_value_reads_jsonpath() {
        let body = r#"{"status": {"disk_pct": 87}}"#;
        let value = extract_api_value("$.status.disk_pct", body).unwrap();
        assert_eq!(value, serde_json::json!(87));
    }

    #[test]
    fn extract_api_value_falls_back_to_regex() {
        let body = "disk usage is 87 percent";
        let value = extract_api_value(r"(\d+) percent", body).unwrap();
        assert_eq!(value, serde_json::json!("87"));
    }
}
