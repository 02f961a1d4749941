use sqlx::Row;

use crate::models::{Runbook, RunbookStep, RunbookTrigger};
use crate::{col_to_enum, enum_to_col, parse_json_map, to_json_string, Store, StoreError};

fn row_to_runbook(row: &sqlx::sqlite::SqliteRow) -> Runbook {
    let embedding_json: Option<String> = row.get("embedding_json");
    Runbook {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        tags: parse_json_map(row.get::<String, _>("tags_json").as_str()),
        target_os: col_to_enum(&row.get::<String, _>("target_os")),
        enabled: row.get::<i64, _>("enabled") != 0,
        auto_execute: row.get::<i64, _>("auto_execute") != 0,
        approval_required: row.get::<i64, _>("approval_required") != 0,
        approval_roles: parse_json_map(row.get::<String, _>("approval_roles_json").as_str()),
        approval_timeout_minutes: row.get("approval_timeout_minutes"),
        max_executions_per_hour: row.get("max_executions_per_hour"),
        cooldown_minutes: row.get("cooldown_minutes"),
        default_server_id: row.get("default_server_id"),
        target_from_alert: row.get::<i64, _>("target_from_alert") != 0,
        target_alert_label: row.get("target_alert_label"),
        version: row.get("version"),
        embedding: embedding_json.and_then(|raw| serde_json::from_str(&raw).ok()),
    }
}

fn row_to_step(row: &sqlx::sqlite::SqliteRow) -> RunbookStep {
    let api_method: Option<String> = row.get("api_method");
    let api_body_type: Option<String> = row.get("api_body_type");
    RunbookStep {
        runbook_id: row.get("runbook_id"),
        step_order: row.get("step_order"),
        name: row.get("name"),
        step_type: col_to_enum(&row.get::<String, _>("step_type")),
        timeout_seconds: row.get("timeout_seconds"),
        continue_on_fail: row.get::<i64, _>("continue_on_fail") != 0,
        retry_count: row.get("retry_count"),
        retry_delay_seconds: row.get("retry_delay_seconds"),
        expected_exit_code: row.get("expected_exit_code"),
        expected_output_pattern: row.get("expected_output_pattern"),
        output_variable: row.get("output_variable"),
        output_extract_pattern: row.get("output_extract_pattern"),
        requires_elevation: row.get::<i64, _>("requires_elevation") != 0,
        working_directory: row.get("working_directory"),
        environment: parse_json_map(row.get::<String, _>("environment_json").as_str()),
        rollback_command_linux: row.get("rollback_command_linux"),
        rollback_command_windows: row.get("rollback_command_windows"),
        command_linux: row.get("command_linux"),
        command_windows: row.get("command_windows"),
        step_target_os: col_to_enum(&row.get::<String, _>("step_target_os")),
        api_method: api_method.map(|raw| col_to_enum(&raw)),
        api_endpoint: row.get("api_endpoint"),
        api_headers: parse_json_map(row.get::<String, _>("api_headers_json").as_str()),
        api_body: row.get("api_body"),
        api_body_type: api_body_type.map(|raw| col_to_enum(&raw)),
        api_query_params: parse_json_map(row.get::<String, _>("api_query_params_json").as_str()),
        api_expected_status_codes: parse_json_map(
            row.get::<String, _>("api_expected_status_codes_json").as_str(),
        ),
        api_response_extract: parse_json_map(
            row.get::<String, _>("api_response_extract_json").as_str(),
        ),
        api_follow_redirects: row.get::<i64, _>("api_follow_redirects") != 0,
        api_retry_on_status_codes: parse_json_map(
            row.get::<String, _>("api_retry_on_status_codes_json").as_str(),
        ),
        api_credential_profile_id: row.get("api_credential_profile_id"),
    }
}

fn row_to_trigger(row: &sqlx::sqlite::SqliteRow) -> RunbookTrigger {
    RunbookTrigger {
        id: row.get("id"),
        runbook_id: row.get("runbook_id"),
        priority: row.get("priority"),
        enabled: row.get::<i64, _>("enabled") != 0,
        alert_name_pattern: row.get("alert_name_pattern"),
        severity_pattern: row.get("severity_pattern"),
        instance_pattern: row.get("instance_pattern"),
        job_pattern: row.get("job_pattern"),
        label_matchers: parse_json_map(row.get::<String, _>("label_matchers_json").as_str()),
        annotation_matchers: parse_json_map(
            row.get::<String, _>("annotation_matchers_json").as_str(),
        ),
        min_duration_seconds: row.get("min_duration_seconds"),
        min_occurrences: row.get("min_occurrences"),
        cooldown_seconds: row.get("cooldown_seconds"),
        last_triggered_at: row.get("last_triggered_at"),
        created_at: row.get("created_at"),
    }
}

impl Store {
    pub async fn create_runbook(&self, runbook: &Runbook) -> Result<(), StoreError> {
        let result = sqlx::query(
            "INSERT INTO runbooks (id, name, description, tags_json, target_os, enabled, auto_execute, approval_required, approval_roles_json, approval_timeout_minutes, max_executions_per_hour, cooldown_minutes, default_server_id, target_from_alert, target_alert_label, version, embedding_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
        )
        .bind(&runbook.id)
        .bind(&runbook.name)
        .bind(&runbook.description)
        .bind(to_json_string(&runbook.tags))
        .bind(enum_to_col(runbook.target_os))
        .bind(runbook.enabled as i64)
        .bind(runbook.auto_execute as i64)
        .bind(runbook.approval_required as i64)
        .bind(to_json_string(&runbook.approval_roles))
        .bind(runbook.approval_timeout_minutes)
        .bind(runbook.max_executions_per_hour)
        .bind(runbook.cooldown_minutes)
        .bind(&runbook.default_server_id)
        .bind(runbook.target_from_alert as i64)
        .bind(&runbook.target_alert_label)
        .bind(runbook.version)
        .bind(runbook.embedding.as_ref().map(to_json_string))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(StoreError::Conflict(
                format!("runbook name {} already exists", runbook.name),
            )),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_runbook(&self, id: &str) -> Result<Runbook, StoreError> {
        let row = sqlx::query("SELECT * FROM runbooks WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("runbook {id}")))?;
        Ok(row_to_runbook(&row))
    }

    pub async fn list_runbooks(&self) -> Result<Vec<Runbook>, StoreError> {
        let rows = sqlx::query("SELECT * FROM runbooks ORDER BY name ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_runbook).collect())
    }

    /// Bumps `version` so in-flight executions keep referencing the
    /// snapshot they were created against (spec.md §3 `runbook_version`).
    pub async fn update_runbook(&self, runbook: &Runbook) -> Result<Runbook, StoreError> {
        let result = sqlx::query(
            "UPDATE runbooks SET description = ?1, tags_json = ?2, target_os = ?3, enabled = ?4, auto_execute = ?5, approval_required = ?6, approval_roles_json = ?7, approval_timeout_minutes = ?8, max_executions_per_hour = ?9, cooldown_minutes = ?10, default_server_id = ?11, target_from_alert = ?12, target_alert_label = ?13, version = version + 1, embedding_json = ?14 WHERE id = ?15",
        )
        .bind(&runbook.description)
        .bind(to_json_string(&runbook.tags))
        .bind(enum_to_col(runbook.target_os))
        .bind(runbook.enabled as i64)
        .bind(runbook.auto_execute as i64)
        .bind(runbook.approval_required as i64)
        .bind(to_json_string(&runbook.approval_roles))
        .bind(runbook.approval_timeout_minutes)
        .bind(runbook.max_executions_per_hour)
        .bind(runbook.cooldown_minutes)
        .bind(&runbook.default_server_id)
        .bind(runbook.target_from_alert as i64)
        .bind(&runbook.target_alert_label)
        .bind(runbook.embedding.as_ref().map(to_json_string))
        .bind(&runbook.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("runbook {}", runbook.id)));
        }
        self.get_runbook(&runbook.id).await
    }

    pub async fn delete_runbook(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM runbooks WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("runbook {id}")));
        }
        Ok(())
    }

    pub async fn replace_runbook_steps(
        &self,
        runbook_id: &str,
        steps: &[RunbookStep],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM runbook_steps WHERE runbook_id = ?1")
            .bind(runbook_id)
            .execute(&mut *tx)
            .await?;

        for step in steps {
            sqlx::query(
                "INSERT INTO runbook_steps (runbook_id, step_order, name, step_type, timeout_seconds, continue_on_fail, retry_count, retry_delay_seconds, expected_exit_code, expected_output_pattern, output_variable, output_extract_pattern, requires_elevation, working_directory, environment_json, rollback_command_linux, rollback_command_windows, command_linux, command_windows, step_target_os, api_method, api_endpoint, api_headers_json, api_body, api_body_type, api_query_params_json, api_expected_status_codes_json, api_response_extract_json, api_follow_redirects, api_retry_on_status_codes_json, api_credential_profile_id)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21,?22,?23,?24,?25,?26,?27,?28,?29,?30,?31)",
            )
            .bind(runbook_id)
            .bind(step.step_order)
            .bind(&step.name)
            .bind(enum_to_col(step.step_type))
            .bind(step.timeout_seconds)
            .bind(step.continue_on_fail as i64)
            .bind(step.retry_count)
            .bind(step.retry_delay_seconds)
            .bind(step.expected_exit_code)
            .bind(&step.expected_output_pattern)
            .bind(&step.output_variable)
            .bind(&step.output_extract_pattern)
            .bind(step.requires_elevation as i64)
            .bind(&step.working_directory)
            .bind(to_json_string(&step.environment))
            .bind(&step.rollback_command_linux)
            .bind(&step.rollback_command_windows)
            .bind(&step.command_linux)
            .bind(&step.command_windows)
            .bind(enum_to_col(step.step_target_os))
            .bind(step.api_method.map(enum_to_col))
            .bind(&step.api_endpoint)
            .bind(to_json_string(&step.api_headers))
            .bind(&step.api_body)
            .bind(step.api_body_type.map(enum_to_col))
            .bind(to_json_string(&step.api_query_params))
            .bind(to_json_string(&step.api_expected_status_codes))
            .bind(to_json_string(&step.api_response_extract))
            .bind(step.api_follow_redirects as i64)
            .bind(to_json_string(&step.api_retry_on_status_codes))
            .bind(&step.api_credential_profile_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn list_runbook_steps(&self, runbook_id: &str) -> Result<Vec<RunbookStep>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM runbook_steps WHERE runbook_id = ?1 ORDER BY step_order ASC",
        )
        .bind(runbook_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_step).collect())
    }

    pub async fn create_trigger(&self, trigger: &RunbookTrigger) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO runbook_triggers (id, runbook_id, priority, enabled, alert_name_pattern, severity_pattern, instance_pattern, job_pattern, label_matchers_json, annotation_matchers_json, min_duration_seconds, min_occurrences, cooldown_seconds, last_triggered_at, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
        )
        .bind(&trigger.id)
        .bind(&trigger.runbook_id)
        .bind(trigger.priority)
        .bind(trigger.enabled as i64)
        .bind(&trigger.alert_name_pattern)
        .bind(&trigger.severity_pattern)
        .bind(&trigger.instance_pattern)
        .bind(&trigger.job_pattern)
        .bind(to_json_string(&trigger.label_matchers))
        .bind(to_json_string(&trigger.annotation_matchers))
        .bind(trigger.min_duration_seconds)
        .bind(trigger.min_occurrences)
        .bind(trigger.cooldown_seconds)
        .bind(trigger.last_triggered_at)
        .bind(trigger.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All enabled triggers whose runbook is also enabled, lowest priority
    /// number (highest precedence) first, `created_at` as the tiebreaker
    /// (spec.md §4.5).
    pub async fn list_enabled_triggers(&self) -> Result<Vec<RunbookTrigger>, StoreError> {
        let rows = sqlx::query(
            "SELECT t.* FROM runbook_triggers t
             JOIN runbooks r ON r.id = t.runbook_id
             WHERE t.enabled = 1 AND r.enabled = 1
             ORDER BY t.priority ASC, t.created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_trigger).collect())
    }

    pub async fn list_triggers_for_runbook(
        &self,
        runbook_id: &str,
    ) -> Result<Vec<RunbookTrigger>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM runbook_triggers WHERE runbook_id = ?1 ORDER BY priority ASC, created_at ASC",
        )
        .bind(runbook_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_trigger).collect())
    }

    /// Replaces every trigger owned by `runbook_id` in one transaction, the
    /// same delete-then-reinsert shape as [`Store::replace_runbook_steps`];
    /// used by the control-plane runbook update endpoint.
    pub async fn replace_runbook_triggers(
        &self,
        runbook_id: &str,
        triggers: &[RunbookTrigger],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM runbook_triggers WHERE runbook_id = ?1")
            .bind(runbook_id)
            .execute(&mut *tx)
            .await?;

        for trigger in triggers {
            sqlx::query(
                "INSERT INTO runbook_triggers (id, runbook_id, priority, enabled, alert_name_pattern, severity_pattern, instance_pattern, job_pattern, label_matchers_json, annotation_matchers_json, min_duration_seconds, min_occurrences, cooldown_seconds, last_triggered_at, created_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
            )
            .bind(&trigger.id)
            .bind(runbook_id)
            .bind(trigger.priority)
            .bind(trigger.enabled as i64)
            .bind(&trigger.alert_name_pattern)
            .bind(&trigger.severity_pattern)
            .bind(&trigger.instance_pattern)
            .bind(&trigger.job_pattern)
            .bind(to_json_string(&trigger.label_matchers))
            .bind(to_json_string(&trigger.annotation_matchers))
            .bind(trigger.min_duration_seconds)
            .bind(trigger.min_occurrences)
            .bind(trigger.cooldown_seconds)
            .bind(trigger.last_triggered_at)
            .bind(trigger.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Atomically stamps `last_triggered_at`, guarding the trigger's
    /// cooldown window against two alerts racing the same match.
    pub async fn mark_trigger_fired(
        &self,
        trigger_id: &str,
        fired_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE runbook_triggers SET last_triggered_at = ?1 WHERE id = ?2")
            .bind(fired_at)
            .bind(trigger_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiops_types::TargetOs;

    fn sample_runbook(id: &str, name: &str) -> Runbook {
        Runbook {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            tags: vec![],
            target_os: TargetOs::Any,
            enabled: true,
            auto_execute: false,
            approval_required: true,
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
    async fn duplicate_runbook_name_is_rejected() {
        let store = Store::in_memory().await;
        store.create_runbook(&sample_runbook("a", "restart-nginx")).await.unwrap();
        let err = store
            .create_runbook(&sample_runbook("b", "restart-nginx"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn updating_runbook_bumps_version() {
        let store = Store::in_memory().await;
        store.create_runbook(&sample_runbook("a", "restart-nginx")).await.unwrap();
        let current = store.get_runbook("a").await.unwrap();
        let updated = store.update_runbook(&current).await.unwrap();
        assert_eq!(updated.version, 2);
    }

    #[tokio::test]
    async fn replacing_steps_is_transactional_and_ordered() {
        let store = Store::in_memory().await;
        store.create_runbook(&sample_runbook("a", "restart-nginx")).await.unwrap();

        let steps = vec![
            RunbookStep {
                runbook_id: "a".to_string(),
                step_order: 1,
                name: "check".to_string(),
                step_type: aiops_types::StepType::Command,
                timeout_seconds: 30,
                continue_on_fail: false,
                retry_count: 0,
                retry_delay_seconds: 5,
                expected_exit_code: 0,
                expected_output_pattern: None,
                output_variable: None,
                output_extract_pattern: None,
                requires_elevation: false,
                working_directory: None,
                environment: Default::default(),
                rollback_command_linux: None,
                rollback_command_windows: None,
                command_linux: Some("systemctl status nginx".to_string()),
                command_windows: None,
                step_target_os: TargetOs::Linux,
                api_method: None,
                api_endpoint: None,
                api_headers: Default::default(),
                api_body: None,
                api_body_type: None,
                api_query_params: Default::default(),
                api_expected_status_codes: vec![],
                api_response_extract: Default::default(),
                api_follow_redirects: true,
                api_retry_on_status_codes: vec![],
                api_credential_profile_id: None,
            },
        ];

        store.replace_runbook_steps("a", &steps).await.unwrap();
        let loaded = store.list_runbook_steps("a").await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "check");
    }
}
