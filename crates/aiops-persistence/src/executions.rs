use chrono::{DateTime, Utc};
use sqlx::Row;

use aiops_types::{ExecutionStatus, StepStatus};

use crate::models::{RunbookExecution, StepExecution};
use crate::{col_to_enum, enum_to_col, parse_json_map, to_json_string, Store, StoreError};

fn row_to_execution(row: &sqlx::sqlite::SqliteRow) -> RunbookExecution {
    RunbookExecution {
        id: row.get("id"),
        runbook_id: row.get("runbook_id"),
        runbook_version: row.get("runbook_version"),
        server_id: row.get("server_id"),
        alert_id: row.get("alert_id"),
        trigger_id: row.get("trigger_id"),
        status: col_to_enum(&row.get::<String, _>("status")),
        mode: col_to_enum(&row.get::<String, _>("mode")),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        duration_ms: row.get("duration_ms"),
        initiated_by: row.get("initiated_by"),
        approved_by: row.get("approved_by"),
        approved_at: row.get("approved_at"),
        variables: parse_json_map(row.get::<String, _>("variables_json").as_str()),
        extracted_values: parse_json_map(row.get::<String, _>("extracted_values_json").as_str()),
        error_message: row.get("error_message"),
        is_dry_run: row.get::<i64, _>("is_dry_run") != 0,
        created_at: row.get("created_at"),
    }
}

fn row_to_step_execution(row: &sqlx::sqlite::SqliteRow) -> StepExecution {
    StepExecution {
        execution_id: row.get("execution_id"),
        step_order: row.get("step_order"),
        step_name: row.get("step_name"),
        status: col_to_enum(&row.get::<String, _>("status")),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        duration_ms: row.get("duration_ms"),
        exit_code: row.get("exit_code"),
        stdout: row.get("stdout"),
        stderr: row.get("stderr"),
        retry_attempt: row.get("retry_attempt"),
        rollback_performed: row.get::<i64, _>("rollback_performed") != 0,
        error_message: row.get("error_message"),
    }
}

impl Store {
    pub async fn create_execution(&self, execution: &RunbookExecution) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO runbook_executions (id, runbook_id, runbook_version, server_id, alert_id, trigger_id, status, mode, started_at, completed_at, duration_ms, initiated_by, approved_by, approved_at, variables_json, extracted_values_json, error_message, is_dry_run, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)",
        )
        .bind(&execution.id)
        .bind(&execution.runbook_id)
        .bind(execution.runbook_version)
        .bind(&execution.server_id)
        .bind(&execution.alert_id)
        .bind(&execution.trigger_id)
        .bind(enum_to_col(execution.status))
        .bind(enum_to_col(execution.mode))
        .bind(execution.started_at)
        .bind(execution.completed_at)
        .bind(execution.duration_ms)
        .bind(&execution.initiated_by)
        .bind(&execution.approved_by)
        .bind(execution.approved_at)
        .bind(to_json_string(&execution.variables))
        .bind(to_json_string(&execution.extracted_values))
        .bind(&execution.error_message)
        .bind(execution.is_dry_run as i64)
        .bind(execution.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_execution(&self, id: &str) -> Result<RunbookExecution, StoreError> {
        let row = sqlx::query("SELECT * FROM runbook_executions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("execution {id}")))?;
        Ok(row_to_execution(&row))
    }

    pub async fn list_executions(&self, limit: i64) -> Result<Vec<RunbookExecution>, StoreError> {
        let rows = sqlx::query("SELECT * FROM runbook_executions ORDER BY created_at DESC LIMIT ?1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_execution).collect())
    }

    pub async fn list_executions_for_runbook_since(
        &self,
        runbook_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RunbookExecution>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM runbook_executions WHERE runbook_id = ?1 AND started_at >= ?2",
        )
        .bind(runbook_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_execution).collect())
    }

    /// Validates `current.status -> next` against
    /// `ExecutionStatus::can_transition_to` inside the same transaction
    /// that reads `current`, so two racing transitions can't both succeed.
    pub async fn transition_execution_status(
        &self,
        id: &str,
        next: ExecutionStatus,
        patch: ExecutionStatusPatch,
    ) -> Result<RunbookExecution, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status FROM runbook_executions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("execution {id}")))?;
        let current: ExecutionStatus = col_to_enum(&row.get::<String, _>("status"));

        if !current.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                from: format!("{current:?}"),
                to: format!("{next:?}"),
            });
        }

        sqlx::query(
            "UPDATE runbook_executions SET status = ?1, started_at = COALESCE(?2, started_at), completed_at = COALESCE(?3, completed_at), duration_ms = COALESCE(?4, duration_ms), approved_by = COALESCE(?5, approved_by), approved_at = COALESCE(?6, approved_at), error_message = COALESCE(?7, error_message) WHERE id = ?8",
        )
        .bind(enum_to_col(next))
        .bind(patch.started_at)
        .bind(patch.completed_at)
        .bind(patch.duration_ms)
        .bind(&patch.approved_by)
        .bind(patch.approved_at)
        .bind(&patch.error_message)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query("SELECT * FROM runbook_executions WHERE id = ?1")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        let execution = row_to_execution(&row);
        tx.commit().await?;
        Ok(execution)
    }

    pub async fn bind_extracted_value(
        &self,
        execution_id: &str,
        key: &str,
        value: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT extracted_values_json FROM runbook_executions WHERE id = ?1")
            .bind(execution_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("execution {execution_id}")))?;
        let mut map: std::collections::BTreeMap<String, serde_json::Value> =
            crate::parse_json_map(row.get::<String, _>("extracted_values_json").as_str());
        map.insert(key.to_string(), value.clone());
        sqlx::query("UPDATE runbook_executions SET extracted_values_json = ?1 WHERE id = ?2")
            .bind(to_json_string(&map))
            .bind(execution_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn upsert_step_execution(&self, step: &StepExecution) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO step_executions (execution_id, step_order, step_name, status, started_at, completed_at, duration_ms, exit_code, stdout, stderr, retry_attempt, rollback_performed, error_message)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)
             ON CONFLICT(execution_id, step_order) DO UPDATE SET
                status = excluded.status,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                duration_ms = excluded.duration_ms,
                exit_code = excluded.exit_code,
                stdout = excluded.stdout,
                stderr = excluded.stderr,
                retry_attempt = excluded.retry_attempt,
                rollback_performed = excluded.rollback_performed,
                error_message = excluded.error_message",
        )
        .bind(&step.execution_id)
        .bind(step.step_order)
        .bind(&step.step_name)
        .bind(enum_to_col(step.status))
        .bind(step.started_at)
        .bind(step.completed_at)
        .bind(step.duration_ms)
        .bind(step.exit_code)
        .bind(&step.stdout)
        .bind(&step.stderr)
        .bind(step.retry_attempt)
        .bind(step.rollback_performed as i64)
        .bind(&step.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_step_executions(
        &self,
        execution_id: &str,
    ) -> Result<Vec<StepExecution>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM step_executions WHERE execution_id = ?1 ORDER BY step_order ASC",
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_step_execution).collect())
    }
}

#[derive(Default)]
pub struct ExecutionStatusPatch {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiops_types::ExecutionMode;

    fn sample(id: &str, status: ExecutionStatus) -> RunbookExecution {
        RunbookExecution {
            id: id.to_string(),
            runbook_id: "rb-1".to_string(),
            runbook_version: 1,
            server_id: None,
            alert_id: None,
            trigger_id: None,
            status,
            mode: ExecutionMode::Manual,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            initiated_by: Some("operator".to_string()),
            approved_by: None,
            approved_at: None,
            variables: Default::default(),
            extracted_values: Default::default(),
            error_message: None,
            is_dry_run: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn valid_transition_updates_status() {
        let store = Store::in_memory().await;
        store.create_execution(&sample("e1", ExecutionStatus::Pending)).await.unwrap();

        let updated = store
            .transition_execution_status(
                "e1",
                ExecutionStatus::Running,
                ExecutionStatusPatch {
                    started_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn transition_out_of_terminal_state_is_rejected() {
        let store = Store::in_memory().await;
        store.create_execution(&sample("e1", ExecutionStatus::Completed)).await.unwrap();

        let err = store
            .transition_execution_status(
                "e1",
                ExecutionStatus::Running,
                ExecutionStatusPatch::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn extracted_value_binding_merges_without_clobbering() {
        let store = Store::in_memory().await;
        store.create_execution(&sample("e1", ExecutionStatus::Running)).await.unwrap();
        store
            .bind_extracted_value("e1", "disk_pct", &serde_json::json!(87))
            .await
            .unwrap();
        store
            .bind_extracted_value("e1", "service", &serde_json::json!("nginx"))
            .await
            .unwrap();

        let execution = store.get_execution("e1").await.unwrap();
        assert_eq!(execution.extracted_values.len(), 2);
    }
}
