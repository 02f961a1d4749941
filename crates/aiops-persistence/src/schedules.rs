use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::models::Schedule;
use crate::{col_to_enum, enum_to_col, parse_json_map, to_json_string, Store, StoreError};

fn row_to_schedule(row: &sqlx::sqlite::SqliteRow) -> Schedule {
    Schedule {
        id: row.get("id"),
        runbook_id: row.get("runbook_id"),
        schedule_type: col_to_enum(&row.get::<String, _>("schedule_type")),
        cron_expression: row.get("cron_expression"),
        interval_minutes: row.get("interval_minutes"),
        run_at: row.get("run_at"),
        enabled: row.get::<i64, _>("enabled") != 0,
        misfire_policy: parse_json_map(row.get::<String, _>("misfire_policy_json").as_str()),
        max_instances: row.get("max_instances"),
        next_fire_at: row.get("next_fire_at"),
        last_fired_at: row.get("last_fired_at"),
    }
}

impl Store {
    pub async fn create_schedule(&self, schedule: &Schedule) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO schedules (id, runbook_id, schedule_type, cron_expression, interval_minutes, run_at, enabled, misfire_policy_json, max_instances, next_fire_at, last_fired_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
        )
        .bind(&schedule.id)
        .bind(&schedule.runbook_id)
        .bind(enum_to_col(schedule.schedule_type.clone()))
        .bind(&schedule.cron_expression)
        .bind(schedule.interval_minutes)
        .bind(schedule.run_at)
        .bind(schedule.enabled as i64)
        .bind(to_json_string(&schedule.misfire_policy))
        .bind(schedule.max_instances)
        .bind(schedule.next_fire_at)
        .bind(schedule.last_fired_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_schedule(&self, id: &str) -> Result<Schedule, StoreError> {
        let row = sqlx::query("SELECT * FROM schedules WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("schedule {id}")))?;
        Ok(row_to_schedule(&row))
    }

    pub async fn list_enabled_schedules(&self) -> Result<Vec<Schedule>, StoreError> {
        let rows = sqlx::query("SELECT * FROM schedules WHERE enabled = 1")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_schedule).collect())
    }

    /// Schedules whose `next_fire_at` is due, for the scheduler tick
    /// (spec.md §4.9). Ordered so the oldest-due schedule is claimed first.
    pub async fn list_due_schedules(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM schedules WHERE enabled = 1 AND next_fire_at IS NOT NULL AND next_fire_at <= ?1 ORDER BY next_fire_at ASC",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_schedule).collect())
    }

    pub async fn record_schedule_fired(
        &self,
        id: &str,
        fired_at: DateTime<Utc>,
        next_fire_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE schedules SET last_fired_at = ?1, next_fire_at = ?2 WHERE id = ?3")
            .bind(fired_at)
            .bind(next_fire_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Full-field update for the control-plane `PUT /api/schedules/{id}`
    /// (spec.md §6); unlike `record_schedule_fired`, this is operator-driven
    /// and does not touch `last_fired_at`.
    pub async fn update_schedule(&self, schedule: &Schedule) -> Result<Schedule, StoreError> {
        let result = sqlx::query(
            "UPDATE schedules SET runbook_id = ?1, schedule_type = ?2, cron_expression = ?3, interval_minutes = ?4, run_at = ?5, enabled = ?6, misfire_policy_json = ?7, max_instances = ?8, next_fire_at = ?9 WHERE id = ?10",
        )
        .bind(&schedule.runbook_id)
        .bind(enum_to_col(schedule.schedule_type.clone()))
        .bind(&schedule.cron_expression)
        .bind(schedule.interval_minutes)
        .bind(schedule.run_at)
        .bind(schedule.enabled as i64)
        .bind(to_json_string(&schedule.misfire_policy))
        .bind(schedule.max_instances)
        .bind(schedule.next_fire_at)
        .bind(&schedule.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("schedule {}", schedule.id)));
        }
        self.get_schedule(&schedule.id).await
    }

    pub async fn list_schedules(&self) -> Result<Vec<Schedule>, StoreError> {
        let rows = sqlx::query("SELECT * FROM schedules ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_schedule).collect())
    }

    pub async fn delete_schedule(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM schedules WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("schedule {id}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiops_types::{MisfirePolicy, ScheduleType};

    fn sample(id: &str, next_fire_at: Option<DateTime<Utc>>) -> Schedule {
        Schedule {
            id: id.to_string(),
            runbook_id: "rb-1".to_string(),
            schedule_type: ScheduleType::Cron,
            cron_expression: Some("*/5 * * * *".to_string()),
            interval_minutes: None,
            run_at: None,
            enabled: true,
            misfire_policy: MisfirePolicy::RunOnce,
            max_instances: 1,
            next_fire_at,
            last_fired_at: None,
        }
    }

    #[tokio::test]
    async fn due_schedules_exclude_future_next_fire_at() {
        let store = Store::in_memory().await;
        let now = Utc::now();
        store.create_schedule(&sample("past", Some(now - chrono::Duration::minutes(1)))).await.unwrap();
        store.create_schedule(&sample("future", Some(now + chrono::Duration::hours(1)))).await.unwrap();

        let due = store.list_due_schedules(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, "past");
    }
}
