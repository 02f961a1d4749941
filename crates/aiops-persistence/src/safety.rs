use chrono::{DateTime, Utc};
use sqlx::Row;

use aiops_types::{BreakerScope, CircuitState};

use crate::models::{BlackoutWindow, CircuitBreaker};
use crate::{col_to_enum, enum_to_col, parse_json_map, to_json_string, Store, StoreError};

fn row_to_breaker(row: &sqlx::sqlite::SqliteRow) -> CircuitBreaker {
    CircuitBreaker {
        scope: col_to_enum(&row.get::<String, _>("scope")),
        scope_id: row.get("scope_id"),
        state: col_to_enum(&row.get::<String, _>("state")),
        failure_count: row.get("failure_count"),
        success_count: row.get("success_count"),
        failure_threshold: row.get("failure_threshold"),
        success_threshold: row.get("success_threshold"),
        failure_window_minutes: row.get("failure_window_minutes"),
        open_duration_minutes: row.get("open_duration_minutes"),
        opened_at: row.get("opened_at"),
        half_open_at: row.get("half_open_at"),
        manually_opened: row.get::<i64, _>("manually_opened") != 0,
        half_open_probe_in_flight: row.get::<i64, _>("half_open_probe_in_flight") != 0,
    }
}

fn row_to_blackout(row: &sqlx::sqlite::SqliteRow) -> BlackoutWindow {
    BlackoutWindow {
        id: row.get("id"),
        name: row.get("name"),
        enabled: row.get::<i64, _>("enabled") != 0,
        recurrence: col_to_enum(&row.get::<String, _>("recurrence")),
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        daily_start: row.get("daily_start"),
        daily_end: row.get("daily_end"),
        days_of_week: parse_json_map(row.get::<String, _>("days_of_week_json").as_str()),
        days_of_month: parse_json_map(row.get::<String, _>("days_of_month_json").as_str()),
        timezone: row.get("timezone"),
        applies_to: col_to_enum(&row.get::<String, _>("applies_to")),
        applies_to_runbook_ids: parse_json_map(
            row.get::<String, _>("applies_to_runbook_ids_json").as_str(),
        ),
    }
}

impl Store {
    /// Fetches the breaker row for `(scope, scope_id)`, creating one closed
    /// at the spec's default thresholds on first use.
    pub async fn get_or_create_breaker(
        &self,
        scope: BreakerScope,
        scope_id: &str,
    ) -> Result<CircuitBreaker, StoreError> {
        if let Some(row) = sqlx::query("SELECT * FROM circuit_breakers WHERE scope = ?1 AND scope_id = ?2")
            .bind(enum_to_col(scope))
            .bind(scope_id)
            .fetch_optional(&self.pool)
            .await?
        {
            return Ok(row_to_breaker(&row));
        }

        let breaker = CircuitBreaker::closed(scope, scope_id);
        self.save_breaker(&breaker).await?;
        Ok(breaker)
    }

    pub async fn save_breaker(&self, breaker: &CircuitBreaker) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO circuit_breakers (scope, scope_id, state, failure_count, success_count, failure_threshold, success_threshold, failure_window_minutes, open_duration_minutes, opened_at, half_open_at, manually_opened, half_open_probe_in_flight)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)
             ON CONFLICT(scope, scope_id) DO UPDATE SET
                state = excluded.state,
                failure_count = excluded.failure_count,
                success_count = excluded.success_count,
                failure_threshold = excluded.failure_threshold,
                success_threshold = excluded.success_threshold,
                failure_window_minutes = excluded.failure_window_minutes,
                open_duration_minutes = excluded.open_duration_minutes,
                opened_at = excluded.opened_at,
                half_open_at = excluded.half_open_at,
                manually_opened = excluded.manually_opened,
                half_open_probe_in_flight = excluded.half_open_probe_in_flight",
        )
        .bind(enum_to_col(breaker.scope))
        .bind(&breaker.scope_id)
        .bind(enum_to_col(breaker.state))
        .bind(breaker.failure_count)
        .bind(breaker.success_count)
        .bind(breaker.failure_threshold)
        .bind(breaker.success_threshold)
        .bind(breaker.failure_window_minutes)
        .bind(breaker.open_duration_minutes)
        .bind(breaker.opened_at)
        .bind(breaker.half_open_at)
        .bind(breaker.manually_opened as i64)
        .bind(breaker.half_open_probe_in_flight as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_breakers(&self) -> Result<Vec<CircuitBreaker>, StoreError> {
        let rows = sqlx::query("SELECT * FROM circuit_breakers ORDER BY scope, scope_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_breaker).collect())
    }

    /// Breakers currently `open` whose `open_duration_minutes` has elapsed,
    /// for the scheduler's half-open sweep (spec.md §4.6).
    pub async fn list_breakers_due_for_half_open(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<CircuitBreaker>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM circuit_breakers WHERE state = 'open' AND manually_opened = 0 AND opened_at IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(row_to_breaker)
            .filter(|b| {
                b.opened_at
                    .map(|opened| now - opened >= chrono::Duration::minutes(b.open_duration_minutes))
                    .unwrap_or(false)
            })
            .collect())
    }

    pub async fn create_blackout(&self, window: &BlackoutWindow) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO blackout_windows (id, name, enabled, recurrence, start_time, end_time, daily_start, daily_end, days_of_week_json, days_of_month_json, timezone, applies_to, applies_to_runbook_ids_json)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)",
        )
        .bind(&window.id)
        .bind(&window.name)
        .bind(window.enabled as i64)
        .bind(enum_to_col(window.recurrence))
        .bind(window.start_time)
        .bind(window.end_time)
        .bind(&window.daily_start)
        .bind(&window.daily_end)
        .bind(to_json_string(&window.days_of_week))
        .bind(to_json_string(&window.days_of_month))
        .bind(&window.timezone)
        .bind(enum_to_col(window.applies_to))
        .bind(to_json_string(&window.applies_to_runbook_ids))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_enabled_blackouts(&self) -> Result<Vec<BlackoutWindow>, StoreError> {
        let rows = sqlx::query("SELECT * FROM blackout_windows WHERE enabled = 1")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_blackout).collect())
    }
}
