use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;
use uuid::Uuid;

use aiops_types::AlertStatus;

use crate::models::{Alert, AlertAnalysis};
use crate::{parse_json_map, to_json_string, Store, StoreError};

fn status_str(status: AlertStatus) -> &'static str {
    match status {
        AlertStatus::Firing => "firing",
        AlertStatus::Resolved => "resolved",
    }
}

fn parse_status(raw: &str) -> AlertStatus {
    match raw {
        "resolved" => AlertStatus::Resolved,
        _ => AlertStatus::Firing,
    }
}

fn row_to_alert(row: &sqlx::sqlite::SqliteRow) -> Alert {
    let analysis_json: Option<String> = row.get("analysis_json");
    Alert {
        id: row.get("id"),
        fingerprint: row.get("fingerprint"),
        name: row.get("name"),
        severity: row.get("severity"),
        instance: row.get("instance"),
        job: row.get("job"),
        labels: parse_json_map(row.get::<String, _>("labels_json").as_str()),
        annotations: parse_json_map(row.get::<String, _>("annotations_json").as_str()),
        status: parse_status(row.get::<String, _>("status").as_str()),
        starts_at: row.get::<DateTime<Utc>, _>("starts_at"),
        ends_at: row.get("ends_at"),
        received_at: row.get::<DateTime<Utc>, _>("received_at"),
        raw_payload: serde_json::from_str(row.get::<String, _>("raw_payload").as_str())
            .unwrap_or(Value::Null),
        occurrence_count: row.get("occurrence_count"),
        analyzed: row.get::<i64, _>("analyzed") != 0,
        analysis: analysis_json.and_then(|raw| serde_json::from_str::<AlertAnalysis>(&raw).ok()),
    }
}

pub struct IngestedAlert {
    pub alert: Alert,
    pub is_new: bool,
}

impl Store {
    /// Upserts an alert by fingerprint (spec.md §4.8): creates on first
    /// sighting, otherwise updates `status`/`ends_at` and increments the
    /// occurrence counter. Runs inside one transaction so a concurrent
    /// delivery of the same fingerprint can never race past the counter.
    pub async fn upsert_alert_by_fingerprint(
        &self,
        fingerprint: &str,
        name: &str,
        severity: &str,
        instance: &str,
        job: &str,
        labels: &std::collections::BTreeMap<String, String>,
        annotations: &std::collections::BTreeMap<String, String>,
        status: AlertStatus,
        starts_at: DateTime<Utc>,
        ends_at: Option<DateTime<Utc>>,
        raw_payload: &Value,
    ) -> Result<IngestedAlert, StoreError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query("SELECT id FROM alerts WHERE fingerprint = ?1")
            .bind(fingerprint)
            .fetch_optional(&mut *tx)
            .await?;

        let now = Utc::now();
        let (id, is_new) = if let Some(row) = existing {
            let id: String = row.get("id");
            sqlx::query(
                "UPDATE alerts SET status = ?1, ends_at = ?2, occurrence_count = occurrence_count + 1 WHERE fingerprint = ?3",
            )
            .bind(status_str(status))
            .bind(ends_at)
            .bind(fingerprint)
            .execute(&mut *tx)
            .await?;
            (id, false)
        } else {
            let id = Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO alerts (id, fingerprint, name, severity, instance, job, labels_json, annotations_json, status, starts_at, ends_at, received_at, raw_payload, occurrence_count, analyzed, analysis_json)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 1, 0, NULL)",
            )
            .bind(&id)
            .bind(fingerprint)
            .bind(name)
            .bind(severity)
            .bind(instance)
            .bind(job)
            .bind(to_json_string(labels))
            .bind(to_json_string(annotations))
            .bind(status_str(status))
            .bind(starts_at)
            .bind(ends_at)
            .bind(now)
            .bind(serde_json::to_string(raw_payload).unwrap_or_else(|_| "null".to_string()))
            .execute(&mut *tx)
            .await?;
            (id, true)
        };

        let row = sqlx::query("SELECT * FROM alerts WHERE id = ?1")
            .bind(&id)
            .fetch_one(&mut *tx)
            .await?;
        let alert = row_to_alert(&row);

        tx.commit().await?;

        Ok(IngestedAlert { alert, is_new })
    }

    pub async fn get_alert(&self, id: &str) -> Result<Alert, StoreError> {
        let row = sqlx::query("SELECT * FROM alerts WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("alert {id}")))?;
        Ok(row_to_alert(&row))
    }

    pub async fn get_alert_by_fingerprint(&self, fingerprint: &str) -> Result<Option<Alert>, StoreError> {
        let row = sqlx::query("SELECT * FROM alerts WHERE fingerprint = ?1")
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| row_to_alert(&r)))
    }

    pub async fn list_alerts(&self, limit: i64) -> Result<Vec<Alert>, StoreError> {
        let rows = sqlx::query("SELECT * FROM alerts ORDER BY received_at DESC LIMIT ?1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_alert).collect())
    }

    pub async fn record_alert_analysis(
        &self,
        alert_id: &str,
        analysis: Option<&AlertAnalysis>,
    ) -> Result<(), StoreError> {
        let analyzed = analysis.is_some();
        let analysis_json = analysis.map(to_json_string);
        sqlx::query("UPDATE alerts SET analyzed = ?1, analysis_json = ?2 WHERE id = ?3")
            .bind(analyzed as i64)
            .bind(analysis_json)
            .bind(alert_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Occurrence count for a fingerprint, used by the trigger matcher's
    /// `min_occurrences` check (spec.md §4.5).
    pub async fn occurrence_count(&self, fingerprint: &str) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT occurrence_count FROM alerts WHERE fingerprint = ?1")
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("occurrence_count")).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplicate_fingerprint_deliveries_increment_occurrence_not_rows() {
        let store = Store::in_memory().await;
        let labels = std::collections::BTreeMap::new();
        let annotations = std::collections::BTreeMap::new();

        for _ in 0..5 {
            store
                .upsert_alert_by_fingerprint(
                    "fp-1",
                    "NginxDown",
                    "critical",
                    "t-01",
                    "web",
                    &labels,
                    &annotations,
                    AlertStatus::Firing,
                    Utc::now(),
                    None,
                    &Value::Null,
                )
                .await
                .unwrap();
        }

        let alert = store.get_alert_by_fingerprint("fp-1").await.unwrap().unwrap();
        assert_eq!(alert.occurrence_count, 5);

        let all = store.list_alerts(10).await.unwrap();
        assert_eq!(all.len(), 1);
    }
}
