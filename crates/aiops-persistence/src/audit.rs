use sqlx::Row;
use uuid::Uuid;

use crate::models::AuditEvent;
use crate::{parse_json_map, to_json_string, Store, StoreError};

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> AuditEvent {
    AuditEvent {
        id: row.get("id"),
        ts: row.get("ts"),
        actor: row.get("actor"),
        action: row.get("action"),
        resource_type: row.get("resource_type"),
        resource_id: row.get("resource_id"),
        details: parse_json_map(row.get::<String, _>("details_json").as_str()),
        ip: row.get("ip"),
    }
}

impl Store {
    /// Appends an audit entry. Per spec.md §4.10 audit is append-only: there
    /// is deliberately no update/delete here.
    pub async fn append_audit_event(&self, event: &AuditEvent) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO audit_events (id, ts, actor, action, resource_type, resource_id, details_json, ip)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
        )
        .bind(&event.id)
        .bind(event.ts)
        .bind(&event.actor)
        .bind(&event.action)
        .bind(&event.resource_type)
        .bind(&event.resource_id)
        .bind(to_json_string(&event.details))
        .bind(&event.ip)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub fn new_audit_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub async fn list_audit_events_for_resource(
        &self,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Vec<AuditEvent>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM audit_events WHERE resource_type = ?1 AND resource_id = ?2 ORDER BY ts DESC",
        )
        .bind(resource_type)
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_event).collect())
    }

    pub async fn list_recent_audit_events(&self, limit: i64) -> Result<Vec<AuditEvent>, StoreError> {
        let rows = sqlx::query("SELECT * FROM audit_events ORDER BY ts DESC LIMIT ?1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_event).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    #[tokio::test]
    async fn audit_events_are_scoped_to_their_resource() {
        let store = Store::in_memory().await;
        store
            .append_audit_event(&AuditEvent {
                id: Store::new_audit_id(),
                ts: Utc::now(),
                actor: "operator".to_string(),
                action: "execution.approve".to_string(),
                resource_type: "execution".to_string(),
                resource_id: "e1".to_string(),
                details: json!({}),
                ip: None,
            })
            .await
            .unwrap();
        store
            .append_audit_event(&AuditEvent {
                id: Store::new_audit_id(),
                ts: Utc::now(),
                actor: "operator".to_string(),
                action: "runbook.update".to_string(),
                resource_type: "runbook".to_string(),
                resource_id: "rb1".to_string(),
                details: json!({}),
                ip: None,
            })
            .await
            .unwrap();

        let events = store.list_audit_events_for_resource("execution", "e1").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, "execution.approve");
    }
}
