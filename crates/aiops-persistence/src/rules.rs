use sqlx::Row;

use aiops_types::RuleAction;

use crate::models::AutoAnalyzeRule;
use crate::{col_to_enum, enum_to_col, to_json_string, Store, StoreError};

fn row_to_rule(row: &sqlx::sqlite::SqliteRow) -> AutoAnalyzeRule {
    let json_logic: Option<String> = row.get("json_logic");
    AutoAnalyzeRule {
        id: row.get("id"),
        name: row.get("name"),
        priority: row.get("priority"),
        enabled: row.get::<i64, _>("enabled") != 0,
        alert_name_pattern: row.get("alert_name_pattern"),
        severity_pattern: row.get("severity_pattern"),
        instance_pattern: row.get("instance_pattern"),
        job_pattern: row.get("job_pattern"),
        json_logic: json_logic.and_then(|raw| serde_json::from_str(&raw).ok()),
        action: col_to_enum(&row.get::<String, _>("action")),
    }
}

impl Store {
    pub async fn create_rule(&self, rule: &AutoAnalyzeRule) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO auto_analyze_rules (id, name, priority, enabled, alert_name_pattern, severity_pattern, instance_pattern, job_pattern, json_logic, action)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(&rule.id)
        .bind(&rule.name)
        .bind(rule.priority)
        .bind(rule.enabled as i64)
        .bind(&rule.alert_name_pattern)
        .bind(&rule.severity_pattern)
        .bind(&rule.instance_pattern)
        .bind(&rule.job_pattern)
        .bind(rule.json_logic.as_ref().map(to_json_string))
        .bind(enum_to_col(rule.action))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_rule(&self, id: &str) -> Result<AutoAnalyzeRule, StoreError> {
        let row = sqlx::query("SELECT * FROM auto_analyze_rules WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("rule {id}")))?;
        Ok(row_to_rule(&row))
    }

    pub async fn update_rule(&self, rule: &AutoAnalyzeRule) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE auto_analyze_rules SET name = ?1, priority = ?2, enabled = ?3, alert_name_pattern = ?4, severity_pattern = ?5, instance_pattern = ?6, job_pattern = ?7, json_logic = ?8, action = ?9 WHERE id = ?10",
        )
        .bind(&rule.name)
        .bind(rule.priority)
        .bind(rule.enabled as i64)
        .bind(&rule.alert_name_pattern)
        .bind(&rule.severity_pattern)
        .bind(&rule.instance_pattern)
        .bind(&rule.job_pattern)
        .bind(rule.json_logic.as_ref().map(to_json_string))
        .bind(enum_to_col(rule.action))
        .bind(&rule.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("rule {}", rule.id)));
        }
        Ok(())
    }

    pub async fn delete_rule(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM auto_analyze_rules WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("rule {id}")));
        }
        Ok(())
    }

    /// Enabled rules ordered by priority ascending (spec.md §4.4: lower
    /// priority number wins, first match takes the alert).
    pub async fn list_enabled_rules(&self) -> Result<Vec<AutoAnalyzeRule>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM auto_analyze_rules WHERE enabled = 1 ORDER BY priority ASC, rowid ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_rule).collect())
    }

    pub async fn list_rules(&self) -> Result<Vec<AutoAnalyzeRule>, StoreError> {
        let rows = sqlx::query("SELECT * FROM auto_analyze_rules ORDER BY priority ASC, rowid ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_rule).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, priority: i64) -> AutoAnalyzeRule {
        AutoAnalyzeRule {
            id: id.to_string(),
            name: format!("rule-{id}"),
            priority,
            enabled: true,
            alert_name_pattern: "*".to_string(),
            severity_pattern: "*".to_string(),
            instance_pattern: "*".to_string(),
            job_pattern: "*".to_string(),
            json_logic: None,
            action: RuleAction::AutoAnalyze,
        }
    }

    #[tokio::test]
    async fn enabled_rules_are_ordered_by_priority_ascending() {
        let store = Store::in_memory().await;
        store.create_rule(&sample("low", 1)).await.unwrap();
        store.create_rule(&sample("high", 10)).await.unwrap();
        store.create_rule(&sample("mid", 5)).await.unwrap();

        let rules = store.list_enabled_rules().await.unwrap();
        let ids: Vec<_> = rules.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["low", "mid", "high"]);
    }

    #[tokio::test]
    async fn disabled_rules_are_excluded_from_matching_list() {
        let store = Store::in_memory().await;
        let mut disabled = sample("off", 99);
        disabled.enabled = false;
        store.create_rule(&disabled).await.unwrap();

        let rules = store.list_enabled_rules().await.unwrap();
        assert!(rules.is_empty());
    }
}
