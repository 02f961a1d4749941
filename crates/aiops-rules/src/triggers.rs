use chrono::{DateTime, Utc};

use aiops_persistence::models::{Alert, RunbookTrigger};
use aiops_persistence::{Store, StoreError};

use crate::matching::pattern_matches;

/// Pure predicate half of `Match(alert)` (spec.md §4.5): everything except
/// the `last_triggered_at` write, so it can be unit tested without a store.
pub fn trigger_accepts(trigger: &RunbookTrigger, alert: &Alert, now: DateTime<Utc>) -> bool {
    if !trigger.enabled {
        return false;
    }
    let patterns_match = pattern_matches(&trigger.alert_name_pattern, &alert.name)
        && pattern_matches(&trigger.severity_pattern, &alert.severity)
        && pattern_matches(&trigger.instance_pattern, &alert.instance)
        && pattern_matches(&trigger.job_pattern, &alert.job)
        && trigger.label_matchers.iter().all(|(key, pattern)| {
            pattern_matches(pattern, alert.labels.get(key).map(String::as_str).unwrap_or(""))
        })
        && trigger.annotation_matchers.iter().all(|(key, pattern)| {
            pattern_matches(
                pattern,
                alert.annotations.get(key).map(String::as_str).unwrap_or(""),
            )
        });
    if !patterns_match {
        return false;
    }

    if trigger.min_occurrences > 1 && alert.occurrence_count < trigger.min_occurrences {
        return false;
    }

    if trigger.min_duration_seconds > 0 {
        let elapsed = now - alert.starts_at;
        if elapsed < chrono::Duration::seconds(trigger.min_duration_seconds) {
            return false;
        }
    }

    if let Some(last) = trigger.last_triggered_at {
        if now - last < chrono::Duration::seconds(trigger.cooldown_seconds) {
            return false;
        }
    }

    true
}

/// Full `Match(alert) -> Runbook | None`: loads enabled triggers (already
/// ordered by priority ascending with `created_at` tiebreak by the store),
/// returns the first accepting one and atomically stamps `last_triggered_at`.
pub async fn match_alert(
    store: &Store,
    alert: &Alert,
    now: DateTime<Utc>,
) -> Result<Option<RunbookTrigger>, StoreError> {
    let triggers = store.list_enabled_triggers().await?;
    for trigger in triggers {
        if trigger_accepts(&trigger, alert, now) {
            store.mark_trigger_fired(&trigger.id, now).await?;
            return Ok(Some(trigger));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn base_trigger() -> RunbookTrigger {
        RunbookTrigger {
            id: "t1".to_string(),
            runbook_id: "rb1".to_string(),
            priority: 1,
            enabled: true,
            alert_name_pattern: "*".to_string(),
            severity_pattern: "*".to_string(),
            instance_pattern: "*".to_string(),
            job_pattern: "*".to_string(),
            label_matchers: BTreeMap::new(),
            annotation_matchers: BTreeMap::new(),
            min_duration_seconds: 0,
            min_occurrences: 1,
            cooldown_seconds: 0,
            last_triggered_at: None,
            created_at: Utc::now(),
        }
    }

    fn base_alert() -> Alert {
        Alert {
            id: "a1".to_string(),
            fingerprint: "fp1".to_string(),
            name: "DiskFull".to_string(),
            severity: "critical".to_string(),
            instance: "db-01".to_string(),
            job: "postgres".to_string(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            status: aiops_types::AlertStatus::Firing,
            starts_at: Utc::now(),
            ends_at: None,
            received_at: Utc::now(),
            raw_payload: serde_json::Value::Null,
            occurrence_count: 1,
            analyzed: false,
            analysis: None,
        }
    }

    #[test]
    fn rejects_below_min_occurrences() {
        let mut trigger = base_trigger();
        trigger.min_occurrences = 3;
        let alert = base_alert();
        assert!(!trigger_accepts(&trigger, &alert, Utc::now()));
    }

    #[test]
    fn rejects_before_min_duration_elapsed() {
        let mut trigger = base_trigger();
        trigger.min_duration_seconds = 300;
        let alert = base_alert();
        assert!(!trigger_accepts(&trigger, &alert, Utc::now()));
        assert!(trigger_accepts(&trigger, &alert, Utc::now() + chrono::Duration::seconds(301)));
    }

    #[test]
    fn rejects_within_cooldown_of_last_fire() {
        let mut trigger = base_trigger();
        trigger.cooldown_seconds = 600;
        trigger.last_triggered_at = Some(Utc::now());
        let alert = base_alert();
        assert!(!trigger_accepts(&trigger, &alert, Utc::now() + chrono::Duration::seconds(60)));
        assert!(trigger_accepts(&trigger, &alert, Utc::now() + chrono::Duration::seconds(601)));
    }

    #[test]
    fn label_matchers_must_all_pass() {
        let mut trigger = base_trigger();
        trigger.label_matchers.insert("team".to_string(), "payments".to_string());
        let mut alert = base_alert();
        assert!(!trigger_accepts(&trigger, &alert, Utc::now()));
        alert.labels.insert("team".to_string(), "payments".to_string());
        assert!(trigger_accepts(&trigger, &alert, Utc::now()));
    }
}
