use serde_json::{json, Value};

use aiops_persistence::models::{Alert, AutoAnalyzeRule};
use aiops_types::RuleAction;

use crate::json_logic;
use crate::matching::pattern_matches;

pub struct RuleDecision {
    pub action: RuleAction,
    pub matched_rule_id: Option<String>,
}

/// Projects the fields a rule or trigger can match against into the flat
/// dictionary `json_logic` rules are evaluated over.
pub fn alert_to_dict(alert: &Alert) -> Value {
    json!({
        "name": alert.name,
        "severity": alert.severity,
        "instance": alert.instance,
        "job": alert.job,
        "labels": alert.labels,
        "annotations": alert.annotations,
        "occurrence_count": alert.occurrence_count,
    })
}

/// `Evaluate(alert, rules)` from spec.md §4.4. `rules` must already be
/// filtered to `enabled=true` and sorted ascending by `priority`.
pub fn evaluate(alert: &Alert, rules: &[AutoAnalyzeRule]) -> RuleDecision {
    let dict = alert_to_dict(alert);
    for rule in rules {
        let matched = if let Some(logic) = &rule.json_logic {
            json_logic::evaluate(logic, &dict)
        } else {
            pattern_matches(&rule.alert_name_pattern, &alert.name)
                && pattern_matches(&rule.severity_pattern, &alert.severity)
                && pattern_matches(&rule.instance_pattern, &alert.instance)
                && pattern_matches(&rule.job_pattern, &alert.job)
        };
        if matched {
            return RuleDecision {
                action: rule.action,
                matched_rule_id: Some(rule.id.clone()),
            };
        }
    }
    RuleDecision {
        action: RuleAction::Manual,
        matched_rule_id: None,
    }
}
