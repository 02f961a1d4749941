use chrono::{DateTime, Utc};

/// spec.md §4.6 step 4: a `pending_approval` execution that has sat longer
/// than `approval_timeout_minutes` since it entered that state is due for
/// the scheduler's timeout sweep.
pub fn is_overdue(
    entered_pending_approval_at: DateTime<Utc>,
    approval_timeout_minutes: i64,
    now: DateTime<Utc>,
) -> bool {
    now - entered_pending_approval_at >= chrono::Duration::minutes(approval_timeout_minutes)
}

/// Whether `role` is one of the runbook's configured `approval_roles`. An
/// empty `approval_roles` list means any authenticated approver may act.
pub fn role_can_approve(approval_roles: &[String], role: &str) -> bool {
    approval_roles.is_empty() || approval_roles.iter().any(|r| r == role)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overdue_after_timeout_elapses() {
        let entered = Utc::now() - chrono::Duration::minutes(61);
        assert!(is_overdue(entered, 60, Utc::now()));
    }

    #[test]
    fn not_overdue_before_timeout() {
        let entered = Utc::now() - chrono::Duration::minutes(30);
        assert!(!is_overdue(entered, 60, Utc::now()));
    }

    #[test]
    fn empty_role_list_allows_any_approver() {
        assert!(role_can_approve(&[], "sre-oncall"));
    }

    #[test]
    fn nonmatching_role_is_rejected() {
        let roles = vec!["sre-lead".to_string()];
        assert!(!role_can_approve(&roles, "sre-oncall"));
    }
}
