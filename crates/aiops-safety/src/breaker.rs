use chrono::{DateTime, Utc};

use aiops_persistence::models::CircuitBreaker;
use aiops_types::CircuitState;

/// Whether an execution attempt may proceed against this breaker right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    /// Allowed as the single in-flight half-open probe; caller must release
    /// it (via `record_success`/`record_failure`) when the attempt finishes.
    AllowAsProbe,
    Reject,
}

/// Implements the `closed / open / half_open` gate from spec.md §4.6. Does
/// not mutate `breaker`; callers persist whatever follow-up state change
/// `record_success`/`record_failure` produces.
pub fn gate_decision(breaker: &CircuitBreaker) -> GateDecision {
    match breaker.state {
        CircuitState::Closed => GateDecision::Allow,
        CircuitState::Open => GateDecision::Reject,
        CircuitState::HalfOpen => {
            if breaker.half_open_probe_in_flight {
                GateDecision::Reject
            } else {
                GateDecision::AllowAsProbe
            }
        }
    }
}

/// Moves a due `open` breaker into `half_open` (spec.md §4.6: `open ->
/// half_open` after `open_duration_minutes`). Called by the scheduler sweep
/// against breakers `list_breakers_due_for_half_open` already filtered to.
pub fn enter_half_open(breaker: &mut CircuitBreaker, now: DateTime<Utc>) {
    breaker.state = CircuitState::HalfOpen;
    breaker.half_open_at = Some(now);
    breaker.success_count = 0;
    breaker.half_open_probe_in_flight = false;
}

/// Records a failed execution against the breaker, applying the
/// `closed -> open` and `half_open -> open` transitions.
pub fn record_failure(breaker: &mut CircuitBreaker, now: DateTime<Utc>) {
    breaker.half_open_probe_in_flight = false;
    match breaker.state {
        CircuitState::Closed => {
            breaker.failure_count += 1;
            if breaker.failure_count >= breaker.failure_threshold {
                breaker.state = CircuitState::Open;
                breaker.opened_at = Some(now);
                breaker.failure_count = 0;
            }
        }
        CircuitState::HalfOpen => {
            breaker.state = CircuitState::Open;
            breaker.opened_at = Some(now);
            breaker.success_count = 0;
            breaker.failure_count = 0;
        }
        CircuitState::Open => {}
    }
}

/// Records a successful execution, applying `half_open -> closed` once
/// `success_threshold` consecutive successes have landed. `manually_opened`
/// blocks the transition back to `closed` until an operator clears it.
pub fn record_success(breaker: &mut CircuitBreaker, _now: DateTime<Utc>) {
    breaker.half_open_probe_in_flight = false;
    match breaker.state {
        CircuitState::Closed => {
            breaker.failure_count = 0;
        }
        CircuitState::HalfOpen => {
            breaker.success_count += 1;
            if breaker.success_count >= breaker.success_threshold && !breaker.manually_opened {
                breaker.state = CircuitState::Closed;
                breaker.success_count = 0;
                breaker.failure_count = 0;
                breaker.opened_at = None;
                breaker.half_open_at = None;
            }
        }
        CircuitState::Open => {}
    }
}

/// Administrative override: forces the breaker open and marks it so it
/// cannot auto-close until `clear_manual_override` runs.
pub fn manually_open(breaker: &mut CircuitBreaker, now: DateTime<Utc>) {
    breaker.state = CircuitState::Open;
    breaker.opened_at = Some(now);
    breaker.manually_opened = true;
}

pub fn clear_manual_override(breaker: &mut CircuitBreaker) {
    breaker.manually_opened = false;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::closed(aiops_types::BreakerScope::Runbook, "rb-1")
    }

    #[test]
    fn closed_breaker_opens_after_threshold_failures() {
        let mut b = breaker();
        let now = Utc::now();
        for _ in 0..b.failure_threshold - 1 {
            record_failure(&mut b, now);
            assert_eq!(b.state, CircuitState::Closed);
        }
        record_failure(&mut b, now);
        assert_eq!(b.state, CircuitState::Open);
    }

    #[test]
    fn open_breaker_rejects_until_half_open() {
        let mut b = breaker();
        b.state = CircuitState::Open;
        assert_eq!(gate_decision(&b), GateDecision::Reject);
        enter_half_open(&mut b, Utc::now());
        assert_eq!(gate_decision(&b), GateDecision::AllowAsProbe);
    }

    #[test]
    fn only_one_half_open_probe_in_flight() {
        let mut b = breaker();
        enter_half_open(&mut b, Utc::now());
        b.half_open_probe_in_flight = true;
        assert_eq!(gate_decision(&b), GateDecision::Reject);
    }

    #[test]
    fn half_open_closes_after_success_threshold() {
        let mut b = breaker();
        enter_half_open(&mut b, Utc::now());
        for _ in 0..b.success_threshold - 1 {
            record_success(&mut b, Utc::now());
            assert_eq!(b.state, CircuitState::HalfOpen);
        }
        record_success(&mut b, Utc::now());
        assert_eq!(b.state, CircuitState::Closed);
    }

    #[test]
    fn manually_opened_breaker_never_auto_closes() {
        let mut b = breaker();
        manually_open(&mut b, Utc::now());
        enter_half_open(&mut b, Utc::now());
        for _ in 0..10 {
            record_success(&mut b, Utc::now());
        }
        assert_eq!(b.state, CircuitState::HalfOpen);
        clear_manual_override(&mut b);
        record_success(&mut b, Utc::now());
        assert_eq!(b.state, CircuitState::Closed);
    }

    #[test]
    fn any_failure_in_half_open_reopens() {
        let mut b = breaker();
        enter_half_open(&mut b, Utc::now());
        record_success(&mut b, Utc::now());
        record_failure(&mut b, Utc::now());
        assert_eq!(b.state, CircuitState::Open);
    }
}
