//! Rule evaluation (spec.md §4.4) and trigger matching (§4.5): glob/regex
//! pattern matching, the JsonLogic predicate evaluator, and the logic that
//! picks which runbook (if any) responds to an incoming alert.

pub mod json_logic;
pub mod matching;
pub mod rules;
pub mod triggers;

pub use rules::{alert_to_dict, evaluate, RuleDecision};
pub use triggers::{match_alert, trigger_accepts};
