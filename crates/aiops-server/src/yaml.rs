use serde::{Deserialize, Serialize};

use aiops_persistence::models::{Runbook, RunbookStep, RunbookTrigger};

use crate::error::ApiError;

/// The on-disk/IaC shape a runbook round-trips through (spec.md §3's
/// "runbooks as YAML" non-goal carve-out: import/export is in scope, a
/// templating layer over the YAML itself is not).
#[derive(Debug, Serialize, Deserialize)]
struct RunbookDocument {
    #[serde(flatten)]
    runbook: Runbook,
    #[serde(default)]
    steps: Vec<RunbookStep>,
    #[serde(default)]
    triggers: Vec<RunbookTrigger>,
}

pub fn export(runbook: &Runbook, steps: &[RunbookStep], triggers: &[RunbookTrigger]) -> String {
    let doc = RunbookDocument { runbook: runbook.clone(), steps: steps.to_vec(), triggers: triggers.to_vec() };
    serde_yaml::to_string(&doc).expect("runbook document always serializes")
}

pub fn import(yaml: &str) -> Result<(Runbook, Vec<RunbookStep>, Vec<RunbookTrigger>), ApiError> {
    let doc: RunbookDocument =
        serde_yaml::from_str(yaml).map_err(|err| ApiError::validation(format!("invalid runbook YAML: {err}")))?;
    Ok((doc.runbook, doc.steps, doc.triggers))
}
