//! Alert analysis from spec.md §6: `Analyze(alert_dict) -> {root_cause,
//! impact, recommendations}`. Analysis failures are non-fatal — callers
//! log them and leave the alert's `analyzed` flag false rather than
//! blocking the intake pipeline.

mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use aiops_persistence::models::{Alert, AlertAnalysis};

pub use openai::OpenAiCompatibleAnalyzer;

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("request to analysis provider failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("analysis provider returned an error: {0}")]
    Provider(String),
    #[error("could not parse the analysis response: {0}")]
    MalformedResponse(String),
}

/// Fields of an alert relevant to analysis, decoupled from the storage
/// model so analyzers don't need to depend on the full `Alert` shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSummary {
    pub name: String,
    pub severity: String,
    pub instance: String,
    pub job: String,
    pub labels: std::collections::BTreeMap<String, String>,
    pub annotations: std::collections::BTreeMap<String, String>,
}

impl From<&Alert> for AlertSummary {
    fn from(alert: &Alert) -> Self {
        Self {
            name: alert.name.clone(),
            severity: alert.severity.clone(),
            instance: alert.instance.clone(),
            job: alert.job.clone(),
            labels: alert.labels.clone(),
            annotations: alert.annotations.clone(),
        }
    }
}

/// A root-cause analyzer for a fired alert. Implementations are expected
/// to be cheap to clone and safe to share across the worker pool.
#[async_trait]
pub trait LlmAnalyzer: Send + Sync {
    async fn analyze(&self, alert: &AlertSummary) -> Result<AlertAnalysis, AnalysisError>;
}

/// Used when no LLM endpoint is configured. Always fails, so callers take
/// the same non-fatal "leave `analyzed` false" path they would for a real
/// provider outage.
#[derive(Debug, Clone, Default)]
pub struct NullAnalyzer;

#[async_trait]
impl LlmAnalyzer for NullAnalyzer {
    async fn analyze(&self, _alert: &AlertSummary) -> Result<AlertAnalysis, AnalysisError> {
        Err(AnalysisError::Provider("no analysis provider configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_analyzer_always_errors() {
        let analyzer = NullAnalyzer;
        let summary = AlertSummary {
            name: "HighDiskUsage".to_string(),
            severity: "critical".to_string(),
            instance: "web-01".to_string(),
            job: "node".to_string(),
            labels: Default::default(),
            annotations: Default::default(),
        };
        let err = analyzer.analyze(&summary).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Provider(_)));
    }
}
