use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use aiops_persistence::models::{AlertAnalysis, AlertRecommendation};

use crate::{AlertSummary, AnalysisError, LlmAnalyzer};

/// Analyzes alerts through any chat-completions endpoint that speaks the
/// OpenAI wire format — the local-proxy, OpenRouter, and self-hosted
/// vLLM/Ollama deployments this is most often pointed at all do.
pub struct OpenAiCompatibleAnalyzer {
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleAnalyzer {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    fn prompt(alert: &AlertSummary) -> String {
        format!(
            "An alert fired:\nname: {}\nseverity: {}\ninstance: {}\njob: {}\nlabels: {:?}\nannotations: {:?}\n\n\
             Respond with a single JSON object with keys \"root_cause\" (string), \"impact\" (string), \
             and \"recommendations\" (array of objects with \"title\", \"commands\" (array of strings), \
             and \"rationale\"). Respond with only the JSON object, no surrounding text.",
            alert.name, alert.severity, alert.instance, alert.job, alert.labels, alert.annotations,
        )
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[async_trait]
impl LlmAnalyzer for OpenAiCompatibleAnalyzer {
    async fn analyze(&self, alert: &AlertSummary) -> Result<AlertAnalysis, AnalysisError> {
        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .json(&json!({
                "model": self.model,
                "messages": [{"role": "user", "content": Self::prompt(alert)}],
                "stream": false,
            }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AnalysisError::Provider(truncate_for_error(&body)));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&body)
            .map_err(|e| AnalysisError::MalformedResponse(format!("invalid chat-completion envelope: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AnalysisError::MalformedResponse("response had no choices".to_string()))?
            .message
            .content;

        parse_analysis(&content)
    }
}

/// The model is asked to return bare JSON but often wraps it in a
/// markdown fence anyway; strip that before parsing.
fn parse_analysis(content: &str) -> Result<AlertAnalysis, AnalysisError> {
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    #[derive(Deserialize)]
    struct RawAnalysis {
        root_cause: String,
        impact: String,
        #[serde(default)]
        recommendations: Vec<AlertRecommendation>,
    }

    let raw: RawAnalysis = serde_json::from_str(trimmed)
        .map_err(|e| AnalysisError::MalformedResponse(format!("{e}: {trimmed}")))?;
    Ok(AlertAnalysis {
        root_cause: raw.root_cause,
        impact: raw.impact,
        recommendations: raw.recommendations,
    })
}

fn truncate_for_error(body: &str) -> String {
    const MAX: usize = 500;
    if body.len() > MAX {
        format!("{}...", &body[..MAX])
    } else {
        body.to_string()
    }
}
