use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::{Client, Method};

use aiops_persistence::models::{RunbookStep, ServerCredential};
use aiops_types::{ApiBodyType, ApiMethod};

use crate::executor::{CommandResult, ExecutorError};

fn to_reqwest_method(method: ApiMethod) -> Method {
    match method {
        ApiMethod::Get => Method::GET,
        ApiMethod::Post => Method::POST,
        ApiMethod::Put => Method::PUT,
        ApiMethod::Delete => Method::DELETE,
        ApiMethod::Patch => Method::PATCH,
        ApiMethod::Head => Method::HEAD,
        ApiMethod::Options => Method::OPTIONS,
    }
}

/// The HTTP-API driver from spec.md §4.2: no persistent `Session`, just a
/// request builder and a retry loop around `reqwest`.
pub struct ApiExecutor {
    client: Client,
}

impl ApiExecutor {
    pub fn new(verify_ssl: bool) -> Self {
        Self {
            client: Client::builder()
                .danger_accept_invalid_certs(!verify_ssl)
                .build()
                .expect("reqwest client"),
        }
    }

    fn build_url(&self, server: &ServerCredential, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            let base = server.api_base_url.clone().unwrap_or_default();
            format!("{}/{}", base.trim_end_matches('/'), endpoint.trim_start_matches('/'))
        }
    }

    pub async fn call(
        &self,
        server: &ServerCredential,
        step: &RunbookStep,
        rendered_endpoint: &str,
        rendered_headers: &BTreeMap<String, String>,
        rendered_query: &BTreeMap<String, String>,
        rendered_body: Option<&str>,
        timeout: Duration,
    ) -> Result<CommandResult, ExecutorError> {
        let method = to_reqwest_method(step.api_method.unwrap_or(ApiMethod::Get));
        let url = self.build_url(server, rendered_endpoint);

        let expected: Vec<i64> = if step.api_expected_status_codes.is_empty() {
            vec![200, 201, 202, 204]
        } else {
            step.api_expected_status_codes.clone()
        };
        let retry_on = &step.api_retry_on_status_codes;

        let mut attempt = 0i64;
        let started = std::time::Instant::now();
        loop {
            let result = tokio::time::timeout(
                timeout,
                self.single_call(&method, &url, rendered_headers, rendered_query, rendered_body, step),
            )
            .await;

            let outcome = match result {
                Ok(inner) => inner,
                Err(_) => {
                    return Ok(CommandResult::timed_out(started.elapsed().as_millis() as i64));
                }
            };

            match outcome {
                Ok((status, body)) => {
                    let should_retry = retry_on.contains(&(status as i64)) && attempt < step.retry_count;
                    if should_retry {
                        attempt += 1;
                        tokio::time::sleep(Duration::from_secs(step.retry_delay_seconds as u64)).await;
                        continue;
                    }
                    let exit_code = if expected.contains(&(status as i64)) { 0 } else { 1 };
                    return Ok(CommandResult {
                        exit_code,
                        stdout: body,
                        stderr: format!("HTTP {status}"),
                        duration_ms: started.elapsed().as_millis() as i64,
                    });
                }
                Err(err) if attempt < step.retry_count => {
                    attempt += 1;
                    tokio::time::sleep(Duration::from_secs(step.retry_delay_seconds as u64)).await;
                    let _ = err;
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn single_call(
        &self,
        method: &Method,
        url: &str,
        headers: &BTreeMap<String, String>,
        query: &BTreeMap<String, String>,
        body: Option<&str>,
        step: &RunbookStep,
    ) -> Result<(u16, String), ExecutorError> {
        let mut request = self.client.request(method.clone(), url).query(query);
        for (key, value) in headers {
            request = request.header(key, value);
        }
        if let Some(body) = body {
            request = match step.api_body_type.unwrap_or(ApiBodyType::Raw) {
                ApiBodyType::Json => request
                    .header("Content-Type", "application/json")
                    .body(body.to_string()),
                ApiBodyType::Form => request
                    .header("Content-Type", "application/x-www-form-urlencoded")
                    .body(body.to_string()),
                ApiBodyType::Raw | ApiBodyType::Template => request.body(body.to_string()),
            };
        }

        let response = request.send().await.map_err(|_| ExecutorError::Unreachable)?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|err| ExecutorError::Protocol(err.to_string()))?;
        Ok((status, text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_spec_api_methods_to_reqwest_methods() {
        assert_eq!(to_reqwest_method(ApiMethod::Patch), Method::PATCH);
        assert_eq!(to_reqwest_method(ApiMethod::Delete), Method::DELETE);
    }
}
