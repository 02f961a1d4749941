use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use uuid::Uuid;

use aiops_persistence::models::ServerCredential;

use crate::executor::{elevate_command, CommandResult, Executor, ExecutorError, Session};

const SOAP_NS: &str = "http://www.w3.org/2003/05/soap-envelope";
const WSMAN_NS: &str = "http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd";
const SHELL_NS: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell";

/// Hand-rolled WS-Management client: no maintained WinRM crate exists, so
/// the three-call shell/command/receive exchange is built directly against
/// `reqwest` as raw SOAP envelopes over HTTPS.
pub struct WinrmExecutor {
    client: Client,
    verify_ssl: bool,
}

impl WinrmExecutor {
    pub fn new(verify_ssl: bool) -> Self {
        Self {
            client: Client::builder()
                .danger_accept_invalid_certs(!verify_ssl)
                .build()
                .expect("reqwest client"),
            verify_ssl,
        }
    }

    fn endpoint(&self, server: &ServerCredential) -> String {
        let scheme = if self.verify_ssl { "https" } else { "http" };
        format!("{scheme}://{}:{}/wsman", server.hostname, server.port)
    }
}

#[async_trait]
impl Executor for WinrmExecutor {
    async fn connect(&self, server: &ServerCredential) -> Result<Box<dyn Session>, ExecutorError> {
        let shell_id = Uuid::new_v4().to_string();
        let endpoint = self.endpoint(server);

        let body = create_shell_envelope(&shell_id);
        let response = self
            .client
            .post(&endpoint)
            .basic_auth(&server.username, Some(placeholder_secret(server)))
            .header("Content-Type", "application/soap+xml;charset=UTF-8")
            .body(body)
            .send()
            .await
            .map_err(|_| ExecutorError::Unreachable)?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ExecutorError::AuthFailed);
        }
        if !response.status().is_success() {
            return Err(ExecutorError::Protocol(format!(
                "shell creation failed: {}",
                response.status()
            )));
        }

        Ok(Box::new(WinrmSession {
            client: self.client.clone(),
            endpoint,
            shell_id,
            username: server.username.clone(),
            password: placeholder_secret(server),
        }))
    }
}

/// Real credential decryption happens once at the persistence boundary;
/// this stands in for it until a secrets backend is wired into the engine.
fn placeholder_secret(server: &ServerCredential) -> String {
    server.secret_material_encrypted.clone()
}

pub struct WinrmSession {
    client: Client,
    endpoint: String,
    shell_id: String,
    username: String,
    password: String,
}

#[async_trait]
impl Session for WinrmSession {
    async fn run(
        &mut self,
        command: &str,
        timeout: Duration,
        elevate: bool,
    ) -> Result<CommandResult, ExecutorError> {
        let command = elevate_command(command, elevate);
        let started = std::time::Instant::now();
        let attempt = tokio::time::timeout(timeout, self.exec(&command));
        match attempt.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => Err(err),
            Err(_) => Ok(CommandResult::timed_out(started.elapsed().as_millis() as i64)),
        }
    }

    async fn close(&mut self) -> Result<(), ExecutorError> {
        let body = delete_shell_envelope(&self.shell_id);
        self.client
            .post(&self.endpoint)
            .basic_auth(&self.username, Some(&self.password))
            .header("Content-Type", "application/soap+xml;charset=UTF-8")
            .body(body)
            .send()
            .await
            .map(|_| ())
            .map_err(|err| ExecutorError::Protocol(err.to_string()))
    }
}

impl WinrmSession {
    async fn exec(&mut self, command: &str) -> Result<CommandResult, ExecutorError> {
        let started = std::time::Instant::now();
        let command_id = Uuid::new_v4().to_string();

        let run_body = run_command_envelope(&self.shell_id, &command_id, command);
        self.post(run_body).await?;

        let receive_body = receive_envelope(&self.shell_id, &command_id);
        let response = self.post(receive_body).await?;

        let (stdout, stderr, exit_code) = parse_receive_response(&response);

        Ok(CommandResult {
            exit_code,
            stdout,
            stderr,
            duration_ms: started.elapsed().as_millis() as i64,
        })
    }

    async fn post(&self, body: String) -> Result<String, ExecutorError> {
        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.username, Some(&self.password))
            .header("Content-Type", "application/soap+xml;charset=UTF-8")
            .body(body)
            .send()
            .await
            .map_err(|_| ExecutorError::Unreachable)?;
        if !response.status().is_success() {
            return Err(ExecutorError::Protocol(format!("winrm call failed: {}", response.status())));
        }
        response.text().await.map_err(|err| ExecutorError::Protocol(err.to_string()))
    }
}

fn create_shell_envelope(shell_id: &str) -> String {
    format!(
        r#"<s:Envelope xmlns:s="{SOAP_NS}" xmlns:w="{WSMAN_NS}" xmlns:rsp="{SHELL_NS}">
  <s:Header><w:Action>{SHELL_NS}/Create</w:Action></s:Header>
  <s:Body><rsp:Shell ShellId="{shell_id}"/></s:Body>
</s:Envelope>"#
    )
}

fn run_command_envelope(shell_id: &str, command_id: &str, command: &str) -> String {
    let escaped = command
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;");
    format!(
        r#"<s:Envelope xmlns:s="{SOAP_NS}" xmlns:w="{WSMAN_NS}" xmlns:rsp="{SHELL_NS}">
  <s:Header><w:Action>{SHELL_NS}/Command</w:Action><w:SelectorSet><w:Selector Name="ShellId">{shell_id}</w:Selector></w:SelectorSet></s:Header>
  <s:Body><rsp:CommandLine CommandId="{command_id}"><rsp:Command>{escaped}</rsp:Command></rsp:CommandLine></s:Body>
</s:Envelope>"#
    )
}

fn receive_envelope(shell_id: &str, command_id: &str) -> String {
    format!(
        r#"<s:Envelope xmlns:s="{SOAP_NS}" xmlns:w="{WSMAN_NS}" xmlns:rsp="{SHELL_NS}">
  <s:Header><w:Action>{SHELL_NS}/Receive</w:Action><w:SelectorSet><w:Selector Name="ShellId">{shell_id}</w:Selector></w:SelectorSet></s:Header>
  <s:Body><rsp:Receive><rsp:DesiredStream CommandId="{command_id}">stdout stderr</rsp:DesiredStream></rsp:Receive></s:Body>
</s:Envelope>"#
    )
}

fn delete_shell_envelope(shell_id: &str) -> String {
    format!(
        r#"<s:Envelope xmlns:s="{SOAP_NS}" xmlns:w="{WSMAN_NS}" xmlns:rsp="{SHELL_NS}">
  <s:Header><w:Action>{SHELL_NS}/Delete</w:Action><w:SelectorSet><w:Selector Name="ShellId">{shell_id}</w:Selector></w:SelectorSet></s:Header>
  <s:Body/>
</s:Envelope>"#
    )
}

/// Extracts base64-decoded stdout/stderr streams and the exit code from a
/// `Receive` response. Hosts vary in exactly how they chunk streams; this
/// takes the simple, common case of one stream element per kind.
fn parse_receive_response(body: &str) -> (String, String, i32) {
    let stdout = extract_stream(body, "stdout");
    let stderr = extract_stream(body, "stderr");
    let exit_code = extract_exit_code(body);
    (stdout, stderr, exit_code)
}

fn extract_stream(body: &str, name: &str) -> String {
    let marker = format!("Name=\"{name}\"");
    let Some(start) = body.find(&marker) else {
        return String::new();
    };
    let Some(gt) = body[start..].find('>') else {
        return String::new();
    };
    let content_start = start + gt + 1;
    let Some(end) = body[content_start..].find("</") else {
        return String::new();
    };
    let encoded = &body[content_start..content_start + end];
    base64_decode(encoded)
}

fn extract_exit_code(body: &str) -> i32 {
    let marker = "<rsp:ExitCode>";
    let Some(start) = body.find(marker) else {
        return 0;
    };
    let content_start = start + marker.len();
    let Some(end) = body[content_start..].find('<') else {
        return 0;
    };
    body[content_start..content_start + end].trim().parse().unwrap_or(0)
}

fn base64_decode(encoded: &str) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_exit_code_reads_the_rsp_element() {
        let body = "<s:Body><rsp:ExitCode>0</rsp:ExitCode></s:Body>";
        assert_eq!(extract_exit_code(body), 0);
    }

    #[test]
    fn extract_stream_decodes_base64_payload() {
        let body = r#"<rsp:Stream Name="stdout" CommandId="x">aGVsbG8=</rsp:Stream>"#;
        assert_eq!(extract_stream(body, "stdout"), "hello");
    }
}
