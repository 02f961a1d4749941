use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use aiops_persistence::models::ServerCredential;

#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: i64,
}

impl CommandResult {
    pub fn timed_out(duration_ms: i64) -> Self {
        Self {
            exit_code: -1,
            stdout: String::new(),
            stderr: "timeout".to_string(),
            duration_ms,
        }
    }
}

/// Failure kinds shared by every driver (spec.md §4.2).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExecutorError {
    #[error("authentication failed")]
    AuthFailed,
    #[error("host unreachable")]
    Unreachable,
    #[error("timed out")]
    Timeout,
    #[error("command exited non-zero")]
    NonZeroExit,
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// A live transport to one target host. `run` may be called more than once
/// per session by the orchestrator's retry loop; `close` is always called
/// exactly once by `run_scoped`, even if `run` fails or times out.
#[async_trait]
pub trait Session: Send + Sync {
    async fn run(
        &mut self,
        command: &str,
        timeout: Duration,
        elevate: bool,
    ) -> Result<CommandResult, ExecutorError>;

    async fn close(&mut self) -> Result<(), ExecutorError>;
}

#[async_trait]
pub trait Executor: Send + Sync {
    async fn connect(&self, server: &ServerCredential) -> Result<Box<dyn Session>, ExecutorError>;
}

/// Scoped-resource wrapper guaranteeing `Session::close` runs on every exit
/// path out of `run`, success or failure alike.
pub async fn run_scoped(
    executor: &dyn Executor,
    server: &ServerCredential,
    command: &str,
    timeout: Duration,
    elevate: bool,
) -> Result<CommandResult, ExecutorError> {
    let mut session = executor.connect(server).await?;
    let result = session.run(command, timeout, elevate).await;
    if let Err(err) = session.close().await {
        tracing::warn!(error = %err, server = %server.hostname, "session close failed");
    }
    result
}

pub(crate) fn elevate_command(command: &str, elevate: bool) -> String {
    if elevate {
        format!("sudo -n {command}")
    } else {
        command.to_string()
    }
}
