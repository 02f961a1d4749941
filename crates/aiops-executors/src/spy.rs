use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use aiops_persistence::models::ServerCredential;

use crate::executor::{CommandResult, Executor, ExecutorError, Session};

#[derive(Debug, Clone)]
pub struct RecordedInvocation {
    pub hostname: String,
    pub command: String,
    pub elevate: bool,
}

/// Test double recording every `run` invocation, for asserting orchestrator
/// behavior (dry-run short-circuits, retry counts, rollback ordering)
/// without a real target host.
#[derive(Clone, Default)]
pub struct SpyExecutor {
    invocations: Arc<Mutex<Vec<RecordedInvocation>>>,
    scripted: Arc<Mutex<Vec<CommandResult>>>,
}

impl SpyExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues results `run` will return in order; once exhausted, `run`
    /// returns a default `exit_code = 0` success.
    pub fn push_result(&self, result: CommandResult) {
        self.scripted.lock().unwrap().push(result);
    }

    pub fn invocations(&self) -> Vec<RecordedInvocation> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executor for SpyExecutor {
    async fn connect(&self, _server: &ServerCredential) -> Result<Box<dyn Session>, ExecutorError> {
        Ok(Box::new(SpySession {
            hostname: _server.hostname.clone(),
            invocations: self.invocations.clone(),
            scripted: self.scripted.clone(),
        }))
    }
}

struct SpySession {
    hostname: String,
    invocations: Arc<Mutex<Vec<RecordedInvocation>>>,
    scripted: Arc<Mutex<Vec<CommandResult>>>,
}

#[async_trait]
impl Session for SpySession {
    async fn run(
        &mut self,
        command: &str,
        _timeout: Duration,
        elevate: bool,
    ) -> Result<CommandResult, ExecutorError> {
        self.invocations.lock().unwrap().push(RecordedInvocation {
            hostname: self.hostname.clone(),
            command: command.to_string(),
            elevate,
        });

        let scripted = self.scripted.lock().unwrap().pop();
        Ok(scripted.unwrap_or(CommandResult {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 1,
        }))
    }

    async fn close(&mut self) -> Result<(), ExecutorError> {
        Ok(())
    }
}
