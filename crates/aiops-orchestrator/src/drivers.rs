use std::sync::Arc;

use aiops_executors::{ApiExecutor, Executor};
use aiops_types::Protocol;

/// The three drivers an execution may dispatch to, wired up once by the
/// process (`engine`/`aiops-server`) and shared across every worker.
#[derive(Clone)]
pub struct ExecutorSet {
    pub ssh: Arc<dyn Executor>,
    pub winrm: Arc<dyn Executor>,
    pub api: Arc<ApiExecutor>,
}

impl ExecutorSet {
    /// The `Session`-based driver for a command step, selected by the
    /// target server's protocol. `Protocol::Api` servers have no command
    /// driver; API steps go through `self.api` directly instead.
    pub fn command_driver(&self, protocol: Protocol) -> Option<&Arc<dyn Executor>> {
        match protocol {
            Protocol::Ssh => Some(&self.ssh),
            Protocol::Winrm => Some(&self.winrm),
            Protocol::Api => None,
        }
    }
}
