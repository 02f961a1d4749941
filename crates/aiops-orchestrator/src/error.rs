use thiserror::Error;

use aiops_executors::ExecutorError;
use aiops_persistence::StoreError;
use aiops_template::TemplateError;
use aiops_types::ErrorKind;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("could not resolve a target server")]
    ServerUnresolved,
    #[error("template resolution failed: {0}")]
    Template(#[from] TemplateError),
    #[error("executor failure: {0}")]
    Executor(#[from] ExecutorError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::ServerUnresolved => ErrorKind::ValidationError,
            OrchestratorError::Template(_) => ErrorKind::TemplateResolution,
            OrchestratorError::Executor(_) => ErrorKind::ExecutorFailure,
            OrchestratorError::Store(err) => err.kind(),
        }
    }
}
