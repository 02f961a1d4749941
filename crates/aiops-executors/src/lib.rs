pub mod executor;
pub mod http_api;
pub mod spy;
pub mod ssh;
pub mod winrm;

pub use executor::{run_scoped, CommandResult, Executor, ExecutorError, Session};
pub use http_api::ApiExecutor;
pub use spy::{RecordedInvocation, SpyExecutor};
pub use ssh::SshExecutor;
pub use winrm::WinrmExecutor;
