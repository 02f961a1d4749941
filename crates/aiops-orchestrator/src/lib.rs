//! The per-execution state machine from spec.md §4.7: claims a pending
//! execution, resolves its target server, renders and runs each step
//! against the right executor driver, rolls back on failure, and reports
//! the outcome to the safety gates.

pub mod context;
pub mod drivers;
pub mod error;
pub mod execution;
pub mod step;
pub mod target;

pub use drivers::ExecutorSet;
pub use error::OrchestratorError;
pub use execution::run_execution;
