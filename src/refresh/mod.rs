// Unified Refresh Coordinator - one execution per logical key, cooldown between starts
//
// Callers asking for the same key while it is in flight share a single pending result.
// Per key, executions never overlap; across keys there is no concurrency cap.

pub mod coordinator;
pub mod errors;
pub mod executor;
pub mod types;


pub use coordinator::{RefreshCoordinator, RefreshListener};
pub use errors::RefreshError;
pub use executor::{CancellationFlag, ExecutorRegistry, FnExecutor, RefreshContext, RefreshExecutor};
pub use types::{
    RefreshEvent, RefreshFailure, RefreshKind, RefreshOperation, RefreshState, RefreshStats,
};
