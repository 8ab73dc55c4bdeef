use std::time::Duration;
use thiserror::Error;

use super::types::RefreshKind;

/// Errors surfaced by `RefreshCoordinator::refresh`.
///
/// Cloneable so one settlement can be handed to every caller sharing an execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    /// Same key started less than its cooldown ago; nothing was executed
    #[error("refresh {key} is cooling down ({remaining:?} remaining)")]
    CooldownRejected { key: String, remaining: Duration },

    /// The executor returned an error (or panicked)
    #[error("refresh {key} failed: {message}")]
    ExecutorFailed { key: String, message: String },

    #[error("no refresh executor registered for {kind}")]
    NoExecutor { kind: RefreshKind },

    /// The execution task went away without reporting a result
    #[error("refresh {key} aborted before settling")]
    Aborted { key: String },
}

impl RefreshError {
    /// Throttled rather than failed
    pub fn is_cooldown(&self) -> bool {
        matches!(self, RefreshError::CooldownRejected { .. })
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            RefreshError::CooldownRejected { key, .. }
            | RefreshError::ExecutorFailed { key, .. }
            | RefreshError::Aborted { key } => Some(key),
            RefreshError::NoExecutor { .. } => None,
        }
    }
}
