// Core types for the operation (save → approve) state machine

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Lifecycle states of one user-initiated action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    /// Nothing in progress, plan not yet saved
    Idle,
    /// Save executor is running
    Saving,
    /// Save executor failed
    SaveError,
    /// Plan saved and ready for approval
    Saved,
    /// Status refresh executor is running
    Refreshing,
    /// Status refresh failed
    RefreshError,
    /// Approve executor is running
    Approving,
    /// Approve executor failed
    ApproveError,
    /// Terminal until reset
    Approved,
}

impl OperationState {
    pub const ALL: [OperationState; 9] = [
        OperationState::Idle,
        OperationState::Saving,
        OperationState::SaveError,
        OperationState::Saved,
        OperationState::Refreshing,
        OperationState::RefreshError,
        OperationState::Approving,
        OperationState::ApproveError,
        OperationState::Approved,
    ];

    pub fn is_error(self) -> bool {
        matches!(
            self,
            OperationState::SaveError | OperationState::RefreshError | OperationState::ApproveError
        )
    }

    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            OperationState::Saving | OperationState::Refreshing | OperationState::Approving
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OperationState::Approved)
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OperationState::Idle => "idle",
            OperationState::Saving => "saving",
            OperationState::SaveError => "save_error",
            OperationState::Saved => "saved",
            OperationState::Refreshing => "refreshing",
            OperationState::RefreshError => "refresh_error",
            OperationState::Approving => "approving",
            OperationState::ApproveError => "approve_error",
            OperationState::Approved => "approved",
        };
        write!(f, "{label}")
    }
}

/// Events accepted by `OperationStateMachine::dispatch`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationAction {
    StartSave,
    SaveSuccess,
    SaveFailure,
    StartRefresh,
    RefreshSuccess,
    RefreshFailure,
    StartApprove,
    ApproveSuccess,
    ApproveFailure,
    Retry,
    Reset,
}

impl OperationAction {
    pub const ALL: [OperationAction; 11] = [
        OperationAction::StartSave,
        OperationAction::SaveSuccess,
        OperationAction::SaveFailure,
        OperationAction::StartRefresh,
        OperationAction::RefreshSuccess,
        OperationAction::RefreshFailure,
        OperationAction::StartApprove,
        OperationAction::ApproveSuccess,
        OperationAction::ApproveFailure,
        OperationAction::Retry,
        OperationAction::Reset,
    ];

    pub fn is_failure(self) -> bool {
        matches!(
            self,
            OperationAction::SaveFailure
                | OperationAction::RefreshFailure
                | OperationAction::ApproveFailure
        )
    }

    pub fn is_success(self) -> bool {
        matches!(
            self,
            OperationAction::SaveSuccess
                | OperationAction::RefreshSuccess
                | OperationAction::ApproveSuccess
        )
    }
}

impl fmt::Display for OperationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OperationAction::StartSave => "START_SAVE",
            OperationAction::SaveSuccess => "SAVE_SUCCESS",
            OperationAction::SaveFailure => "SAVE_FAILURE",
            OperationAction::StartRefresh => "START_REFRESH",
            OperationAction::RefreshSuccess => "REFRESH_SUCCESS",
            OperationAction::RefreshFailure => "REFRESH_FAILURE",
            OperationAction::StartApprove => "START_APPROVE",
            OperationAction::ApproveSuccess => "APPROVE_SUCCESS",
            OperationAction::ApproveFailure => "APPROVE_FAILURE",
            OperationAction::Retry => "RETRY",
            OperationAction::Reset => "RESET",
        };
        write!(f, "{label}")
    }
}

/// Visual intent of the button; the UI maps it onto concrete classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StyleIntent {
    Primary,
    Muted,
    Progress,
    Success,
    Danger,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonIcon {
    Save,
    Spinner,
    Check,
    Retry,
}

/// Presentation-ready button description for one state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonConfig {
    pub label: String,
    pub enabled: bool,
    pub loading: bool,
    pub style: StyleIntent,
    pub icon: ButtonIcon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryInfo {
    pub count: u32,
    pub max_retries: u32,
    pub can_retry: bool,
}

/// Why a dispatch was refused. `dispatch` folds this into `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionRejection {
    #[error("no transition for {action} from {state}")]
    Illegal {
        state: OperationState,
        action: OperationAction,
    },
    #[error("retry limit reached in {state} ({retries}/{max_retries})")]
    RetryLimitExceeded {
        state: OperationState,
        retries: u32,
        max_retries: u32,
    },
    /// A settlement arrived after `reset()` started a new cycle
    #[error("settlement from generation {expected} superseded by generation {current}")]
    Superseded { expected: u64, current: u64 },
}
