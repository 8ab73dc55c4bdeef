// Transition table and button derivation - pure functions over the closed enums

use super::types::{ButtonConfig, ButtonIcon, OperationAction, OperationState, StyleIntent};

/// Next state for `(state, action)`, or `None` when the pair is not in the table.
///
/// The retry cap is not part of the table; `OperationStateMachine` checks it before
/// committing a `Retry`.
pub fn next_state(state: OperationState, action: OperationAction) -> Option<OperationState> {
    use OperationAction as A;
    use OperationState as S;

    match (state, action) {
        (_, A::Reset) => Some(S::Idle),

        (S::Idle, A::StartSave) => Some(S::Saving),

        (S::Saving, A::SaveSuccess) => Some(S::Saved),
        (S::Saving, A::SaveFailure) => Some(S::SaveError),

        (S::Saved, A::StartApprove) => Some(S::Approving),
        (S::Saved, A::StartRefresh) => Some(S::Refreshing),

        (S::SaveError, A::Retry) => Some(S::Saving),

        (S::Approving, A::ApproveSuccess) => Some(S::Approved),
        (S::Approving, A::ApproveFailure) => Some(S::ApproveError),

        (S::ApproveError, A::Retry) => Some(S::Approving),

        (S::Refreshing, A::RefreshSuccess) => Some(S::Saved),
        (S::Refreshing, A::RefreshFailure) => Some(S::RefreshError),

        (S::RefreshError, A::Retry) => Some(S::Refreshing),

        _ => None,
    }
}

pub fn can_transition(state: OperationState, action: OperationAction) -> bool {
    next_state(state, action).is_some()
}

/// Success/failure actions that settle an in-progress state
pub fn settlement_actions(state: OperationState) -> Option<(OperationAction, OperationAction)> {
    match state {
        OperationState::Saving => Some((OperationAction::SaveSuccess, OperationAction::SaveFailure)),
        OperationState::Refreshing => Some((
            OperationAction::RefreshSuccess,
            OperationAction::RefreshFailure,
        )),
        OperationState::Approving => Some((
            OperationAction::ApproveSuccess,
            OperationAction::ApproveFailure,
        )),
        _ => None,
    }
}

pub fn button_config(state: OperationState, retries: u32, max_retries: u32) -> ButtonConfig {
    let can_retry = retries < max_retries;

    match state {
        OperationState::Idle => button("Save Plan", true, false, StyleIntent::Primary, ButtonIcon::Save),
        OperationState::Saving => {
            button("Saving…", false, true, StyleIntent::Progress, ButtonIcon::Spinner)
        }
        OperationState::SaveError => button(
            &format!("Retry Save ({retries}/{max_retries})"),
            can_retry,
            false,
            StyleIntent::Danger,
            ButtonIcon::Retry,
        ),
        OperationState::Saved => {
            button("Approve Plan", true, false, StyleIntent::Success, ButtonIcon::Check)
        }
        OperationState::Refreshing => button(
            "Checking status…",
            false,
            true,
            StyleIntent::Progress,
            ButtonIcon::Spinner,
        ),
        OperationState::RefreshError => button(
            &format!("Retry Refresh ({retries}/{max_retries})"),
            can_retry,
            false,
            StyleIntent::Danger,
            ButtonIcon::Retry,
        ),
        OperationState::Approving => {
            button("Approving…", false, true, StyleIntent::Progress, ButtonIcon::Spinner)
        }
        OperationState::ApproveError => button(
            &format!("Retry Approve ({retries}/{max_retries})"),
            can_retry,
            false,
            StyleIntent::Danger,
            ButtonIcon::Retry,
        ),
        OperationState::Approved => {
            button("Approved", false, false, StyleIntent::Muted, ButtonIcon::Check)
        }
    }
}

fn button(label: &str, enabled: bool, loading: bool, style: StyleIntent, icon: ButtonIcon) -> ButtonConfig {
    ButtonConfig {
        label: label.to_string(),
        enabled,
        loading,
        style,
        icon,
    }
}
