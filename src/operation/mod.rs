// Operation State Machine - save → approve → retry lifecycle for one UI action
//
// The transition table and button derivation are pure functions in `transitions`;
// `OperationStateMachine` owns the current state, the retry counter and the listeners.

pub mod state_machine;
pub mod transitions;
pub mod types;

#[cfg(test)]
mod tests;

pub use state_machine::{OperationSnapshot, OperationStateMachine, TransitionListener};
pub use transitions::{button_config, can_transition, next_state};
pub use types::{
    ButtonConfig, ButtonIcon, OperationAction, OperationState, RetryInfo, StyleIntent,
    TransitionRejection,
};
