use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use super::transitions::{self, settlement_actions};
use super::types::{ButtonConfig, OperationAction, OperationState, RetryInfo, TransitionRejection};
use crate::config::StateMachineConfig;
use crate::notify::{Notice, NotificationSink};
use crate::subscribers::{SubscriberList, Subscription};

/// Callback invoked with `(new_state, old_state, action)` after every committed transition
pub type TransitionListener = dyn Fn(OperationState, OperationState, OperationAction) + Send + Sync;

#[derive(Debug)]
struct MachineState {
    state: OperationState,
    retries: u32,
    last_error: Option<String>,
    /// Bumped by every reset; settlements from an older generation are dropped
    generation: u64,
}

#[derive(Debug, Clone, Copy)]
struct Committed {
    old: OperationState,
    new: OperationState,
    retries: u32,
    generation: u64,
}

/// Point-in-time view of a machine, handy for rendering and logging
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct OperationSnapshot {
    pub state: OperationState,
    pub retries: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub button: ButtonConfig,
}

/// Save → approve state machine for one UI action.
///
/// All methods take `&self`; the machine can be shared behind an `Arc` between the
/// event handler that starts an operation and the code that resets it.
pub struct OperationStateMachine {
    name: String,
    max_retries: u32,
    inner: Mutex<MachineState>,
    listeners: SubscriberList<TransitionListener>,
    notifier: Option<Arc<dyn NotificationSink>>,
}

impl std::fmt::Debug for OperationStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationStateMachine")
            .field("name", &self.name)
            .field("max_retries", &self.max_retries)
            .field("inner", &*self.lock())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl OperationStateMachine {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, StateMachineConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: StateMachineConfig) -> Self {
        let name = name.into();
        debug!(machine = %name, max_retries = config.max_retries, "Operation state machine initialized");
        Self {
            name,
            max_retries: config.max_retries,
            inner: Mutex::new(MachineState {
                state: OperationState::Idle,
                retries: 0,
                last_error: None,
                generation: 0,
            }),
            listeners: SubscriberList::new(),
            notifier: None,
        }
    }

    /// Report helper outcomes (saved, approval failed, ...) to a user-facing sink
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> OperationState {
        self.lock().state
    }

    pub fn is_state(&self, state: OperationState) -> bool {
        self.state() == state
    }

    pub fn retries(&self) -> u32 {
        self.lock().retries
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error.clone()
    }

    pub fn retry_info(&self) -> RetryInfo {
        let retries = self.retries();
        RetryInfo {
            count: retries,
            max_retries: self.max_retries,
            can_retry: retries < self.max_retries,
        }
    }

    pub fn button_config(&self) -> ButtonConfig {
        let inner = self.lock();
        transitions::button_config(inner.state, inner.retries, self.max_retries)
    }

    pub fn snapshot(&self) -> OperationSnapshot {
        let inner = self.lock();
        OperationSnapshot {
            state: inner.state,
            retries: inner.retries,
            max_retries: self.max_retries,
            last_error: inner.last_error.clone(),
            button: transitions::button_config(inner.state, inner.retries, self.max_retries),
        }
    }

    /// Whether `action` would be accepted right now, including the retry cap
    pub fn can_transition(&self, action: OperationAction) -> bool {
        let inner = self.lock();
        self.check(&inner, action).is_ok()
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(OperationState, OperationState, OperationAction) + Send + Sync + 'static,
    {
        self.listeners.subscribe(Arc::new(listener))
    }

    /// Apply `action`. Illegal pairs return `false` and leave everything untouched.
    pub fn dispatch(&self, action: OperationAction) -> bool {
        match self.try_dispatch(action) {
            Ok(_) => true,
            Err(rejection) => {
                warn!(machine = %self.name, %action, reason = %rejection, "Transition rejected");
                false
            }
        }
    }

    /// Like `dispatch`, but reports why a transition was refused
    pub fn try_dispatch(&self, action: OperationAction) -> Result<OperationState, TransitionRejection> {
        self.commit(action, None, None).map(|committed| committed.new)
    }

    /// Force `Idle` with a zero retry counter, regardless of the current state
    pub fn reset(&self) {
        // Reset is legal from every state, so this cannot be rejected.
        let _ = self.commit(OperationAction::Reset, None, None);
    }

    /// Detach every listener, then reset. Settlements still in flight are discarded.
    pub fn destroy(&self) {
        self.listeners.clear();
        self.reset();
        debug!(machine = %self.name, "Operation state machine torn down");
    }

    /// Run `save` through `Saving` into `Saved` or `SaveError`.
    ///
    /// Returns true when every transition was accepted, even if `save` itself failed.
    /// Poll the returned future to completion: dropping it mid-flight leaves the machine
    /// in `Saving` until `reset`. The same holds for every `handle_*` helper.
    pub async fn handle_save<F, Fut, T>(&self, save: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.run_phase(OperationAction::StartSave, save).await
    }

    pub async fn handle_approve<F, Fut, T>(&self, approve: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.run_phase(OperationAction::StartApprove, approve).await
    }

    pub async fn handle_refresh<F, Fut, T>(&self, refresh: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.run_phase(OperationAction::StartRefresh, refresh).await
    }

    /// Re-enter the phase that failed and run `retry` as its executor
    pub async fn handle_retry<F, Fut, T>(&self, retry: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.run_phase(OperationAction::Retry, retry).await
    }

    async fn run_phase<F, Fut, T>(&self, start: OperationAction, executor: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let started = match self.commit(start, None, None) {
            Ok(committed) => committed,
            Err(rejection) => {
                warn!(machine = %self.name, action = %start, reason = %rejection, "Operation not started");
                return false;
            }
        };

        let Some((success, failure)) = settlement_actions(started.new) else {
            error!(machine = %self.name, state = %started.new, "Started action did not enter a running phase");
            return false;
        };
        let phase = phase_name(started.new);

        let outcome = executor().await;

        let (action, error_message) = match outcome {
            Ok(_) => (success, None),
            Err(err) => {
                let message = format!("{err:#}");
                error!(machine = %self.name, phase, error = %message, "Operation executor failed");
                (failure, Some(message))
            }
        };

        match self.commit(action, Some(started.generation), error_message.clone()) {
            Ok(_) => {
                self.notify_outcome(phase, error_message);
                true
            }
            Err(TransitionRejection::Superseded { expected, current }) => {
                debug!(
                    machine = %self.name,
                    phase,
                    expected,
                    current,
                    "Discarding settlement after reset"
                );
                false
            }
            Err(rejection) => {
                warn!(machine = %self.name, %action, reason = %rejection, "Settlement rejected");
                false
            }
        }
    }

    /// Validate and apply one action, then notify listeners outside the lock.
    fn commit(
        &self,
        action: OperationAction,
        expected_generation: Option<u64>,
        error_message: Option<String>,
    ) -> Result<Committed, TransitionRejection> {
        let committed = {
            let mut inner = self.lock();

            if let Some(expected) = expected_generation {
                if expected != inner.generation {
                    return Err(TransitionRejection::Superseded {
                        expected,
                        current: inner.generation,
                    });
                }
            }

            let next = self.check(&inner, action)?;
            let old = inner.state;
            inner.state = next;

            if action == OperationAction::Reset {
                inner.retries = 0;
                inner.last_error = None;
                inner.generation += 1;
            } else if action.is_failure() {
                inner.retries = inner.retries.saturating_add(1);
                inner.last_error = error_message;
            } else if action.is_success() {
                inner.retries = 0;
                inner.last_error = None;
            }

            Committed {
                old,
                new: next,
                retries: inner.retries,
                generation: inner.generation,
            }
        };

        info!(
            machine = %self.name,
            from = %committed.old,
            %action,
            to = %committed.new,
            retries = committed.retries,
            "State transition"
        );

        for listener in self.listeners.snapshot() {
            listener(committed.new, committed.old, action);
        }

        Ok(committed)
    }

    fn check(&self, inner: &MachineState, action: OperationAction) -> Result<OperationState, TransitionRejection> {
        let next = transitions::next_state(inner.state, action).ok_or(TransitionRejection::Illegal {
            state: inner.state,
            action,
        })?;

        if action == OperationAction::Retry && inner.retries >= self.max_retries {
            return Err(TransitionRejection::RetryLimitExceeded {
                state: inner.state,
                retries: inner.retries,
                max_retries: self.max_retries,
            });
        }

        Ok(next)
    }

    fn notify_outcome(&self, phase: &str, error_message: Option<String>) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let notice = match error_message {
            None => Notice::success(format!("{phase} complete"), format!("{} finished", self.name)),
            Some(message) => Notice::error(format!("{phase} failed"), message),
        };
        notifier.notify(notice);
    }

    fn lock(&self) -> MutexGuard<'_, MachineState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn phase_name(state: OperationState) -> &'static str {
    match state {
        OperationState::Saving => "Save",
        OperationState::Refreshing => "Refresh",
        OperationState::Approving => "Approve",
        _ => "Operation",
    }
}
