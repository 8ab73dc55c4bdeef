use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

use super::errors::RefreshError;
use super::executor::{CancellationFlag, ExecutorRegistry, RefreshContext};
use super::types::{
    RefreshEvent, RefreshFailure, RefreshOperation, RefreshState, RefreshStats,
};
use crate::config::{CooldownPolicy, RefreshConfig};
use crate::observability::{PerformanceStats, RefreshMetrics};
use crate::priority::RefreshPriority;
use crate::subscribers::{SubscriberList, Subscription};
use crate::telemetry::{create_refresh_span, generate_correlation_id};

type SharedOutcome = Shared<BoxFuture<'static, Result<Value, RefreshError>>>;

/// Callback invoked after every coordinator state change
pub type RefreshListener = dyn Fn(&RefreshEvent, &RefreshState) + Send + Sync;

struct InFlight {
    execution_id: Uuid,
    outcome: SharedOutcome,
    cancellation: CancellationFlag,
    priority: RefreshPriority,
}

struct HistoryEntry {
    /// Execution that last started for this key; older settlements don't overwrite it
    execution_id: Uuid,
    last_started_at: Instant,
    last_completed_at: Option<Instant>,
    last_result: Option<Result<Value, String>>,
}

#[derive(Default)]
struct Registry {
    in_flight: BTreeMap<String, InFlight>,
    history: HashMap<String, HistoryEntry>,
    errors: VecDeque<RefreshFailure>,
    last_refresh: Option<DateTime<Utc>>,
}

impl Registry {
    fn snapshot(&self) -> RefreshState {
        RefreshState {
            is_refreshing: !self.in_flight.is_empty(),
            last_refresh: self.last_refresh,
            pending_operations: self.in_flight.keys().cloned().collect(),
            recent_errors: self.errors.iter().cloned().collect(),
        }
    }
}

struct Pending {
    outcome: SharedOutcome,
    sender: oneshot::Sender<Result<Value, RefreshError>>,
    execution_id: Uuid,
    cancellation: CancellationFlag,
}

enum Admission {
    Joined(SharedOutcome),
    Reused(Value),
    Started(Pending),
}

struct CoordinatorInner {
    config: RefreshConfig,
    registry: Mutex<Registry>,
    listeners: SubscriberList<RefreshListener>,
    metrics: RefreshMetrics,
    executors: ExecutorRegistry,
}

/// Deduplicating, cooldown-enforcing refresh coordinator.
///
/// Construct one at application start and hand out clones; every clone shares the same
/// registry. Executions are spawned on the ambient tokio runtime, so `refresh` must be
/// called from within one.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl std::fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .field("executors", &self.inner.executors)
            .finish()
    }
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new(RefreshConfig::default())
    }
}

impl RefreshCoordinator {
    pub fn new(config: RefreshConfig) -> Self {
        Self::with_executors(config, ExecutorRegistry::new())
    }

    pub fn with_executors(config: RefreshConfig, executors: ExecutorRegistry) -> Self {
        info!(
            default_cooldown_ms = config.default_cooldown_ms,
            error_history_cap = config.error_history_cap,
            policy = ?config.cooldown_policy,
            kinds = ?executors.kinds(),
            "Refresh coordinator initialized"
        );
        Self {
            inner: Arc::new(CoordinatorInner {
                config,
                registry: Mutex::new(Registry::default()),
                listeners: SubscriberList::new(),
                metrics: RefreshMetrics::new(),
                executors,
            }),
        }
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.inner.config
    }

    /// Run `executor` for `operation` unless the same key is in flight (share its result)
    /// or still cooling down (rejected, or last result per `CooldownPolicy`).
    pub async fn refresh<F, Fut>(&self, operation: RefreshOperation, executor: F) -> Result<Value, RefreshError>
    where
        F: FnOnce(RefreshContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let key = operation.key();
        let outcome = match self.admit(&key, &operation)? {
            Admission::Joined(outcome) => outcome,
            Admission::Reused(value) => return Ok(value),
            Admission::Started(pending) => self.spawn_execution(key, operation, pending, executor),
        };
        outcome.await
    }

    /// Refresh through the executor registered for `operation.kind`
    pub async fn refresh_registered(&self, operation: RefreshOperation) -> Result<Value, RefreshError> {
        let executor = self
            .inner
            .executors
            .get(operation.kind)
            .ok_or(RefreshError::NoExecutor { kind: operation.kind })?;

        self.refresh(operation, move |context| async move { executor.execute(context).await })
            .await
    }

    /// Flag the in-flight execution for `key` as cancelled and drop its bookkeeping.
    ///
    /// The executor keeps running; callers already waiting still get its settlement.
    pub fn cancel(&self, key: &str) -> bool {
        let mut registry = self.lock();
        let Some(entry) = registry.in_flight.remove(key) else {
            return false;
        };
        entry.cancellation.cancel();
        let state = registry.snapshot();
        drop(registry);

        self.inner.metrics.record_cancelled();
        info!(key, "Refresh cancelled");
        self.emit(&RefreshEvent::Cancelled { key: key.to_string() }, &state);
        true
    }

    /// Forget every in-flight entry and all history. Running executors are not stopped.
    pub fn clear_all(&self) {
        let mut registry = self.lock();
        let pending = registry.in_flight.len();
        registry.in_flight.clear();
        registry.history.clear();
        let state = registry.snapshot();
        drop(registry);

        info!(pending, "Cleared all refresh bookkeeping");
        self.emit(&RefreshEvent::Cleared { pending }, &state);
    }

    pub fn stats(&self) -> RefreshStats {
        let registry = self.lock();
        RefreshStats {
            pending_count: registry.in_flight.len(),
            pending_keys: registry.in_flight.keys().cloned().collect(),
            history_size: registry.history.len(),
            error_count: registry.errors.len(),
            last_refresh: registry.last_refresh,
        }
    }

    pub fn state(&self) -> RefreshState {
        self.lock().snapshot()
    }

    pub fn is_refreshing(&self) -> bool {
        !self.lock().in_flight.is_empty()
    }

    pub fn metrics(&self) -> PerformanceStats {
        self.inner.metrics.get_stats()
    }

    pub fn log_metrics(&self) {
        self.inner.metrics.log_stats();
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&RefreshEvent, &RefreshState) + Send + Sync + 'static,
    {
        self.inner.listeners.subscribe(Arc::new(listener))
    }

    fn admit(&self, key: &str, operation: &RefreshOperation) -> Result<Admission, RefreshError> {
        let cooldown = operation
            .cooldown
            .unwrap_or_else(|| self.inner.config.default_cooldown());
        let now = Instant::now();
        let mut registry = self.lock();

        if let Some(entry) = registry.in_flight.get(key) {
            let outcome = entry.outcome.clone();
            let priority = entry.priority;
            let state = registry.snapshot();
            drop(registry);

            self.inner.metrics.record_deduplicated();
            debug!(key, %priority, "Refresh already in flight, sharing pending result");
            self.emit(&RefreshEvent::Deduplicated { key: key.to_string() }, &state);
            return Ok(Admission::Joined(outcome));
        }

        let cooling = registry.history.get(key).and_then(|history| {
            let elapsed = now.saturating_duration_since(history.last_started_at);
            (elapsed < cooldown).then(|| {
                let cached = match (&history.last_result, history.last_completed_at) {
                    (Some(Ok(value)), Some(completed_at)) => {
                        Some((value.clone(), now.saturating_duration_since(completed_at)))
                    }
                    _ => None,
                };
                (cooldown - elapsed, cached)
            })
        });

        if let Some((remaining, cached)) = cooling {
            if self.inner.config.cooldown_policy == CooldownPolicy::ReuseLastResult {
                if let Some((value, age)) = cached {
                    drop(registry);
                    debug!(
                        key,
                        remaining_ms = remaining.as_millis() as u64,
                        result_age_ms = age.as_millis() as u64,
                        "Cooling down, reusing last result"
                    );
                    return Ok(Admission::Reused(value));
                }
            }

            let state = registry.snapshot();
            drop(registry);

            self.inner.metrics.record_cooldown_rejection();
            warn!(key, remaining_ms = remaining.as_millis() as u64, "Refresh rejected during cooldown");
            self.emit(
                &RefreshEvent::CooldownRejected {
                    key: key.to_string(),
                    remaining_ms: remaining.as_millis() as u64,
                },
                &state,
            );
            return Err(RefreshError::CooldownRejected {
                key: key.to_string(),
                remaining,
            });
        }

        let execution_id = Uuid::new_v4();
        let cancellation = CancellationFlag::new();
        let (sender, receiver) = oneshot::channel();
        let aborted_key = key.to_string();
        let coordinator = Arc::downgrade(&self.inner);
        let outcome: SharedOutcome = async move {
            match receiver.await {
                Ok(settled) => settled,
                Err(_) => {
                    if let Some(inner) = coordinator.upgrade() {
                        RefreshCoordinator { inner }.forget_aborted(&aborted_key, execution_id);
                    }
                    Err(RefreshError::Aborted { key: aborted_key })
                }
            }
        }
        .boxed()
        .shared();

        registry.in_flight.insert(
            key.to_string(),
            InFlight {
                execution_id,
                outcome: outcome.clone(),
                cancellation: cancellation.clone(),
                priority: operation.priority,
            },
        );
        let previous = registry.history.remove(key);
        registry.history.insert(
            key.to_string(),
            HistoryEntry {
                execution_id,
                last_started_at: now,
                last_completed_at: previous.as_ref().and_then(|entry| entry.last_completed_at),
                last_result: previous.and_then(|entry| entry.last_result),
            },
        );
        drop(registry);

        Ok(Admission::Started(Pending {
            outcome,
            sender,
            execution_id,
            cancellation,
        }))
    }

    fn spawn_execution<F, Fut>(
        &self,
        key: String,
        operation: RefreshOperation,
        pending: Pending,
        executor: F,
    ) -> SharedOutcome
    where
        F: FnOnce(RefreshContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let Pending {
            outcome,
            sender,
            execution_id,
            cancellation,
        } = pending;

        let priority = operation.priority;
        let correlation_id = generate_correlation_id();
        let span = create_refresh_span(&key, operation.kind.as_str(), priority, &correlation_id);
        let context = RefreshContext {
            key: key.clone(),
            operation,
            correlation_id,
            cancellation,
        };

        self.inner.metrics.record_started();
        info!(key = %key, %priority, "Refresh started");
        let state = self.state();
        let event = RefreshEvent::Started { key: key.clone(), priority };
        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| self.emit(&event, &state))) {
            // No task will ever settle this execution.
            self.forget_aborted(&key, execution_id);
            std::panic::resume_unwind(panic);
        }

        let coordinator = self.clone();
        tokio::spawn(
            async move {
                let started = Instant::now();
                let result = AssertUnwindSafe(async move { executor(context).await })
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(anyhow::anyhow!("refresh executor panicked")));

                let settled = coordinator.settle(&key, execution_id, result, started.elapsed());
                // Every caller may have gone away; the bookkeeping above is what matters.
                let _ = sender.send(settled);
            }
            .instrument(span),
        );

        outcome
    }

    /// Drop the in-flight entry of an execution whose task vanished before settling
    fn forget_aborted(&self, key: &str, execution_id: Uuid) {
        let mut registry = self.lock();
        if registry
            .in_flight
            .get(key)
            .is_some_and(|entry| entry.execution_id == execution_id)
        {
            registry.in_flight.remove(key);
            drop(registry);
            warn!(key, %execution_id, "Refresh task ended without settling, key released");
        }
    }

    fn settle(
        &self,
        key: &str,
        execution_id: Uuid,
        result: anyhow::Result<Value>,
        duration: Duration,
    ) -> Result<Value, RefreshError> {
        let outcome = result.map_err(|err| format!("{err:#}"));
        let cap = self.inner.config.error_history_cap.max(1);
        let now = Instant::now();

        let mut registry = self.lock();
        if registry
            .in_flight
            .get(key)
            .is_some_and(|entry| entry.execution_id == execution_id)
        {
            registry.in_flight.remove(key);
        }
        if let Some(history) = registry.history.get_mut(key) {
            if history.execution_id == execution_id {
                history.last_completed_at = Some(now);
                history.last_result = Some(outcome.clone());
            }
        }
        match &outcome {
            Ok(_) => registry.last_refresh = Some(Utc::now()),
            Err(message) => {
                registry.errors.push_back(RefreshFailure {
                    key: key.to_string(),
                    message: message.clone(),
                    recorded_at: Utc::now(),
                });
                while registry.errors.len() > cap {
                    registry.errors.pop_front();
                }
            }
        }
        let state = registry.snapshot();
        drop(registry);

        let duration_ms = duration.as_millis() as u64;
        match outcome {
            Ok(value) => {
                self.inner.metrics.record_success(duration);
                info!(key, duration_ms, "Refresh completed");
                self.emit(
                    &RefreshEvent::Succeeded {
                        key: key.to_string(),
                        duration_ms,
                    },
                    &state,
                );
                Ok(value)
            }
            Err(message) => {
                self.inner.metrics.record_failure(duration);
                error!(key, duration_ms, error = %message, "Refresh failed");
                self.emit(
                    &RefreshEvent::Failed {
                        key: key.to_string(),
                        message: message.clone(),
                    },
                    &state,
                );
                Err(RefreshError::ExecutorFailed {
                    key: key.to_string(),
                    message,
                })
            }
        }
    }

    fn emit(&self, event: &RefreshEvent, state: &RefreshState) {
        for listener in self.inner.listeners.snapshot() {
            listener(event, state);
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
