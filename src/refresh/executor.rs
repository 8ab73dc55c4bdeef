// Executor seam: the coordinator never knows what "refreshing" means

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::types::{RefreshKind, RefreshOperation};

/// Cooperative cancellation flag; executors may poll it, nothing aborts them
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything an executor gets to see about the request it serves
#[derive(Debug, Clone)]
pub struct RefreshContext {
    pub key: String,
    pub operation: RefreshOperation,
    pub correlation_id: String,
    pub cancellation: CancellationFlag,
}

impl RefreshContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Performs the actual work behind a refresh kind
#[async_trait]
pub trait RefreshExecutor: Send + Sync {
    async fn execute(&self, context: RefreshContext) -> anyhow::Result<Value>;
}

/// Adapts an async closure into a `RefreshExecutor`
pub struct FnExecutor<F>(F);

impl<F> FnExecutor<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> RefreshExecutor for FnExecutor<F>
where
    F: Fn(RefreshContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn execute(&self, context: RefreshContext) -> anyhow::Result<Value> {
        (self.0)(context).await
    }
}

/// Per-kind executors, used by `RefreshCoordinator::refresh_registered`
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<RefreshKind, Arc<dyn RefreshExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, kind: RefreshKind, executor: Arc<dyn RefreshExecutor>) -> Self {
        self.executors.insert(kind, executor);
        self
    }

    pub fn register_fn<F, Fut>(self, kind: RefreshKind, f: F) -> Self
    where
        F: Fn(RefreshContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register(kind, Arc::new(FnExecutor::new(f)))
    }

    pub fn get(&self, kind: RefreshKind) -> Option<Arc<dyn RefreshExecutor>> {
        self.executors.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<RefreshKind> {
        let mut kinds: Vec<_> = self.executors.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
