// Approval Flow Library - operation state machine and unified refresh coordination
// This exposes the core components for testing and integration

pub mod config;
pub mod notify;
pub mod observability;
pub mod operation;
pub mod priority;
pub mod refresh;
pub mod subscribers;
pub mod telemetry;

// Re-export key types for easy access
pub use config::{AppConfig, CooldownPolicy, ObservabilityConfig, RefreshConfig, StateMachineConfig};
pub use notify::{Notice, NoticeLevel, NotificationSink, RecordingNotifier, TracingNotifier};
pub use observability::{OperationTimer, PerformanceStats, RefreshMetrics};
pub use operation::{
    button_config, can_transition, next_state, ButtonConfig, ButtonIcon, OperationAction,
    OperationSnapshot, OperationState, OperationStateMachine, RetryInfo, StyleIntent,
    TransitionRejection,
};
pub use priority::RefreshPriority;
pub use refresh::{
    CancellationFlag, ExecutorRegistry, RefreshContext, RefreshCoordinator, RefreshError,
    RefreshEvent, RefreshExecutor, RefreshKind, RefreshOperation, RefreshState, RefreshStats,
};
pub use subscribers::Subscription;
pub use telemetry::{create_refresh_span, generate_correlation_id, init_telemetry, shutdown_telemetry};
