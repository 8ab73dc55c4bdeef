use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::info;

/// Refresh coordinator performance counters
#[derive(Debug, Default)]
pub struct RefreshMetrics {
    pub started: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub deduplicated: AtomicU64,
    pub cooldown_rejections: AtomicU64,
    pub cancelled: AtomicU64,
    total_duration_ms: AtomicU64,
    max_duration_ms: AtomicU64,
}

impl RefreshMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, duration: Duration) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        self.record_duration(duration);
    }

    pub fn record_failure(&self, duration: Duration) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.record_duration(duration);
    }

    pub fn record_deduplicated(&self) {
        self.deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cooldown_rejection(&self) {
        self.cooldown_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    fn record_duration(&self, duration: Duration) {
        let millis = duration.as_millis() as u64;
        self.total_duration_ms.fetch_add(millis, Ordering::Relaxed);
        self.max_duration_ms.fetch_max(millis, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> PerformanceStats {
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let settled = succeeded + failed;
        let total_duration_ms = self.total_duration_ms.load(Ordering::Relaxed);

        PerformanceStats {
            started: self.started.load(Ordering::Relaxed),
            succeeded,
            failed,
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            cooldown_rejections: self.cooldown_rejections.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            average_duration_ms: if settled > 0 {
                total_duration_ms as f64 / settled as f64
            } else {
                0.0
            },
            max_duration_ms: self.max_duration_ms.load(Ordering::Relaxed),
            error_rate: if settled > 0 {
                failed as f64 / settled as f64
            } else {
                0.0
            },
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            started = stats.started,
            succeeded = stats.succeeded,
            failed = stats.failed,
            deduplicated = stats.deduplicated,
            cooldown_rejections = stats.cooldown_rejections,
            cancelled = stats.cancelled,
            average_duration_ms = stats.average_duration_ms,
            max_duration_ms = stats.max_duration_ms,
            "Refresh metrics"
        );
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceStats {
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub deduplicated: u64,
    pub cooldown_rejections: u64,
    pub cancelled: u64,
    pub average_duration_ms: f64,
    pub max_duration_ms: u64,
    pub error_rate: f64,
}

/// Time an operation and log its duration when finished
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn finish(self) -> Duration {
        let duration = self.start.elapsed();
        info!(
            operation = %self.operation,
            duration_ms = duration.as_millis() as u64,
            "Operation completed"
        );
        duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_average_and_error_rate() {
        let metrics = RefreshMetrics::new();
        metrics.record_started();
        metrics.record_started();
        metrics.record_success(Duration::from_millis(100));
        metrics.record_failure(Duration::from_millis(300));

        let stats = metrics.get_stats();
        assert_eq!(stats.started, 2);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.average_duration_ms, 200.0);
        assert_eq!(stats.max_duration_ms, 300);
        assert_eq!(stats.error_rate, 0.5);
    }

    #[test]
    fn test_empty_stats() {
        let stats = RefreshMetrics::new().get_stats();
        assert_eq!(stats.average_duration_ms, 0.0);
        assert_eq!(stats.error_rate, 0.0);
    }
}
