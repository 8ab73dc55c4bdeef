use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for approval-flow
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Operation state machine settings
    pub state_machine: StateMachineConfig,
    /// Refresh coordinator settings
    pub refresh: RefreshConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StateMachineConfig {
    /// Failures tolerated before `Retry` is refused
    pub max_retries: u32,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

/// What a refresh inside its cooldown window gets back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CooldownPolicy {
    /// Fail with `RefreshError::CooldownRejected`
    #[default]
    Reject,
    /// Hand back the last successful result; reject if there is none
    ReuseLastResult,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Cooldown applied when an operation does not carry its own
    pub default_cooldown_ms: u64,
    /// Number of recent failures kept for diagnostics
    pub error_history_cap: usize,
    pub cooldown_policy: CooldownPolicy,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            default_cooldown_ms: 1000,
            error_history_cap: 50,
            cooldown_policy: CooldownPolicy::Reject,
        }
    }
}

impl RefreshConfig {
    pub fn default_cooldown(&self) -> Duration {
        Duration::from_millis(self.default_cooldown_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter when RUST_LOG is unset
    pub log_level: String,
    /// JSON output instead of human-readable lines
    pub json_logs: bool,
    /// Log refresh performance stats on shutdown
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
            metrics_enabled: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (approval-flow.toml)
    /// 3. Environment variables (prefixed with APPROVAL_FLOW, `__` between sections)
    ///
    /// A missing approval-flow.toml is not an error.
    pub fn load() -> Result<Self> {
        Self::build(Path::new("approval-flow.toml"), false)
    }

    /// Same precedence as `load`, but `path` must exist
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::build(path, true)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))
    }

    fn build(path: &Path, required: bool) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path).required(required))
            .add_source(
                Environment::with_prefix("APPROVAL_FLOW")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let app_config: AppConfig = config.try_deserialize()?;
        app_config.validate()?;
        Ok(app_config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.refresh.error_history_cap == 0 {
            anyhow::bail!("refresh.error_history_cap must be at least 1");
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.state_machine.max_retries, 3);
        assert_eq!(config.refresh.default_cooldown(), Duration::from_millis(1000));
        assert_eq!(config.refresh.cooldown_policy, CooldownPolicy::Reject);
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_save_and_load_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("approval-flow.toml");

        let mut config = AppConfig::default();
        config.state_machine.max_retries = 5;
        config.refresh.cooldown_policy = CooldownPolicy::ReuseLastResult;
        config.save_to_file(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.state_machine.max_retries, 5);
        assert_eq!(loaded.refresh.cooldown_policy, CooldownPolicy::ReuseLastResult);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = AppConfig::load_from(Path::new("/nonexistent/approval-flow.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/approval-flow.toml"));
    }

    #[test]
    fn test_optional_default_file_may_be_absent() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = AppConfig::build(&dir.path().join("approval-flow.toml"), false).unwrap();
        assert_eq!(loaded.refresh.error_history_cap, 50);
    }

    #[test]
    fn test_zero_error_cap_is_rejected() {
        let mut config = AppConfig::default();
        config.refresh.error_history_cap = 0;
        assert!(config.validate().is_err());
    }
}
