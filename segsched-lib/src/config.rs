//! Scheduler configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// How jobs are mapped to workers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingKind {
    /// `stream mod workers`
    #[default]
    Affinity,
    /// Least estimated in-flight memory, pinned per stream (experimental)
    LeastLoaded,
}

/// What a fatal engine error does to the run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Abort every session on the first error
    #[default]
    FailFast,
    /// Stop only the failing stream
    ContainStream,
}

/// Flow-control and pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum segments a stream may decode ahead of its encodes
    pub max_lag: usize,

    /// Poll interval while waiting on backpressure, in milliseconds
    pub backoff_ms: u64,

    /// Bounded queue length per worker
    pub worker_queue_capacity: usize,

    /// Bounded submission queue in front of the dispatch loop
    pub intake_capacity: usize,

    /// Routing policy
    pub routing: RoutingKind,

    /// Failure policy
    pub failure_policy: FailureMode,

    /// Workers used when no hardware devices are configured
    pub software_workers: usize,

    /// Delay between session starts, in milliseconds
    pub session_stagger_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_lag: 5,
            backoff_ms: 300,
            worker_queue_capacity: 16,
            intake_capacity: 64,
            routing: RoutingKind::Affinity,
            failure_policy: FailureMode::FailFast,
            software_workers: 1,
            session_stagger_ms: 300,
        }
    }
}

impl SchedulerConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn session_stagger(&self) -> Duration {
        Duration::from_millis(self.session_stagger_ms)
    }

    /// Reject values the scheduler cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_lag == 0 {
            return Err(ConfigError::Invalid {
                field: "max_lag",
                reason: "must be at least 1".into(),
            });
        }
        if self.worker_queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "worker_queue_capacity",
                reason: "must be at least 1".into(),
            });
        }
        if self.intake_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "intake_capacity",
                reason: "must be at least 1".into(),
            });
        }
        if self.software_workers == 0 {
            return Err(ConfigError::Invalid {
                field: "software_workers",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Parse from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: SchedulerConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Parse(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_lag, 5);
        assert_eq!(config.backoff(), Duration::from_millis(300));
        assert_eq!(config.routing, RoutingKind::Affinity);
        assert_eq!(config.failure_policy, FailureMode::FailFast);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SchedulerConfig::from_toml_str(
            "max_lag = 2\nrouting = \"least_loaded\"\nfailure_policy = \"contain_stream\"\n",
        )
        .unwrap();
        assert_eq!(config.max_lag, 2);
        assert_eq!(config.routing, RoutingKind::LeastLoaded);
        assert_eq!(config.failure_policy, FailureMode::ContainStream);
        assert_eq!(config.backoff_ms, 300);
    }

    #[test]
    fn test_validate_rejects_zero_lag() {
        let config = SchedulerConfig {
            max_lag: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "max_lag", .. })
        ));
    }

    #[test]
    fn test_unknown_routing_is_parse_error() {
        assert!(matches!(
            SchedulerConfig::from_toml_str("routing = \"random\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
