//! Configuration file support
//!
//! Loads scheduler and logging settings from a TOML file.

use serde::{Deserialize, Serialize};
use std::path::Path;

use segsched_lib::SchedulerConfig;

use crate::config::{BenchConfig, LogFormat, LoggingConfig};
use crate::error::{BenchError, Result};

/// Configuration file format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Scheduler settings; missing keys keep their defaults
    pub scheduler: Option<SchedulerConfig>,
    /// Logging settings
    pub logging: Option<LoggingSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: Option<LogFormat>,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let fail = |reason: String| BenchError::ConfigFile {
            path: path.display().to_string(),
            reason,
        };
        let content = std::fs::read_to_string(path).map_err(|e| fail(e.to_string()))?;
        let config: ConfigFile = toml::from_str(&content).map_err(|e| fail(e.to_string()))?;
        if let Some(scheduler) = &config.scheduler {
            scheduler.validate().map_err(|e| fail(e.to_string()))?;
        }
        Ok(config)
    }

    /// Convert to the runtime configuration
    pub fn into_bench_config(self) -> BenchConfig {
        BenchConfig {
            scheduler: self.scheduler.unwrap_or_default(),
            logging: self
                .logging
                .map(|l| LoggingConfig {
                    level: l.level,
                    format: l.format.unwrap_or_default(),
                })
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use segsched_lib::{FailureMode, RoutingKind};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_partial_file() {
        let file = write_config(
            r#"
[scheduler]
max_lag = 3
routing = "least_loaded"
failure_policy = "contain_stream"

[logging]
level = "debug"
format = "json"
"#,
        );
        let config = ConfigFile::from_file(file.path()).unwrap().into_bench_config();
        assert_eq!(config.scheduler.max_lag, 3);
        assert_eq!(config.scheduler.routing, RoutingKind::LeastLoaded);
        assert_eq!(config.scheduler.failure_policy, FailureMode::ContainStream);
        assert_eq!(config.scheduler.backoff_ms, 300);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let file = write_config("");
        let config = ConfigFile::from_file(file.path()).unwrap().into_bench_config();
        assert_eq!(config, BenchConfig::default());
    }

    #[test]
    fn test_invalid_scheduler_values_rejected() {
        let file = write_config("[scheduler]\nmax_lag = 0\n");
        assert!(matches!(
            ConfigFile::from_file(file.path()),
            Err(BenchError::ConfigFile { .. })
        ));
    }

    fn default_config() -> ConfigFile {
        ConfigFile {
            scheduler: Some(SchedulerConfig::default()),
            logging: Some(LoggingSettings {
                level: "info".to_string(),
                format: Some(LogFormat::Pretty),
            }),
        }
    }

    #[test]
    fn test_config_file_roundtrip() {
        let file = write_config(&toml::to_string_pretty(&default_config()).unwrap());

        let loaded = ConfigFile::from_file(file.path()).unwrap().into_bench_config();
        assert_eq!(loaded, BenchConfig::default());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ConfigFile::from_file("/nonexistent/segsched.toml"),
            Err(BenchError::ConfigFile { .. })
        ));
    }
}
