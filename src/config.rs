//! Runtime configuration

use serde::{Deserialize, Serialize};
use segsched_lib::SchedulerConfig;

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level or `EnvFilter` directive; `RUST_LOG` wins when set
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl LoggingConfig {
    /// Filter used when `RUST_LOG` is not set
    pub fn filter(&self) -> String {
        let level = self.level.trim();
        if level.contains('=') || level.contains(',') {
            level.to_string()
        } else {
            format!("segsched_bench={0},segsched_lib={0}", level)
        }
    }
}

/// Everything the binary needs besides the CLI flags
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BenchConfig {
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        let logging = LoggingConfig::default();
        assert_eq!(logging.filter(), "segsched_bench=info,segsched_lib=info");
    }

    #[test]
    fn test_directive_passes_through() {
        let logging = LoggingConfig {
            level: "segsched_lib=trace".into(),
            format: LogFormat::Json,
        };
        assert_eq!(logging.filter(), "segsched_lib=trace");
    }
}
