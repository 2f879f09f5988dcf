//! Command line flags
//!
//! Accepts both GNU spelling (`--in x`) and the single-dash long flags
//! (`-in x`, `-live=false`) the benchmark has always been driven with.

use clap::{ArgAction, Parser};
use std::ffi::OsString;
use std::path::PathBuf;

use segsched_lib::profile::load_profiles;
use segsched_lib::{parse_device_list, Accel, DeviceId, OutputNaming, PipelineMode, RunPlan};

use crate::config::BenchConfig;
use crate::error::Result;

pub const DEFAULT_TRANSCODING_OPTIONS: &str = "P240p30fps16x9,P360p30fps16x9,P720p30fps16x9";

/// Live transcoding benchmark over a segment-level encode scheduler.
#[derive(Parser, Debug, Clone)]
#[command(name = "segsched-bench")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Input m3u8 manifest file
    #[arg(long = "in", value_name = "MANIFEST")]
    pub input: PathBuf,

    /// Simulate live stream
    #[arg(
        long,
        num_args = 0..=1,
        default_value_t = true,
        default_missing_value = "true",
        action = ArgAction::Set
    )]
    pub live: bool,

    /// Number of concurrent transcode sessions
    #[arg(long, alias = "concurrentSessions", default_value_t = 1)]
    pub concurrent_sessions: usize,

    /// Maximum number of segments to transcode per session (0 = all)
    #[arg(long, default_value_t = 0)]
    pub segs: usize,

    /// Comma-separated preset names, or path to a JSON profile list
    #[arg(long, alias = "transcodingOptions", default_value = DEFAULT_TRANSCODING_OPTIONS)]
    pub transcoding_options: String,

    /// Comma-separated list of Nvidia GPU device IDs to use for transcoding
    #[arg(long, default_value = "")]
    pub nvidia: String,

    /// Output segments' prefix (no segments are written by default)
    #[arg(long, alias = "outPrefix", default_value = "")]
    pub out_prefix: String,

    /// Decode and encode inline in each session instead of the shared scheduler
    #[arg(long)]
    pub direct: bool,

    /// Segments a stream may decode ahead of its encodes
    #[arg(long, alias = "maxLag")]
    pub max_lag: Option<usize>,

    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Logging level (trace, debug, info, warn, error)
    #[arg(long, alias = "logLevel")]
    pub log_level: Option<String>,
}

/// Rewrite single-dash long flags (`-in`, `-live=false`) to `--in`,
/// `--live=false`. Short flags, `--` flags and plain values pass unchanged.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut args = args.into_iter().map(Into::into);
    let mut out: Vec<OsString> = args.next().into_iter().collect();
    for arg in args {
        let rewritten = arg.to_str().and_then(|s| {
            let rest = s.strip_prefix('-')?;
            let name = rest.split('=').next().unwrap_or(rest);
            let long = name.len() > 1
                && !rest.starts_with('-')
                && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic());
            long.then(|| OsString::from(format!("-{}", s)))
        });
        out.push(rewritten.unwrap_or(arg));
    }
    out
}

impl Cli {
    /// Parse the process arguments
    pub fn parse_args() -> Self {
        Self::parse_from(normalize_args(std::env::args_os()))
    }

    /// Hardware acceleration and devices selected by `--nvidia`
    pub fn devices(&self) -> Result<(Accel, Vec<DeviceId>)> {
        let devices = parse_device_list(&self.nvidia)?;
        let accel = if devices.is_empty() {
            Accel::Software
        } else {
            Accel::Nvidia
        };
        Ok((accel, devices))
    }

    /// Apply flag overrides on top of file configuration
    pub fn apply(&self, config: &mut BenchConfig) {
        if let Some(max_lag) = self.max_lag {
            config.scheduler.max_lag = max_lag;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
    }

    /// Build the run plan. Profiles and devices are resolved here so bad
    /// values fail before anything else starts.
    pub fn run_plan(&self, config: &BenchConfig) -> Result<RunPlan> {
        let profiles = load_profiles(&self.transcoding_options)?;
        let (accel, devices) = self.devices()?;
        let naming = OutputNaming::new(Some(self.out_prefix.clone()));
        let mode = if self.direct {
            PipelineMode::Direct
        } else {
            PipelineMode::Scheduled
        };
        let plan = RunPlan {
            sessions: self.concurrent_sessions,
            segs: self.segs,
            live: self.live,
            accel,
            devices,
            profiles,
            naming,
            mode,
            scheduler: config.scheduler.clone(),
        };
        plan.validate()?;
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BenchError;
    use segsched_lib::{ConfigError, SchedError};

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["segsched-bench"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(normalize_args(argv)).unwrap()
    }

    #[test]
    fn test_normalize_args() {
        let args = normalize_args(["bin", "-in", "a.m3u8", "-live=false", "--segs", "3", "-h", "-"]);
        assert_eq!(args, vec!["bin", "--in", "a.m3u8", "--live=false", "--segs", "3", "-h", "-"]);
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["-in", "test.m3u8"]);
        assert_eq!(cli.input, PathBuf::from("test.m3u8"));
        assert!(cli.live);
        assert_eq!(cli.concurrent_sessions, 1);
        assert_eq!(cli.segs, 0);
        assert_eq!(cli.transcoding_options, DEFAULT_TRANSCODING_OPTIONS);
        assert!(!cli.direct);
        assert_eq!(cli.max_lag, None);
    }

    #[test]
    fn test_go_style_flags() {
        let cli = parse(&[
            "-in",
            "x.m3u8",
            "-live=false",
            "-concurrentSessions",
            "4",
            "-nvidia",
            "0,1",
            "-outPrefix",
            "/tmp/out",
        ]);
        assert!(!cli.live);
        assert_eq!(cli.concurrent_sessions, 4);
        assert_eq!(cli.out_prefix, "/tmp/out");
        let (accel, devices) = cli.devices().unwrap();
        assert_eq!(accel, Accel::Nvidia);
        assert_eq!(devices, vec![DeviceId::new("0"), DeviceId::new("1")]);
    }

    #[test]
    fn test_bare_live_means_true() {
        let cli = parse(&["--live", "--in", "x.m3u8"]);
        assert!(cli.live);
    }

    #[test]
    fn test_missing_input_is_error() {
        assert!(Cli::try_parse_from(normalize_args(["segsched-bench", "-live"])).is_err());
    }

    #[test]
    fn test_empty_device_entry_rejected() {
        let cli = parse(&["-in", "x.m3u8", "-nvidia", "0,,1"]);
        assert!(matches!(
            cli.devices(),
            Err(BenchError::Sched(SchedError::Config(ConfigError::EmptyDeviceId(_))))
        ));
    }

    #[test]
    fn test_overrides_and_plan() {
        let cli = parse(&["-in", "x.m3u8", "--max-lag", "2", "--direct", "-transcodingOptions", "P144p30fps16x9"]);
        let mut config = BenchConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.scheduler.max_lag, 2);

        let plan = cli.run_plan(&config).unwrap();
        assert_eq!(plan.mode, PipelineMode::Direct);
        assert_eq!(plan.accel, Accel::Software);
        assert_eq!(plan.profiles.names(), vec!["P144p30fps16x9"]);
        assert!(plan.naming.discards());
    }

    #[test]
    fn test_no_usable_profiles() {
        let cli = parse(&["-in", "x.m3u8", "-transcodingOptions", "NotAPreset"]);
        assert!(cli.run_plan(&BenchConfig::default()).is_err());
    }
}
