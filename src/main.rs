//! Live transcoding benchmark
//!
//! Runs N concurrent sessions over one HLS media playlist, optionally paced
//! at real time, and reports how many segments were transcoded faster than
//! their playback duration.

mod cli;
mod config;
mod config_file;
mod error;
mod report;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use segsched_lib::{load_playlist, MediaPlaylist, RunPlan, RunReport, RunStats};

use crate::cli::Cli;
use crate::config::{BenchConfig, LogFormat, LoggingConfig};
use crate::config_file::ConfigFile;
use crate::error::{BenchError, Result};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "segsched-bench";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_logging(&config.logging) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }
    tracing::debug!("{} v{} starting", APP_NAME, VERSION);

    match bench(&cli, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

/// File configuration, when given, with flag overrides on top
fn load_config(cli: &Cli) -> Result<BenchConfig> {
    let mut config = match &cli.config {
        Some(path) => ConfigFile::from_file(path)?.into_bench_config(),
        None => BenchConfig::default(),
    };
    cli.apply(&mut config);
    Ok(config)
}

/// Initialize logging with tracing
fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(logging.filter())
            .map_err(|_| BenchError::LogLevel(logging.level.clone()))?,
    };
    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
    Ok(())
}

async fn bench(cli: &Cli, config: &BenchConfig) -> Result<()> {
    let playlist = load_playlist(&cli.input)?;
    let plan = cli.run_plan(config)?;
    tracing::info!(
        manifest = %cli.input.display(),
        segments = playlist.segments.len(),
        accel = %plan.accel,
        devices = plan.devices.len(),
        "manifest loaded"
    );

    eprint!("{}", report::config_table(cli, &plan.mode.to_string()).render());
    println!("{}", report::CSV_HEADER);

    let stats = Arc::new(RunStats::with_sink(Box::new(|record| {
        println!("{}", report::csv_line(record));
    })));

    let sessions = plan.sessions;
    let started = Instant::now();
    let report = execute(&playlist, plan, stats).await?;
    eprintln!("Took {:?} to transcode {} segments", started.elapsed(), report.summary.segments);

    for err in &report.contained {
        tracing::warn!("contained: {}", err);
    }
    eprint!("{}", report::summary_table(sessions, &report).render());
    Ok(())
}

#[cfg(feature = "ffmpeg")]
async fn execute(playlist: &MediaPlaylist, plan: RunPlan, stats: Arc<RunStats>) -> Result<RunReport> {
    let engine = segsched_lib::transcode::FfmpegEngine::new()?;
    Ok(segsched_lib::run(&engine, playlist, plan, stats).await?)
}

#[cfg(not(feature = "ffmpeg"))]
async fn execute(_playlist: &MediaPlaylist, _plan: RunPlan, _stats: Arc<RunStats>) -> Result<RunReport> {
    Err(BenchError::NoEngine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_flags_override_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[scheduler]\nmax_lag = 7\nbackoff_ms = 50\n").unwrap();
        let path = file.path().display().to_string();

        let cli = Cli::try_parse_from(cli::normalize_args([
            "segsched-bench",
            "-in",
            "x.m3u8",
            "-config",
            path.as_str(),
            "-max-lag",
            "2",
        ]))
        .unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.scheduler.max_lag, 2);
        assert_eq!(config.scheduler.backoff_ms, 50);
    }
}
