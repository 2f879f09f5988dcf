//! One benchmark run: validate, start the pool, launch staggered sessions,
//! wait for them, drain the scheduler and summarize.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;

use crate::boundary::{ErrorBoundary, FailureAction};
use crate::config::SchedulerConfig;
use crate::driver::{DirectSession, SessionDriver, SessionPlan, SessionSummary};
use crate::engine::Engine;
use crate::error::{ConfigError, ProfileError, Result, SchedError};
use crate::manifest::MediaPlaylist;
use crate::profile::{OutputNaming, ProfileSet};
use crate::scheduler::{EncodeScheduler, SchedulerReport};
use crate::stats::{RunStats, RunSummary};
use crate::types::{Accel, DeviceId};

/// Which pipeline the sessions use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PipelineMode {
    /// Decode in the session, encode on the shared worker pool
    #[default]
    Scheduled,
    /// Decode and encode inline in every session
    Direct,
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineMode::Scheduled => f.write_str("scheduled"),
            PipelineMode::Direct => f.write_str("direct"),
        }
    }
}

/// Everything a run needs besides the engine and the manifest
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub sessions: usize,
    /// Segments per session, 0 for all
    pub segs: usize,
    pub live: bool,
    pub accel: Accel,
    pub devices: Vec<DeviceId>,
    pub profiles: ProfileSet,
    pub naming: OutputNaming,
    pub mode: PipelineMode,
    pub scheduler: SchedulerConfig,
}

impl RunPlan {
    /// Startup checks; nothing has touched the engine yet when these fail
    pub fn validate(&self) -> Result<()> {
        if self.sessions == 0 {
            return Err(ConfigError::NoSessions.into());
        }
        if self.profiles.is_empty() {
            return Err(ProfileError::Empty.into());
        }
        if self.accel == Accel::Nvidia && self.devices.is_empty() {
            return Err(ConfigError::NoDevices.into());
        }
        self.scheduler.validate()?;
        Ok(())
    }
}

/// Result of a finished run
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub mode: PipelineMode,
    pub summary: RunSummary,
    pub sessions: Vec<SessionSummary>,
    /// Only for the scheduled pipeline
    pub scheduler: Option<SchedulerReport>,
    /// Errors the containment policy kept from aborting the run
    pub contained: Vec<SchedError>,
    pub wall_time: Duration,
}

/// Run every session to completion and report
pub async fn run<E: Engine>(
    engine: &E,
    playlist: &MediaPlaylist,
    plan: RunPlan,
    stats: Arc<RunStats>,
) -> Result<RunReport> {
    plan.validate()?;

    let run_id = Uuid::new_v4();
    let span = tracing::info_span!("run", %run_id);
    execute(engine, playlist, plan, stats, run_id)
        .instrument(span)
        .await
}

async fn execute<E: Engine>(
    engine: &E,
    playlist: &MediaPlaylist,
    plan: RunPlan,
    stats: Arc<RunStats>,
    run_id: Uuid,
) -> Result<RunReport> {
    let started = Instant::now();
    let session_plan = Arc::new(SessionPlan {
        segments: playlist.segments.clone().into(),
        limit: SessionPlan::segment_limit(playlist.segments.len(), plan.segs),
        live: plan.live,
        profiles: plan.profiles.clone(),
        naming: plan.naming.clone(),
        max_lag: plan.scheduler.max_lag,
        backoff: plan.scheduler.backoff(),
    });
    let boundary = ErrorBoundary::from_mode(plan.scheduler.failure_policy);

    tracing::info!(
        mode = %plan.mode,
        sessions = plan.sessions,
        segments = session_plan.limit,
        profiles = ?plan.profiles.names(),
        live = plan.live,
        "starting run"
    );

    let (mut sessions, scheduler) = match plan.mode {
        PipelineMode::Scheduled => {
            let scheduler = EncodeScheduler::start(
                engine,
                plan.accel,
                &plan.devices,
                &plan.scheduler,
                boundary.clone(),
            )?;
            let mut set = JoinSet::new();
            for stream in 0..plan.sessions {
                if stream > 0 && !stagger(&boundary, plan.scheduler.session_stagger()).await {
                    break;
                }
                match SessionDriver::open(
                    engine,
                    plan.accel,
                    stream,
                    session_plan.clone(),
                    scheduler.handle(),
                    boundary.clone(),
                    stats.clone(),
                ) {
                    Ok(driver) => {
                        set.spawn(driver.run());
                    }
                    Err(e) => {
                        if boundary.report(e) == FailureAction::AbortRun {
                            break;
                        }
                    }
                }
            }
            let results = join_sessions(set, &boundary).await;
            let report = scheduler.shutdown().await?;
            stats.add_encodes(report.completions, report.encode_time);
            (results, Some(report))
        }
        PipelineMode::Direct => {
            let mut set = JoinSet::new();
            for stream in 0..plan.sessions {
                if stream > 0 && !stagger(&boundary, plan.scheduler.session_stagger()).await {
                    break;
                }
                match DirectSession::open(
                    engine,
                    plan.accel,
                    stream,
                    &plan.devices,
                    session_plan.clone(),
                    boundary.clone(),
                    stats.clone(),
                ) {
                    Ok(session) => {
                        set.spawn(session.run());
                    }
                    Err(e) => {
                        if boundary.report(e) == FailureAction::AbortRun {
                            break;
                        }
                    }
                }
            }
            (join_sessions(set, &boundary).await, None)
        }
    };

    if let Some(fatal) = boundary.take_fatal() {
        return Err(fatal);
    }

    sessions.sort_by_key(|s| s.stream);

    let summary = stats.summary()?;
    let report = RunReport {
        run_id,
        mode: plan.mode,
        summary,
        sessions,
        scheduler,
        contained: boundary.take_contained(),
        wall_time: started.elapsed(),
    };
    tracing::info!(
        segments = report.summary.segments,
        contained = report.contained.len(),
        wall_ms = report.wall_time.as_millis() as u64,
        "run finished"
    );
    Ok(report)
}

/// Wait between session starts. False when the run aborted meanwhile.
async fn stagger(boundary: &ErrorBoundary, delay: Duration) -> bool {
    if delay.is_zero() {
        return !boundary.is_aborted();
    }
    let abort = boundary.abort_token();
    tokio::select! {
        _ = abort.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Collect finished sessions. Failures go through the boundary so one
/// failing session stops the others under fail-fast.
async fn join_sessions(
    mut set: JoinSet<Result<SessionSummary>>,
    boundary: &ErrorBoundary,
) -> Vec<SessionSummary> {
    let mut sessions = Vec::with_capacity(set.len());
    while let Some(joined) = set.join_next().await {
        match joined.map_err(SchedError::from).and_then(|r| r) {
            Ok(summary) => sessions.push(summary),
            Err(e) if e.is_aborted() => {}
            Err(e) => {
                boundary.report(e);
            }
        }
    }
    sessions
}
