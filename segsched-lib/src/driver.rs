//! Session drivers
//!
//! A session walks the manifest in order for one stream. The scheduled
//! driver decodes each segment and hands the frames to the encode scheduler,
//! holding back while the stream's encodes trail its decodes by `max_lag`.
//! The direct session decodes and encodes inline with its own encoder.

use chrono::Local;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::boundary::{ErrorBoundary, FailureAction};
use crate::cursor::StreamCursors;
use crate::engine::{decode_blocking, encode_blocking, stop_blocking, DecodeSession, Decoded, EncodeSession, Engine};
use crate::error::{Result, SchedError, SubmitError};
use crate::manifest::Segment;
use crate::profile::{OutputNaming, ProfileSet};
use crate::scheduler::SchedulerHandle;
use crate::stats::{RunStats, SegmentRecord};
use crate::types::{Accel, Assignment, DeviceId, Job, SegmentIndex, StreamId};

/// Inputs shared read-only by every session of a run
#[derive(Debug, Clone)]
pub struct SessionPlan {
    pub segments: Arc<[Segment]>,
    /// Segments each session transcodes
    pub limit: usize,
    /// Pace segments at their nominal duration
    pub live: bool,
    pub profiles: ProfileSet,
    pub naming: OutputNaming,
    pub max_lag: usize,
    pub backoff: Duration,
}

impl SessionPlan {
    /// `segs == 0` means the whole manifest
    pub fn segment_limit(total: usize, segs: usize) -> usize {
        if segs == 0 {
            total
        } else {
            segs.min(total)
        }
    }
}

/// How a session ended
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionOutcome {
    #[default]
    Completed,
    /// Stopped by the containment policy after an error on this stream
    Contained,
}

/// Per-session figures
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub stream: StreamId,
    pub worker: usize,
    pub segments: usize,
    pub backpressure_waits: u64,
    pub queue_full_retries: u64,
    pub outcome: SessionOutcome,
}

/// State common to both session flavours
struct SessionCore<D: DecodeSession> {
    stream: StreamId,
    assignment: Assignment,
    plan: Arc<SessionPlan>,
    decoder: Option<D>,
    boundary: ErrorBoundary,
    abort: CancellationToken,
    stats: Arc<RunStats>,
    summary: SessionSummary,
}

impl<D: DecodeSession> SessionCore<D> {
    fn open<E>(
        engine: &E,
        accel: Accel,
        stream: StreamId,
        assignment: Assignment,
        plan: Arc<SessionPlan>,
        boundary: ErrorBoundary,
        stats: Arc<RunStats>,
    ) -> Result<Self>
    where
        E: Engine<Decoder = D>,
    {
        let decoder = engine
            .new_decoder(accel, assignment.device.as_ref())
            .map_err(|source| SchedError::EngineSetup {
                role: format!("decoder for session {}", stream),
                source,
            })?;
        let summary = SessionSummary {
            stream,
            worker: assignment.worker,
            ..Default::default()
        };
        Ok(Self {
            stream,
            assignment,
            plan,
            decoder: Some(decoder),
            abort: boundary.abort_token(),
            boundary,
            stats,
            summary,
        })
    }

    /// Sleep unless the run aborts first
    async fn pause(&mut self, duration: Duration) -> Result<()> {
        tokio::select! {
            _ = self.abort.cancelled() => Err(SchedError::Aborted(self.stream)),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// End the session early: an error if the run aborted, a contained
    /// summary if only this stream was stopped.
    fn halt(&mut self) -> Result<SessionSummary> {
        if self.boundary.is_aborted() {
            return Err(SchedError::Aborted(self.stream));
        }
        self.summary.outcome = SessionOutcome::Contained;
        Ok(self.summary.clone())
    }

    fn is_live(&self) -> bool {
        self.boundary.is_live(self.stream)
    }

    /// Decode one segment. `Ok(None)` means the error was contained to this
    /// stream and the session should stop.
    async fn decode(
        &mut self,
        segment: SegmentIndex,
        path: &Path,
    ) -> Result<Option<Decoded<D::Frames>>> {
        let decoder = self
            .decoder
            .take()
            .ok_or_else(|| SchedError::Task(format!("decoder of session {} is gone", self.stream)))?;
        let (decoder, result, elapsed) = decode_blocking(decoder, path.to_path_buf()).await?;
        self.decoder = Some(decoder);

        match result {
            Ok(decoded) => {
                tracing::trace!(
                    stream = self.stream,
                    segment,
                    frames = decoded.meta.frames,
                    decode_ms = elapsed.as_millis() as u64,
                    "segment decoded"
                );
                Ok(Some(decoded))
            }
            Err(source) => {
                let err = SchedError::Decode {
                    stream: self.stream,
                    segment,
                    source,
                };
                match self.boundary.report(err) {
                    FailureAction::AbortRun => Err(SchedError::Aborted(self.stream)),
                    FailureAction::ContainStream(_) => Ok(None),
                }
            }
        }
    }

    /// Record the segment and, in live mode, sleep out the rest of its
    /// nominal duration measured from `iter_start`.
    async fn finish_segment(
        &mut self,
        segment: SegmentIndex,
        seg: &Segment,
        iter_start: Instant,
        transcode_time: Duration,
    ) -> Result<()> {
        self.stats.record_segment(SegmentRecord {
            timestamp: Local::now(),
            session: self.stream,
            segment,
            duration: seg.duration,
            transcode_time,
        });
        self.summary.segments += 1;

        if self.plan.live {
            let remaining = seg.duration.saturating_sub(iter_start.elapsed());
            if !remaining.is_zero() {
                self.pause(remaining).await?;
            }
        }
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(decoder) = self.decoder.take() {
            stop_blocking(decoder, D::stop).await;
        }
    }
}

/// Drives one stream through the encode scheduler
pub struct SessionDriver<D: DecodeSession> {
    core: SessionCore<D>,
    handle: SchedulerHandle<D::Frames>,
    cursors: Arc<StreamCursors>,
}

impl<D: DecodeSession> SessionDriver<D> {
    /// Register the stream, resolve its worker affinity and open a decoder
    /// on that worker's device.
    pub fn open<E>(
        engine: &E,
        accel: Accel,
        stream: StreamId,
        plan: Arc<SessionPlan>,
        handle: SchedulerHandle<D::Frames>,
        boundary: ErrorBoundary,
        stats: Arc<RunStats>,
    ) -> Result<Self>
    where
        E: Engine<Decoder = D, Frames = D::Frames>,
    {
        let cursors = handle.cursors().register(stream);
        let assignment = handle.affinity(stream);
        let core = SessionCore::open(engine, accel, stream, assignment, plan, boundary, stats)?;
        Ok(Self {
            core,
            handle,
            cursors,
        })
    }

    pub fn assignment(&self) -> &Assignment {
        &self.core.assignment
    }

    pub async fn run(mut self) -> Result<SessionSummary> {
        tracing::debug!(
            stream = self.core.stream,
            worker = self.core.assignment.worker,
            device = ?self.core.assignment.device,
            "session started"
        );
        let result = self.drive().await;
        self.core.close().await;
        if let Ok(summary) = &result {
            tracing::debug!(
                stream = summary.stream,
                segments = summary.segments,
                waits = summary.backpressure_waits,
                "session finished"
            );
        }
        result
    }

    async fn drive(&mut self) -> Result<SessionSummary> {
        let plan = self.core.plan.clone();
        let stream = self.core.stream;

        for (segment, seg) in plan.segments.iter().take(plan.limit).enumerate() {
            let iter_start = Instant::now();

            // Decode only while fewer than max_lag segments await encoding
            loop {
                if !self.core.is_live() {
                    return self.core.halt();
                }
                let lag = self.cursors.lag();
                if lag < plan.max_lag {
                    break;
                }
                self.core.summary.backpressure_waits += 1;
                self.core.stats.backpressure_wait();
                tracing::debug!(stream, segment, lag, "encoding has fallen behind, waiting");
                self.core.pause(plan.backoff).await?;
            }

            let tx_start = Instant::now();
            let Some(decoded) = self.core.decode(segment, &seg.path).await? else {
                return self.core.halt();
            };
            self.handle.cursors().record_decoded(stream, segment)?;

            let outputs = plan.naming.output_specs(&plan.profiles, stream, segment);
            let job = Job::new(
                stream,
                segment,
                self.core.assignment.device.clone(),
                decoded.frames,
                outputs,
            );
            if !self.submit(job).await? {
                return self.core.halt();
            }

            self.core
                .finish_segment(segment, seg, iter_start, tx_start.elapsed())
                .await?;
        }

        Ok(self.core.summary.clone())
    }

    /// Submit until a worker queue accepts the job. Returns false when the
    /// stream was stopped while retrying.
    async fn submit(&mut self, mut job: Job<D::Frames>) -> Result<bool> {
        let (stream, segment) = (job.stream, job.segment);
        loop {
            match self.handle.submit(job).await {
                Ok(worker) => {
                    tracing::trace!(stream, segment, worker, "job submitted");
                    return Ok(true);
                }
                Err(SubmitError::QueueFull { worker, job: back }) => {
                    self.core.summary.queue_full_retries += 1;
                    self.core.stats.queue_full_retry();
                    tracing::debug!(stream, segment, worker, "worker queue full, retrying");
                    if !self.core.is_live() {
                        return Ok(false);
                    }
                    let backoff = self.core.plan.backoff;
                    self.core.pause(backoff).await?;
                    job = *back;
                }
                Err(SubmitError::Closed { .. }) => {
                    if self.core.boundary.is_aborted() {
                        return Err(SchedError::Aborted(stream));
                    }
                    return Err(SchedError::SchedulerClosed { stream, segment });
                }
            }
        }
    }
}

/// Decodes and encodes inline, one segment at a time, without a scheduler
pub struct DirectSession<D: DecodeSession, E: EncodeSession<Frames = D::Frames>> {
    core: SessionCore<D>,
    encoder: Option<E>,
}

impl<D, E> DirectSession<D, E>
where
    D: DecodeSession,
    E: EncodeSession<Frames = D::Frames>,
{
    /// Open a decoder and an encoder on device `stream mod devices`
    pub fn open<G>(
        engine: &G,
        accel: Accel,
        stream: StreamId,
        devices: &[DeviceId],
        plan: Arc<SessionPlan>,
        boundary: ErrorBoundary,
        stats: Arc<RunStats>,
    ) -> Result<Self>
    where
        G: Engine<Decoder = D, Encoder = E, Frames = D::Frames>,
    {
        let assignment = direct_assignment(accel, stream, devices)?;
        let encoder = engine
            .new_encoder(accel, assignment.device.as_ref())
            .map_err(|source| SchedError::EngineSetup {
                role: format!("encoder for session {}", stream),
                source,
            })?;
        let core = SessionCore::open(engine, accel, stream, assignment, plan, boundary, stats)?;
        Ok(Self {
            core,
            encoder: Some(encoder),
        })
    }

    pub async fn run(mut self) -> Result<SessionSummary> {
        let result = self.drive().await;
        self.core.close().await;
        if let Some(encoder) = self.encoder.take() {
            stop_blocking(encoder, E::stop).await;
        }
        result
    }

    async fn drive(&mut self) -> Result<SessionSummary> {
        let plan = self.core.plan.clone();
        let stream = self.core.stream;

        for (segment, seg) in plan.segments.iter().take(plan.limit).enumerate() {
            let iter_start = Instant::now();
            if !self.core.is_live() {
                return self.core.halt();
            }

            let tx_start = Instant::now();
            let Some(decoded) = self.core.decode(segment, &seg.path).await? else {
                return self.core.halt();
            };

            let encoder = self
                .encoder
                .take()
                .ok_or_else(|| SchedError::Task(format!("encoder of session {} is gone", stream)))?;
            let outputs = plan.naming.output_specs(&plan.profiles, stream, segment);
            let (encoder, result, encode_time) =
                encode_blocking(encoder, decoded.frames, outputs).await?;
            self.encoder = Some(encoder);

            if let Err(source) = result {
                let err = SchedError::Encode {
                    stream,
                    segment,
                    worker: self.core.assignment.worker,
                    source,
                };
                return match self.core.boundary.report(err) {
                    FailureAction::AbortRun => Err(SchedError::Aborted(stream)),
                    FailureAction::ContainStream(_) => self.core.halt(),
                };
            }
            self.core.stats.encode_completed(encode_time);

            self.core
                .finish_segment(segment, seg, iter_start, tx_start.elapsed())
                .await?;
        }

        Ok(self.core.summary.clone())
    }
}

/// Device for a direct session: `stream mod devices` with hardware
/// acceleration, none in software mode.
pub fn direct_assignment(
    accel: Accel,
    stream: StreamId,
    devices: &[DeviceId],
) -> std::result::Result<Assignment, crate::error::ConfigError> {
    match accel {
        Accel::Software => Ok(Assignment {
            worker: 0,
            device: None,
        }),
        Accel::Nvidia if devices.is_empty() => Err(crate::error::ConfigError::NoDevices),
        Accel::Nvidia => {
            let worker = stream % devices.len();
            Ok(Assignment {
                worker,
                device: Some(devices[worker].clone()),
            })
        }
    }
}
