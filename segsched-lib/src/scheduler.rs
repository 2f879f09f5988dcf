//! Encode scheduler
//!
//! A single dispatch loop owns the worker pool and is the only writer of
//! encode cursors. It reacts to two kinds of events: job submissions from
//! session drivers, which it routes to a worker queue without ever blocking
//! on it, and completion reports from workers, which advance the stream's
//! encode cursor.
//!
//! Shutdown is drain-then-terminate: cancelling the shutdown token closes
//! intake, the loop forwards what was already submitted, then tells every
//! worker to drain. The loop ends once the last worker has dropped its
//! completion sender.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::boundary::ErrorBoundary;
use crate::config::SchedulerConfig;
use crate::cursor::{CursorSnapshot, CursorStore};
use crate::engine::Engine;
use crate::error::{ConfigError, Result, SchedError, SubmitError};
use crate::routing::{Router, WorkerLoad};
use crate::types::{Accel, Assignment, CompletionReport, DeviceId, Job, SegmentIndex, StreamId};
use crate::worker::{EncodeWorker, WorkerHandle, WorkerSummary};

type Ack<F> = oneshot::Sender<std::result::Result<usize, SubmitError<F>>>;

struct Submission<F> {
    job: Job<F>,
    ack: Ack<F>,
}

/// Worker view shared with drivers for affinity lookups
#[derive(Debug, Clone)]
struct PoolView {
    devices: Arc<[Option<DeviceId>]>,
    gauges: Arc<[Arc<crate::routing::WorkerGauge>]>,
}

impl PoolView {
    fn loads(&self) -> Vec<WorkerLoad> {
        self.gauges
            .iter()
            .enumerate()
            .map(|(worker, gauge)| gauge.load(worker))
            .collect()
    }
}

/// Cloneable front end used by session drivers
pub struct SchedulerHandle<F> {
    intake: mpsc::Sender<Submission<F>>,
    cursors: Arc<CursorStore>,
    router: Arc<Router>,
    pool: PoolView,
}

impl<F> Clone for SchedulerHandle<F> {
    fn clone(&self) -> Self {
        Self {
            intake: self.intake.clone(),
            cursors: self.cursors.clone(),
            router: self.router.clone(),
            pool: self.pool.clone(),
        }
    }
}

impl<F: Send + 'static> SchedulerHandle<F> {
    /// Submit a job. Resolves once the job sits in a worker queue and returns
    /// that worker's index. A full worker queue hands the job back.
    pub async fn submit(&self, job: Job<F>) -> std::result::Result<usize, SubmitError<F>> {
        let (ack, rx) = oneshot::channel();
        if let Err(mpsc::error::SendError(sub)) = self.intake.send(Submission { job, ack }).await {
            return Err(SubmitError::Closed {
                job: Some(Box::new(sub.job)),
            });
        }
        rx.await.unwrap_or(Err(SubmitError::Closed { job: None }))
    }

    /// Worker and device for `stream`, pinning it on first use. The
    /// dispatch loop routes through the same pin table.
    pub fn affinity(&self, stream: StreamId) -> Assignment {
        let worker = self.router.worker_for(stream, || self.pool.loads());
        Assignment {
            worker,
            device: self.pool.devices.get(worker).cloned().flatten(),
        }
    }

    pub fn cursors(&self) -> &Arc<CursorStore> {
        &self.cursors
    }

    pub fn lag(&self, stream: StreamId) -> usize {
        self.cursors.lag(stream)
    }

    pub fn workers(&self) -> usize {
        self.pool.devices.len()
    }

    pub fn is_closed(&self) -> bool {
        self.intake.is_closed()
    }
}

/// Final state of the scheduler after shutdown
#[derive(Debug, Clone, Default)]
pub struct SchedulerReport {
    pub cursors: Vec<CursorSnapshot>,
    pub dispatched: u64,
    pub queue_full: u64,
    pub completions: u64,
    pub rejected_completions: u64,
    pub encode_time: Duration,
    pub workers: Vec<WorkerSummary>,
}

impl SchedulerReport {
    pub fn avg_encode_time(&self) -> Option<Duration> {
        crate::stats::mean_duration(self.encode_time, self.completions)
    }

    pub fn encoded(&self, stream: StreamId) -> Option<SegmentIndex> {
        self.cursors
            .iter()
            .find(|c| c.stream == stream)
            .and_then(|c| c.encoded)
    }
}

/// Running scheduler: the dispatch loop plus its workers
pub struct EncodeScheduler<F> {
    handle: SchedulerHandle<F>,
    shutdown: CancellationToken,
    task: JoinHandle<SchedulerReport>,
}

/// Devices the pool runs on: one worker per device with hardware
/// acceleration, `software_workers` device-less workers otherwise.
pub fn worker_devices(
    accel: Accel,
    devices: &[DeviceId],
    config: &SchedulerConfig,
) -> std::result::Result<Vec<Option<DeviceId>>, ConfigError> {
    match accel {
        Accel::Nvidia if devices.is_empty() => Err(ConfigError::NoDevices),
        Accel::Nvidia => Ok(devices.iter().cloned().map(Some).collect()),
        Accel::Software => Ok(vec![None; config.software_workers.max(1)]),
    }
}

impl<F: Send + 'static> EncodeScheduler<F> {
    /// Open one encoder per worker and start the pool and dispatch loop.
    /// Must be called inside a tokio runtime.
    pub fn start<E>(
        engine: &E,
        accel: Accel,
        devices: &[DeviceId],
        config: &SchedulerConfig,
        boundary: ErrorBoundary,
    ) -> Result<Self>
    where
        E: Engine<Frames = F>,
    {
        config.validate()?;
        let worker_devices = worker_devices(accel, devices, config)?;

        let (completion_tx, completion_rx) =
            mpsc::channel(config.worker_queue_capacity * worker_devices.len());
        let (intake_tx, intake_rx) = mpsc::channel(config.intake_capacity);
        let drain = CancellationToken::new();

        let mut workers = Vec::with_capacity(worker_devices.len());
        let mut handles = Vec::with_capacity(worker_devices.len());
        for (index, device) in worker_devices.iter().enumerate() {
            let encoder = engine
                .new_encoder(accel, device.as_ref())
                .map_err(|source| SchedError::EngineSetup {
                    role: format!("encoder on worker {}", index),
                    source,
                })?;
            let (worker, handle) = EncodeWorker::new(
                index,
                device.clone(),
                encoder,
                config.worker_queue_capacity,
                completion_tx.clone(),
                boundary.clone(),
                drain.clone(),
            );
            workers.push(worker);
            handles.push(handle);
        }
        // Only workers may hold completion senders
        drop(completion_tx);

        let worker_tasks: Vec<JoinHandle<WorkerSummary>> =
            workers.into_iter().map(|w| tokio::spawn(w.run())).collect();

        let cursors = Arc::new(CursorStore::new());
        let router = Arc::new(Router::new(config.routing.into_policy()));
        let pool = PoolView {
            devices: worker_devices.into(),
            gauges: handles.iter().map(|h| h.gauge().clone()).collect(),
        };

        tracing::info!(
            workers = handles.len(),
            %accel,
            routing = router.policy_name(),
            failure_policy = boundary.policy_name(),
            max_lag = config.max_lag,
            "encode scheduler started"
        );

        let shutdown = CancellationToken::new();
        let dispatch = DispatchLoop {
            intake: intake_rx,
            completions: completion_rx,
            workers: handles,
            router: router.clone(),
            cursors: cursors.clone(),
            boundary,
            shutdown: shutdown.clone(),
            drain,
            report: SchedulerReport::default(),
        };
        let task = tokio::spawn(dispatch.run(worker_tasks));

        Ok(Self {
            handle: SchedulerHandle {
                intake: intake_tx,
                cursors,
                router,
                pool,
            },
            shutdown,
            task,
        })
    }

    pub fn handle(&self) -> SchedulerHandle<F> {
        self.handle.clone()
    }

    pub fn cursors(&self) -> Arc<CursorStore> {
        self.handle.cursors.clone()
    }

    /// Close intake, drain every worker and wait for the last completion
    pub async fn shutdown(self) -> Result<SchedulerReport> {
        self.shutdown.cancel();
        let report = self.task.await?;
        tracing::info!(
            dispatched = report.dispatched,
            completions = report.completions,
            queue_full = report.queue_full,
            "encode scheduler stopped"
        );
        Ok(report)
    }
}

struct DispatchLoop<F> {
    intake: mpsc::Receiver<Submission<F>>,
    completions: mpsc::Receiver<CompletionReport>,
    workers: Vec<WorkerHandle<F>>,
    router: Arc<Router>,
    cursors: Arc<CursorStore>,
    boundary: ErrorBoundary,
    shutdown: CancellationToken,
    drain: CancellationToken,
    report: SchedulerReport,
}

impl<F: Send + 'static> DispatchLoop<F> {
    async fn run(mut self, worker_tasks: Vec<JoinHandle<WorkerSummary>>) -> SchedulerReport {
        let abort = self.boundary.abort_token();
        let shutdown = self.shutdown.clone();
        let mut closing = false;
        let mut intake_open = true;

        loop {
            tokio::select! {
                _ = abort.cancelled() => {
                    tracing::debug!("dispatch loop aborted");
                    break;
                }
                _ = shutdown.cancelled(), if !closing => {
                    tracing::debug!("closing scheduler intake");
                    closing = true;
                    self.intake.close();
                }
                sub = self.intake.recv(), if intake_open => match sub {
                    Some(sub) => self.dispatch(sub),
                    None => {
                        intake_open = false;
                        tracing::debug!("intake drained, draining workers");
                        self.drain.cancel();
                    }
                },
                report = self.completions.recv() => match report {
                    Some(report) => self.complete(report),
                    None => break,
                },
            }
        }

        // Unblock workers still trying to report
        self.completions.close();
        self.intake.close();

        for task in worker_tasks {
            match task.await {
                Ok(summary) => self.report.workers.push(summary),
                Err(e) => tracing::error!("encode worker task failed: {}", e),
            }
        }
        self.report.cursors = self.cursors.snapshot();
        self.report
    }

    fn dispatch(&mut self, sub: Submission<F>) {
        let Submission { job, ack } = sub;
        let (stream, segment) = (job.stream, job.segment);

        let workers = &self.workers;
        let mut index = self.router.worker_for(stream, || {
            workers.iter().map(|w| w.load()).collect()
        });
        if index >= self.workers.len() {
            tracing::warn!(stream, worker = index, "routing picked a missing worker");
            index %= self.workers.len();
        }

        let result = self.workers[index].try_enqueue(job).map(|()| index);
        match &result {
            Ok(worker) => {
                self.report.dispatched += 1;
                tracing::trace!(stream, segment, worker, "job dispatched");
            }
            Err(SubmitError::QueueFull { worker, .. }) => {
                self.report.queue_full += 1;
                tracing::debug!(stream, segment, worker, "worker queue full");
            }
            Err(SubmitError::Closed { .. }) => {
                tracing::warn!(stream, segment, worker = index, "worker queue closed");
            }
        }
        // A gone submitter just loses its answer
        let _ = ack.send(result);
    }

    fn complete(&mut self, report: CompletionReport) {
        match self.cursors.record_encoded(report.stream, report.segment) {
            Ok(()) => {
                self.report.completions += 1;
                self.report.encode_time += report.encode_time;
                tracing::trace!(
                    stream = report.stream,
                    segment = report.segment,
                    worker = report.worker,
                    lag = self.cursors.lag(report.stream),
                    "encode cursor advanced"
                );
            }
            Err(e) => {
                self.report.rejected_completions += 1;
                tracing::warn!(worker = report.worker, "rejected completion: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::fixtures::{test_outputs, MockEngine, MockFrames};

    #[test]
    fn test_worker_devices() {
        let config = SchedulerConfig::default();
        assert_eq!(
            worker_devices(Accel::Nvidia, &[], &config),
            Err(ConfigError::NoDevices)
        );
        let devices = vec![DeviceId::new("0"), DeviceId::new("1")];
        assert_eq!(
            worker_devices(Accel::Nvidia, &devices, &config).unwrap(),
            vec![Some(DeviceId::new("0")), Some(DeviceId::new("1"))]
        );
        let config = SchedulerConfig {
            software_workers: 3,
            ..Default::default()
        };
        assert_eq!(
            worker_devices(Accel::Software, &devices, &config).unwrap(),
            vec![None, None, None]
        );
    }

    #[tokio::test]
    async fn test_start_without_devices_is_config_error() {
        let engine = MockEngine::new();
        let result = EncodeScheduler::start(
            &engine,
            Accel::Nvidia,
            &[],
            &SchedulerConfig::default(),
            ErrorBoundary::default(),
        );
        assert!(matches!(
            result,
            Err(SchedError::Config(ConfigError::NoDevices))
        ));
        assert_eq!(engine.encoders_opened(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_submit_complete_and_shutdown() {
        let engine = MockEngine::new();
        let devices = vec![DeviceId::new("a"), DeviceId::new("b")];
        let scheduler = EncodeScheduler::start(
            &engine,
            Accel::Nvidia,
            &devices,
            &SchedulerConfig::default(),
            ErrorBoundary::default(),
        )
        .unwrap();
        let handle = scheduler.handle();

        for stream in 0..3 {
            handle.cursors().register(stream);
            let assignment = handle.affinity(stream);
            assert_eq!(assignment.worker, stream % 2);
            for segment in 0..4 {
                handle.cursors().record_decoded(stream, segment).unwrap();
                let job = Job::new(
                    stream,
                    segment,
                    assignment.device.clone(),
                    MockFrames::new(stream, segment),
                    test_outputs(),
                );
                assert_eq!(handle.submit(job).await.unwrap(), stream % 2);
            }
        }

        let report = scheduler.shutdown().await.unwrap();
        assert_eq!(report.dispatched, 12);
        assert_eq!(report.completions, 12);
        assert_eq!(report.rejected_completions, 0);
        for stream in 0..3 {
            assert_eq!(report.encoded(stream), Some(3));
        }
        assert_eq!(report.workers.len(), 2);
        assert_eq!(report.workers[0].completed, 8);
        assert_eq!(report.workers[1].completed, 4);
        assert_eq!(engine.encoders_stopped(), 2);
        assert!(handle.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_submit_after_shutdown_is_closed() {
        let engine = MockEngine::new();
        let scheduler = EncodeScheduler::start(
            &engine,
            Accel::Software,
            &[],
            &SchedulerConfig::default(),
            ErrorBoundary::default(),
        )
        .unwrap();
        let handle = scheduler.handle();
        scheduler.shutdown().await.unwrap();

        handle.cursors().register(0);
        let job = Job::new(0, 0, None, MockFrames::new(0, 0), test_outputs());
        assert!(matches!(
            handle.submit(job).await,
            Err(SubmitError::Closed { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_queue_full_is_reported_to_submitter() {
        let engine = MockEngine::new().with_encode_delay(Duration::from_millis(200));
        let config = SchedulerConfig {
            worker_queue_capacity: 1,
            ..Default::default()
        };
        let scheduler = EncodeScheduler::start(
            &engine,
            Accel::Software,
            &[],
            &config,
            ErrorBoundary::default(),
        )
        .unwrap();
        let handle = scheduler.handle();
        handle.cursors().register(0);

        let mut full = 0;
        for segment in 0..4 {
            let job = Job::new(0, segment, None, MockFrames::new(0, segment), test_outputs());
            match handle.submit(job).await {
                Ok(_) => {}
                Err(SubmitError::QueueFull { worker, job }) => {
                    assert_eq!(worker, 0);
                    assert_eq!(job.segment, segment);
                    full += 1;
                }
                Err(e) => panic!("unexpected {:?}", e),
            }
        }
        // One running, one queued, the rest bounce
        assert!(full >= 1);

        let report = scheduler.shutdown().await.unwrap();
        assert_eq!(report.queue_full, full);
        assert_eq!(report.completions + full, 4);
    }
}
