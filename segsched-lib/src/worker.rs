//! Encode workers
//!
//! One worker per device. A worker owns its encoder session outright and runs
//! one job at a time from its bounded queue, emitting exactly one completion
//! report per successful job.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::boundary::{ErrorBoundary, FailureAction};
use crate::engine::{encode_blocking, stop_blocking, EncodeSession};
use crate::error::{SchedError, SubmitError};
use crate::routing::{estimate_job_kb, WorkerGauge, WorkerLoad};
use crate::types::{CompletionReport, DeviceId, Job};

/// Scheduler-side end of a worker
pub(crate) struct WorkerHandle<F> {
    pub index: usize,
    pub device: Option<DeviceId>,
    tx: mpsc::Sender<Job<F>>,
    gauge: Arc<WorkerGauge>,
}

impl<F> WorkerHandle<F> {
    /// Hand a job to the worker without waiting. A full queue gives the job
    /// back.
    pub fn try_enqueue(&self, job: Job<F>) -> Result<(), SubmitError<F>> {
        let kb = estimate_job_kb(&job.outputs);
        self.gauge.job_enqueued(kb);
        match self.tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.gauge.job_rejected(kb);
                Err(SubmitError::QueueFull {
                    worker: self.index,
                    job: Box::new(job),
                })
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                self.gauge.job_rejected(kb);
                Err(SubmitError::Closed {
                    job: Some(Box::new(job)),
                })
            }
        }
    }

    pub fn load(&self) -> WorkerLoad {
        self.gauge.load(self.index)
    }

    pub fn gauge(&self) -> &Arc<WorkerGauge> {
        &self.gauge
    }
}

/// Final figures of one worker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub worker: usize,
    pub device: Option<DeviceId>,
    pub completed: u64,
    pub failed: u64,
    /// Jobs skipped because their stream had already been stopped
    pub dropped: u64,
    pub busy: Duration,
}

pub(crate) struct EncodeWorker<E: EncodeSession> {
    index: usize,
    device: Option<DeviceId>,
    encoder: Option<E>,
    rx: mpsc::Receiver<Job<E::Frames>>,
    completions: mpsc::Sender<CompletionReport>,
    gauge: Arc<WorkerGauge>,
    boundary: ErrorBoundary,
    drain: CancellationToken,
}

impl<E: EncodeSession> EncodeWorker<E> {
    /// Create the worker and the handle the scheduler routes through
    pub fn new(
        index: usize,
        device: Option<DeviceId>,
        encoder: E,
        capacity: usize,
        completions: mpsc::Sender<CompletionReport>,
        boundary: ErrorBoundary,
        drain: CancellationToken,
    ) -> (Self, WorkerHandle<E::Frames>) {
        let (tx, rx) = mpsc::channel(capacity);
        let gauge = Arc::new(WorkerGauge::default());
        let handle = WorkerHandle {
            index,
            device: device.clone(),
            tx,
            gauge: gauge.clone(),
        };
        let worker = Self {
            index,
            device,
            encoder: Some(encoder),
            rx,
            completions,
            gauge,
            boundary,
            drain,
        };
        (worker, handle)
    }

    pub async fn run(mut self) -> WorkerSummary {
        let abort = self.boundary.abort_token();
        let drain = self.drain.clone();
        let mut draining = false;
        let mut summary = WorkerSummary {
            worker: self.index,
            device: self.device.clone(),
            ..Default::default()
        };

        tracing::debug!(worker = self.index, device = ?self.device, "encode worker started");

        loop {
            let job = tokio::select! {
                biased;
                _ = abort.cancelled() => {
                    tracing::debug!(worker = self.index, "encode worker aborted");
                    break;
                }
                _ = drain.cancelled(), if !draining => {
                    // Queued jobs are still delivered after close
                    draining = true;
                    self.rx.close();
                    continue;
                }
                job = self.rx.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            if !self.process(job, &mut summary).await {
                break;
            }
        }

        if let Some(encoder) = self.encoder.take() {
            stop_blocking(encoder, E::stop).await;
        }

        tracing::debug!(
            worker = self.index,
            completed = summary.completed,
            failed = summary.failed,
            dropped = summary.dropped,
            "encode worker stopped"
        );
        summary
    }

    /// Run one job. Returns false when the worker must stop.
    async fn process(&mut self, job: Job<E::Frames>, summary: &mut WorkerSummary) -> bool {
        let kb = estimate_job_kb(&job.outputs);
        self.gauge.job_started();

        if self.boundary.is_failed(job.stream) {
            tracing::debug!(
                worker = self.index,
                stream = job.stream,
                segment = job.segment,
                "dropping job of stopped stream"
            );
            self.gauge.job_finished(kb, false);
            summary.dropped += 1;
            return true;
        }

        let Some(encoder) = self.encoder.take() else {
            self.gauge.job_finished(kb, false);
            return false;
        };

        let Job {
            stream,
            segment,
            payload,
            outputs,
            created_at,
            ..
        } = job;
        let queued_for = created_at.elapsed();

        let (encoder, result, encode_time) = match encode_blocking(encoder, payload, outputs).await {
            Ok(done) => done,
            Err(e) => {
                self.gauge.job_finished(kb, false);
                self.boundary.report(SchedError::Task(format!(
                    "encoder on worker {} panicked: {}",
                    self.index, e
                )));
                return false;
            }
        };
        self.encoder = Some(encoder);
        summary.busy += encode_time;

        match result {
            Ok(outcome) => {
                self.gauge.job_finished(kb, true);
                summary.completed += 1;
                tracing::trace!(
                    worker = self.index,
                    stream,
                    segment,
                    frames = outcome.frames,
                    encode_ms = encode_time.as_millis() as u64,
                    queued_ms = queued_for.as_millis() as u64,
                    "segment encoded"
                );
                let report = CompletionReport {
                    stream,
                    segment,
                    worker: self.index,
                    encode_time,
                };
                self.completions.send(report).await.is_ok()
            }
            Err(source) => {
                self.gauge.job_finished(kb, false);
                summary.failed += 1;
                let action = self.boundary.report(SchedError::Encode {
                    stream,
                    segment,
                    worker: self.index,
                    source,
                });
                matches!(action, FailureAction::ContainStream(_))
            }
        }
    }
}
