//! Stream-to-worker routing
//!
//! The router pins every stream to one worker the first time the stream asks,
//! so decode and encode for a stream always happen on the same device. The
//! choice itself is delegated to a `RoutingPolicy`.

use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::config::RoutingKind;
use crate::profile::OutputSpec;
use crate::types::StreamId;

/// Load figures a policy may look at
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerLoad {
    pub worker: usize,
    /// Estimated memory held by queued and running jobs, in KiB
    pub in_flight_kb: u64,
    /// Jobs waiting in the worker's queue
    pub queued: usize,
}

/// Live counters a worker publishes for routing and reporting
#[derive(Debug, Default)]
pub struct WorkerGauge {
    in_flight_kb: AtomicU64,
    queued: AtomicUsize,
    completed: AtomicU64,
}

impl WorkerGauge {
    pub(crate) fn job_enqueued(&self, kb: u64) {
        self.queued.fetch_add(1, Ordering::AcqRel);
        self.in_flight_kb.fetch_add(kb, Ordering::AcqRel);
    }

    /// Undo `job_enqueued` when the queue refused the job
    pub(crate) fn job_rejected(&self, kb: u64) {
        self.queued.fetch_sub(1, Ordering::AcqRel);
        self.in_flight_kb.fetch_sub(kb, Ordering::AcqRel);
    }

    pub(crate) fn job_started(&self) {
        self.queued.fetch_sub(1, Ordering::AcqRel);
    }

    /// `completed` is false for jobs that were dropped or failed
    pub(crate) fn job_finished(&self, kb: u64, completed: bool) {
        self.in_flight_kb.fetch_sub(kb, Ordering::AcqRel);
        if completed {
            self.completed.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn load(&self, worker: usize) -> WorkerLoad {
        WorkerLoad {
            worker,
            in_flight_kb: self.in_flight_kb.load(Ordering::Acquire),
            queued: self.queued.load(Ordering::Acquire),
        }
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }
}

/// Picks the worker for a stream that has not been pinned yet
pub trait RoutingPolicy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// `loads` is never empty and is indexed by worker
    fn assign(&self, stream: StreamId, loads: &[WorkerLoad]) -> usize;
}

/// `stream mod workers`
#[derive(Debug, Default, Clone, Copy)]
pub struct ModuloAffinity;

impl RoutingPolicy for ModuloAffinity {
    fn name(&self) -> &'static str {
        "affinity"
    }

    fn assign(&self, stream: StreamId, loads: &[WorkerLoad]) -> usize {
        stream % loads.len()
    }
}

/// Worker with the smallest estimated in-flight memory; ties go to the lowest
/// index. Experimental: it does not bound the total, it only spreads it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastLoaded;

impl RoutingPolicy for LeastLoaded {
    fn name(&self) -> &'static str {
        "least_loaded"
    }

    fn assign(&self, _stream: StreamId, loads: &[WorkerLoad]) -> usize {
        loads
            .iter()
            .enumerate()
            .min_by_key(|(i, l)| (l.in_flight_kb, *i))
            .map(|(i, _)| i)
            .unwrap_or(0)
    }
}

impl RoutingKind {
    pub fn into_policy(self) -> Box<dyn RoutingPolicy> {
        match self {
            RoutingKind::Affinity => Box::new(ModuloAffinity),
            RoutingKind::LeastLoaded => Box::new(LeastLoaded),
        }
    }
}

/// Policy plus the per-stream pin table
#[derive(Debug)]
pub struct Router {
    policy: Box<dyn RoutingPolicy>,
    pins: DashMap<StreamId, usize>,
}

impl Router {
    pub fn new(policy: Box<dyn RoutingPolicy>) -> Self {
        Self {
            policy,
            pins: DashMap::new(),
        }
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Worker for `stream`, assigning and pinning it on first use.
    /// `loads` must hold one entry per worker and is only consulted when the
    /// stream is not pinned yet.
    pub fn worker_for(&self, stream: StreamId, loads: impl FnOnce() -> Vec<WorkerLoad>) -> usize {
        *self.pins.entry(stream).or_insert_with(|| {
            let loads = loads();
            let worker = self.policy.assign(stream, &loads);
            tracing::debug!(
                stream,
                worker,
                policy = self.policy.name(),
                "pinned stream to worker"
            );
            worker
        })
    }

    pub fn pinned(&self, stream: StreamId) -> Option<usize> {
        self.pins.get(&stream).map(|w| *w)
    }
}

/// Rough device memory estimate for one job, in KiB: three bytes per output
/// pixel per frame-per-second across all renditions.
pub fn estimate_job_kb(outputs: &[OutputSpec]) -> u64 {
    let pixels: u64 = outputs
        .iter()
        .map(|o| {
            let p = &o.profile;
            u64::from(p.width) * u64::from(p.height) * u64::from(p.framerate)
        })
        .sum();
    pixels * 3 / 1024
}
