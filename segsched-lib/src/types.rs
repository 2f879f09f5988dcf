//! Core data types shared by drivers, the scheduler and workers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

use crate::profile::OutputSpec;

/// Stream identifier, `0..concurrent_sessions`
pub type StreamId = usize;

/// Index of a segment within the input manifest
pub type SegmentIndex = usize;

/// Hardware acceleration mode handed to the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accel {
    #[default]
    Software,
    Nvidia,
}

impl fmt::Display for Accel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accel::Software => f.write_str("software"),
            Accel::Nvidia => f.write_str("nvidia"),
        }
    }
}

/// Opaque device identifier supplied by the caller (e.g. a GPU index)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse a comma-separated device list. An empty string means no devices;
/// empty entries inside a non-empty list are rejected.
pub fn parse_device_list(list: &str) -> Result<Vec<DeviceId>, crate::error::ConfigError> {
    if list.trim().is_empty() {
        return Ok(Vec::new());
    }
    list.split(',')
        .map(|id| {
            let id = id.trim();
            if id.is_empty() {
                Err(crate::error::ConfigError::EmptyDeviceId(list.to_string()))
            } else {
                Ok(DeviceId::new(id))
            }
        })
        .collect()
}

/// Worker a stream is pinned to, with the device that worker owns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub worker: usize,
    pub device: Option<DeviceId>,
}

/// One unit of encode work: a decoded segment plus the outputs to produce.
///
/// The decoded payload is moved in from the decode stage and consumed by
/// exactly one worker.
pub struct Job<F> {
    pub stream: StreamId,
    pub segment: SegmentIndex,
    pub device: Option<DeviceId>,
    pub payload: F,
    pub outputs: Vec<OutputSpec>,
    pub created_at: Instant,
}

impl<F> Job<F> {
    pub fn new(
        stream: StreamId,
        segment: SegmentIndex,
        device: Option<DeviceId>,
        payload: F,
        outputs: Vec<OutputSpec>,
    ) -> Self {
        Self {
            stream,
            segment,
            device,
            payload,
            outputs,
            created_at: Instant::now(),
        }
    }
}

/// Emitted by a worker exactly once per finished job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionReport {
    pub stream: StreamId,
    pub segment: SegmentIndex,
    pub worker: usize,
    pub encode_time: Duration,
}
