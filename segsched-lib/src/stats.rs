//! Run statistics
//!
//! Sessions record one `SegmentRecord` per transcoded segment. Records are
//! forwarded to an optional sink as they happen and folded into run totals.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use std::fmt;
use std::time::Duration;

use crate::error::SchedError;
use crate::types::{SegmentIndex, StreamId};

/// One transcoded segment
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRecord {
    pub timestamp: DateTime<Local>,
    pub session: StreamId,
    pub segment: SegmentIndex,
    /// Nominal duration from the manifest
    pub duration: Duration,
    pub transcode_time: Duration,
}

impl SegmentRecord {
    /// Transcoding kept up with playback
    pub fn is_real_time(&self) -> bool {
        self.transcode_time <= self.duration
    }
}

pub type RecordSink = Box<dyn Fn(&SegmentRecord) + Send + Sync>;

#[derive(Debug, Default, Clone)]
struct Totals {
    segments: u64,
    real_time_segments: u64,
    source_duration: Duration,
    transcode_duration: Duration,
    backpressure_waits: u64,
    queue_full_retries: u64,
    completions: u64,
    encode_time: Duration,
}

/// Shared accumulator for one run
#[derive(Default)]
pub struct RunStats {
    totals: Mutex<Totals>,
    sink: Option<RecordSink>,
}

impl fmt::Debug for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunStats")
            .field("totals", &*self.totals.lock())
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(sink: RecordSink) -> Self {
        Self {
            totals: Mutex::new(Totals::default()),
            sink: Some(sink),
        }
    }

    pub fn record_segment(&self, record: SegmentRecord) {
        if let Some(sink) = &self.sink {
            sink(&record);
        }
        let mut t = self.totals.lock();
        t.segments += 1;
        if record.is_real_time() {
            t.real_time_segments += 1;
        }
        t.source_duration += record.duration;
        t.transcode_duration += record.transcode_time;
    }

    pub fn backpressure_wait(&self) {
        self.totals.lock().backpressure_waits += 1;
    }

    pub fn queue_full_retry(&self) {
        self.totals.lock().queue_full_retries += 1;
    }

    pub fn encode_completed(&self, encode_time: Duration) {
        self.add_encodes(1, encode_time);
    }

    /// Fold in encode figures counted elsewhere (the scheduler report)
    pub fn add_encodes(&self, completions: u64, encode_time: Duration) {
        let mut t = self.totals.lock();
        t.completions += completions;
        t.encode_time += encode_time;
    }

    pub fn segments(&self) -> u64 {
        self.totals.lock().segments
    }

    /// Totals and ratios. A run without segments or without source duration
    /// has nothing to report.
    pub fn summary(&self) -> Result<RunSummary, SchedError> {
        let t = self.totals.lock().clone();
        if t.segments == 0 || t.source_duration.is_zero() {
            return Err(SchedError::EmptyRun);
        }
        Ok(RunSummary {
            segments: t.segments,
            real_time_segments: t.real_time_segments,
            real_time_ratio: t.real_time_segments as f64 / t.segments as f64,
            source_duration: t.source_duration,
            transcode_duration: t.transcode_duration,
            duration_ratio: t.transcode_duration.as_secs_f64() / t.source_duration.as_secs_f64(),
            backpressure_waits: t.backpressure_waits,
            queue_full_retries: t.queue_full_retries,
            completions: t.completions,
            avg_encode_time: mean_duration(t.encode_time, t.completions),
        })
    }
}

/// `total / count`, None for an empty count
pub(crate) fn mean_duration(total: Duration, count: u64) -> Option<Duration> {
    match count {
        0 => None,
        n => Some(total / u32::try_from(n).unwrap_or(u32::MAX)),
    }
}

/// End-of-run figures
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub segments: u64,
    pub real_time_segments: u64,
    pub real_time_ratio: f64,
    pub source_duration: Duration,
    pub transcode_duration: Duration,
    /// Transcode time over source time; below 1.0 is faster than real time
    pub duration_ratio: f64,
    pub backpressure_waits: u64,
    pub queue_full_retries: u64,
    pub completions: u64,
    pub avg_encode_time: Option<Duration>,
}
