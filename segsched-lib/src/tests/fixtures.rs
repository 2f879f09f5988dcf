//! Test fixtures
//!
//! A scripted engine that never touches media: decoding a segment yields its
//! index parsed from the file name, tagged with the stream that decoded it.
//! Encoding sleeps for a configurable time. Counters record what the pipeline
//! asked of it.

use parking_lot::Mutex;
use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::SchedulerConfig;
use crate::engine::{DecodeMeta, DecodeSession, Decoded, EncodeOutcome, EncodeSession, Engine};
use crate::error::EngineError;
use crate::manifest::{MediaPlaylist, Segment};
use crate::profile::{lookup_preset, OutputNaming, OutputSpec, ProfileSet};
use crate::run::{PipelineMode, RunPlan};
use crate::types::{Accel, DeviceId};

#[derive(Debug, Clone, Default)]
struct Script {
    decode_delay: Duration,
    encode_delay: Duration,
    fail_decode_at: Option<usize>,
    /// (encoder ordinal, segment)
    fail_encode_at: Option<(usize, usize)>,
}

#[derive(Debug, Default)]
struct Counters {
    decoders_opened: AtomicUsize,
    encoders_opened: AtomicUsize,
    decoders_stopped: AtomicUsize,
    encoders_stopped: AtomicUsize,
    decodes: AtomicUsize,
    active_total: AtomicUsize,
    max_active_total: AtomicUsize,
    max_active_per_encoder: AtomicUsize,
    /// (encoder ordinal, frames) in completion order
    encodes: Mutex<Vec<(usize, MockFrames)>>,
    decoder_devices: Mutex<Vec<Option<DeviceId>>>,
    encoder_devices: Mutex<Vec<Option<DeviceId>>>,
}

/// Decoded payload: the stream that decoded it and the segment index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockFrames {
    pub stream: usize,
    pub segment: usize,
}

impl MockFrames {
    pub fn new(stream: usize, segment: usize) -> Self {
        Self { stream, segment }
    }
}

/// Scripted engine; clones share counters
#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    script: Script,
    counters: Arc<Counters>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_encode_delay(mut self, delay: Duration) -> Self {
        self.script.encode_delay = delay;
        self
    }

    pub fn with_decode_delay(mut self, delay: Duration) -> Self {
        self.script.decode_delay = delay;
        self
    }

    /// Every decoder fails on `segment`
    pub fn fail_decode_at(mut self, segment: usize) -> Self {
        self.script.fail_decode_at = Some(segment);
        self
    }

    /// The `encoder`-th opened encoder fails on `segment`
    pub fn fail_encode_at(mut self, encoder: usize, segment: usize) -> Self {
        self.script.fail_encode_at = Some((encoder, segment));
        self
    }

    pub fn decoders_opened(&self) -> usize {
        self.counters.decoders_opened.load(Ordering::SeqCst)
    }

    pub fn encoders_opened(&self) -> usize {
        self.counters.encoders_opened.load(Ordering::SeqCst)
    }

    pub fn decoders_stopped(&self) -> usize {
        self.counters.decoders_stopped.load(Ordering::SeqCst)
    }

    pub fn encoders_stopped(&self) -> usize {
        self.counters.encoders_stopped.load(Ordering::SeqCst)
    }

    pub fn decodes(&self) -> usize {
        self.counters.decodes.load(Ordering::SeqCst)
    }

    /// Successful encodes as (encoder ordinal, segment)
    pub fn encodes(&self) -> Vec<(usize, usize)> {
        self.counters
            .encodes
            .lock()
            .iter()
            .map(|&(encoder, frames)| (encoder, frames.segment))
            .collect()
    }

    /// Segments of `stream` in the order their encodes completed
    pub fn stream_encodes(&self, stream: usize) -> Vec<usize> {
        self.counters
            .encodes
            .lock()
            .iter()
            .filter(|(_, frames)| frames.stream == stream)
            .map(|(_, frames)| frames.segment)
            .collect()
    }

    /// Most encodes ever running at once across all encoders
    pub fn max_parallel_encodes(&self) -> usize {
        self.counters.max_active_total.load(Ordering::SeqCst)
    }

    /// Most encodes ever running at once on a single encoder
    pub fn max_parallel_per_encoder(&self) -> usize {
        self.counters.max_active_per_encoder.load(Ordering::SeqCst)
    }

    pub fn decoder_devices(&self) -> Vec<Option<DeviceId>> {
        self.counters.decoder_devices.lock().clone()
    }

    pub fn encoder_devices(&self) -> Vec<Option<DeviceId>> {
        self.counters.encoder_devices.lock().clone()
    }
}

/// Sessions open decoders in stream order, so the ordinal is the stream.
/// Like real decoders it is `Send` but not `Sync`.
pub struct MockDecoder {
    stream: usize,
    decoded: Cell<usize>,
    script: Script,
    counters: Arc<Counters>,
}

fn segment_of(path: &Path) -> usize {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.strip_prefix("seg"))
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

impl DecodeSession for MockDecoder {
    type Frames = MockFrames;

    fn decode(&mut self, path: &Path) -> Result<Decoded<MockFrames>, EngineError> {
        if !self.script.decode_delay.is_zero() {
            std::thread::sleep(self.script.decode_delay);
        }
        let segment = segment_of(path);
        if self.script.fail_decode_at == Some(segment) {
            return Err(EngineError::Decoder(format!("scripted failure on {}", path.display())));
        }
        self.counters.decodes.fetch_add(1, Ordering::SeqCst);
        self.decoded.set(self.decoded.get() + 1);
        Ok(Decoded {
            frames: MockFrames::new(self.stream, segment),
            meta: DecodeMeta {
                frames: 1,
                pixels: 0,
            },
        })
    }

    fn stop(self) {
        tracing::trace!(stream = self.stream, decoded = self.decoded.get(), "mock decoder stopped");
        self.counters.decoders_stopped.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockEncoder {
    ordinal: usize,
    active: AtomicUsize,
    script: Script,
    counters: Arc<Counters>,
}

impl EncodeSession for MockEncoder {
    type Frames = MockFrames;

    fn encode(&mut self, frames: MockFrames, outputs: &[OutputSpec]) -> Result<EncodeOutcome, EngineError> {
        let segment = frames.segment;
        let mine = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters
            .max_active_per_encoder
            .fetch_max(mine, Ordering::SeqCst);
        let total = self.counters.active_total.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters
            .max_active_total
            .fetch_max(total, Ordering::SeqCst);

        if !self.script.encode_delay.is_zero() {
            std::thread::sleep(self.script.encode_delay);
        }

        self.counters.active_total.fetch_sub(1, Ordering::SeqCst);
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.script.fail_encode_at == Some((self.ordinal, segment)) {
            return Err(EngineError::Encoder(format!(
                "scripted failure on encoder {} segment {}",
                self.ordinal, segment
            )));
        }
        self.counters.encodes.lock().push((self.ordinal, frames));
        Ok(EncodeOutcome {
            frames: 1,
            outputs: outputs.len(),
        })
    }

    fn stop(self) {
        self.counters.encoders_stopped.fetch_add(1, Ordering::SeqCst);
    }
}

impl Engine for MockEngine {
    type Frames = MockFrames;
    type Decoder = MockDecoder;
    type Encoder = MockEncoder;

    fn new_decoder(&self, _accel: Accel, device: Option<&DeviceId>) -> Result<MockDecoder, EngineError> {
        let stream = self.counters.decoders_opened.fetch_add(1, Ordering::SeqCst);
        self.counters.decoder_devices.lock().push(device.cloned());
        Ok(MockDecoder {
            stream,
            decoded: Cell::new(0),
            script: self.script.clone(),
            counters: self.counters.clone(),
        })
    }

    fn new_encoder(&self, _accel: Accel, device: Option<&DeviceId>) -> Result<MockEncoder, EngineError> {
        let ordinal = self.counters.encoders_opened.fetch_add(1, Ordering::SeqCst);
        self.counters.encoder_devices.lock().push(device.cloned());
        Ok(MockEncoder {
            ordinal,
            active: AtomicUsize::new(0),
            script: self.script.clone(),
            counters: self.counters.clone(),
        })
    }
}

/// `count` segments of `duration` each, named `seg<N>.ts`
pub fn playlist(count: usize, duration: Duration) -> MediaPlaylist {
    MediaPlaylist {
        target_duration: Some(duration.as_secs().max(1)),
        segments: (0..count)
            .map(|i| Segment {
                uri: format!("seg{}.ts", i),
                path: PathBuf::from(format!("/media/seg{}.ts", i)),
                duration,
            })
            .collect(),
    }
}

pub fn test_profiles() -> ProfileSet {
    ProfileSet::new(
        ["P240p30fps16x9", "P360p30fps16x9"]
            .iter()
            .filter_map(|name| lookup_preset(name))
            .collect(),
    )
}

pub fn test_outputs() -> Vec<OutputSpec> {
    OutputNaming::default().output_specs(&test_profiles(), 0, 0)
}

/// Quick polling, no stagger
pub fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        backoff_ms: 5,
        session_stagger_ms: 0,
        ..Default::default()
    }
}

/// Software, non-live, scheduled plan
pub fn test_plan(sessions: usize) -> RunPlan {
    RunPlan {
        sessions,
        segs: 0,
        live: false,
        accel: Accel::Software,
        devices: Vec::new(),
        profiles: test_profiles(),
        naming: OutputNaming::default(),
        mode: PipelineMode::Scheduled,
        scheduler: test_config(),
    }
}

pub fn gpus(n: usize) -> Vec<DeviceId> {
    (0..n).map(|i| DeviceId::new(i.to_string())).collect()
}
