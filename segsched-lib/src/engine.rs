//! Transcoding engine contract
//!
//! The scheduler never touches media itself. An `Engine` hands out decoder
//! sessions (one per stream) and encoder sessions (one per worker/device);
//! both are blocking and are always driven from the blocking thread pool.

use std::path::Path;
use std::time::Duration;

use crate::error::EngineError;
use crate::profile::OutputSpec;
use crate::types::{Accel, DeviceId};

/// Metadata about a decoded segment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeMeta {
    pub frames: usize,
    pub pixels: u64,
}

/// Decoded payload plus its metadata
#[derive(Debug)]
pub struct Decoded<F> {
    pub frames: F,
    pub meta: DecodeMeta,
}

/// What an encode produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeOutcome {
    pub frames: usize,
    pub outputs: usize,
}

/// Decoder bound to one stream for the stream's lifetime
pub trait DecodeSession: Send + 'static {
    type Frames: Send + 'static;

    fn decode(&mut self, path: &Path) -> Result<Decoded<Self::Frames>, EngineError>;

    /// Release decoder resources
    fn stop(self)
    where
        Self: Sized,
    {
    }
}

/// Encoder bound to one device, owned by exactly one worker
pub trait EncodeSession: Send + 'static {
    type Frames: Send + 'static;

    fn encode(
        &mut self,
        frames: Self::Frames,
        outputs: &[OutputSpec],
    ) -> Result<EncodeOutcome, EngineError>;

    /// Release encoder resources
    fn stop(self)
    where
        Self: Sized,
    {
    }
}

/// Factory for decoder and encoder sessions
pub trait Engine: Send + Sync + 'static {
    type Frames: Send + 'static;
    type Decoder: DecodeSession<Frames = Self::Frames>;
    type Encoder: EncodeSession<Frames = Self::Frames>;

    fn new_decoder(
        &self,
        accel: Accel,
        device: Option<&DeviceId>,
    ) -> Result<Self::Decoder, EngineError>;

    fn new_encoder(
        &self,
        accel: Accel,
        device: Option<&DeviceId>,
    ) -> Result<Self::Encoder, EngineError>;
}

/// Run a blocking decode on the blocking pool, handing the session back
pub(crate) async fn decode_blocking<D: DecodeSession>(
    mut decoder: D,
    path: std::path::PathBuf,
) -> Result<(D, Result<Decoded<D::Frames>, EngineError>, Duration), tokio::task::JoinError> {
    tokio::task::spawn_blocking(move || {
        let start = std::time::Instant::now();
        let result = decoder.decode(&path);
        (decoder, result, start.elapsed())
    })
    .await
}

/// Run a blocking encode on the blocking pool, handing the session back
pub(crate) async fn encode_blocking<E: EncodeSession>(
    mut encoder: E,
    frames: E::Frames,
    outputs: Vec<OutputSpec>,
) -> Result<(E, Result<EncodeOutcome, EngineError>, Duration), tokio::task::JoinError> {
    tokio::task::spawn_blocking(move || {
        let start = std::time::Instant::now();
        let result = encoder.encode(frames, &outputs);
        (encoder, result, start.elapsed())
    })
    .await
}

/// Release a session on the blocking pool
pub(crate) async fn stop_blocking<S, F>(session: S, stop: F)
where
    S: Send + 'static,
    F: FnOnce(S) + Send + 'static,
{
    if let Err(e) = tokio::task::spawn_blocking(move || stop(session)).await {
        tracing::warn!("engine session stop failed: {}", e);
    }
}
