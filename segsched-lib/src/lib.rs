//! Segment-level decode/encode scheduling for live transcoding benchmarks.
//!
//! Session drivers decode segments per stream and submit encode jobs to a
//! pool of per-device encode workers. A per-stream cursor pair bounds how
//! far decoding may run ahead of encoding.

pub mod boundary;
pub mod config;
pub mod cursor;
pub mod driver;
pub mod engine;
pub mod error;
pub mod manifest;
pub mod profile;
pub mod routing;
pub mod run;
pub mod scheduler;
pub mod stats;
pub mod types;
pub(crate) mod worker;

#[cfg(feature = "ffmpeg")]
pub mod transcode;

#[cfg(test)]
pub(crate) mod tests;

pub use boundary::{ErrorBoundary, FailureAction, FailurePolicy};
pub use config::{FailureMode, RoutingKind, SchedulerConfig};
pub use cursor::CursorStore;
pub use engine::{DecodeSession, Decoded, EncodeSession, Engine};
pub use error::{ConfigError, EngineError, Result, SchedError};
pub use manifest::{load_playlist, MediaPlaylist, Segment};
pub use profile::{load_profiles, OutputNaming, ProfileSet, VideoProfile};
pub use run::{run, PipelineMode, RunPlan, RunReport};
pub use scheduler::{EncodeScheduler, SchedulerHandle, SchedulerReport};
pub use stats::{RunStats, RunSummary, SegmentRecord};
pub use types::{parse_device_list, Accel, DeviceId, StreamId};
pub use worker::WorkerSummary;
