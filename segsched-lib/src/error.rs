use thiserror::Error;

use crate::types::{SegmentIndex, StreamId};

/// Main error type for the scheduler
#[derive(Error, Debug)]
pub enum SchedError {
    /// Invalid scheduler, worker pool or run configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The input manifest could not be read or understood
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// The output profile set could not be built
    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),

    /// The engine failed to decode a segment
    #[error("Decoding failed for session {stream} segment {segment}: {source}")]
    Decode {
        stream: StreamId,
        segment: SegmentIndex,
        #[source]
        source: EngineError,
    },

    /// The engine failed to encode a job
    #[error("Encoding failed for session {stream} segment {segment} on worker {worker}: {source}")]
    Encode {
        stream: StreamId,
        segment: SegmentIndex,
        worker: usize,
        #[source]
        source: EngineError,
    },

    /// The engine could not open a decoder or encoder session
    #[error("Engine setup failed for {role}: {source}")]
    EngineSetup {
        role: String,
        #[source]
        source: EngineError,
    },

    /// A cursor update violated monotonicity
    #[error("Cursor error: {0}")]
    Cursor(#[from] CursorError),

    /// The scheduler stopped accepting jobs
    #[error("Scheduler closed while session {stream} submitted segment {segment}")]
    SchedulerClosed {
        stream: StreamId,
        segment: SegmentIndex,
    },

    /// The run was aborted by a fatal error elsewhere
    #[error("Session {0} aborted")]
    Aborted(StreamId),

    /// The run finished without transcoding anything
    #[error("Input manifest has no segments or total duration is 0s")]
    EmptyRun,

    /// A task panicked or was cancelled by the runtime
    #[error("Task failure: {0}")]
    Task(String),

    /// A standard I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SchedError {
    /// Stream the error belongs to, if any
    pub fn stream(&self) -> Option<StreamId> {
        match self {
            SchedError::Decode { stream, .. }
            | SchedError::Encode { stream, .. }
            | SchedError::SchedulerClosed { stream, .. }
            | SchedError::Aborted(stream) => Some(*stream),
            SchedError::Cursor(err) => Some(err.stream()),
            _ => None,
        }
    }

    /// True for the secondary error a session returns after another one
    /// tripped the run-wide abort.
    pub fn is_aborted(&self) -> bool {
        matches!(self, SchedError::Aborted(_))
    }
}

impl From<tokio::task::JoinError> for SchedError {
    fn from(err: tokio::task::JoinError) -> Self {
        SchedError::Task(err.to_string())
    }
}

/// Errors reported by a transcoding engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Failed to open input {path}: {reason}")]
    OpenInput { path: String, reason: String },

    #[error("No video stream in {0}")]
    NoVideoStream(String),

    #[error("Decoder error: {0}")]
    Decoder(String),

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("Muxer error: {0}")]
    Muxer(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors, all fatal at startup
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Hardware acceleration requested but the device list is empty")]
    NoDevices,

    #[error("Empty entry in device list {0:?}")]
    EmptyDeviceId(String),

    #[error("At least one concurrent session is required")]
    NoSessions,

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Manifest parsing errors
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("Couldn't open input manifest {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Missing #EXTM3U header")]
    MissingHeader,

    #[error("Expecting media playlist in the input {0}")]
    NotMediaPlaylist(String),

    #[error("Invalid segment duration on line {line}: {value:?}")]
    InvalidDuration { line: usize, value: String },

    #[error("Segment URI without #EXTINF on line {0}")]
    UriWithoutInfo(usize),
}

/// Output profile errors
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Unable to unmarshal the passed transcoding option: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cannot parse the GOP value {0:?} in the transcoding options")]
    GopParse(String),

    #[error("Invalid gop value {0}. Please set it to a positive value")]
    GopNotPositive(f64),

    #[error("Unable to parse the H264 encoder profile: {0:?}")]
    EncoderProfile(String),

    #[error("No transcoding options provided")]
    Empty,

    #[error("IO error reading profiles: {0}")]
    Io(#[from] std::io::Error),
}

/// Cursor store errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CursorError {
    #[error("Unknown stream {0}")]
    UnknownStream(StreamId),

    #[error("Stream {stream} {kind} cursor at {current:?} cannot move to {attempted}")]
    Regression {
        stream: StreamId,
        kind: CursorKind,
        current: Option<SegmentIndex>,
        attempted: SegmentIndex,
    },
}

impl CursorError {
    pub fn stream(&self) -> StreamId {
        match self {
            CursorError::UnknownStream(stream) => *stream,
            CursorError::Regression { stream, .. } => *stream,
        }
    }
}

/// Which of the two per-stream cursors an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorKind {
    Decode,
    Encode,
}

impl std::fmt::Display for CursorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CursorKind::Decode => f.write_str("decode"),
            CursorKind::Encode => f.write_str("encode"),
        }
    }
}

/// Job submission failures. The job is handed back so the caller can retry
/// or drop it.
#[derive(Error)]
pub enum SubmitError<F> {
    #[error("Worker {worker} queue is full")]
    QueueFull { worker: usize, job: Box<crate::types::Job<F>> },

    #[error("Scheduler is closed")]
    Closed { job: Option<Box<crate::types::Job<F>>> },
}

impl<F> std::fmt::Debug for SubmitError<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::QueueFull { worker, job } => f
                .debug_struct("QueueFull")
                .field("worker", worker)
                .field("stream", &job.stream)
                .field("segment", &job.segment)
                .finish(),
            SubmitError::Closed { .. } => f.write_str("Closed"),
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, SchedError>;
