//! Error propagation boundary
//!
//! Drivers and workers never decide on their own what an engine failure does
//! to the run. They hand the error to the `ErrorBoundary`, whose policy either
//! trips the run-wide abort token or marks a single stream as failed.

use dashmap::DashSet;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::FailureMode;
use crate::error::SchedError;
use crate::types::StreamId;

/// What the boundary did with a reported error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Every session and worker stops
    AbortRun,
    /// Only this stream stops; the rest of the run continues
    ContainStream(StreamId),
}

/// Decides the consequence of an error
pub trait FailurePolicy: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn decide(&self, err: &SchedError) -> FailureAction;
}

/// Any error ends the run
#[derive(Debug, Default, Clone, Copy)]
pub struct FailFast;

impl FailurePolicy for FailFast {
    fn name(&self) -> &'static str {
        "fail_fast"
    }

    fn decide(&self, _err: &SchedError) -> FailureAction {
        FailureAction::AbortRun
    }
}

/// Errors tied to a stream stop that stream only. Errors without a stream
/// (setup failures, task panics) still end the run.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContainStream;

impl FailurePolicy for ContainStream {
    fn name(&self) -> &'static str {
        "contain_stream"
    }

    fn decide(&self, err: &SchedError) -> FailureAction {
        match err.stream() {
            Some(stream) => FailureAction::ContainStream(stream),
            None => FailureAction::AbortRun,
        }
    }
}

impl FailureMode {
    pub fn into_policy(self) -> Box<dyn FailurePolicy> {
        match self {
            FailureMode::FailFast => Box::new(FailFast),
            FailureMode::ContainStream => Box::new(ContainStream),
        }
    }
}

#[derive(Debug)]
struct Inner {
    policy: Box<dyn FailurePolicy>,
    abort: CancellationToken,
    fatal: Mutex<Option<SchedError>>,
    contained: Mutex<Vec<SchedError>>,
    failed: DashSet<StreamId>,
}

/// Shared, cloneable error sink for one run
#[derive(Debug, Clone)]
pub struct ErrorBoundary {
    inner: Arc<Inner>,
}

impl ErrorBoundary {
    pub fn new(policy: Box<dyn FailurePolicy>) -> Self {
        Self {
            inner: Arc::new(Inner {
                policy,
                abort: CancellationToken::new(),
                fatal: Mutex::new(None),
                contained: Mutex::new(Vec::new()),
                failed: DashSet::new(),
            }),
        }
    }

    pub fn from_mode(mode: FailureMode) -> Self {
        Self::new(mode.into_policy())
    }

    pub fn policy_name(&self) -> &'static str {
        self.inner.policy.name()
    }

    /// Report an error. The first fatal error is kept and returned by
    /// `take_fatal`; later ones are only logged.
    pub fn report(&self, err: SchedError) -> FailureAction {
        let action = self.inner.policy.decide(&err);
        match action {
            FailureAction::AbortRun => {
                tracing::error!(policy = self.policy_name(), "aborting run: {}", err);
                let mut fatal = self.inner.fatal.lock();
                if fatal.is_none() {
                    *fatal = Some(err);
                }
                drop(fatal);
                self.inner.abort.cancel();
            }
            FailureAction::ContainStream(stream) => {
                tracing::error!(stream, policy = self.policy_name(), "stopping stream: {}", err);
                self.inner.failed.insert(stream);
                self.inner.contained.lock().push(err);
            }
        }
        action
    }

    /// Token cancelled when the run aborts
    pub fn abort_token(&self) -> CancellationToken {
        self.inner.abort.clone()
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.abort.is_cancelled()
    }

    /// True once `stream` was stopped by containment
    pub fn is_failed(&self, stream: StreamId) -> bool {
        self.inner.failed.contains(&stream)
    }

    /// True while `stream` may keep doing work
    pub fn is_live(&self, stream: StreamId) -> bool {
        !self.is_aborted() && !self.is_failed(stream)
    }

    pub fn take_fatal(&self) -> Option<SchedError> {
        self.inner.fatal.lock().take()
    }

    pub fn take_contained(&self) -> Vec<SchedError> {
        std::mem::take(&mut *self.inner.contained.lock())
    }

    pub fn failed_streams(&self) -> Vec<StreamId> {
        let mut streams: Vec<StreamId> = self.inner.failed.iter().map(|s| *s).collect();
        streams.sort_unstable();
        streams
    }
}

impl Default for ErrorBoundary {
    fn default() -> Self {
        Self::new(Box::new(FailFast))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;

    fn decode_error(stream: StreamId) -> SchedError {
        SchedError::Decode {
            stream,
            segment: 3,
            source: EngineError::Decoder("corrupt".into()),
        }
    }

    #[test]
    fn test_fail_fast_aborts_and_keeps_first_error() {
        let boundary = ErrorBoundary::default();
        let token = boundary.abort_token();
        assert_eq!(boundary.report(decode_error(1)), FailureAction::AbortRun);
        assert_eq!(boundary.report(decode_error(2)), FailureAction::AbortRun);
        assert!(token.is_cancelled());
        assert!(!boundary.is_live(0));

        let fatal = boundary.take_fatal().unwrap();
        assert_eq!(fatal.stream(), Some(1));
        assert!(boundary.take_fatal().is_none());
    }

    #[test]
    fn test_contain_stream_isolates() {
        let boundary = ErrorBoundary::from_mode(FailureMode::ContainStream);
        assert_eq!(
            boundary.report(decode_error(2)),
            FailureAction::ContainStream(2)
        );
        assert!(!boundary.is_aborted());
        assert!(boundary.is_failed(2));
        assert!(boundary.is_live(1));
        assert_eq!(boundary.failed_streams(), vec![2]);
        assert_eq!(boundary.take_contained().len(), 1);
    }

    #[test]
    fn test_contain_stream_aborts_on_streamless_error() {
        let boundary = ErrorBoundary::from_mode(FailureMode::ContainStream);
        let action = boundary.report(SchedError::Task("worker panicked".into()));
        assert_eq!(action, FailureAction::AbortRun);
        assert!(boundary.is_aborted());
    }
}
