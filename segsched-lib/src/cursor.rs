//! Per-stream decode/encode cursors
//!
//! Each stream owns one slot holding two atomics. A session driver is the only
//! writer of its own decode cursor and the scheduler is the only writer of
//! encode cursors, so every update is a single monotonic compare-and-swap on
//! one slot.

use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::error::{CursorError, CursorKind};
use crate::types::{SegmentIndex, StreamId};

/// Cursor value before anything happened
const NONE: i64 = -1;

/// The two cursors of one stream
#[derive(Debug)]
pub struct StreamCursors {
    decoded: AtomicI64,
    encoded: AtomicI64,
}

impl StreamCursors {
    fn new() -> Self {
        Self {
            decoded: AtomicI64::new(NONE),
            encoded: AtomicI64::new(NONE),
        }
    }

    /// Last decoded segment
    pub fn decoded(&self) -> Option<SegmentIndex> {
        to_index(self.decoded.load(Ordering::Acquire))
    }

    /// Last segment whose encode completed
    pub fn encoded(&self) -> Option<SegmentIndex> {
        to_index(self.encoded.load(Ordering::Acquire))
    }

    /// `decoded - encoded`, i.e. segments decoded but not yet encoded
    pub fn lag(&self) -> usize {
        let encoded = self.encoded.load(Ordering::Acquire);
        let decoded = self.decoded.load(Ordering::Acquire);
        (decoded - encoded).max(0) as usize
    }
}

fn to_index(raw: i64) -> Option<SegmentIndex> {
    (raw >= 0).then_some(raw as SegmentIndex)
}

/// Strictly increasing update. Returns the previous value on rejection.
fn advance(cell: &AtomicI64, to: SegmentIndex) -> Result<(), i64> {
    let to = to as i64;
    cell.fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
        (to > cur).then_some(to)
    })
    .map(|_| ())
}

/// Point-in-time view of one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CursorSnapshot {
    pub stream: StreamId,
    pub decoded: Option<SegmentIndex>,
    pub encoded: Option<SegmentIndex>,
}

/// Stream-keyed cursor storage with no upper bound on stream count
#[derive(Debug, Default)]
pub struct CursorStore {
    streams: DashMap<StreamId, Arc<StreamCursors>>,
}

impl CursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the slot for `stream` if needed and return it
    pub fn register(&self, stream: StreamId) -> Arc<StreamCursors> {
        self.streams
            .entry(stream)
            .or_insert_with(|| Arc::new(StreamCursors::new()))
            .clone()
    }

    fn slot(&self, stream: StreamId) -> Result<Arc<StreamCursors>, CursorError> {
        self.streams
            .get(&stream)
            .map(|s| s.value().clone())
            .ok_or(CursorError::UnknownStream(stream))
    }

    /// Called by the stream's own driver after a successful decode
    pub fn record_decoded(&self, stream: StreamId, segment: SegmentIndex) -> Result<(), CursorError> {
        let slot = self.slot(stream)?;
        advance(&slot.decoded, segment).map_err(|cur| CursorError::Regression {
            stream,
            kind: CursorKind::Decode,
            current: to_index(cur),
            attempted: segment,
        })
    }

    /// Called by the scheduler when a completion report arrives
    pub(crate) fn record_encoded(
        &self,
        stream: StreamId,
        segment: SegmentIndex,
    ) -> Result<(), CursorError> {
        let slot = self.slot(stream)?;
        advance(&slot.encoded, segment).map_err(|cur| CursorError::Regression {
            stream,
            kind: CursorKind::Encode,
            current: to_index(cur),
            attempted: segment,
        })
    }

    pub fn decoded(&self, stream: StreamId) -> Option<SegmentIndex> {
        self.streams.get(&stream).and_then(|s| s.decoded())
    }

    pub fn encoded(&self, stream: StreamId) -> Option<SegmentIndex> {
        self.streams.get(&stream).and_then(|s| s.encoded())
    }

    /// Unknown streams have no lag
    pub fn lag(&self, stream: StreamId) -> usize {
        self.streams.get(&stream).map(|s| s.lag()).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// All streams, ordered by id
    pub fn snapshot(&self) -> Vec<CursorSnapshot> {
        let mut out: Vec<CursorSnapshot> = self
            .streams
            .iter()
            .map(|entry| CursorSnapshot {
                stream: *entry.key(),
                decoded: entry.value().decoded(),
                encoded: entry.value().encoded(),
            })
            .collect();
        out.sort_by_key(|s| s.stream);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_stream_has_no_cursors() {
        let store = CursorStore::new();
        store.register(4);
        assert_eq!(store.decoded(4), None);
        assert_eq!(store.encoded(4), None);
        assert_eq!(store.lag(4), 0);
    }

    #[test]
    fn test_lag_tracks_decode_minus_encode() {
        let store = CursorStore::new();
        store.register(0);
        for seg in 0..3 {
            store.record_decoded(0, seg).unwrap();
        }
        assert_eq!(store.lag(0), 3);
        store.record_encoded(0, 0).unwrap();
        assert_eq!(store.lag(0), 2);
        store.record_encoded(0, 2).unwrap();
        assert_eq!(store.lag(0), 0);
    }

    #[test]
    fn test_encode_cursor_rejects_regression_and_duplicates() {
        let store = CursorStore::new();
        store.register(1);
        store.record_encoded(1, 3).unwrap();
        assert_eq!(
            store.record_encoded(1, 3),
            Err(CursorError::Regression {
                stream: 1,
                kind: CursorKind::Encode,
                current: Some(3),
                attempted: 3,
            })
        );
        assert!(store.record_encoded(1, 2).is_err());
        assert_eq!(store.encoded(1), Some(3));
    }

    #[test]
    fn test_unknown_stream() {
        let store = CursorStore::new();
        assert_eq!(
            store.record_decoded(9, 0),
            Err(CursorError::UnknownStream(9))
        );
    }

    #[test]
    fn test_many_streams_without_cap() {
        let store = CursorStore::new();
        for stream in 0..1_000 {
            store.register(stream);
            store.record_decoded(stream, stream).unwrap();
        }
        assert_eq!(store.len(), 1_000);
        let snap = store.snapshot();
        assert_eq!(snap[999].decoded, Some(999));
    }

    #[test]
    fn test_concurrent_writers_on_distinct_slots() {
        let store = Arc::new(CursorStore::new());
        for stream in 0..8 {
            store.register(stream);
        }
        let handles: Vec<_> = (0..8)
            .map(|stream| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for seg in 0..500 {
                        store.record_decoded(stream, seg).unwrap();
                        store.record_encoded(stream, seg).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        for s in store.snapshot() {
            assert_eq!(s.decoded, Some(499));
            assert_eq!(s.encoded, Some(499));
        }
    }
}
