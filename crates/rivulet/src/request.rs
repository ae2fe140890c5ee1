//! Request model: identities, timeline positions and the per-request state machine.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Opaque identity of a scheduled request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A logical selectable stream (one video quality, one audio language, one caption language).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(Arc<str>);

impl TrackId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TrackId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for TrackId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Timeline position covered by a chunk, measured from the start of the asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ChunkTimestamp(Duration);

impl ChunkTimestamp {
    pub const ZERO: ChunkTimestamp = ChunkTimestamp(Duration::ZERO);

    pub const fn new(position: Duration) -> Self {
        Self(position)
    }

    pub const fn from_millis(ms: u64) -> Self {
        Self(Duration::from_millis(ms))
    }

    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub const fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn as_millis(&self) -> u64 {
        u64::try_from(self.0.as_millis()).unwrap_or(u64::MAX)
    }

    pub fn saturating_sub(self, rhs: Duration) -> Self {
        Self(self.0.saturating_sub(rhs))
    }

    pub fn saturating_add(self, rhs: Duration) -> Self {
        Self(self.0.saturating_add(rhs))
    }
}

impl From<Duration> for ChunkTimestamp {
    fn from(value: Duration) -> Self {
        Self(value)
    }
}

impl fmt::Display for ChunkTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}s", self.0.as_secs(), self.0.subsec_millis())
    }
}

/// Lifecycle of a scheduled request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestState {
    /// Waiting in the pending index.
    #[default]
    Pending,
    /// Dispatched to the transport, occupying a concurrency slot.
    InFlight,
    /// Fetched successfully. Terminal.
    Completed,
    /// Failed transiently and about to be dispatched again.
    Retrying,
    /// Failed on every allowed attempt. Terminal.
    ExceededRetries,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::ExceededRetries)
    }
}

/// What the retry engine needs to know about a request.
pub trait SchedulableRequest {
    fn id(&self) -> RequestId;

    fn retry_count(&self) -> u32;

    /// Count one more failed attempt.
    fn record_retry(&mut self);

    fn state(&self) -> RequestState;

    fn set_state(&mut self, state: RequestState);
}

/// A pending or in-flight chunk fetch for one track at one timeline position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    id: RequestId,
    track: TrackId,
    timestamp: ChunkTimestamp,
    retry_count: u32,
    state: RequestState,
}

impl DownloadRequest {
    pub fn new(id: RequestId, track: TrackId, timestamp: ChunkTimestamp) -> Self {
        Self {
            id,
            track,
            timestamp,
            retry_count: 0,
            state: RequestState::Pending,
        }
    }

    pub fn track(&self) -> &TrackId {
        &self.track
    }

    pub fn timestamp(&self) -> ChunkTimestamp {
        self.timestamp
    }
}

impl SchedulableRequest for DownloadRequest {
    fn id(&self) -> RequestId {
        self.id
    }

    fn retry_count(&self) -> u32 {
        self.retry_count
    }

    fn record_retry(&mut self) {
        self.retry_count = self.retry_count.saturating_add(1);
    }

    fn state(&self) -> RequestState {
        self.state
    }

    fn set_state(&mut self, state: RequestState) {
        self.state = state;
    }
}
