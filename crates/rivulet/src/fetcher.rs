//! Seams to the outside world: the chunk transport and the playback clock.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;

use crate::error::SchedulerError;
use crate::request::{ChunkTimestamp, TrackId};

/// Fetches the chunk of `track` covering `timestamp`.
///
/// Implementations report failures through [`SchedulerError`]; whether a
/// failure is retried is decided by [`SchedulerError::is_retryable`]. The
/// scheduler enforces its own timeout, so implementations need not.
#[async_trait]
pub trait ChunkFetcher: Send + Sync + 'static {
    async fn fetch_chunk(
        &self,
        track: &TrackId,
        timestamp: ChunkTimestamp,
    ) -> Result<Bytes, SchedulerError>;
}

/// Live read access to the playback position.
pub trait PlaybackPosition: Send + 'static {
    fn position(&self) -> ChunkTimestamp;
}

impl PlaybackPosition for watch::Receiver<Duration> {
    fn position(&self) -> ChunkTimestamp {
        ChunkTimestamp::new(*self.borrow())
    }
}

/// A position that never moves, for offline prefetch.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedPosition(pub ChunkTimestamp);

impl PlaybackPosition for FixedPosition {
    fn position(&self) -> ChunkTimestamp {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_position_is_read_live() {
        let (tx, rx) = watch::channel(Duration::from_secs(5));
        assert_eq!(rx.position(), ChunkTimestamp::from_secs(5));
        tx.send(Duration::from_millis(7_500)).unwrap();
        assert_eq!(rx.position(), ChunkTimestamp::from_millis(7_500));
    }
}
