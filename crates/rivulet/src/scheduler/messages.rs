//! Messages accepted by the chunk scheduler actor.

use tokio::sync::oneshot;

use crate::events::SeekCompleted;
use crate::metrics::MetricsSnapshot;
use crate::request::{ChunkTimestamp, TrackId};
use crate::strategy::ChunkDownloadStrategy;

#[derive(Debug)]
pub enum SchedulerMessage {
    /// Queue one chunk.
    AddRequest {
        track: TrackId,
        timestamp: ChunkTimestamp,
    },
    /// Queue a batch of chunks, then fill slots once.
    AddRequests(Vec<(TrackId, ChunkTimestamp)>),
    /// Purge the pending requests of a track (track or quality switch).
    RemoveRequests(TrackId),
    /// The player finished seeking. Only acted upon under AsNeeded.
    SeekCompleted(SeekCompleted),
    /// The shared config was written; re-read timers and limits.
    ConfigChanged,
    /// Query current state (response sent via oneshot channel).
    GetStats(oneshot::Sender<SchedulerStats>),
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerStats {
    pub pending: usize,
    pub in_flight: usize,
    /// Dispatches per second over the rate window
    pub current_rate: f64,
    pub position: ChunkTimestamp,
    pub strategy: ChunkDownloadStrategy,
    pub metrics: MetricsSnapshot,
}
