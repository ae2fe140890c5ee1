use bytes::Bytes;

use crate::request::{ChunkTimestamp, RequestId, TrackId};

/// Outcome notifications emitted by the chunk scheduler.
#[derive(Debug, Clone)]
pub enum DownloadEvent {
    /// A chunk was fetched successfully.
    Completed {
        request_id: RequestId,
        track: TrackId,
        timestamp: ChunkTimestamp,
        data: Bytes,
    },
    /// A chunk failed transiently and is being fetched again.
    Retrying {
        request_id: RequestId,
        track: TrackId,
        timestamp: ChunkTimestamp,
        /// Retry number, starting at 1
        attempt: u32,
        reason: String,
    },
    /// A chunk failed on every allowed attempt and was dropped. Emitted once per request.
    ExceededMaximumRetries {
        request_id: RequestId,
        track: TrackId,
        timestamp: ChunkTimestamp,
        reason: String,
    },
}

impl DownloadEvent {
    pub fn track(&self) -> &TrackId {
        match self {
            Self::Completed { track, .. }
            | Self::Retrying { track, .. }
            | Self::ExceededMaximumRetries { track, .. } => track,
        }
    }

    pub fn timestamp(&self) -> ChunkTimestamp {
        match self {
            Self::Completed { timestamp, .. }
            | Self::Retrying { timestamp, .. }
            | Self::ExceededMaximumRetries { timestamp, .. } => *timestamp,
        }
    }

    pub fn request_id(&self) -> RequestId {
        match self {
            Self::Completed { request_id, .. }
            | Self::Retrying { request_id, .. }
            | Self::ExceededMaximumRetries { request_id, .. } => *request_id,
        }
    }
}

/// Seek-completed notification from the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekCompleted {
    /// Where playback resumed.
    pub position: ChunkTimestamp,
}
