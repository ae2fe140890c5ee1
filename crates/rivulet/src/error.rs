use std::time::Duration;

use crate::request::{ChunkTimestamp, TrackId};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("download cancelled")]
    Cancelled,

    #[error("scheduler has stopped and no longer accepts commands")]
    Stopped,

    #[error("scheduler mailbox is full")]
    MailboxFull,

    #[error("chunk fetch error: {reason}")]
    Fetch { reason: String, retryable: bool },

    #[error("request failed with HTTP {status} for track `{track}` at {timestamp}")]
    HttpStatus {
        status: u16,
        track: TrackId,
        timestamp: ChunkTimestamp,
    },

    #[error("chunk fetch timed out after {timeout:?}")]
    Timeout { timeout: Duration },

}

impl SchedulerError {
    pub fn fetch(reason: impl Into<String>) -> Self {
        Self::Fetch {
            reason: reason.into(),
            retryable: true,
        }
    }

    pub fn fetch_permanent(reason: impl Into<String>) -> Self {
        Self::Fetch {
            reason: reason.into(),
            retryable: false,
        }
    }

    pub fn http_status(status: u16, track: TrackId, timestamp: ChunkTimestamp) -> Self {
        Self::HttpStatus {
            status,
            track,
            timestamp,
        }
    }

    /// Whether a failed chunk should go through the retry path.
    ///
    /// Timeouts and network-level failures are transient. Client errors other
    /// than 408/429 will not improve by asking again.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cancelled | Self::Stopped | Self::MailboxFull => false,
            Self::HttpStatus { status, .. } => {
                (500..600).contains(status) || *status == 429 || *status == 408
            }
            Self::Fetch { retryable, .. } => *retryable,
            Self::Timeout { .. } => true,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
