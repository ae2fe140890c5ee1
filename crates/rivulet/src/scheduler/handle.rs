//! Caller-facing handle for the chunk scheduler actor.
//!
//! Sends go through a bounded mailbox: a non-blocking `try_send` first, then a
//! bounded wait for capacity.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::messages::{SchedulerMessage, SchedulerStats};
use crate::config::{SchedulerConfig, SharedConfig};
use crate::error::{Result, SchedulerError};
use crate::events::SeekCompleted;
use crate::metrics::SchedulerMetrics;
use crate::request::{ChunkTimestamp, TrackId};
use crate::strategy::ChunkDownloadStrategy;

/// Default mailbox capacity.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Default timeout for sends when the mailbox is full.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct ChunkSchedulerHandle {
    sender: mpsc::Sender<SchedulerMessage>,
    config: SharedConfig,
    metrics: Arc<SchedulerMetrics>,
    cancellation_token: CancellationToken,
    send_timeout: Duration,
}

impl ChunkSchedulerHandle {
    pub(crate) fn new(
        sender: mpsc::Sender<SchedulerMessage>,
        config: SharedConfig,
        metrics: Arc<SchedulerMetrics>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            sender,
            config,
            metrics,
            cancellation_token,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub async fn add_request(
        &self,
        track: impl Into<TrackId>,
        timestamp: ChunkTimestamp,
    ) -> Result<()> {
        self.send(SchedulerMessage::AddRequest {
            track: track.into(),
            timestamp,
        })
        .await
    }

    pub async fn add_requests<I>(&self, requests: I) -> Result<()>
    where
        I: IntoIterator<Item = (TrackId, ChunkTimestamp)>,
    {
        self.send(SchedulerMessage::AddRequests(requests.into_iter().collect()))
            .await
    }

    pub async fn remove_requests(&self, track: impl Into<TrackId>) -> Result<()> {
        self.send(SchedulerMessage::RemoveRequests(track.into()))
            .await
    }

    pub async fn seek_completed(&self, position: ChunkTimestamp) -> Result<()> {
        self.send(SchedulerMessage::SeekCompleted(SeekCompleted { position }))
            .await
    }

    pub async fn set_strategy(&self, strategy: ChunkDownloadStrategy) -> Result<()> {
        self.update_config(|config| config.set_strategy(strategy))
            .await
    }

    /// Edit the live configuration. The change is visible to the very next
    /// scheduling decision; the actor is then told to reconcile its timers.
    pub async fn update_config<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(&mut SchedulerConfig),
    {
        if self.is_stopped() {
            return Err(SchedulerError::Stopped);
        }
        {
            let mut config = self.config.write();
            let mut updated = config.clone();
            update(&mut updated);
            *config = updated.normalized();
        }
        self.send(SchedulerMessage::ConfigChanged).await
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> SchedulerConfig {
        self.config.read().clone()
    }

    pub async fn stats(&self) -> Result<SchedulerStats> {
        let (tx, rx) = oneshot::channel();
        self.send(SchedulerMessage::GetStats(tx)).await?;
        rx.await.map_err(|_| SchedulerError::Stopped)
    }

    /// Clear all pending work, abort in-flight fetches and stop the actor.
    ///
    /// Takes effect ahead of any commands still queued in the mailbox.
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    pub fn metrics(&self) -> &Arc<SchedulerMetrics> {
        &self.metrics
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    pub fn is_stopped(&self) -> bool {
        self.sender.is_closed()
    }

    /// Remaining mailbox capacity.
    pub fn capacity(&self) -> usize {
        self.sender.capacity()
    }

    async fn send(&self, msg: SchedulerMessage) -> Result<()> {
        match self.sender.try_send(msg) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(msg)) => {
                match tokio::time::timeout(self.send_timeout, self.sender.reserve()).await {
                    Ok(Ok(permit)) => {
                        permit.send(msg);
                        Ok(())
                    }
                    Ok(Err(_)) => Err(SchedulerError::Stopped),
                    Err(_) => Err(SchedulerError::MailboxFull),
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SchedulerError::Stopped),
        }
    }
}

impl std::fmt::Debug for ChunkSchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkSchedulerHandle")
            .field("stopped", &self.is_stopped())
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}
