//! The chunk download scheduler and the actor that owns it.
//!
//! [`ChunkSchedulerBuilder::spawn`] wires everything together and returns a
//! [`ChunkSchedulerHandle`] for commands, the event receiver and the actor's
//! join handle.

mod actor;
mod chunk;
mod handle;
mod messages;

pub use actor::{ActorOutcome, ChunkSchedulerActor};
pub use chunk::ChunkDownloadScheduler;
pub use handle::{ChunkSchedulerHandle, DEFAULT_MAILBOX_CAPACITY, DEFAULT_SEND_TIMEOUT};
pub use messages::{SchedulerMessage, SchedulerStats};

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::events::{DownloadEvent, SeekCompleted};
use crate::fetcher::{ChunkFetcher, PlaybackPosition};
use crate::metrics::SchedulerMetrics;
use crate::retry::RetryScheduler;

pub struct ChunkSchedulerBuilder {
    config: SchedulerConfig,
    mailbox_capacity: usize,
    seek_notifications: Option<broadcast::Receiver<SeekCompleted>>,
    cancellation_token: Option<CancellationToken>,
}

impl ChunkSchedulerBuilder {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            seek_notifications: None,
            cancellation_token: None,
        }
    }

    pub fn mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity.max(1);
        self
    }

    /// Listen for seek notifications from the player. Subscribed only while
    /// the strategy is AsNeeded.
    pub fn seek_notifications(mut self, rx: broadcast::Receiver<SeekCompleted>) -> Self {
        self.seek_notifications = Some(rx);
        self
    }

    /// Stop the scheduler when `token` is cancelled.
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = Some(token);
        self
    }

    /// Spawn the actor on the current tokio runtime.
    pub fn spawn<P>(
        self,
        fetcher: Arc<dyn ChunkFetcher>,
        position: P,
    ) -> (
        ChunkSchedulerHandle,
        mpsc::UnboundedReceiver<DownloadEvent>,
        JoinHandle<ActorOutcome>,
    )
    where
        P: PlaybackPosition,
    {
        let config = self.config.into_shared();
        let metrics = Arc::new(SchedulerMetrics::new());
        let token = self
            .cancellation_token
            .map(|parent| parent.child_token())
            .unwrap_or_default();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (mailbox_tx, mailbox_rx) = mpsc::channel(self.mailbox_capacity);

        let queue = ChunkDownloadScheduler::new(
            Arc::clone(&config),
            Box::new(position),
            fetcher,
            event_tx,
            Arc::clone(&metrics),
        );
        let engine = RetryScheduler::new(
            queue,
            Arc::clone(&config),
            Arc::clone(&metrics),
            token.clone(),
        );
        let actor = ChunkSchedulerActor::new(
            engine,
            Arc::clone(&config),
            Arc::clone(&metrics),
            mailbox_rx,
            self.seek_notifications,
            token.clone(),
        );

        let handle = ChunkSchedulerHandle::new(mailbox_tx, config, metrics, token);
        let join = tokio::spawn(actor.run());
        (handle, event_rx, join)
    }
}

impl Default for ChunkSchedulerBuilder {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}
