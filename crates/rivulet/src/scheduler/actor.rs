use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::chunk::ChunkDownloadScheduler;
use super::messages::{SchedulerMessage, SchedulerStats};
use crate::config::SharedConfig;
use crate::events::SeekCompleted;
use crate::metrics::SchedulerMetrics;
use crate::retry::RetryScheduler;

/// How the actor loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorOutcome {
    /// Every handle was dropped.
    Stopped,
    /// Cancelled through a handle or the cancellation token.
    Cancelled,
}

/// Single owner of all scheduler state.
///
/// Commands, fetch outcomes, the AsNeeded wake and seek notifications are all
/// handled on this one task, so nothing in here needs a lock except the
/// shared config.
pub struct ChunkSchedulerActor {
    engine: RetryScheduler<ChunkDownloadScheduler>,
    config: SharedConfig,
    metrics: Arc<SchedulerMetrics>,
    mailbox: mpsc::Receiver<SchedulerMessage>,
    /// Kept only to resubscribe when AsNeeded becomes active.
    seek_source: Option<broadcast::Receiver<SeekCompleted>>,
    seek_rx: Option<broadcast::Receiver<SeekCompleted>>,
    as_needed_timer: Option<Interval>,
    timer_period: Option<Duration>,
    cancellation_token: CancellationToken,
}

impl ChunkSchedulerActor {
    pub(crate) fn new(
        engine: RetryScheduler<ChunkDownloadScheduler>,
        config: SharedConfig,
        metrics: Arc<SchedulerMetrics>,
        mailbox: mpsc::Receiver<SchedulerMessage>,
        seek_source: Option<broadcast::Receiver<SeekCompleted>>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            engine,
            config,
            metrics,
            mailbox,
            seek_source,
            seek_rx: None,
            as_needed_timer: None,
            timer_period: None,
            cancellation_token,
        }
    }

    pub async fn run(mut self) -> ActorOutcome {
        info!(
            strategy = %self.config.read().strategy,
            "Chunk scheduler started"
        );
        self.reconcile_triggers();
        self.engine.notify_request_added();

        let outcome = loop {
            tokio::select! {
                biased;

                _ = self.cancellation_token.cancelled() => {
                    debug!("Chunk scheduler cancellation token triggered");
                    break ActorOutcome::Cancelled;
                }

                msg = self.mailbox.recv() => match msg {
                    Some(msg) => self.handle_message(msg),
                    None => {
                        debug!("All scheduler handles dropped");
                        break ActorOutcome::Stopped;
                    }
                },

                Some(outcome) = self.engine.next_outcome() => {
                    self.engine.handle_outcome(outcome);
                }

                _ = Self::tick_opt(&mut self.as_needed_timer) => {
                    trace!(position = %self.engine.queue().position(), "AsNeeded re-evaluation");
                    self.engine.notify_request_added();
                }

                seek = Self::recv_seek_opt(&mut self.seek_rx) => self.handle_seek_notification(seek),
            }
        };

        self.shutdown();
        info!(?outcome, "Chunk scheduler stopped");
        outcome
    }

    fn handle_message(&mut self, msg: SchedulerMessage) {
        match msg {
            SchedulerMessage::AddRequest { track, timestamp } => {
                self.engine.queue_mut().add_request(track, timestamp);
                self.engine.notify_request_added();
            }
            SchedulerMessage::AddRequests(requests) => {
                let added = self.engine.queue_mut().add_requests(requests).len();
                trace!(added, "Batch of requests added");
                self.engine.notify_request_added();
            }
            SchedulerMessage::RemoveRequests(track) => {
                self.engine.queue_mut().remove_requests(&track);
            }
            SchedulerMessage::SeekCompleted(seek) => self.on_seek_completed(seek),
            SchedulerMessage::ConfigChanged => {
                self.reconcile_triggers();
                self.engine.notify_request_added();
            }
            SchedulerMessage::GetStats(reply) => {
                let _ = reply.send(self.stats());
            }
        }
    }

    fn on_seek_completed(&mut self, seek: SeekCompleted) {
        if !self.config.read().strategy.is_as_needed() {
            trace!(position = %seek.position, "Ignoring seek outside AsNeeded");
            return;
        }
        debug!(position = %seek.position, "Seek completed, re-evaluating");
        self.engine.notify_request_added();
    }

    fn handle_seek_notification(
        &mut self,
        seek: Result<SeekCompleted, broadcast::error::RecvError>,
    ) {
        match seek {
            Ok(seek) => self.on_seek_completed(seek),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // Only the latest position matters, which is read live anyway.
                debug!(skipped, "Seek notifications lagged");
                self.engine.notify_request_added();
            }
            Err(broadcast::error::RecvError::Closed) => {
                warn!("Seek notification channel closed");
                self.seek_rx = None;
                self.seek_source = None;
            }
        }
    }

    /// Bring the AsNeeded wake and the seek subscription in line with the config.
    fn reconcile_triggers(&mut self) {
        let (as_needed, period) = {
            let config = self.config.read();
            (config.strategy.is_as_needed(), config.as_needed_period())
        };

        if !as_needed {
            if self.as_needed_timer.take().is_some() {
                debug!("AsNeeded wake stopped");
            }
            self.timer_period = None;
            self.seek_rx = None;
            return;
        }

        if self.timer_period != Some(period) {
            let mut timer = tokio::time::interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.as_needed_timer = Some(timer);
            self.timer_period = Some(period);
            debug!(period_ms = period.as_millis() as u64, "AsNeeded wake scheduled");
        }

        if self.seek_rx.is_none()
            && let Some(source) = &self.seek_source
        {
            self.seek_rx = Some(source.resubscribe());
        }
    }

    fn stats(&mut self) -> SchedulerStats {
        let in_flight = self.engine.in_flight_count();
        let strategy = self.config.read().strategy;
        let queue = self.engine.queue_mut();
        SchedulerStats {
            pending: queue.pending().len(),
            in_flight,
            current_rate: queue.current_rate(),
            position: queue.position(),
            strategy,
            metrics: self.metrics.snapshot(),
        }
    }

    fn shutdown(&mut self) {
        self.engine.cancel();
        self.as_needed_timer = None;
        self.timer_period = None;
        self.seek_rx = None;
        self.seek_source = None;
        self.mailbox.close();
        self.metrics.log_summary();
    }

    async fn tick_opt(timer: &mut Option<Interval>) {
        match timer {
            Some(timer) => {
                timer.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    async fn recv_seek_opt(
        rx: &mut Option<broadcast::Receiver<SeekCompleted>>,
    ) -> Result<SeekCompleted, broadcast::error::RecvError> {
        match rx {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }
}
