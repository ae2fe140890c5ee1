use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, trace};

use crate::config::SharedConfig;
use crate::error::SchedulerError;
use crate::events::DownloadEvent;
use crate::fetcher::{ChunkFetcher, PlaybackPosition};
use crate::index::OrderedRequestIndex;
use crate::metrics::SchedulerMetrics;
use crate::rate::RateMonitor;
use crate::request::{ChunkTimestamp, DownloadRequest, RequestId, SchedulableRequest, TrackId};
use crate::retry::{Dispatch, RequestQueue};

/// Chunk selection and dispatch on top of the retry engine.
///
/// Holds the pending index and the rate monitor. Selection follows the
/// configured strategy against the live playback position; every dispatch
/// goes through the rate monitor first.
pub struct ChunkDownloadScheduler {
    index: OrderedRequestIndex,
    rate: RateMonitor,
    config: SharedConfig,
    position: Box<dyn PlaybackPosition>,
    fetcher: Arc<dyn ChunkFetcher>,
    events: mpsc::UnboundedSender<DownloadEvent>,
    metrics: Arc<SchedulerMetrics>,
    next_id: u64,
}

impl ChunkDownloadScheduler {
    pub fn new(
        config: SharedConfig,
        position: Box<dyn PlaybackPosition>,
        fetcher: Arc<dyn ChunkFetcher>,
        events: mpsc::UnboundedSender<DownloadEvent>,
        metrics: Arc<SchedulerMetrics>,
    ) -> Self {
        let rate = RateMonitor::new(config.read().rate_window());
        Self {
            index: OrderedRequestIndex::new(),
            rate,
            config,
            position,
            fetcher,
            events,
            metrics,
            next_id: 0,
        }
    }

    pub fn add_request(&mut self, track: TrackId, timestamp: ChunkTimestamp) -> RequestId {
        let id = RequestId(self.next_id);
        self.next_id += 1;
        trace!(request_id = %id, track = %track, timestamp = %timestamp, "Request added");
        self.index.insert(DownloadRequest::new(id, track, timestamp));
        id
    }

    pub fn add_requests<I>(&mut self, requests: I) -> Vec<RequestId>
    where
        I: IntoIterator<Item = (TrackId, ChunkTimestamp)>,
    {
        requests
            .into_iter()
            .map(|(track, timestamp)| self.add_request(track, timestamp))
            .collect()
    }

    /// Drop every pending request of `track`. In-flight requests are left alone.
    pub fn remove_requests(&mut self, track: &TrackId) -> usize {
        let removed = self.index.remove_track(track).len();
        debug!(track = %track, removed, "Removed pending requests");
        removed
    }

    pub fn pending(&self) -> &OrderedRequestIndex {
        &self.index
    }

    pub fn position(&self) -> ChunkTimestamp {
        self.position.position()
    }

    pub fn current_rate(&mut self) -> f64 {
        self.sync_rate_window();
        self.rate.current_rate()
    }

    fn sync_rate_window(&mut self) {
        let window = self.config.read().rate_window();
        if self.rate.window() != window {
            self.rate.set_window(window);
        }
    }

    fn emit(&self, event: DownloadEvent) {
        if self.events.send(event).is_err() {
            trace!("No event receiver, dropping download event");
        }
    }
}

impl RequestQueue for ChunkDownloadScheduler {
    type Request = DownloadRequest;
    type Output = Bytes;

    fn has_pending_requests(&self) -> bool {
        !self.index.is_empty()
    }

    fn next_request(&mut self) -> Option<DownloadRequest> {
        let (strategy, window) = {
            let config = self.config.read();
            (config.strategy, config.as_needed_window())
        };
        let position = self.position.position();

        let Some(at) = strategy.select(&self.index, position, window) else {
            trace!(
                strategy = %strategy,
                position = %position,
                pending = self.index.len(),
                "No eligible chunk"
            );
            return None;
        };
        let request = self.index.take_at(at)?;
        debug!(
            request_id = %request.id(),
            track = %request.track(),
            timestamp = %request.timestamp(),
            position = %position,
            strategy = %strategy,
            "Selected chunk"
        );
        Some(request)
    }

    fn begin_request(&mut self, request: &DownloadRequest, backoff: Duration) -> Dispatch<Bytes> {
        self.sync_rate_window();
        let max_per_window = self.config.read().max_requests_per_window;

        // Samples that leave the window before the backoff ends only shorten
        // the rate delay, so the later of the two is the real start.
        let now = Instant::now();
        let rate_delay = self.rate.recommend_delay_at(max_per_window, now);
        let delay = rate_delay.max(backoff);
        self.rate.record_dispatch_at(now + delay);
        let throttled = rate_delay.saturating_sub(backoff);
        self.metrics
            .record_dispatch(u64::try_from(throttled.as_millis()).unwrap_or(u64::MAX));

        if !throttled.is_zero() {
            debug!(
                request_id = %request.id(),
                track = %request.track(),
                delay_ms = delay.as_millis() as u64,
                "Dispatch rate limit reached, delaying fetch"
            );
        }

        let fetcher = Arc::clone(&self.fetcher);
        let track = request.track().clone();
        let timestamp = request.timestamp();
        Dispatch::delayed(delay, async move { fetcher.fetch_chunk(&track, timestamp).await })
    }

    fn on_completed(&mut self, request: DownloadRequest, data: Bytes) {
        self.metrics.record_completed(data.len() as u64);
        debug!(
            request_id = %request.id(),
            track = %request.track(),
            timestamp = %request.timestamp(),
            bytes = data.len(),
            "Chunk downloaded"
        );
        self.emit(DownloadEvent::Completed {
            request_id: request.id(),
            track: request.track().clone(),
            timestamp: request.timestamp(),
            data,
        });
    }

    fn on_retrying(&mut self, request: &DownloadRequest, error: &SchedulerError) {
        self.emit(DownloadEvent::Retrying {
            request_id: request.id(),
            track: request.track().clone(),
            timestamp: request.timestamp(),
            attempt: request.retry_count(),
            reason: error.to_string(),
        });
    }

    fn on_exceeded_retries(&mut self, request: DownloadRequest, error: SchedulerError) {
        error!(
            request_id = %request.id(),
            track = %request.track(),
            timestamp = %request.timestamp(),
            retries = request.retry_count(),
            error = %error,
            "Chunk download failed permanently"
        );
        self.emit(DownloadEvent::ExceededMaximumRetries {
            request_id: request.id(),
            track: request.track().clone(),
            timestamp: request.timestamp(),
            reason: error.to_string(),
        });
    }

    fn cancel(&mut self) {
        let dropped = self.index.len();
        self.index.clear();
        debug!(dropped, "Pending chunk requests cleared");
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::config::SchedulerConfig;
    use crate::fetcher::FixedPosition;
    use crate::strategy::ChunkDownloadStrategy;

    struct EchoFetcher;

    #[async_trait]
    impl ChunkFetcher for EchoFetcher {
        async fn fetch_chunk(
            &self,
            track: &TrackId,
            timestamp: ChunkTimestamp,
        ) -> Result<Bytes, SchedulerError> {
            Ok(Bytes::from(format!("{track}@{}", timestamp.as_millis())))
        }
    }

    fn scheduler(
        config: SchedulerConfig,
        position_secs: u64,
    ) -> (ChunkDownloadScheduler, mpsc::UnboundedReceiver<DownloadEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = ChunkDownloadScheduler::new(
            config.into_shared(),
            Box::new(FixedPosition(ChunkTimestamp::from_secs(position_secs))),
            Arc::new(EchoFetcher),
            tx,
            Arc::new(SchedulerMetrics::new()),
        );
        (scheduler, rx)
    }

    #[test]
    fn test_selected_request_leaves_the_index() {
        let (mut scheduler, _rx) = scheduler(SchedulerConfig::default(), 15);
        let video = TrackId::from("video");
        scheduler.add_requests([10, 20, 70].map(|s| (video.clone(), ChunkTimestamp::from_secs(s))));

        let first = scheduler.next_request().unwrap();
        assert_eq!(first.timestamp(), ChunkTimestamp::from_secs(20));
        assert_eq!(scheduler.pending().len(), 2);
        assert!(!scheduler.pending().contains(first.id()));

        // 70s is now the earliest chunk past the lookbehind and inside the horizon.
        let second = scheduler.next_request().unwrap();
        assert_eq!(second.timestamp(), ChunkTimestamp::from_secs(70));

        // 10s is behind the lookbehind but still within one window back.
        let third = scheduler.next_request().unwrap();
        assert_eq!(third.timestamp(), ChunkTimestamp::from_secs(10));
        assert!(scheduler.next_request().is_none());
    }

    #[test]
    fn test_remove_requests_only_touches_one_track() {
        let (mut scheduler, _rx) = scheduler(SchedulerConfig::default(), 0);
        let a = TrackId::from("audio-en");
        let b = TrackId::from("audio-fr");
        for s in 0..4 {
            scheduler.add_request(a.clone(), ChunkTimestamp::from_secs(s * 2));
            scheduler.add_request(b.clone(), ChunkTimestamp::from_secs(s * 2));
        }

        assert_eq!(scheduler.remove_requests(&a), 4);
        assert_eq!(scheduler.pending().len(), 4);
        assert!(scheduler.pending().iter().all(|r| r.track() == &b));
        assert_eq!(scheduler.remove_requests(&a), 0);
    }

    #[test]
    fn test_strategy_change_is_read_live() {
        let (mut scheduler, _rx) = scheduler(SchedulerConfig::default(), 0);
        scheduler.add_request(TrackId::from("video"), ChunkTimestamp::from_secs(500));
        assert!(scheduler.next_request().is_none());

        scheduler
            .config
            .write()
            .set_strategy(ChunkDownloadStrategy::AggressiveFuture);
        assert!(scheduler.next_request().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_begin_request_applies_rate_delay() {
        let config = SchedulerConfig::default().with_max_request_rate(2, Duration::from_secs(10));
        let (mut scheduler, _rx) = scheduler(config, 0);
        let request = DownloadRequest::new(
            RequestId(0),
            TrackId::from("video"),
            ChunkTimestamp::ZERO,
        );

        let delays: Vec<_> = (0..5).map(|_| scheduler.begin_request(&request, Duration::ZERO).delay).collect();
        assert_eq!(
            delays,
            vec![
                Duration::ZERO,
                Duration::ZERO,
                Duration::from_secs(10),
                Duration::from_secs(10),
                Duration::from_secs(20),
            ]
        );
        assert_eq!(scheduler.metrics.snapshot().rate_delayed, 3);

        let data = scheduler.begin_request(&request, Duration::ZERO).fetch.await.unwrap();
        assert_eq!(data, Bytes::from("video@0"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_backoff_absorbs_rate_delay() {
        let config = SchedulerConfig::default().with_max_request_rate(2, Duration::from_secs(10));
        let (mut scheduler, _rx) = scheduler(config, 0);
        let request = DownloadRequest::new(RequestId(0), TrackId::from("video"), ChunkTimestamp::ZERO);

        scheduler.begin_request(&request, Duration::ZERO);
        scheduler.begin_request(&request, Duration::ZERO);

        // The window frees up at 10s, well before the backoff ends.
        let dispatch = scheduler.begin_request(&request, Duration::from_secs(15));
        assert_eq!(dispatch.delay, Duration::from_secs(15));
        assert_eq!(scheduler.metrics.snapshot().rate_delayed, 0);

        // A short backoff is stretched to the rate limit.
        let dispatch = scheduler.begin_request(&request, Duration::from_secs(3));
        assert_eq!(dispatch.delay, Duration::from_secs(10));
        assert_eq!(scheduler.metrics.snapshot().rate_delayed, 1);
    }

    #[test]
    fn test_hooks_emit_events() {
        let (mut scheduler, mut rx) = scheduler(SchedulerConfig::default(), 0);
        let mut request = DownloadRequest::new(
            RequestId(3),
            TrackId::from("captions-de"),
            ChunkTimestamp::from_secs(4),
        );

        request.record_retry();
        scheduler.on_retrying(&request, &SchedulerError::fetch("reset"));
        scheduler.on_exceeded_retries(request.clone(), SchedulerError::fetch("reset"));
        scheduler.on_completed(request, Bytes::from_static(b"abc"));

        match rx.try_recv().unwrap() {
            DownloadEvent::Retrying { attempt, track, .. } => {
                assert_eq!(attempt, 1);
                assert_eq!(track.as_str(), "captions-de");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(
            rx.try_recv().unwrap(),
            DownloadEvent::ExceededMaximumRetries { .. }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            DownloadEvent::Completed { ref data, .. } if data.len() == 3
        ));
        assert_eq!(scheduler.metrics.snapshot().completed_bytes, 3);
    }

    #[test]
    fn test_cancel_clears_pending() {
        let (mut scheduler, _rx) = scheduler(SchedulerConfig::default(), 0);
        scheduler.add_request(TrackId::from("video"), ChunkTimestamp::ZERO);
        scheduler.cancel();
        assert!(!scheduler.has_pending_requests());
    }
}
