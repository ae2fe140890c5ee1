//! Bounded-concurrency, bounded-retry dispatch engine.
//!
//! [`RetryScheduler`] owns in-flight accounting, the per-attempt timeout and
//! the retry/give-up decision. What to fetch, when and how is delegated to a
//! [`RequestQueue`]. Each dispatched fetch runs on its own task and reports
//! back over a channel; the owner feeds those outcomes to
//! [`RetryScheduler::handle_outcome`], so all state changes happen on the
//! owner's task.
//!
//! A request that fails transiently keeps its concurrency slot and is
//! dispatched again after a capped exponential backoff. The slot is only
//! released once the request completes or gives up.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::config::SharedConfig;
use crate::error::SchedulerError;
use crate::metrics::SchedulerMetrics;
use crate::request::{RequestId, RequestState, SchedulableRequest};

/// What the engine needs from a concrete scheduler.
pub trait RequestQueue {
    type Request: SchedulableRequest + Send + 'static;
    type Output: Send + 'static;

    fn has_pending_requests(&self) -> bool;

    /// Select the next request and remove it from the pending set.
    fn next_request(&mut self) -> Option<Self::Request>;

    /// Prepare the fetch for `request`. Called for the first attempt and for every retry.
    ///
    /// The returned delay must be at least `backoff`, which is zero on the first attempt.
    fn begin_request(
        &mut self,
        request: &Self::Request,
        backoff: Duration,
    ) -> Dispatch<Self::Output>;

    fn on_completed(&mut self, request: Self::Request, output: Self::Output);

    /// Called each time a failed request is about to be dispatched again.
    fn on_retrying(&mut self, request: &Self::Request, error: &SchedulerError);

    /// Called once when a request is dropped for good.
    fn on_exceeded_retries(&mut self, request: Self::Request, error: SchedulerError);

    /// Drop all pending state.
    fn cancel(&mut self);
}

/// A prepared fetch: how long to hold it back and the transport future itself.
pub struct Dispatch<T> {
    pub delay: Duration,
    pub fetch: BoxFuture<'static, Result<T, SchedulerError>>,
}

impl<T> Dispatch<T> {
    pub fn new<F>(fetch: F) -> Self
    where
        F: Future<Output = Result<T, SchedulerError>> + Send + 'static,
    {
        Self::delayed(Duration::ZERO, fetch)
    }

    pub fn delayed<F>(delay: Duration, fetch: F) -> Self
    where
        F: Future<Output = Result<T, SchedulerError>> + Send + 'static,
    {
        Self {
            delay,
            fetch: fetch.boxed(),
        }
    }
}

impl<T> std::fmt::Debug for Dispatch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatch")
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

/// Result of one attempt, posted back to the owner.
#[derive(Debug)]
pub struct FetchOutcome<T> {
    pub request_id: RequestId,
    /// Engine generation the attempt was dispatched under.
    pub generation: u64,
    pub result: Result<T, SchedulerError>,
}

pub struct RetryScheduler<Q: RequestQueue> {
    queue: Q,
    config: SharedConfig,
    metrics: Arc<SchedulerMetrics>,
    in_flight: HashMap<RequestId, Q::Request>,
    /// Bumped on cancel; outcomes from older generations are ignored.
    generation: u64,
    shutdown: CancellationToken,
    generation_token: CancellationToken,
    outcome_tx: mpsc::UnboundedSender<FetchOutcome<Q::Output>>,
    outcome_rx: mpsc::UnboundedReceiver<FetchOutcome<Q::Output>>,
}

impl<Q: RequestQueue> RetryScheduler<Q> {
    pub fn new(
        queue: Q,
        config: SharedConfig,
        metrics: Arc<SchedulerMetrics>,
        shutdown: CancellationToken,
    ) -> Self {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let generation_token = shutdown.child_token();
        Self {
            queue,
            config,
            metrics,
            in_flight: HashMap::new(),
            generation: 0,
            shutdown,
            generation_token,
            outcome_tx,
            outcome_rx,
        }
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut Q {
        &mut self.queue
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Nothing in flight and nothing left to select.
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty() && !self.queue.has_pending_requests()
    }

    /// Fill free slots from the queue. Returns how many requests were started.
    pub fn notify_request_added(&mut self) -> usize {
        let mut started = 0;
        loop {
            let max_concurrent = self.config.read().max_concurrent_requests.max(1);
            if self.in_flight.len() >= max_concurrent || !self.queue.has_pending_requests() {
                break;
            }
            let Some(request) = self.queue.next_request() else {
                break;
            };
            self.dispatch(request, Duration::ZERO);
            started += 1;
        }
        if started > 0 {
            trace!(
                started,
                in_flight = self.in_flight.len(),
                "Filled scheduler slots"
            );
        }
        started
    }

    /// Wait for the next fetch outcome.
    pub async fn next_outcome(&mut self) -> Option<FetchOutcome<Q::Output>> {
        self.outcome_rx.recv().await
    }

    /// Apply an outcome to the request it belongs to, then refill slots.
    pub fn handle_outcome(&mut self, outcome: FetchOutcome<Q::Output>) {
        if outcome.generation != self.generation {
            trace!(
                request_id = %outcome.request_id,
                generation = outcome.generation,
                current = self.generation,
                "Discarding outcome from a cancelled generation"
            );
            self.metrics.record_stale_discarded();
            return;
        }
        let Some(mut request) = self.in_flight.remove(&outcome.request_id) else {
            trace!(request_id = %outcome.request_id, "Discarding outcome for unknown request");
            self.metrics.record_stale_discarded();
            return;
        };

        match outcome.result {
            Ok(output) => {
                request.set_state(RequestState::Completed);
                self.queue.on_completed(request, output);
            }
            Err(error) => self.handle_failure(request, error),
        }

        self.notify_request_added();
    }

    /// Drop pending and in-flight bookkeeping and abort running fetches.
    pub fn cancel(&mut self) {
        let aborted = self.in_flight.len();
        self.generation_token.cancel();
        self.generation = self.generation.wrapping_add(1);
        self.generation_token = self.shutdown.child_token();
        self.in_flight.clear();
        self.queue.cancel();
        debug!(aborted, generation = self.generation, "Retry scheduler cancelled");
    }

    fn handle_failure(&mut self, mut request: Q::Request, error: SchedulerError) {
        if error.is_timeout() {
            self.metrics.record_timeout();
        }

        let max_retries = self.config.read().max_retry_attempts;
        if error.is_retryable() && request.retry_count() < max_retries {
            request.record_retry();
            request.set_state(RequestState::Retrying);
            self.metrics.record_retry();
            let backoff = self.config.read().retry_backoff(request.retry_count());
            warn!(
                request_id = %request.id(),
                attempt = request.retry_count(),
                max_retries,
                backoff_ms = backoff.as_millis() as u64,
                error = %error,
                "Request failed, retrying"
            );
            self.queue.on_retrying(&request, &error);
            request.set_state(RequestState::Pending);
            self.dispatch(request, backoff);
        } else {
            request.set_state(RequestState::ExceededRetries);
            self.metrics.record_exceeded_retries();
            self.queue.on_exceeded_retries(request, error);
        }
    }

    fn dispatch(&mut self, mut request: Q::Request, backoff: Duration) {
        request.set_state(RequestState::InFlight);
        let mut dispatch = self.queue.begin_request(&request, backoff);
        dispatch.delay = dispatch.delay.max(backoff);
        let request_id = request.id();
        self.in_flight.insert(request_id, request);
        self.spawn_fetch(request_id, dispatch);
    }

    fn spawn_fetch(&self, request_id: RequestId, dispatch: Dispatch<Q::Output>) {
        let outcome_tx = self.outcome_tx.clone();
        let token = self.generation_token.clone();
        let generation = self.generation;
        let timeout = self.config.read().timeout();
        let Dispatch { delay, fetch } = dispatch;

        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => Err(SchedulerError::Cancelled),
                result = async {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    match tokio::time::timeout(timeout, fetch).await {
                        Ok(result) => result,
                        Err(_) => Err(SchedulerError::Timeout { timeout }),
                    }
                } => result,
            };
            // The owner may already be gone.
            let _ = outcome_tx.send(FetchOutcome {
                request_id,
                generation,
                result,
            });
        });
    }
}
