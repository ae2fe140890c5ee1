use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::strategy::ChunkDownloadStrategy;

/// Scheduler configuration shared between the owner loop and its handles.
///
/// Values are read at decision time, so a write through a handle affects the
/// very next dispatch decision.
pub type SharedConfig = Arc<RwLock<SchedulerConfig>>;

/// Configurable options for the chunk download scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Max fetches occupying a slot at once, retries included (default: 2)
    pub max_concurrent_requests: usize,

    /// Retries allowed after the first failed attempt (default: 3)
    pub max_retry_attempts: u32,

    /// Per-attempt deadline, measured from the moment the fetch goes out
    pub timeout_ms: u64,

    /// Wait before the first retry; doubles on every further retry (default: 500)
    pub retry_base_delay_ms: u64,

    /// Cap on the retry wait (default: 5000)
    pub retry_max_delay_ms: u64,

    /// Dispatches allowed per rate window (default: 20)
    pub max_requests_per_window: u32,

    /// Length of the sliding rate window
    pub rate_window_ms: u64,

    /// Chunk selection policy. `unspecified` is normalized to `as-needed`.
    pub strategy: ChunkDownloadStrategy,

    /// How far ahead of the playhead AsNeeded will fetch
    pub as_needed_window_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 2,
            max_retry_attempts: 3,
            timeout_ms: 6_000,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 5_000,
            max_requests_per_window: 20,
            rate_window_ms: 60_000,
            strategy: ChunkDownloadStrategy::AsNeeded,
            as_needed_window_ms: 60_000,
        }
    }
}

impl SchedulerConfig {
    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max;
        self
    }

    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = duration_to_ms(timeout);
        self
    }

    pub fn with_retry_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base_delay_ms = duration_to_ms(base);
        self.retry_max_delay_ms = duration_to_ms(max);
        self
    }

    pub fn with_max_request_rate(mut self, requests: u32, window: Duration) -> Self {
        self.max_requests_per_window = requests;
        self.rate_window_ms = duration_to_ms(window);
        self
    }

    pub fn with_strategy(mut self, strategy: ChunkDownloadStrategy) -> Self {
        self.set_strategy(strategy);
        self
    }

    pub fn with_as_needed_window(mut self, window: Duration) -> Self {
        self.as_needed_window_ms = duration_to_ms(window);
        self
    }

    pub fn set_strategy(&mut self, strategy: ChunkDownloadStrategy) {
        self.strategy = strategy.normalized();
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    /// Wait before retry number `retry` (1-based): base * 2^(retry - 1), capped.
    pub fn retry_backoff(&self, retry: u32) -> Duration {
        let multiplier = 1u32
            .checked_shl(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        let max = self.retry_max_delay();
        self.retry_base_delay()
            .checked_mul(multiplier)
            .unwrap_or(max)
            .min(max)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_window_ms)
    }

    pub fn as_needed_window(&self) -> Duration {
        Duration::from_millis(self.as_needed_window_ms)
    }

    /// Period of the AsNeeded re-evaluation wake: window minus timeout, so a
    /// chunk selected at the edge of the window still lands before it is due.
    pub fn as_needed_period(&self) -> Duration {
        let period = self.as_needed_window().saturating_sub(self.timeout());
        if !period.is_zero() {
            period
        } else if !self.as_needed_window().is_zero() {
            self.as_needed_window()
        } else {
            Duration::from_secs(1)
        }
    }

    /// Clamp values that would stall the scheduler instead of rejecting them.
    pub fn normalized(mut self) -> Self {
        if self.max_concurrent_requests == 0 {
            warn!("max_concurrent_requests is 0, using 1");
            self.max_concurrent_requests = 1;
        }
        if self.max_requests_per_window == 0 {
            warn!("max_requests_per_window is 0, using 1");
            self.max_requests_per_window = 1;
        }
        if self.rate_window_ms == 0 {
            warn!("rate_window_ms is 0, rate limiting is effectively disabled");
        }
        self.strategy = self.strategy.normalized();
        self
    }

    pub fn into_shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self.normalized()))
    }
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_concurrent_requests, 2);
        assert_eq!(config.max_retry_attempts, 3);
        assert_eq!(config.timeout(), Duration::from_millis(6000));
        assert_eq!(config.max_requests_per_window, 20);
        assert_eq!(config.rate_window(), Duration::from_secs(60));
        assert_eq!(config.strategy, ChunkDownloadStrategy::AsNeeded);
        assert_eq!(config.as_needed_window(), Duration::from_secs(60));
        assert_eq!(config.as_needed_period(), Duration::from_secs(54));
        assert_eq!(config.retry_base_delay(), Duration::from_millis(500));
        assert_eq!(config.retry_max_delay(), Duration::from_secs(5));
    }

    #[test]
    fn test_retry_backoff_doubles_up_to_cap() {
        let config = SchedulerConfig::default()
            .with_retry_backoff(Duration::from_secs(1), Duration::from_secs(5));
        let delays: Vec<_> = (1..=5).map(|retry| config.retry_backoff(retry)).collect();
        assert_eq!(
            delays,
            [1, 2, 4, 5, 5].map(Duration::from_secs).to_vec()
        );
        // Huge retry counts saturate instead of overflowing.
        assert_eq!(config.retry_backoff(u32::MAX), Duration::from_secs(5));

        let config = SchedulerConfig::default().with_retry_backoff(Duration::ZERO, Duration::ZERO);
        assert_eq!(config.retry_backoff(3), Duration::ZERO);
    }

    #[test]
    fn test_as_needed_period_fallbacks() {
        let config = SchedulerConfig::default()
            .with_as_needed_window(Duration::from_secs(5))
            .with_timeout(Duration::from_secs(6));
        assert_eq!(config.as_needed_period(), Duration::from_secs(5));

        let config = SchedulerConfig::default().with_as_needed_window(Duration::ZERO);
        assert_eq!(config.as_needed_period(), Duration::from_secs(1));
    }

    #[test]
    fn test_unspecified_strategy_is_never_stored() {
        let config = SchedulerConfig::default().with_strategy(ChunkDownloadStrategy::Unspecified);
        assert_eq!(config.strategy, ChunkDownloadStrategy::AsNeeded);

        let mut config = SchedulerConfig::default();
        config.strategy = ChunkDownloadStrategy::Unspecified;
        assert_eq!(config.normalized().strategy, ChunkDownloadStrategy::AsNeeded);
    }

    #[test]
    fn test_normalized_clamps_zero_limits() {
        let config = SchedulerConfig::default()
            .with_max_concurrent_requests(0)
            .with_max_request_rate(0, Duration::from_secs(10))
            .normalized();
        assert_eq!(config.max_concurrent_requests, 1);
        assert_eq!(config.max_requests_per_window, 1);
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: SchedulerConfig = serde_json::from_str(
            r#"{ "max_concurrent_requests": 4, "strategy": "aggressive-from-start" }"#,
        )
        .unwrap();
        assert_eq!(config.max_concurrent_requests, 4);
        assert_eq!(config.strategy, ChunkDownloadStrategy::AggressiveFromStart);
        assert_eq!(config.max_retry_attempts, 3);
        assert_eq!(config.timeout_ms, 6_000);
    }
}
