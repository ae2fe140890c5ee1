//! Sliding-window dispatch rate monitor.
//!
//! Records the instant of every dispatch and answers two questions: how fast
//! are we dispatching right now, and how long must the next dispatch wait so
//! that no window of `window` length ever holds more than the allowed count.
//!
//! Samples may lie in the future: a dispatch delayed by the monitor is recorded
//! at the instant it will actually go out, so back-to-back delayed dispatches
//! queue up behind each other instead of all firing at once.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

/// Default monitoring window (one minute).
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RateMonitor {
    window: Duration,
    /// Dispatch instants, oldest first.
    samples: VecDeque<Instant>,
}

impl RateMonitor {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Change the monitoring window. Existing samples are re-evaluated lazily.
    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    pub fn record_dispatch(&mut self) {
        self.record_dispatch_at(Instant::now());
    }

    /// Record a dispatch happening at `at` (possibly in the future).
    pub fn record_dispatch_at(&mut self, at: Instant) {
        let pos = self
            .samples
            .iter()
            .rposition(|sample| *sample <= at)
            .map_or(0, |p| p + 1);
        self.samples.insert(pos, at);
        self.expire(at.min(Instant::now()));
    }

    /// Dispatches that already went out within the window ending at `now`.
    pub fn dispatches_in_window_at(&mut self, now: Instant) -> usize {
        self.expire(now);
        self.samples.partition_point(|sample| *sample <= now)
    }

    /// Delayed dispatches recorded but not yet due at `now`.
    pub fn scheduled_at(&mut self, now: Instant) -> usize {
        self.expire(now);
        self.samples.len() - self.samples.partition_point(|sample| *sample <= now)
    }

    /// Dispatches per second over the monitoring window. Scheduled dispatches
    /// are not counted until they are due.
    pub fn current_rate(&mut self) -> f64 {
        self.current_rate_at(Instant::now())
    }

    pub fn current_rate_at(&mut self, now: Instant) -> f64 {
        let count = self.dispatches_in_window_at(now);
        let secs = self.window.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        count as f64 / secs
    }

    pub fn recommend_delay(&mut self, max_per_window: u32) -> Duration {
        self.recommend_delay_at(max_per_window, Instant::now())
    }

    /// How long a dispatch considered at `now` must wait so that, once it is
    /// counted, the window still holds at most `max_per_window` dispatches.
    ///
    /// Zero while there is headroom. Otherwise the delay runs until the sample
    /// that would push the count over the limit falls out of the window.
    pub fn recommend_delay_at(&mut self, max_per_window: u32, now: Instant) -> Duration {
        self.expire(now);
        let max = max_per_window.max(1) as usize;
        let count = self.samples.len();
        if count < max {
            return Duration::ZERO;
        }

        let release_at = self.samples[count - max] + self.window;
        let delay = release_at.saturating_duration_since(now);
        trace!(
            count,
            max,
            delay_ms = delay.as_millis() as u64,
            "Dispatch rate at limit"
        );
        delay
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Drop samples that have left the window.
    fn expire(&mut self, now: Instant) {
        while let Some(oldest) = self.samples.front() {
            if *oldest + self.window <= now {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for RateMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[test]
    fn test_rate_counts_samples_over_window() {
        let start = Instant::now();
        let mut monitor = RateMonitor::new(WINDOW);

        for i in 0..6 {
            monitor.record_dispatch_at(start + Duration::from_secs(i));
        }
        let now = start + Duration::from_secs(10);
        assert_eq!(monitor.dispatches_in_window_at(now), 6);
        assert!((monitor.current_rate_at(now) - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_samples_expire_lazily() {
        let start = Instant::now();
        let mut monitor = RateMonitor::new(WINDOW);
        monitor.record_dispatch_at(start);
        monitor.record_dispatch_at(start + Duration::from_secs(30));

        assert_eq!(monitor.dispatches_in_window_at(start + Duration::from_secs(59)), 2);
        assert_eq!(monitor.dispatches_in_window_at(start + Duration::from_secs(60)), 1);
        assert_eq!(monitor.dispatches_in_window_at(start + Duration::from_secs(90)), 0);
    }

    #[test]
    fn test_rate_ignores_dispatches_not_yet_due() {
        let start = Instant::now();
        let mut monitor = RateMonitor::new(WINDOW);
        monitor.record_dispatch_at(start);
        monitor.record_dispatch_at(start + Duration::from_secs(30));

        let now = start + Duration::from_secs(10);
        assert_eq!(monitor.dispatches_in_window_at(now), 1);
        assert_eq!(monitor.scheduled_at(now), 1);
        assert!((monitor.current_rate_at(now) - 1.0 / 60.0).abs() < f64::EPSILON);
        // The future sample still holds back the next dispatch.
        assert_eq!(monitor.recommend_delay_at(2, now), Duration::from_secs(50));

        let later = start + Duration::from_secs(30);
        assert_eq!(monitor.dispatches_in_window_at(later), 2);
        assert_eq!(monitor.scheduled_at(later), 0);
    }

    #[test]
    fn test_no_delay_below_limit() {
        let start = Instant::now();
        let mut monitor = RateMonitor::new(WINDOW);
        for i in 0..19 {
            monitor.record_dispatch_at(start + Duration::from_millis(i * 10));
        }
        assert_eq!(
            monitor.recommend_delay_at(20, start + Duration::from_secs(1)),
            Duration::ZERO
        );
    }

    #[test]
    fn test_delay_when_window_is_full() {
        let start = Instant::now();
        let mut monitor = RateMonitor::new(WINDOW);
        for i in 0..20 {
            monitor.record_dispatch_at(start + Duration::from_secs(i));
        }

        // The oldest sample (t=0) leaves the window at t=60.
        let now = start + Duration::from_secs(25);
        let delay = monitor.recommend_delay_at(20, now);
        assert_eq!(delay, Duration::from_secs(35));
    }

    #[test]
    fn test_delayed_dispatches_never_exceed_limit_in_any_window() {
        let start = Instant::now();
        let mut monitor = RateMonitor::new(WINDOW);
        let max = 5u32;
        let mut dispatched = Vec::new();

        // Fifteen dispatches requested at the same instant.
        for _ in 0..15 {
            let delay = monitor.recommend_delay_at(max, start);
            let at = start + delay;
            monitor.record_dispatch_at(at);
            dispatched.push(at);
        }

        assert!(dispatched.windows(2).all(|w| w[0] <= w[1]));
        for (i, &at) in dispatched.iter().enumerate() {
            let in_window = dispatched[i..]
                .iter()
                .take_while(|&&later| later < at + WINDOW)
                .count();
            assert!(in_window <= max as usize, "window starting at {i} holds {in_window}");
        }
        assert_eq!(dispatched[5] - dispatched[0], WINDOW);
        assert_eq!(dispatched[10] - dispatched[5], WINDOW);
    }

    #[test]
    fn test_zero_limit_is_treated_as_one() {
        let start = Instant::now();
        let mut monitor = RateMonitor::new(WINDOW);
        assert_eq!(monitor.recommend_delay_at(0, start), Duration::ZERO);
        monitor.record_dispatch_at(start);
        assert_eq!(monitor.recommend_delay_at(0, start), WINDOW);
    }
}
