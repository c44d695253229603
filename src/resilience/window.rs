//! Bucketed rolling window of call outcomes.
//!
//! The window is split into `buckets` slots of equal width. A slot is
//! lazily reset the first time it is touched in a new period, so stale
//! buckets never need a background sweeper.

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome kinds tracked by the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    Timeout,
    Rejected,
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    epoch: u64,
    successes: u64,
    failures: u64,
    timeouts: u64,
    rejections: u64,
    latency_total_ms: u64,
    latency_max_ms: u64,
}

/// Aggregated view over the live buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HealthCounts {
    /// Executed calls (successes + failures + timeouts).
    pub total: u64,
    /// Failures + timeouts.
    pub errors: u64,
    pub rejections: u64,
    pub error_percentage: u32,
    pub mean_latency_ms: u64,
    pub max_latency_ms: u64,
}

#[derive(Debug)]
pub struct RollingWindow {
    origin: Instant,
    bucket_width: Duration,
    buckets: Vec<Bucket>,
}

impl RollingWindow {
    pub fn new(window: Duration, buckets: usize) -> Self {
        let buckets = buckets.max(1);
        let bucket_width = (window / buckets as u32).max(Duration::from_millis(1));
        Self {
            origin: Instant::now(),
            bucket_width,
            buckets: vec![Bucket::default(); buckets],
        }
    }

    fn epoch_at(&self, now: Instant) -> u64 {
        (now.saturating_duration_since(self.origin).as_nanos() / self.bucket_width.as_nanos()) as u64
    }

    fn bucket_mut(&mut self, now: Instant) -> &mut Bucket {
        let epoch = self.epoch_at(now);
        let len = self.buckets.len() as u64;
        let slot = &mut self.buckets[(epoch % len) as usize];
        if slot.epoch != epoch {
            *slot = Bucket {
                epoch,
                ..Bucket::default()
            };
        }
        slot
    }

    pub fn record(&mut self, outcome: CallOutcome, latency: Duration, now: Instant) {
        let bucket = self.bucket_mut(now);
        match outcome {
            CallOutcome::Success => bucket.successes += 1,
            CallOutcome::Failure => bucket.failures += 1,
            CallOutcome::Timeout => bucket.timeouts += 1,
            CallOutcome::Rejected => {
                bucket.rejections += 1;
                return;
            }
        }
        let ms = latency.as_millis() as u64;
        bucket.latency_total_ms += ms;
        bucket.latency_max_ms = bucket.latency_max_ms.max(ms);
    }

    pub fn counts(&self, now: Instant) -> HealthCounts {
        let current = self.epoch_at(now);
        let len = self.buckets.len() as u64;
        let mut counts = HealthCounts::default();
        let mut latency_total = 0;

        for bucket in &self.buckets {
            // Epoch 0 buckets that were never written are all zeros anyway.
            if bucket.epoch > current || current - bucket.epoch >= len {
                continue;
            }
            counts.total += bucket.successes + bucket.failures + bucket.timeouts;
            counts.errors += bucket.failures + bucket.timeouts;
            counts.rejections += bucket.rejections;
            latency_total += bucket.latency_total_ms;
            counts.max_latency_ms = counts.max_latency_ms.max(bucket.latency_max_ms);
        }

        if counts.total > 0 {
            counts.error_percentage = ((counts.errors * 100) / counts.total) as u32;
            counts.mean_latency_ms = latency_total / counts.total;
        }
        counts
    }

    pub fn reset(&mut self) {
        for bucket in &mut self.buckets {
            *bucket = Bucket::default();
        }
        self.origin = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_counts_and_percentage() {
        let mut window = RollingWindow::new(Duration::from_secs(10), 10);
        let now = Instant::now();
        for _ in 0..6 {
            window.record(CallOutcome::Failure, Duration::from_millis(20), now);
        }
        for _ in 0..4 {
            window.record(CallOutcome::Success, Duration::from_millis(10), now);
        }
        window.record(CallOutcome::Rejected, Duration::ZERO, now);

        let counts = window.counts(now);
        assert_eq!(counts.total, 10);
        assert_eq!(counts.errors, 6);
        assert_eq!(counts.rejections, 1);
        assert_eq!(counts.error_percentage, 60);
        assert_eq!(counts.max_latency_ms, 20);
        assert_eq!(counts.mean_latency_ms, 16);
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_buckets_roll_off() {
        let mut window = RollingWindow::new(Duration::from_secs(10), 10);
        window.record(CallOutcome::Failure, Duration::ZERO, Instant::now());

        tokio::time::advance(Duration::from_secs(5)).await;
        window.record(CallOutcome::Success, Duration::ZERO, Instant::now());
        assert_eq!(window.counts(Instant::now()).total, 2);

        tokio::time::advance(Duration::from_secs(6)).await;
        let counts = window.counts(Instant::now());
        assert_eq!(counts.total, 1);
        assert_eq!(counts.errors, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset() {
        let mut window = RollingWindow::new(Duration::from_secs(1), 4);
        window.record(CallOutcome::Timeout, Duration::from_millis(5), Instant::now());
        window.reset();
        assert_eq!(window.counts(Instant::now()), HealthCounts::default());
    }
}
