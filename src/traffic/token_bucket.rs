//! # Token Bucket Rate Limiter
//!
//! Admission control for a shaper. The bucket holds up to `capacity` tokens
//! (one token per byte) and gains `refill_rate` tokens per second.
//!
//! Refill is lazy: nothing runs in the background, every observation first
//! credits the time elapsed since the last refill. Time comes from an injected
//! [`quanta::Clock`] so tests can drive it with `Clock::mock()`.
//!
//! Whole tokens are credited and the refill timestamp only advances by the
//! time those tokens account for. The remainder carries over, so polling a
//! slow bucket often does not lose accrual.

use super::stats::LimiterStatistics;
use quanta::{Clock, Instant};
use std::fmt;
use std::time::Duration;
use tracing::debug;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Rate limiter seam used by [`TrafficShaper`](super::TrafficShaper)
///
/// `consume` returning `false` is ordinary backpressure, not an error.
pub trait RateLimiter: Send + fmt::Debug {
    /// Admit `amount` bytes, debiting tokens on success
    fn consume(&mut self, amount: u64) -> bool;

    /// Tokens available right now (after refill)
    fn available_tokens(&mut self) -> u64;

    /// Refill to capacity and zero counters, keeping the configuration
    fn reset(&mut self);

    fn set_capacity(&mut self, capacity: u64);

    fn set_refill_rate(&mut self, rate: u64);

    /// Set the per-admission ceiling; 0 removes it
    fn set_burst_size(&mut self, burst_size: u64);

    fn statistics(&mut self) -> LimiterStatistics;
}

/// Token bucket with lazy refill
pub struct TokenBucket {
    capacity: u64,
    refill_rate: u64,
    burst_size: Option<u64>,
    tokens: u64,
    last_refill: Instant,
    clock: Clock,
    admitted_packets: u64,
    admitted_bytes: u64,
    rejected_packets: u64,
    rejected_bytes: u64,
}

impl TokenBucket {
    /// Create a full bucket using the system clock
    pub fn new(capacity: u64, refill_rate: u64) -> Self {
        Self::with_clock(capacity, refill_rate, Clock::new())
    }

    /// Create a full bucket reading time from `clock`
    pub fn with_clock(capacity: u64, refill_rate: u64, clock: Clock) -> Self {
        let now = clock.now();
        Self {
            capacity,
            refill_rate,
            burst_size: None,
            tokens: capacity,
            last_refill: now,
            clock,
            admitted_packets: 0,
            admitted_bytes: 0,
            rejected_packets: 0,
            rejected_bytes: 0,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> u64 {
        self.refill_rate
    }

    pub fn burst_size(&self) -> Option<u64> {
        self.burst_size
    }

    fn refill(&mut self) {
        let now = self.clock.now();

        if self.tokens >= self.capacity || self.refill_rate == 0 {
            self.last_refill = now;
            return;
        }

        let elapsed = now.duration_since(self.last_refill).as_nanos();
        let rate = u128::from(self.refill_rate);
        let earned = elapsed * rate / NANOS_PER_SEC;
        if earned == 0 {
            return;
        }

        let room = u128::from(self.capacity - self.tokens);
        if earned >= room {
            self.tokens = self.capacity;
            self.last_refill = now;
        } else {
            // `earned < room <= u64::MAX`, so the casts below cannot truncate
            self.tokens += earned as u64;
            let spent = earned * NANOS_PER_SEC / rate;
            self.last_refill = self.last_refill + Duration::from_nanos(spent as u64);
        }
    }
}

impl RateLimiter for TokenBucket {
    fn consume(&mut self, amount: u64) -> bool {
        self.refill();

        let within_burst = self.burst_size.map_or(true, |burst| amount <= burst);
        if within_burst && self.tokens >= amount {
            self.tokens -= amount;
            self.admitted_packets += 1;
            self.admitted_bytes += amount;
            true
        } else {
            self.rejected_packets += 1;
            self.rejected_bytes += amount;
            false
        }
    }

    fn available_tokens(&mut self) -> u64 {
        self.refill();
        self.tokens
    }

    fn reset(&mut self) {
        self.tokens = self.capacity;
        self.last_refill = self.clock.now();
        self.admitted_packets = 0;
        self.admitted_bytes = 0;
        self.rejected_packets = 0;
        self.rejected_bytes = 0;
    }

    fn set_capacity(&mut self, capacity: u64) {
        self.refill();
        self.capacity = capacity;
        if self.tokens > capacity {
            self.tokens = capacity;
        }
        debug!("Token bucket capacity set to {} bytes", capacity);
    }

    fn set_refill_rate(&mut self, rate: u64) {
        // Settle what accrued at the old rate before switching
        self.refill();
        self.last_refill = self.clock.now();
        self.refill_rate = rate;
        debug!("Token bucket refill rate set to {} bytes/s", rate);
    }

    fn set_burst_size(&mut self, burst_size: u64) {
        self.burst_size = (burst_size > 0).then_some(burst_size);
    }

    fn statistics(&mut self) -> LimiterStatistics {
        self.refill();
        LimiterStatistics {
            capacity: self.capacity,
            refill_rate: self.refill_rate,
            burst_size: self.burst_size,
            available_tokens: self.tokens,
            admitted_packets: self.admitted_packets,
            admitted_bytes: self.admitted_bytes,
            rejected_packets: self.rejected_packets,
            rejected_bytes: self.rejected_bytes,
        }
    }
}

impl fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBucket")
            .field("capacity", &self.capacity)
            .field("refill_rate", &self.refill_rate)
            .field("burst_size", &self.burst_size)
            .field("tokens", &self.tokens)
            .finish()
    }
}

/// Limiter that admits everything
///
/// Useful for exercising the scheduler on its own.
#[derive(Debug, Default)]
pub struct UnlimitedRate {
    admitted_packets: u64,
    admitted_bytes: u64,
}

impl UnlimitedRate {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimiter for UnlimitedRate {
    fn consume(&mut self, amount: u64) -> bool {
        self.admitted_packets += 1;
        self.admitted_bytes += amount;
        true
    }

    fn available_tokens(&mut self) -> u64 {
        u64::MAX
    }

    fn reset(&mut self) {
        self.admitted_packets = 0;
        self.admitted_bytes = 0;
    }

    fn set_capacity(&mut self, _capacity: u64) {}

    fn set_refill_rate(&mut self, _rate: u64) {}

    fn set_burst_size(&mut self, _burst_size: u64) {}

    fn statistics(&mut self) -> LimiterStatistics {
        LimiterStatistics {
            capacity: u64::MAX,
            refill_rate: u64::MAX,
            burst_size: None,
            available_tokens: u64::MAX,
            admitted_packets: self.admitted_packets,
            admitted_bytes: self.admitted_bytes,
            rejected_packets: 0,
            rejected_bytes: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_bucket(capacity: u64, rate: u64) -> (TokenBucket, std::sync::Arc<quanta::Mock>) {
        let (clock, mock) = Clock::mock();
        (TokenBucket::with_clock(capacity, rate, clock), mock)
    }

    #[test]
    fn test_starts_full() {
        let (mut bucket, _mock) = mock_bucket(1000, 100);
        assert_eq!(bucket.available_tokens(), 1000);
    }

    #[test]
    fn test_consume_and_reject() {
        let (mut bucket, _mock) = mock_bucket(1000, 100);

        assert!(bucket.consume(600));
        assert_eq!(bucket.available_tokens(), 400);
        assert!(!bucket.consume(500));
        assert_eq!(bucket.available_tokens(), 400);

        let stats = bucket.statistics();
        assert_eq!(stats.admitted_packets, 1);
        assert_eq!(stats.admitted_bytes, 600);
        assert_eq!(stats.rejected_packets, 1);
        assert_eq!(stats.rejected_bytes, 500);
    }

    #[test]
    fn test_oversized_request_rejected_at_full_capacity() {
        let (mut bucket, _mock) = mock_bucket(1000, 100);
        assert!(!bucket.consume(1500));
        assert_eq!(bucket.available_tokens(), 1000);
    }

    #[test]
    fn test_refill_over_time() {
        let (mut bucket, mock) = mock_bucket(1000, 100);
        assert!(bucket.consume(1000));
        assert_eq!(bucket.available_tokens(), 0);

        mock.increment(Duration::from_secs(3));
        assert_eq!(bucket.available_tokens(), 300);

        mock.increment(Duration::from_secs(7));
        assert_eq!(bucket.available_tokens(), 1000);

        mock.increment(Duration::from_secs(60));
        assert_eq!(bucket.available_tokens(), 1000);
    }

    #[test]
    fn test_frequent_polling_keeps_fractional_progress() {
        let (mut bucket, mock) = mock_bucket(100, 3);
        assert!(bucket.consume(100));

        // 3 tokens/s observed every 100ms must still add up to 3 per second
        for _ in 0..10 {
            mock.increment(Duration::from_millis(100));
            bucket.available_tokens();
        }
        assert_eq!(bucket.available_tokens(), 3);
    }

    #[test]
    fn test_zero_elapsed_adds_nothing() {
        let (mut bucket, _mock) = mock_bucket(1000, 1_000_000);
        assert!(bucket.consume(1000));
        assert_eq!(bucket.available_tokens(), 0);
        assert_eq!(bucket.available_tokens(), 0);
    }

    #[test]
    fn test_zero_rate_never_refills() {
        let (mut bucket, mock) = mock_bucket(500, 0);
        assert!(bucket.consume(500));
        mock.increment(Duration::from_secs(3600));
        assert_eq!(bucket.available_tokens(), 0);
    }

    #[test]
    fn test_shrinking_capacity_clamps_tokens() {
        let (mut bucket, _mock) = mock_bucket(1000, 100);
        bucket.set_capacity(400);
        assert_eq!(bucket.available_tokens(), 400);

        bucket.set_capacity(2000);
        assert_eq!(bucket.available_tokens(), 400);
    }

    #[test]
    fn test_rate_change_settles_old_accrual() {
        let (mut bucket, mock) = mock_bucket(10_000, 100);
        assert!(bucket.consume(10_000));

        mock.increment(Duration::from_secs(2));
        bucket.set_refill_rate(1000);
        assert_eq!(bucket.available_tokens(), 200);

        mock.increment(Duration::from_secs(1));
        assert_eq!(bucket.available_tokens(), 1200);
    }

    #[test]
    fn test_burst_ceiling() {
        let (mut bucket, _mock) = mock_bucket(1000, 100);
        bucket.set_burst_size(300);
        assert_eq!(bucket.burst_size(), Some(300));

        assert!(!bucket.consume(400));
        assert!(bucket.consume(300));
        assert_eq!(bucket.available_tokens(), 700);

        bucket.set_burst_size(0);
        assert_eq!(bucket.burst_size(), None);
        assert!(bucket.consume(700));
    }

    #[test]
    fn test_reset_refills_and_clears_counters() {
        let (mut bucket, _mock) = mock_bucket(1000, 100);
        assert!(bucket.consume(900));
        assert!(!bucket.consume(900));

        bucket.reset();
        let stats = bucket.statistics();
        assert_eq!(stats.available_tokens, 1000);
        assert_eq!(stats.admitted_packets, 0);
        assert_eq!(stats.rejected_packets, 0);
    }

    #[test]
    fn test_unlimited_rate_admits_everything() {
        let mut limiter = UnlimitedRate::new();
        assert!(limiter.consume(u64::MAX / 2));
        assert!(limiter.consume(1));
        assert_eq!(limiter.statistics().admitted_packets, 2);
        limiter.reset();
        assert_eq!(limiter.statistics().admitted_packets, 0);
    }
}
