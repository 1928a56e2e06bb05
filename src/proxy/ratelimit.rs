//! Token bucket for POST requests
//!
//! Tokens are added on a fixed cadence: every whole `refill_interval` since the
//! bucket was created adds `tokens_per_refill`, capped at `max_tokens`. Refills
//! are computed lazily when a token is requested.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct TokenBucket {
    max_tokens: u32,
    tokens: u32,
    refill_interval: Duration,
    tokens_per_refill: u32,
    last_refill: Instant,
}

impl TokenBucket {
    /// Creates a full bucket.
    pub fn new(max_tokens: u32, refill_interval: Duration, tokens_per_refill: u32) -> Self {
        Self::new_at(max_tokens, refill_interval, tokens_per_refill, Instant::now())
    }

    fn new_at(
        max_tokens: u32,
        refill_interval: Duration,
        tokens_per_refill: u32,
        now: Instant,
    ) -> Self {
        Self {
            max_tokens,
            tokens: max_tokens,
            refill_interval: refill_interval.max(Duration::from_millis(1)),
            tokens_per_refill,
            last_refill: now,
        }
    }

    /// Takes one token if available.
    pub fn try_consume(&mut self) -> bool {
        self.try_consume_at(Instant::now())
    }

    pub fn try_consume_at(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens == 0 {
            return false;
        }
        self.tokens -= 1;
        true
    }

    pub fn available(&self) -> u32 {
        self.tokens
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let intervals = elapsed.as_nanos() / self.refill_interval.as_nanos();
        if intervals == 0 {
            return;
        }

        let added = intervals.saturating_mul(u128::from(self.tokens_per_refill));
        let missing = u128::from(self.max_tokens - self.tokens);
        // Bounded by max_tokens, so the narrowing cannot truncate
        self.tokens += u32::try_from(added.min(missing)).unwrap_or(0);

        // Keep the cadence: only whole intervals are consumed
        let step = u32::try_from(intervals).unwrap_or(u32::MAX);
        self.last_refill = self
            .refill_interval
            .checked_mul(step)
            .and_then(|advance| self.last_refill.checked_add(advance))
            .unwrap_or(now);
    }
}
