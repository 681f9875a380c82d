use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Per-target send budget of `capacity` tokens. A spent token comes back
/// exactly `refill_period` after it was spent, so no window of
/// `refill_period` ever holds more than `capacity` sends.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    refill_period: Duration,
    spent: VecDeque<Instant>,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_period: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            refill_period,
            spent: VecDeque::with_capacity(capacity as usize),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Shrink or grow the bucket, e.g. to match a remote `X-RateLimit-Limit`.
    pub fn set_capacity(&mut self, capacity: u32) {
        self.capacity = capacity.max(1);
    }

    fn refill(&mut self, now: Instant) {
        while self
            .spent
            .front()
            .is_some_and(|t| *t + self.refill_period <= now)
        {
            self.spent.pop_front();
        }
    }

    pub fn remaining(&mut self, now: Instant) -> u32 {
        self.refill(now);
        self.capacity.saturating_sub(self.spent.len() as u32)
    }

    /// Take a token, or return how long until one comes back.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if (self.spent.len() as u32) < self.capacity {
            self.spent.push_back(now);
            return Ok(());
        }
        // After a capacity shrink more tokens may be out than allowed; wait
        // for enough of them to come back.
        let excess = self.spent.len() - self.capacity as usize;
        let wait = self
            .spent
            .get(excess)
            .map(|t| (*t + self.refill_period).saturating_duration_since(now))
            .unwrap_or(self.refill_period);
        Err(wait)
    }
}
