use std::time::Duration;

use tokio::time::Instant;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(45);
/// Intervals without HEARTBEAT_ACK before the link is considered dead.
pub const MISSED_ACK_LIMIT: u32 = 2;

/// Tracks acknowledgements for the heartbeats a link sends.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    last_ack: Instant,
}

impl HeartbeatMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_ack: Instant::now(),
        }
    }

    /// Interval announced in HELLO, falling back to the default for a zero value.
    pub fn from_hello(interval_ms: u64) -> Self {
        match interval_ms {
            0 => Self::new(DEFAULT_HEARTBEAT_INTERVAL),
            ms => Self::new(Duration::from_millis(ms)),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.interval * MISSED_ACK_LIMIT
    }

    pub fn ack(&mut self) {
        self.last_ack = Instant::now();
    }

    pub fn is_overdue(&self) -> bool {
        self.last_ack.elapsed() > self.timeout()
    }
}
