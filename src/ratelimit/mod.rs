//! Outbound queue: per-target token buckets drained by one task per target.

mod bucket;
mod queue;

pub use bucket::TokenBucket;
pub use queue::TargetQueue;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::{DeliveryError, RateLimitExceeded, TransportError};
use crate::models::outbound::{Ack, OutboundRequest};

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Sends allowed per target within any `refill_period`.
    pub capacity: u32,
    pub refill_period: Duration,
    /// Pending requests kept per target before the oldest low-priority one is dropped.
    pub queue_limit: usize,
    /// First hold after a remote 429, doubled for each consecutive one.
    pub penalty_base: Duration,
    pub penalty_cap: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            refill_period: Duration::from_secs(1),
            queue_limit: 256,
            penalty_base: Duration::from_secs(1),
            penalty_cap: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    fn penalty(&self, strikes: u32) -> Duration {
        2u32.checked_pow(strikes.saturating_sub(1))
            .and_then(|f| self.penalty_base.checked_mul(f))
            .map_or(self.penalty_cap, |d| d.min(self.penalty_cap))
    }
}

/// Where drained requests go. Implemented by the connection manager.
#[async_trait]
pub trait OutboundSink: Send + Sync + 'static {
    async fn send(&self, request: &OutboundRequest) -> Result<Ack, TransportError>;

    /// Resolves once sends can succeed again after `NotConnected`; `false`
    /// means they never will.
    async fn ready(&self) -> bool {
        true
    }
}

#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    throttled: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LimiterStats {
    pub sent: u64,
    pub failed: u64,
    pub dropped: u64,
    /// Remote 429s absorbed by adaptive backoff.
    pub throttled: u64,
}

struct Lane {
    target: String,
    state: Mutex<LaneState>,
    notify: Notify,
}

#[derive(Default)]
struct LaneState {
    queue: TargetQueue,
    /// Set under the lock once the drain task stops taking requests; pushes
    /// must then go to a fresh lane.
    retired: bool,
}

struct Inner {
    config: RateLimitConfig,
    sink: Arc<dyn OutboundSink>,
    lanes: DashMap<String, Arc<Lane>>,
    tasks: TaskTracker,
    closing: AtomicBool,
    cancel: CancellationToken,
    counters: Counters,
}

/// Cheap to clone; all clones share the same queues.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, sink: Arc<dyn OutboundSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                sink,
                lanes: DashMap::new(),
                tasks: TaskTracker::new(),
                closing: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                counters: Counters::default(),
            }),
        }
    }

    /// Queue a request for its target. Never waits.
    pub fn enqueue(&self, request: OutboundRequest) {
        if self.inner.closing.load(Ordering::SeqCst) {
            self.reject(request);
            return;
        }

        let (lane, evicted) = loop {
            let lane = self.lane(&request.target);
            let mut state = lane.state.lock();
            // Checked again under the lane lock so a drain task can't retire
            // between the check and the push.
            if self.inner.closing.load(Ordering::SeqCst) {
                drop(state);
                self.reject(request);
                return;
            }
            if state.retired {
                drop(state);
                self.inner
                    .lanes
                    .remove_if(&lane.target, |_, l| Arc::ptr_eq(l, &lane));
                continue;
            }
            let evicted = state.queue.push(request, self.inner.config.queue_limit);
            drop(state);
            break (lane, evicted);
        };
        lane.notify.notify_one();

        if let Some(mut evicted) = evicted {
            tracing::warn!(
                lane = %lane.target,
                priority = ?evicted.priority,
                "outbound queue full, dropping oldest request"
            );
            self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
            evicted.complete(Err(DeliveryError::Dropped {
                target: lane.target.clone(),
            }));
        }
    }

    fn reject(&self, mut request: OutboundRequest) {
        tracing::warn!(lane = %request.target, "outbound queue closed, dropping request");
        self.inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
        request.complete(Err(DeliveryError::ShuttingDown));
    }

    fn lane(&self, target: &str) -> Arc<Lane> {
        if let Some(lane) = self.inner.lanes.get(target) {
            return lane.clone();
        }
        self.inner
            .lanes
            .entry(target.to_string())
            .or_insert_with(|| {
                let lane = Arc::new(Lane {
                    target: target.to_string(),
                    state: Mutex::new(LaneState::default()),
                    notify: Notify::new(),
                });
                tracing::debug!(lane = target, "starting outbound lane");
                self.inner
                    .tasks
                    .spawn(drain(self.inner.clone(), lane.clone()));
                lane
            })
            .clone()
    }

    pub fn queued(&self, target: &str) -> usize {
        self.inner
            .lanes
            .get(target)
            .map_or(0, |lane| lane.state.lock().queue.len())
    }

    /// Targets with a live drain task. Idle lanes are reclaimed after one
    /// `refill_period` without traffic.
    pub fn lanes(&self) -> usize {
        self.inner.lanes.len()
    }

    pub fn stats(&self) -> LimiterStats {
        let c = &self.inner.counters;
        LimiterStats {
            sent: c.sent.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            throttled: c.throttled.load(Ordering::Relaxed),
        }
    }

    /// Stop intake. With `drain` the lanes keep sending until empty (bounded
    /// by `timeout`); otherwise, or once the timeout passes, whatever is
    /// still queued is dropped. Returns whether everything was flushed.
    pub async fn shutdown(&self, drain: bool, timeout: Duration) -> bool {
        self.inner.closing.store(true, Ordering::SeqCst);
        if !drain {
            self.inner.cancel.cancel();
        }
        for lane in self.inner.lanes.iter() {
            lane.notify.notify_one();
        }
        self.inner.tasks.close();

        let flushed = drain
            && tokio::time::timeout(timeout, self.inner.tasks.wait())
                .await
                .is_ok();
        if !flushed {
            self.inner.cancel.cancel();
            self.inner.tasks.wait().await;
        }
        tracing::info!(flushed, "outbound queue stopped");
        flushed
    }
}

/// Sleep until `deadline`; `false` if cancelled first.
async fn hold(cancel: &CancellationToken, deadline: Instant) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep_until(deadline) => true,
    }
}

/// The next request for this lane, or `None` once the lane should stop: on
/// shutdown, or when nothing arrived before `idle_until`.
async fn next_request(inner: &Inner, lane: &Lane, idle_until: Instant) -> Option<OutboundRequest> {
    loop {
        {
            let mut state = lane.state.lock();
            if let Some(next) = state.queue.pop() {
                return Some(next);
            }
            if inner.closing.load(Ordering::SeqCst) || Instant::now() >= idle_until {
                state.retired = true;
                return None;
            }
        }
        tokio::select! {
            _ = lane.notify.notified() => {}
            _ = tokio::time::sleep_until(idle_until) => {}
            _ = inner.cancel.cancelled() => return None,
        }
    }
}

/// One per target: sends in queue order, waiting for budget before each send.
async fn drain(inner: Arc<Inner>, lane: Arc<Lane>) {
    let config = &inner.config;
    let mut bucket = TokenBucket::new(config.capacity, config.refill_period);
    let mut strikes = 0u32;
    let mut held_until: Option<Instant> = None;

    'lane: while !inner.cancel.is_cancelled() {
        // Every spent token has returned and any hold has passed by the time
        // the lane goes idle, so a fresh lane picks up with the same budget.
        let idle_until = held_until
            .map_or(Instant::now(), |held| held.max(Instant::now()))
            + config.refill_period;
        let Some(mut request) = next_request(&inner, &lane, idle_until).await else { break };

        loop {
            if let Some(deadline) = held_until.take() {
                if !hold(&inner.cancel, deadline).await {
                    request.complete(Err(DeliveryError::ShuttingDown));
                    break 'lane;
                }
            }
            if let Err(wait) = bucket.try_acquire(Instant::now()) {
                held_until = Some(Instant::now() + wait);
                continue;
            }

            let result = tokio::select! {
                _ = inner.cancel.cancelled() => None,
                result = inner.sink.send(&request) => Some(result),
            };
            let Some(result) = result else {
                request.complete(Err(DeliveryError::ShuttingDown));
                break 'lane;
            };

            match result {
                Ok(ack) => {
                    strikes = 0;
                    if let Some(budget) = ack.budget {
                        if budget.limit > 0 && budget.limit < bucket.capacity() {
                            bucket.set_capacity(budget.limit);
                        }
                        if budget.remaining == 0 && !budget.reset_after.is_zero() {
                            held_until = Some(Instant::now() + budget.reset_after);
                        }
                    }
                    inner.counters.sent.fetch_add(1, Ordering::Relaxed);
                    request.complete(Ok(ack));
                    break;
                }
                Err(TransportError::RateLimited { retry_after }) => {
                    strikes += 1;
                    let exceeded = RateLimitExceeded {
                        target: lane.target.clone(),
                        hold: config.penalty(strikes).max(retry_after),
                    };
                    tracing::warn!(strikes, "{exceeded}");
                    inner.counters.throttled.fetch_add(1, Ordering::Relaxed);
                    held_until = Some(Instant::now() + exceeded.hold);
                }
                Err(TransportError::NotConnected) => {
                    tracing::debug!(lane = %lane.target, "gateway not connected, waiting");
                    let ready = tokio::select! {
                        _ = inner.cancel.cancelled() => None,
                        ready = inner.sink.ready() => Some(ready),
                    };
                    match ready {
                        Some(true) => {}
                        Some(false) => {
                            inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                            request.complete(Err(TransportError::NotConnected.into()));
                            break;
                        }
                        None => {
                            request.complete(Err(DeliveryError::ShuttingDown));
                            break 'lane;
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(lane = %lane.target, "outbound request failed: {e}");
                    inner.counters.failed.fetch_add(1, Ordering::Relaxed);
                    request.complete(Err(e.into()));
                    break;
                }
            }
        }
    }

    let leftovers = {
        let mut state = lane.state.lock();
        state.retired = true;
        state.queue.drain()
    };
    inner
        .lanes
        .remove_if(&lane.target, |_, l| Arc::ptr_eq(l, &lane));
    tracing::debug!(lane = %lane.target, "outbound lane stopped");
    if !leftovers.is_empty() {
        tracing::warn!(
            lane = %lane.target,
            count = leftovers.len(),
            "dropping queued requests on shutdown"
        );
    }
    for mut request in leftovers {
        inner.counters.dropped.fetch_add(1, Ordering::Relaxed);
        request.complete(Err(DeliveryError::ShuttingDown));
    }
}
