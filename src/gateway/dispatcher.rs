use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;

use super::events::InboundEvent;
use crate::commands::{CommandContext, CommandRegistry, Responder};
use crate::ratelimit::RateLimiter;

/// Handler for a raw gateway event type.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn on_event(&self, event: Arc<InboundEvent>) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(Arc<InboundEvent>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn on_event(&self, event: Arc<InboundEvent>) -> anyhow::Result<()> {
        (self)(event).await
    }
}

#[derive(Debug, Default)]
struct Counters {
    dispatched: AtomicU64,
    unhandled: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Events that reached at least one handler.
    pub dispatched: u64,
    pub unhandled: u64,
    /// Handler invocations that returned an error or panicked.
    pub failed: u64,
}

/// Routes inbound events to handlers, one task per handler invocation.
pub struct Dispatcher {
    commands: Arc<CommandRegistry>,
    handlers: HashMap<String, Vec<Arc<dyn EventHandler>>>,
    outbound: RateLimiter,
    tasks: TaskTracker,
    counters: Arc<Counters>,
}

impl Dispatcher {
    pub fn new(commands: Arc<CommandRegistry>, outbound: RateLimiter) -> Self {
        Self {
            commands,
            handlers: HashMap::new(),
            outbound,
            tasks: TaskTracker::new(),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn register(&mut self, event_type: impl Into<String>, handler: impl EventHandler) {
        self.register_shared(event_type.into(), Arc::new(handler));
    }

    pub(crate) fn register_shared(&mut self, event_type: String, handler: Arc<dyn EventHandler>) {
        self.handlers.entry(event_type).or_default().push(handler);
    }

    /// Hand `event` to every matching handler. Never waits on a handler.
    pub fn dispatch(&self, event: InboundEvent) {
        let event = Arc::new(event);
        let mut matched = 0usize;

        if let Some(ctx) = CommandContext::from_event(&event) {
            match self.commands.resolve(&ctx.name) {
                Some(handler) => {
                    let responder = Responder::new(self.outbound.clone(), &ctx);
                    let label = format!("/{}", ctx.name);
                    self.spawn_isolated(label, async move { handler.handle(ctx, responder).await });
                    matched += 1;
                }
                None => tracing::debug!(seq = event.sequence, "no handler for command /{}", ctx.name),
            }
        }

        if let Some(handlers) = self.handlers.get(&event.event_type) {
            for handler in handlers {
                let handler = handler.clone();
                let event = event.clone();
                let label = event.event_type.clone();
                self.spawn_isolated(label, async move { handler.on_event(event).await });
                matched += 1;
            }
        }

        if matched == 0 {
            tracing::trace!(seq = event.sequence, "unhandled event {}", event.event_type);
            self.counters.unhandled.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn spawn_isolated<F>(&self, label: String, fut: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let counters = self.counters.clone();
        self.tasks.spawn(async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!("handler for {label} failed: {e:#}");
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    tracing::error!("handler for {label} panicked");
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        });
    }

    /// Dispatch events in the order they arrive until the channel closes.
    pub async fn run(&self, mut events: mpsc::Receiver<InboundEvent>) {
        while let Some(event) = events.recv().await {
            self.dispatch(event);
        }
        tracing::debug!("event channel closed, dispatcher stopping");
    }

    /// Stop accepting work and wait up to `timeout` for running handlers.
    /// Returns whether they all finished.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.tasks.close();
        let finished = tokio::time::timeout(timeout, self.tasks.wait()).await.is_ok();
        if !finished {
            tracing::warn!(
                in_flight = self.tasks.len(),
                "handlers still running after {timeout:?}"
            );
        }
        finished
    }

    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            unhandled: self.counters.unhandled.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}
