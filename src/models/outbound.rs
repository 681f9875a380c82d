use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::DeliveryError;

/// Dequeue order within a target: higher first, FIFO inside a level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundPayload {
    Message {
        channel_id: String,
        content: String,
    },
    InteractionResponse {
        interaction_id: String,
        token: String,
        content: String,
    },
    RegisterCommand {
        application_id: String,
        name: String,
        description: String,
    },
}

/// Remote budget reported alongside a successful send
/// (`X-RateLimit-Limit` / `-Remaining` / `-Reset`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetHint {
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ack {
    pub status: u16,
    pub budget: Option<BudgetHint>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            status: 200,
            budget: None,
        }
    }
}

pub type Completion = oneshot::Sender<Result<Ack, DeliveryError>>;

/// A queued unit of outbound work. Owned by the rate limiter until sent.
#[derive(Debug)]
pub struct OutboundRequest {
    pub target: String,
    pub payload: OutboundPayload,
    pub priority: Priority,
    pub enqueued_at: Instant,
    completion: Option<Completion>,
}

impl OutboundRequest {
    pub fn new(target: impl Into<String>, payload: OutboundPayload) -> Self {
        Self {
            target: target.into(),
            payload,
            priority: Priority::Normal,
            enqueued_at: Instant::now(),
            completion: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Attach a channel that resolves once the request is sent, fails or is dropped.
    pub fn with_completion(mut self) -> (Self, oneshot::Receiver<Result<Ack, DeliveryError>>) {
        let (tx, rx) = oneshot::channel();
        self.completion = Some(tx);
        (self, rx)
    }

    pub(crate) fn complete(&mut self, result: Result<Ack, DeliveryError>) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(result);
        }
    }
}
