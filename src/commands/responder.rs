use crate::error::DeliveryError;
use crate::models::outbound::{Ack, OutboundPayload, OutboundRequest, Priority};
use crate::ratelimit::RateLimiter;

use super::CommandContext;

/// Replies to one interaction through the outbound queue.
#[derive(Clone)]
pub struct Responder {
    queue: RateLimiter,
    interaction_id: String,
    token: String,
    channel_id: Option<String>,
    mention: String,
}

impl Responder {
    pub fn new(queue: RateLimiter, ctx: &CommandContext) -> Self {
        Self {
            queue,
            interaction_id: ctx.interaction_id.clone(),
            token: ctx.token.clone(),
            channel_id: ctx.channel_id.clone(),
            mention: ctx.mention(),
        }
    }

    /// The invoking user as a mention, e.g. `<@U1>`.
    pub fn mention(&self) -> &str {
        &self.mention
    }

    // Replies share the channel's budget with plain messages.
    fn target(&self) -> String {
        match self.channel_id {
            Some(ref channel) => format!("channel:{channel}"),
            None => format!("interaction:{}", self.interaction_id),
        }
    }

    /// Answer the interaction. Resolves once the reply was sent or given up on.
    pub async fn reply(&self, text: impl Into<String>) -> Result<Ack, DeliveryError> {
        let payload = OutboundPayload::InteractionResponse {
            interaction_id: self.interaction_id.clone(),
            token: self.token.clone(),
            content: text.into(),
        };
        let request = OutboundRequest::new(self.target(), payload).with_priority(Priority::High);
        self.submit(request).await
    }

    /// Post a plain message to any channel.
    pub async fn send(
        &self,
        channel_id: &str,
        text: impl Into<String>,
    ) -> Result<Ack, DeliveryError> {
        let payload = OutboundPayload::Message {
            channel_id: channel_id.to_string(),
            content: text.into(),
        };
        self.submit(OutboundRequest::new(format!("channel:{channel_id}"), payload))
            .await
    }

    async fn submit(&self, request: OutboundRequest) -> Result<Ack, DeliveryError> {
        let target = request.target.clone();
        let (request, done) = request.with_completion();
        self.queue.enqueue(request);
        done.await
            .unwrap_or(Err(DeliveryError::Dropped { target }))
    }
}
