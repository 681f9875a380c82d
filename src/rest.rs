use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde_json::json;

use crate::error::TransportError;
use crate::gateway::transport::LinkSender;
use crate::models::outbound::{Ack, BudgetHint, OutboundPayload};

/// Fallback when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Delivers outbound payloads over the gateway's HTTP API.
pub struct RestSender {
    client: Client,
    base_url: String,
    token: String,
}

impl RestSender {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.header("Authorization", bot_authorization(&self.token))
    }

    fn request_for(&self, payload: &OutboundPayload) -> reqwest::RequestBuilder {
        match payload {
            OutboundPayload::Message {
                channel_id,
                content,
            } => {
                let url = format!("{}/channels/{}/messages", self.base_url, channel_id);
                self.client.post(url).json(&json!({ "content": content }))
            }
            OutboundPayload::InteractionResponse {
                interaction_id,
                token,
                content,
            } => {
                let url = format!(
                    "{}/interactions/{}/{}/callback",
                    self.base_url, interaction_id, token
                );
                self.client.post(url).json(&json!({
                    "type": "channel_message",
                    "data": { "content": content }
                }))
            }
            OutboundPayload::RegisterCommand {
                application_id,
                name,
                description,
            } => {
                let url = format!("{}/applications/{}/commands", self.base_url, application_id);
                self.client.post(url).json(&json!({
                    "name": name,
                    "description": description,
                    "type": "chat_input"
                }))
            }
        }
    }

    pub async fn deliver(&self, payload: &OutboundPayload) -> Result<Ack, TransportError> {
        let resp = self.apply_auth(self.request_for(payload)).send().await?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after(resp.headers()).unwrap_or(DEFAULT_RETRY_AFTER);
            return Err(TransportError::RateLimited { retry_after });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(Ack {
            status: status.as_u16(),
            budget: budget_from_headers(resp.headers(), chrono::Utc::now().timestamp()),
        })
    }
}

#[async_trait]
impl LinkSender for RestSender {
    async fn send(&self, payload: &OutboundPayload) -> Result<Ack, TransportError> {
        self.deliver(payload).await
    }
}

/// Token format expected by the gateway: `"Bot xxx"` unless already prefixed.
pub fn bot_authorization(token: &str) -> String {
    if token.starts_with("Bot ") || token.starts_with("Bearer ") {
        token.to_string()
    } else {
        format!("Bot {token}")
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    header_u64(headers, "Retry-After").map(Duration::from_secs)
}

/// `X-RateLimit-Reset` is a unix timestamp in seconds.
fn budget_from_headers(headers: &HeaderMap, now_unix: i64) -> Option<BudgetHint> {
    let limit = header_u64(headers, "X-RateLimit-Limit")?;
    let remaining = header_u64(headers, "X-RateLimit-Remaining")?;
    let reset_after = header_u64(headers, "X-RateLimit-Reset")
        .map(|reset| reset.saturating_sub(now_unix.max(0) as u64))
        .unwrap_or(0);
    Some(BudgetHint {
        limit: u32::try_from(limit).unwrap_or(u32::MAX),
        remaining: u32::try_from(remaining).unwrap_or(u32::MAX),
        reset_after: Duration::from_secs(reset_after),
    })
}
