use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::gateway::backoff::Backoff;
use crate::gateway::intents::Subscriptions;
use crate::gateway::GatewayConfig;
use crate::ratelimit::RateLimitConfig;

pub const DEFAULT_GATEWAY_URL: &str = "ws://127.0.0.1:39099/ws";
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:39099/api/v1";

#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    pub gateway_url: String,
    pub api_url: String,
    /// Commands are published to this application after the first READY.
    pub application_id: Option<String>,
    pub subscriptions: Subscriptions,
    pub backoff: Backoff,
    pub rate_limit: RateLimitConfig,
    pub shutdown_timeout: Duration,
    pub drain_on_shutdown: bool,
}

impl Config {
    /// Defaults for everything but the token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            application_id: None,
            subscriptions: Subscriptions::none()
                .subscribe("messages")
                .unwrap_or_default(),
            backoff: Backoff::default(),
            rate_limit: RateLimitConfig::default(),
            shutdown_timeout: Duration::from_secs(10),
            drain_on_shutdown: true,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let token = var("GATEBOT_TOKEN")
            .or_else(|| var("DISCORD_TOKEN"))
            .ok_or(ConfigError::Missing("GATEBOT_TOKEN"))?;
        let mut config = Self::new(token);

        if let Some(url) = var("GATEBOT_GATEWAY_URL") {
            config.gateway_url = url;
        }
        if let Some(url) = var("GATEBOT_API_URL") {
            config.api_url = url;
        }
        config.application_id = var("GATEBOT_APPLICATION_ID");
        if let Some(list) = var("GATEBOT_INTENTS") {
            config.subscriptions = Subscriptions::parse(&list)?;
        }

        let backoff = &mut config.backoff;
        backoff.base = parsed("GATEBOT_BACKOFF_BASE_MS").map_or(backoff.base, Duration::from_millis);
        backoff.cap = parsed("GATEBOT_BACKOFF_CAP_MS").map_or(backoff.cap, Duration::from_millis);
        backoff.jitter = parsed::<f64>("GATEBOT_BACKOFF_JITTER")
            .filter(|j| (0.0..=1.0).contains(j))
            .unwrap_or(backoff.jitter);
        backoff.max_retries = parsed("GATEBOT_MAX_RECONNECTS").unwrap_or(backoff.max_retries);

        let rate = &mut config.rate_limit;
        rate.capacity = parsed("GATEBOT_RATE_CAPACITY")
            .filter(|c| *c > 0)
            .unwrap_or(rate.capacity);
        rate.refill_period = parsed("GATEBOT_RATE_PERIOD_MS")
            .filter(|ms| *ms > 0)
            .map_or(rate.refill_period, Duration::from_millis);
        rate.queue_limit = parsed("GATEBOT_QUEUE_LIMIT")
            .filter(|n| *n > 0)
            .unwrap_or(rate.queue_limit);

        config.shutdown_timeout = parsed("GATEBOT_SHUTDOWN_TIMEOUT_SECS")
            .map_or(config.shutdown_timeout, Duration::from_secs);
        config.drain_on_shutdown = var("GATEBOT_DRAIN_ON_SHUTDOWN")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(true);

        Ok(config)
    }

    pub fn gateway(&self) -> GatewayConfig {
        GatewayConfig {
            token: self.token.clone(),
            subscriptions: self.subscriptions.clone(),
            backoff: self.backoff.clone(),
        }
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: FromStr>(name: &str) -> Option<T> {
    var(name).and_then(|v| v.trim().parse().ok())
}
