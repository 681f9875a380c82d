use std::time::Duration;

use thiserror::Error;

/// Failure of the gateway link itself. Retried with backoff unless
/// [`ConnectionError::is_retryable`] says otherwise.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to reach gateway: {0}")]
    Io(String),
    #[error("gateway closed the connection: {0}")]
    Closed(String),
    #[error("gateway protocol error: {0}")]
    Protocol(String),
    #[error("gateway handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
    #[error("heartbeat not acknowledged within {0:?}")]
    HeartbeatTimeout(Duration),
    #[error("gateway asked the client to reconnect")]
    ReconnectRequested,
    #[error("gateway invalidated the session (resumable: {resumable})")]
    Invalidated { resumable: bool },
    #[error("gateway rejected session resume")]
    ResumeRejected,
    #[error("gateway rejected the authentication token")]
    AuthenticationFailed,
    #[error("gateway refused the requested intents")]
    DisallowedIntents,
    #[error("gave up after {attempts} reconnect attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<ConnectionError>,
    },
}

impl ConnectionError {
    /// Misconfiguration and exhausted retries are fatal; everything else is
    /// worth another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ConnectionError::AuthenticationFailed
                | ConnectionError::DisallowedIntents
                | ConnectionError::RetriesExhausted { .. }
        )
    }
}

/// A single outbound send failed. Surfaced to the caller of
/// `ConnectionManager::send`, never retried by the manager itself.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("no live gateway link")]
    NotConnected,
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },
    #[error("remote returned {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("HTTP error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        TransportError::Http(e.to_string())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("command '{name}' is already registered")]
pub struct DuplicateCommandError {
    pub name: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error(transparent)]
    Duplicate(#[from] DuplicateCommandError),
    #[error("invalid command name '{0}': expected 1-32 chars of [a-z0-9_-]")]
    InvalidName(String),
}

/// A reply could not be delivered. Reported to the handler that asked for it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DeliveryError {
    #[error("delivery failed: {0}")]
    Transport(#[from] TransportError),
    #[error("request for '{target}' was dropped from a full queue")]
    Dropped { target: String },
    #[error("outbound queue is shutting down")]
    ShuttingDown,
}

/// Informational: a target hit its remote budget and is being held back.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("rate limit exceeded for '{target}', holding for {hold:?}")]
pub struct RateLimitExceeded {
    pub target: String,
    pub hold: Duration,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("unknown intent '{0}'")]
    UnknownIntent(String),
}
