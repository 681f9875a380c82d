use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::{ConnectionError, TransportError};
use crate::models::outbound::{Ack, OutboundPayload};

/// How a new link introduces itself to the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    Identify {
        token: String,
        intents: Vec<String>,
    },
    Resume {
        token: String,
        session_id: String,
        sequence: u64,
    },
}

impl Handshake {
    pub fn is_resume(&self) -> bool {
        matches!(self, Handshake::Resume { .. })
    }
}

/// What the gateway told us once the handshake completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Established {
    pub session_id: String,
    pub user_id: Option<String>,
    pub sequence: u64,
    pub resumed: bool,
}

/// A raw dispatch as read off the link, before subscription filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchFrame {
    pub sequence: u64,
    pub event_type: String,
    pub data: serde_json::Value,
}

pub type FrameResult = Result<DispatchFrame, ConnectionError>;

/// Sends outbound payloads for one live link.
#[async_trait]
pub trait LinkSender: Send + Sync {
    async fn send(&self, payload: &OutboundPayload) -> Result<Ack, TransportError>;
}

/// An established link. Frames arrive in the order the gateway sent them; an
/// `Err` or the end of the stream means the link is gone.
pub struct Link {
    pub established: Established,
    pub frames: mpsc::Receiver<FrameResult>,
    pub sender: Arc<dyn LinkSender>,
    guard: Option<DropGuard>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("established", &self.established)
            .finish_non_exhaustive()
    }
}

impl Link {
    pub fn new(
        established: Established,
        frames: mpsc::Receiver<FrameResult>,
        sender: Arc<dyn LinkSender>,
    ) -> Self {
        Self {
            established,
            frames,
            sender,
            guard: None,
        }
    }

    /// Cancel `token` when the link is dropped, stopping its background tasks.
    pub fn cancel_on_drop(mut self, token: CancellationToken) -> Self {
        self.guard = Some(token.drop_guard());
        self
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        Established,
        mpsc::Receiver<FrameResult>,
        Arc<dyn LinkSender>,
        Option<DropGuard>,
    ) {
        (self.established, self.frames, self.sender, self.guard)
    }
}

/// Opens links to a gateway. The connection manager owns reconnect policy;
/// a transport only performs single attempts.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, handshake: Handshake) -> Result<Link, ConnectionError>;
}
