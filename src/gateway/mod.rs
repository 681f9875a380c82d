//! Gateway connection: session lifecycle, reconnect/resume and the receive loop.

pub mod backoff;
pub mod dispatcher;
pub mod events;
pub mod heartbeat;
pub mod intents;
pub mod session;
pub mod transport;
pub mod ws;

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::{ConnectionError, TransportError};
use crate::models::outbound::{Ack, OutboundRequest};
use crate::ratelimit::OutboundSink;
use backoff::Backoff;
use events::InboundEvent;
use intents::Subscriptions;
use session::{Session, SessionStatus, SessionWatch};
use transport::{FrameResult, Handshake, Link, LinkSender, Transport};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub token: String,
    pub subscriptions: Subscriptions,
    pub backoff: Backoff,
}

struct LinkSlot {
    sender: Arc<dyn LinkSender>,
}

/// Inbound half of the current link, owned by the receive loop.
struct ActiveLink {
    frames: mpsc::Receiver<FrameResult>,
    _guard: Option<DropGuard>,
}

/// Owns the one live session to the gateway.
pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    config: GatewayConfig,
    session: watch::Sender<Session>,
    link: ArcSwapOption<LinkSlot>,
    pending: Mutex<Option<ActiveLink>>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, config: GatewayConfig) -> Self {
        let (session, _) = watch::channel(Session::new());
        Self {
            transport,
            config,
            session,
            link: ArcSwapOption::empty(),
            pending: Mutex::new(None),
        }
    }

    pub fn session(&self) -> SessionWatch {
        SessionWatch::new(self.session.subscribe())
    }

    pub fn current(&self) -> Session {
        self.session.borrow().clone()
    }

    /// Establish the first session, retrying per the backoff policy. The
    /// link is kept for [`ConnectionManager::run`].
    pub async fn connect(&self) -> Result<Session, ConnectionError> {
        match self.establish(&CancellationToken::new()).await? {
            Some(active) => {
                *self.pending.lock() = Some(active);
                Ok(self.current())
            }
            None => Ok(self.current()),
        }
    }

    /// Send one request over the current link. Not retried here.
    pub async fn send(&self, request: &OutboundRequest) -> Result<Ack, TransportError> {
        let slot = self.link.load_full().ok_or(TransportError::NotConnected)?;
        slot.sender.send(&request.payload).await
    }

    /// Receive loop. Pushes events to `sink` in the order they arrived and
    /// reconnects on link failure. Returns `Ok` on shutdown, `Err` once
    /// reconnecting is no longer possible.
    pub async fn run(
        &self,
        sink: mpsc::Sender<InboundEvent>,
        shutdown: CancellationToken,
    ) -> Result<(), ConnectionError> {
        let pending = self.pending.lock().take();
        let mut active = match pending {
            Some(active) => active,
            None => match self.establish(&shutdown).await? {
                Some(active) => active,
                None => {
                    self.set_status(SessionStatus::Closed);
                    return Ok(());
                }
            },
        };

        loop {
            let frame = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                frame = active.frames.recv() => frame,
            };

            let failure = match frame {
                Some(Ok(frame)) => {
                    let Some(event) = self.accept(frame) else { continue };
                    if sink.send(event).await.is_err() {
                        tracing::debug!("event sink closed, stopping receive loop");
                        break;
                    }
                    continue;
                }
                Some(Err(e)) => e,
                None => ConnectionError::Closed("link stream ended".to_string()),
            };

            tracing::warn!("gateway link lost: {failure}");
            match self.recover(failure, &shutdown).await {
                Ok(Some(next)) => active = next,
                Ok(None) => break,
                Err(fatal) => return Err(fatal),
            }
        }

        // Inbound stops here; the outbound half stays usable until `close`
        // so queued requests can still be flushed.
        drop(active);
        self.set_status(SessionStatus::Closed);
        Ok(())
    }

    fn accept(&self, frame: transport::DispatchFrame) -> Option<InboundEvent> {
        self.session.send_modify(|s| s.sequence = s.sequence.max(frame.sequence));
        if !self.config.subscriptions.allows(&frame.event_type) {
            tracing::trace!("dropping unsubscribed event {}", frame.event_type);
            return None;
        }
        Some(InboundEvent::new(frame.event_type, frame.sequence, frame.data))
    }

    async fn recover(
        &self,
        failure: ConnectionError,
        shutdown: &CancellationToken,
    ) -> Result<Option<ActiveLink>, ConnectionError> {
        self.link.store(None);
        if let ConnectionError::Invalidated { resumable: false } = failure {
            self.session.send_modify(|s| {
                s.session_id = None;
                s.sequence = 0;
            });
        }
        if !failure.is_retryable() {
            self.set_status(SessionStatus::Closed);
            return Err(failure);
        }
        self.set_status(SessionStatus::Reconnecting);
        self.establish(shutdown).await
    }

    /// Handshake with retries. `Ok(None)` means shutdown was requested while waiting.
    async fn establish(
        &self,
        shutdown: &CancellationToken,
    ) -> Result<Option<ActiveLink>, ConnectionError> {
        let backoff = &self.config.backoff;
        let mut attempt = 0u32;
        loop {
            let err = match self.handshake().await {
                Ok(active) => return Ok(Some(active)),
                Err(err) => err,
            };

            if !err.is_retryable() {
                tracing::error!("gateway refused the connection: {err}");
                self.set_status(SessionStatus::Closed);
                return Err(err);
            }
            if attempt >= backoff.max_retries {
                tracing::error!("giving up on gateway after {attempt} retries: {err}");
                self.set_status(SessionStatus::Closed);
                return Err(ConnectionError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = backoff.jittered(attempt);
            attempt += 1;
            tracing::warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "gateway connect failed: {err}, retrying"
            );
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(None),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One attempt: RESUME when we have a session, falling back to a fresh
    /// IDENTIFY (and a reset cursor) when the gateway rejects it.
    async fn handshake(&self) -> Result<ActiveLink, ConnectionError> {
        let snapshot = self.current();
        if let Some(session_id) = snapshot.session_id {
            tracing::info!(
                session_id = %session_id,
                seq = snapshot.sequence,
                "resuming gateway session"
            );
            let resume = Handshake::Resume {
                token: self.config.token.clone(),
                session_id,
                sequence: snapshot.sequence,
            };
            match self.transport.open(resume).await {
                Ok(link) => return Ok(self.install(link)),
                Err(ConnectionError::ResumeRejected)
                | Err(ConnectionError::Invalidated { .. }) => {
                    tracing::info!("resume rejected, starting a fresh session");
                    self.session.send_modify(|s| {
                        s.session_id = None;
                        s.sequence = 0;
                    });
                }
                Err(e) => return Err(e),
            }
        }

        let identify = Handshake::Identify {
            token: self.config.token.clone(),
            intents: self.config.subscriptions.to_vec(),
        };
        let link = self.transport.open(identify).await?;
        Ok(self.install(link))
    }

    fn install(&self, link: Link) -> ActiveLink {
        let (established, frames, sender, guard) = link.into_parts();
        self.link.store(Some(Arc::new(LinkSlot { sender })));

        let previous = self.current().status;
        self.session.send_modify(|s| {
            s.sequence = if established.resumed {
                s.sequence.max(established.sequence)
            } else {
                established.sequence
            };
            s.session_id = Some(established.session_id.clone());
            if established.user_id.is_some() {
                s.user_id = established.user_id.clone();
            }
            s.status = SessionStatus::Ready;
            s.resumed = established.resumed;
            s.connected_at = Some(chrono::Utc::now());
        });

        let session = self.current();
        tracing::info!(
            session_id = %established.session_id,
            resumed = established.resumed,
            "session status {previous} -> ready"
        );
        if !established.resumed {
            if let Some(ref user) = session.user_id {
                tracing::info!("logged in as {user}");
            }
        }

        ActiveLink {
            frames,
            _guard: guard,
        }
    }

    fn set_status(&self, status: SessionStatus) {
        let previous = self.current().status;
        if previous == status {
            return;
        }
        self.session.send_modify(|s| s.status = status);
        tracing::info!("session status {previous} -> {status}");
    }

    /// Drop the link entirely. Sends fail with `NotConnected` afterwards.
    pub fn close(&self) {
        self.link.store(None);
        self.pending.lock().take();
        self.set_status(SessionStatus::Closed);
    }
}

#[async_trait]
impl OutboundSink for ConnectionManager {
    async fn send(&self, request: &OutboundRequest) -> Result<Ack, TransportError> {
        ConnectionManager::send(self, request).await
    }

    async fn ready(&self) -> bool {
        self.session().wait_ready().await
    }
}
