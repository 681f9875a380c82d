#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gatebot::error::{ConnectionError, TransportError};
use gatebot::gateway::backoff::Backoff;
use gatebot::gateway::events::COMMAND_EVENT;
use gatebot::gateway::transport::{
    DispatchFrame, Established, FrameResult, Handshake, Link, LinkSender, Transport,
};
use gatebot::models::outbound::{Ack, OutboundPayload, OutboundRequest};
use gatebot::ratelimit::OutboundSink;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// A send seen by the [`Recorder`].
#[derive(Debug, Clone)]
pub struct Sent {
    pub at: Instant,
    pub target: Option<String>,
    pub payload: OutboundPayload,
}

impl Sent {
    pub fn content(&self) -> &str {
        content_of(&self.payload)
    }
}

pub fn content_of(payload: &OutboundPayload) -> &str {
    match payload {
        OutboundPayload::Message { content, .. } => content,
        OutboundPayload::InteractionResponse { content, .. } => content,
        OutboundPayload::RegisterCommand { name, .. } => name,
    }
}

/// Records every send attempt and answers from a script (`Ok` once the
/// script runs out). Usable as a link sender or directly as a limiter sink.
#[derive(Default)]
pub struct Recorder {
    sent: Mutex<Vec<Sent>>,
    script: Mutex<VecDeque<Result<Ack, TransportError>>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, result: Result<Ack, TransportError>) {
        self.script.lock().push_back(result);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().clone()
    }

    pub fn times(&self) -> Vec<Instant> {
        self.sent.lock().iter().map(|s| s.at).collect()
    }

    fn record(&self, target: Option<String>, payload: &OutboundPayload) -> Result<Ack, TransportError> {
        self.sent.lock().push(Sent {
            at: Instant::now(),
            target,
            payload: payload.clone(),
        });
        self.script.lock().pop_front().unwrap_or_else(|| Ok(Ack::ok()))
    }

    /// Wait (in virtual time under a paused clock) until `n` sends were seen.
    pub async fn wait_for(&self, n: usize) -> Vec<Sent> {
        for _ in 0..10_000 {
            if self.sent.lock().len() >= n {
                return self.sent();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} sends, saw {}", self.sent.lock().len());
    }
}

#[async_trait]
impl LinkSender for Recorder {
    async fn send(&self, payload: &OutboundPayload) -> Result<Ack, TransportError> {
        self.record(None, payload)
    }
}

#[async_trait]
impl OutboundSink for Recorder {
    async fn send(&self, request: &OutboundRequest) -> Result<Ack, TransportError> {
        self.record(Some(request.target.clone()), &request.payload)
    }
}

/// What the next `open` call does.
pub enum Outcome {
    Accept,
    Fail(ConnectionError),
    /// Reject a RESUME with `ResumeRejected`; accept an IDENTIFY.
    RejectResume,
}

#[derive(Debug, Clone)]
pub struct Open {
    pub at: Instant,
    pub handshake: Handshake,
}

/// In-memory gateway. Each `open` consumes one scripted outcome (accepting
/// once the script is empty); frames are pushed into the most recent link.
pub struct MockTransport {
    script: Mutex<VecDeque<Outcome>>,
    opens: Mutex<Vec<Open>>,
    links: Mutex<Vec<mpsc::Sender<FrameResult>>>,
    sessions: AtomicU32,
    pub recorder: Arc<Recorder>,
}

impl MockTransport {
    pub fn new(script: Vec<Outcome>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            opens: Mutex::new(Vec::new()),
            links: Mutex::new(Vec::new()),
            sessions: AtomicU32::new(0),
            recorder: Recorder::new(),
        })
    }

    pub fn script(&self, outcome: Outcome) {
        self.script.lock().push_back(outcome);
    }

    pub fn opens(&self) -> Vec<Open> {
        self.opens.lock().clone()
    }

    pub async fn push_frame(&self, event_type: &str, sequence: u64, data: serde_json::Value) {
        let link = self.latest();
        let frame = DispatchFrame {
            sequence,
            event_type: event_type.to_string(),
            data,
        };
        link.send(Ok(frame)).await.expect("link receiver dropped");
    }

    /// Fail the current link as the socket would.
    pub async fn break_link(&self, error: ConnectionError) {
        let link = self.latest();
        let _ = link.send(Err(error)).await;
    }

    fn latest(&self) -> mpsc::Sender<FrameResult> {
        self.links.lock().last().cloned().expect("no link opened yet")
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, handshake: Handshake) -> Result<Link, ConnectionError> {
        self.opens.lock().push(Open {
            at: Instant::now(),
            handshake: handshake.clone(),
        });

        let outcome = self.script.lock().pop_front().unwrap_or(Outcome::Accept);
        let established = match (outcome, handshake) {
            (Outcome::Fail(e), _) => return Err(e),
            (Outcome::RejectResume, Handshake::Resume { .. }) => {
                return Err(ConnectionError::ResumeRejected)
            }
            (
                Outcome::Accept,
                Handshake::Resume {
                    session_id,
                    sequence,
                    ..
                },
            ) => Established {
                session_id,
                user_id: None,
                sequence,
                resumed: true,
            },
            (_, Handshake::Identify { .. }) => {
                let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
                Established {
                    session_id: format!("S{n}"),
                    user_id: Some("B0T".to_string()),
                    sequence: 0,
                    resumed: false,
                }
            }
        };

        let (tx, rx) = mpsc::channel(64);
        self.links.lock().push(tx);
        Ok(Link::new(established, rx, self.recorder.clone()))
    }
}

/// Backoff without jitter so delays can be asserted exactly.
pub fn exact_backoff(max_retries: u32) -> Backoff {
    Backoff {
        base: Duration::from_secs(1),
        cap: Duration::from_secs(60),
        jitter: 0.0,
        max_retries,
    }
}

pub fn interaction(id: &str, user: &str, command: &str) -> serde_json::Value {
    json!({
        "id": id,
        "token": format!("tok-{id}"),
        "type": "application_command",
        "user_id": user,
        "channel_id": "C1",
        "space_id": "G1",
        "data": { "name": command }
    })
}

pub fn command_event(id: &str, user: &str, command: &str, seq: u64) -> gatebot::gateway::events::InboundEvent {
    gatebot::gateway::events::InboundEvent::new(COMMAND_EVENT, seq, interaction(id, user, command))
}

pub fn message(target_channel: &str, content: &str) -> OutboundRequest {
    OutboundRequest::new(
        format!("channel:{target_channel}"),
        OutboundPayload::Message {
            channel_id: target_channel.to_string(),
            content: content.to_string(),
        },
    )
}
