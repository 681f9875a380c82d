use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::events::{
    close_code, opcode, GatewayMessage, HelloData, IdentifyData, InvalidSessionData, ReadyData,
    ResumeData, READY_EVENT, RESUMED_EVENT,
};
use super::heartbeat::HeartbeatMonitor;
use super::transport::{DispatchFrame, Established, FrameResult, Handshake, Link, Transport};
use crate::error::ConnectionError;
use crate::rest::{bot_authorization, RestSender};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// The gateway gives clients 30 seconds to identify; we wait as long for READY.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const FRAME_BUFFER: usize = 256;

/// WebSocket gateway transport. Inbound dispatches arrive over the socket;
/// outbound requests go through the HTTP API.
pub struct WebSocketTransport {
    url: String,
    rest: Arc<RestSender>,
    handshake_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>, rest: RestSender) -> Self {
        Self {
            url: url.into(),
            rest: Arc::new(rest),
            handshake_timeout: HANDSHAKE_TIMEOUT,
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    async fn handshake(
        &self,
        handshake: &Handshake,
    ) -> Result<(WsSink, WsSource, HeartbeatMonitor, Established), ConnectionError> {
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        // Wait for HELLO
        let hello = loop {
            let msg = next_message(&mut stream).await?;
            if msg.op == opcode::HELLO {
                let data: HelloData = decode(msg.data)?;
                break HeartbeatMonitor::from_hello(data.heartbeat_interval);
            }
        };

        let intro = match handshake {
            Handshake::Identify { token, intents } => GatewayMessage::new(
                opcode::IDENTIFY,
                Some(encode(&IdentifyData {
                    token: bot_authorization(token),
                    intents: intents.clone(),
                    properties: Some(serde_json::json!({
                        "os": std::env::consts::OS,
                        "library": env!("CARGO_PKG_NAME"),
                    })),
                })?),
            ),
            Handshake::Resume {
                token,
                session_id,
                sequence,
            } => GatewayMessage::new(
                opcode::RESUME,
                Some(encode(&ResumeData {
                    token: bot_authorization(token),
                    session_id: session_id.clone(),
                    seq: *sequence,
                })?),
            ),
        };
        send_message(&mut sink, &intro).await?;

        // Wait for READY / RESUMED
        loop {
            let msg = next_message(&mut stream).await?;
            match msg.op {
                opcode::EVENT => match msg.event_type.as_deref() {
                    Some(READY_EVENT) => {
                        let ready: ReadyData = decode(msg.data)?;
                        let established = Established {
                            session_id: ready.session_id,
                            user_id: ready.user_id,
                            sequence: msg.seq.unwrap_or(0),
                            resumed: false,
                        };
                        return Ok((sink, stream, hello, established));
                    }
                    Some(RESUMED_EVENT) => {
                        if let Handshake::Resume {
                            session_id,
                            sequence,
                            ..
                        } = handshake
                        {
                            let established = Established {
                                session_id: session_id.clone(),
                                user_id: None,
                                sequence: msg.seq.unwrap_or(*sequence),
                                resumed: true,
                            };
                            return Ok((sink, stream, hello, established));
                        }
                        return Err(ConnectionError::Protocol(
                            "RESUMED received for a fresh identify".to_string(),
                        ));
                    }
                    other => {
                        tracing::debug!("ignoring {:?} before READY", other);
                    }
                },
                opcode::INVALID_SESSION if handshake.is_resume() => {
                    return Err(ConnectionError::ResumeRejected);
                }
                opcode::INVALID_SESSION => return Err(ConnectionError::AuthenticationFailed),
                _ => {}
            }
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, handshake: Handshake) -> Result<Link, ConnectionError> {
        let (sink, stream, heartbeat, established) =
            tokio::time::timeout(self.handshake_timeout, self.handshake(&handshake))
                .await
                .map_err(|_| ConnectionError::HandshakeTimeout(self.handshake_timeout))??;

        let (frames_tx, frames_rx) = mpsc::channel(FRAME_BUFFER);
        let cancel = CancellationToken::new();
        tokio::spawn(pump(
            sink,
            stream,
            frames_tx,
            heartbeat,
            established.sequence,
            cancel.clone(),
        ));

        Ok(Link::new(established, frames_rx, self.rest.clone()).cancel_on_drop(cancel))
    }
}

/// Reads dispatches off the socket and keeps the heartbeat going until the
/// link fails or the owner drops it.
async fn pump(
    mut sink: WsSink,
    mut stream: WsSource,
    frames: mpsc::Sender<FrameResult>,
    mut heartbeat: HeartbeatMonitor,
    mut last_seq: u64,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(heartbeat.interval());
    ticker.tick().await;

    let failure = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return;
            }
            _ = ticker.tick() => {
                if heartbeat.is_overdue() {
                    break ConnectionError::HeartbeatTimeout(heartbeat.timeout());
                }
                let beat = GatewayMessage::new(opcode::HEARTBEAT, Some(serde_json::json!(last_seq)));
                if let Err(e) = send_message(&mut sink, &beat).await {
                    break e;
                }
            }
            msg = next_message(&mut stream) => {
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(ConnectionError::Protocol(e)) => {
                        tracing::warn!("dropping undecodable gateway message: {e}");
                        continue;
                    }
                    Err(e) => break e,
                };
                match msg.op {
                    opcode::EVENT => {
                        let Some(event_type) = msg.event_type else { continue };
                        let sequence = msg.seq.unwrap_or(last_seq);
                        last_seq = last_seq.max(sequence);
                        let frame = DispatchFrame {
                            sequence,
                            event_type,
                            data: msg.data.unwrap_or(serde_json::Value::Null),
                        };
                        if frames.send(Ok(frame)).await.is_err() {
                            return;
                        }
                    }
                    opcode::HEARTBEAT_ACK => heartbeat.ack(),
                    opcode::HEARTBEAT => {
                        let beat = GatewayMessage::new(opcode::HEARTBEAT, Some(serde_json::json!(last_seq)));
                        if let Err(e) = send_message(&mut sink, &beat).await {
                            break e;
                        }
                    }
                    opcode::RECONNECT => break ConnectionError::ReconnectRequested,
                    opcode::INVALID_SESSION => {
                        let data: InvalidSessionData = msg
                            .data
                            .and_then(|d| serde_json::from_value(d).ok())
                            .unwrap_or_default();
                        break ConnectionError::Invalidated { resumable: data.resumable };
                    }
                    op => tracing::debug!("ignoring gateway opcode {op}"),
                }
            }
        }
    };

    let _ = frames.send(Err(failure)).await;
}

/// Next text message as an envelope. Undecodable text is a `Protocol` error;
/// close frames and a finished stream end the link.
async fn next_message(stream: &mut WsSource) -> Result<GatewayMessage, ConnectionError> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(text.as_str())
                    .map_err(|e| ConnectionError::Protocol(e.to_string()));
            }
            Some(Ok(Message::Close(frame))) => {
                return Err(match frame {
                    Some(frame) => error_for_close(u16::from(frame.code), frame.reason.as_str()),
                    None => ConnectionError::Closed("closed without a frame".to_string()),
                });
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(ConnectionError::Io(e.to_string())),
            None => return Err(ConnectionError::Closed("stream ended".to_string())),
        }
    }
}

async fn send_message(sink: &mut WsSink, msg: &GatewayMessage) -> Result<(), ConnectionError> {
    let text = serde_json::to_string(msg).map_err(|e| ConnectionError::Protocol(e.to_string()))?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| ConnectionError::Io(e.to_string()))
}

fn encode<T: serde::Serialize>(data: &T) -> Result<serde_json::Value, ConnectionError> {
    serde_json::to_value(data).map_err(|e| ConnectionError::Protocol(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(
    data: Option<serde_json::Value>,
) -> Result<T, ConnectionError> {
    serde_json::from_value(data.unwrap_or(serde_json::Value::Null))
        .map_err(|e| ConnectionError::Protocol(e.to_string()))
}

/// Map a gateway close code onto the error the reconnect policy acts on.
pub fn error_for_close(code: u16, reason: &str) -> ConnectionError {
    match code {
        close_code::NOT_AUTHENTICATED | close_code::AUTH_FAILED => {
            ConnectionError::AuthenticationFailed
        }
        close_code::INVALID_INTENT | close_code::DISALLOWED_INTENT => {
            ConnectionError::DisallowedIntents
        }
        close_code::INVALID_SEQ | close_code::SESSION_TIMED_OUT => {
            ConnectionError::Invalidated { resumable: false }
        }
        _ if reason.is_empty() => ConnectionError::Closed(format!("close code {code}")),
        _ => ConnectionError::Closed(format!("close code {code}: {reason}")),
    }
}
