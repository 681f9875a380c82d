use serde::{Deserialize, Serialize};

/// Event type carrying slash-command invocations. Always delivered.
pub const COMMAND_EVENT: &str = "interaction.create";
pub const READY_EVENT: &str = "ready";
pub const RESUMED_EVENT: &str = "resumed";

/// Opcodes for gateway messages.
pub mod opcode {
    pub const EVENT: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const RESUME: u8 = 3;
    pub const HEARTBEAT_ACK: u8 = 4;
    pub const HELLO: u8 = 5;
    pub const RECONNECT: u8 = 6;
    pub const INVALID_SESSION: u8 = 7;
}

/// Close codes.
pub mod close_code {
    pub const UNKNOWN_ERROR: u16 = 4000;
    pub const UNKNOWN_OPCODE: u16 = 4001;
    pub const DECODE_ERROR: u16 = 4002;
    pub const NOT_AUTHENTICATED: u16 = 4003;
    pub const AUTH_FAILED: u16 = 4004;
    pub const ALREADY_AUTHENTICATED: u16 = 4005;
    pub const INVALID_SEQ: u16 = 4007;
    pub const RATE_LIMITED: u16 = 4008;
    pub const SESSION_TIMED_OUT: u16 = 4009;
    pub const INVALID_VERSION: u16 = 4012;
    pub const INVALID_INTENT: u16 = 4013;
    pub const DISALLOWED_INTENT: u16 = 4014;
}

/// Gateway message envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct GatewayMessage {
    pub op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl GatewayMessage {
    pub fn new(op: u8, data: Option<serde_json::Value>) -> Self {
        Self {
            op,
            seq: None,
            event_type: None,
            data,
        }
    }
}

/// HELLO payload data.
#[derive(Debug, Deserialize)]
pub struct HelloData {
    pub heartbeat_interval: u64,
}

/// IDENTIFY payload data.
#[derive(Debug, Serialize)]
pub struct IdentifyData {
    pub token: String,
    pub intents: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Value>,
}

/// RESUME payload data.
#[derive(Debug, Serialize)]
pub struct ResumeData {
    pub token: String,
    pub session_id: String,
    pub seq: u64,
}

/// Data of the `ready` dispatch.
#[derive(Debug, Deserialize)]
pub struct ReadyData {
    pub session_id: String,
    pub user_id: Option<String>,
}

/// INVALID_SESSION payload data.
#[derive(Debug, Default, Deserialize)]
pub struct InvalidSessionData {
    #[serde(default)]
    pub resumable: bool,
}

/// A decoded dispatch, handed to the dispatcher exactly once.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub event_type: String,
    pub actor_id: Option<String>,
    pub sequence: u64,
    pub payload: serde_json::Value,
}

impl InboundEvent {
    pub fn new(event_type: impl Into<String>, sequence: u64, payload: serde_json::Value) -> Self {
        let actor_id = actor_of(&payload);
        Self {
            event_type: event_type.into(),
            actor_id,
            sequence,
            payload,
        }
    }

    pub fn is_command(&self) -> bool {
        self.event_type == COMMAND_EVENT
    }
}

/// The user an event originates from, when the payload names one.
fn actor_of(payload: &serde_json::Value) -> Option<String> {
    ["user_id", "author_id"]
        .iter()
        .find_map(|key| payload.get(key))
        .or_else(|| payload.get("member").and_then(|m| m.get("user_id")))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}
