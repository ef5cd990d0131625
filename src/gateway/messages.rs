//! Gateway wire protocol: opcodes, the envelope frame, and the payloads
//! that ride inside it.
//!
//! Every frame in either direction is a JSON object `{op, d, s, t}`. The
//! sequence number `s` and event name `t` are only populated on Dispatch
//! frames; everything else is control traffic.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Gateway protocol opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Dispatch = 0,
    Heartbeat = 1,
    Identify = 2,
    PresenceUpdate = 3,
    VoiceStateUpdate = 4,
    Resume = 6,
    Reconnect = 7,
    RequestGuildMembers = 8,
    InvalidSession = 9,
    Hello = 10,
    HeartbeatAck = 11,
}

impl OpCode {
    pub fn from_u8(op: u8) -> Option<OpCode> {
        match op {
            0 => Some(OpCode::Dispatch),
            1 => Some(OpCode::Heartbeat),
            2 => Some(OpCode::Identify),
            3 => Some(OpCode::PresenceUpdate),
            4 => Some(OpCode::VoiceStateUpdate),
            6 => Some(OpCode::Resume),
            7 => Some(OpCode::Reconnect),
            8 => Some(OpCode::RequestGuildMembers),
            9 => Some(OpCode::InvalidSession),
            10 => Some(OpCode::Hello),
            11 => Some(OpCode::HeartbeatAck),
            _ => None,
        }
    }
}

/// The JSON envelope carried by every gateway text frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayFrame {
    pub op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayFrame {
    fn control(op: OpCode, d: Option<Value>) -> Self {
        Self {
            op: op as u8,
            d,
            s: None,
            t: None,
        }
    }

    /// Heartbeat carrying the last dispatch sequence seen, `null` before
    /// the first dispatch.
    pub fn heartbeat(sequence: Option<u64>) -> Self {
        let d = match sequence {
            Some(seq) => json!(seq),
            None => Value::Null,
        };
        Self::control(OpCode::Heartbeat, Some(d))
    }

    pub fn identify(payload: &IdentifyPayload) -> Self {
        let mut d = json!({
            "token": payload.token,
            "properties": {
                "os": payload.properties.os,
                "browser": payload.properties.browser,
                "device": payload.properties.device,
            },
            "compress": payload.compress,
        });
        if let Some(intents) = payload.intents {
            d["intents"] = json!(intents);
        }
        if let Some(shard) = payload.shard {
            d["shard"] = json!(shard);
        }
        Self::control(OpCode::Identify, Some(d))
    }

    pub fn resume(payload: &ResumePayload) -> Self {
        Self::control(
            OpCode::Resume,
            Some(json!({
                "token": payload.token,
                "session_id": payload.session_id,
                "seq": payload.seq,
            })),
        )
    }

    pub fn presence_update(payload: Value) -> Self {
        Self::control(OpCode::PresenceUpdate, Some(payload))
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// An inbound frame classified by opcode. Unknown opcodes are preserved
/// so the connection can log and skip them without dropping the link.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayMessage {
    Dispatch {
        sequence: Option<u64>,
        event: String,
        payload: Value,
    },
    HeartbeatRequest,
    Reconnect,
    InvalidSession {
        resumable: bool,
    },
    Hello {
        heartbeat_interval: Duration,
    },
    HeartbeatAck,
    Unknown {
        op: u8,
    },
}

impl GatewayMessage {
    pub fn classify(frame: GatewayFrame) -> GatewayMessage {
        match OpCode::from_u8(frame.op) {
            Some(OpCode::Dispatch) => GatewayMessage::Dispatch {
                sequence: frame.s,
                event: frame.t.unwrap_or_default(),
                payload: frame.d.unwrap_or(Value::Null),
            },
            Some(OpCode::Heartbeat) => GatewayMessage::HeartbeatRequest,
            Some(OpCode::Reconnect) => GatewayMessage::Reconnect,
            Some(OpCode::InvalidSession) => GatewayMessage::InvalidSession {
                resumable: frame.d.as_ref().and_then(Value::as_bool).unwrap_or(false),
            },
            Some(OpCode::Hello) => {
                let interval_ms = frame
                    .d
                    .as_ref()
                    .and_then(|d| d.get("heartbeat_interval"))
                    .and_then(Value::as_u64)
                    .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL_MS);
                GatewayMessage::Hello {
                    heartbeat_interval: Duration::from_millis(interval_ms),
                }
            }
            Some(OpCode::HeartbeatAck) => GatewayMessage::HeartbeatAck,
            _ => GatewayMessage::Unknown { op: frame.op },
        }
    }
}

/// Fallback cadence when a Hello arrives without an interval. Matches the
/// server default.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 41_250;

/// Dispatch event name announcing a fresh session.
pub const EVENT_READY: &str = "READY";

/// Dispatch event name confirming a successful resume.
pub const EVENT_RESUMED: &str = "RESUMED";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    pub heartbeat_interval: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    pub token: String,
    pub properties: IdentifyProperties,
    pub compress: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intents: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<[u64; 2]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePayload {
    pub token: String,
    pub session_id: String,
    pub seq: u64,
}

/// The slice of the READY dispatch the connection itself consumes. The
/// full payload is still forwarded to listeners untouched.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyPayload {
    #[serde(default)]
    pub v: u8,
    pub session_id: String,
    #[serde(default)]
    pub user: Value,
    #[serde(default)]
    pub guilds: Vec<Value>,
}

/// What a given close code means for the next connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDisposition {
    /// Session survives the disconnect, send Resume next time.
    Resume,
    /// Session is gone, start over with Identify.
    Reidentify,
    /// Reconnecting will keep failing until configuration changes.
    Fatal,
}

/// Close code for rejected credentials.
pub const CLOSE_AUTHENTICATION_FAILED: u16 = 4004;

/// Classifies a server close code. `None` means the peer vanished without
/// a close frame, which leaves the session resumable.
pub fn close_disposition(code: Option<u16>) -> CloseDisposition {
    match code {
        // Credential or configuration rejections the server will repeat
        // verbatim on every retry.
        Some(CLOSE_AUTHENTICATION_FAILED) | Some(4010..=4014) => CloseDisposition::Fatal,
        // Invalid sequence and session timeout both mean the server no
        // longer holds our session. Normal closure invalidates it too.
        Some(4007) | Some(4009) | Some(1000) | Some(1001) => CloseDisposition::Reidentify,
        _ => CloseDisposition::Resume,
    }
}
