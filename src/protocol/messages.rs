//! AudioConnector message types

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// String to string map used for input and output variables.
pub type VariableMap = BTreeMap<String, String>;

/// Failure to decode an inbound control message.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed message envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("Invalid parameters for '{kind}' message: {source}")]
    Parameters {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

// =============================================================================
// Shared payloads
// =============================================================================

/// Parameters of messages that carry none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct EmptyParameters {}

/// A media descriptor offered in `open` and confirmed in `opened`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MediaParameter {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<String>>,
    pub rate: u32,
}

// =============================================================================
// Incoming Messages (Client -> Server)
// =============================================================================

/// Envelope of an inbound control message.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientEnvelope {
    pub id: String,
    #[serde(default)]
    pub version: Option<String>,
    pub seq: u64,
    pub serverseq: u64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub parameters: Value,
}

impl ClientEnvelope {
    /// Decode the envelope of a text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::Envelope)
    }

    /// Decode the typed message carried by this envelope.
    pub fn message(&self) -> Result<ClientMessage, ProtocolError> {
        ClientMessage::from_parts(&self.kind, &self.parameters)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenParameters {
    #[serde(default)]
    pub organization_id: Option<String>,
    pub conversation_id: String,
    #[serde(default)]
    pub language: Option<String>,
    pub media: Vec<MediaParameter>,
    #[serde(default)]
    pub input_variables: Option<VariableMap>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DtmfParameters {
    pub digit: String,
}

/// Error report sent by the client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorParameters {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Typed inbound control messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Open(OpenParameters),
    Close,
    Ping,
    Dtmf(DtmfParameters),
    PlaybackStarted,
    PlaybackCompleted,
    Error(ErrorParameters),
    /// Any message type the gateway does not handle
    Unrecognized(String),
}

impl ClientMessage {
    pub fn from_parts(kind: &str, parameters: &Value) -> Result<Self, ProtocolError> {
        let decode_error = |source| ProtocolError::Parameters {
            kind: kind.to_string(),
            source,
        };

        let message = match kind {
            "open" => ClientMessage::Open(
                OpenParameters::deserialize(parameters).map_err(decode_error)?,
            ),
            "close" => ClientMessage::Close,
            "ping" => ClientMessage::Ping,
            "dtmf" => ClientMessage::Dtmf(
                DtmfParameters::deserialize(parameters).map_err(decode_error)?,
            ),
            "playback_started" => ClientMessage::PlaybackStarted,
            "playback_completed" => ClientMessage::PlaybackCompleted,
            "error" => ClientMessage::Error(
                ErrorParameters::deserialize(parameters).map_err(decode_error)?,
            ),
            other => ClientMessage::Unrecognized(other.to_string()),
        };

        Ok(message)
    }

    /// Wire name of the message type.
    pub fn kind(&self) -> &str {
        match self {
            ClientMessage::Open(_) => "open",
            ClientMessage::Close => "close",
            ClientMessage::Ping => "ping",
            ClientMessage::Dtmf(_) => "dtmf",
            ClientMessage::PlaybackStarted => "playback_started",
            ClientMessage::PlaybackCompleted => "playback_completed",
            ClientMessage::Error(_) => "error",
            ClientMessage::Unrecognized(kind) => kind,
        }
    }
}

// =============================================================================
// Outgoing Messages (Server -> Client)
// =============================================================================

/// Envelope of an outbound control message.
#[derive(Debug, Clone, Serialize)]
pub struct ServerEnvelope {
    pub id: String,
    pub version: &'static str,
    pub seq: u64,
    pub clientseq: u64,
    #[serde(flatten)]
    pub message: ServerMessage,
}

/// Outbound control messages.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "parameters", rename_all = "snake_case")]
pub enum ServerMessage {
    Opened(OpenedParameters),
    Pong(EmptyParameters),
    Closed(EmptyParameters),
    Event(EventParameters),
    Disconnect(DisconnectParameters),
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Opened(_) => "opened",
            ServerMessage::Pong(_) => "pong",
            ServerMessage::Closed(_) => "closed",
            ServerMessage::Event(_) => "event",
            ServerMessage::Disconnect(_) => "disconnect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenedParameters {
    pub media: Vec<MediaParameter>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventParameters {
    pub entities: Vec<EventEntity>,
}

/// Outcome of a bot turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    NoInput,
    NoMatch,
    Match,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BotTurnResponseData {
    pub disposition: Disposition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// A tagged entity inside an `event` message.
#[derive(Debug, Clone, PartialEq)]
pub enum EventEntity {
    BargeIn,
    BotTurnResponse(BotTurnResponseData),
    /// Any other entity, passed through unchanged
    Custom { kind: String, data: Value },
}

impl EventEntity {
    pub fn kind(&self) -> &str {
        match self {
            EventEntity::BargeIn => "barge_in",
            EventEntity::BotTurnResponse(_) => "bot_turn_response",
            EventEntity::Custom { kind, .. } => kind,
        }
    }
}

impl Serialize for EventEntity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Tagged<'a, T: Serialize> {
            #[serde(rename = "type")]
            kind: &'a str,
            data: T,
        }

        match self {
            EventEntity::BargeIn => Tagged {
                kind: self.kind(),
                data: EmptyParameters {},
            }
            .serialize(serializer),
            EventEntity::BotTurnResponse(data) => Tagged {
                kind: self.kind(),
                data,
            }
            .serialize(serializer),
            EventEntity::Custom { kind, data } => Tagged { kind, data }.serialize(serializer),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    Completed,
    Unauthorized,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectParameters {
    pub reason: DisconnectReason,
    pub info: String,
    pub output_variables: VariableMap,
}
