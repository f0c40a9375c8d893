//! JSON wire protocol between pad clients and the server.
//!
//! Every frame is a text WebSocket message carrying one envelope:
//! ```text
//! {
//!   "type": "COLLABROOM",
//!   "component": "pad",
//!   "data": { "type": "USER_CHANGES", "baseRev": 4, "changeset": "Z:…", "apool": {…} }
//! }
//! ```
//! `data.type` selects the message. Field names are camelCase.

use std::collections::BTreeMap;

use scribe_core::{AText, PoolJson};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ErrorKind;

pub const ENVELOPE_TYPE: &str = "COLLABROOM";
pub const ENVELOPE_COMPONENT: &str = "pad";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    pub data: T,
}

/// Display name and color a client reports about itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_id: Option<String>,
}

/// An author as shown to other clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorInfo {
    pub user_id: String,
    pub name: Option<String>,
    pub color_id: String,
}

/// Messages sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    /// Join a pad by editable or read-only id.
    ClientReady {
        pad_id: String,
        token: String,
        /// API sessions granting access to group pads.
        #[serde(default)]
        session_ids: Vec<String>,
        #[serde(default)]
        user_info: UserInfo,
    },
    UserChanges {
        base_rev: i64,
        changeset: String,
        #[serde(default)]
        apool: PoolJson,
    },
    ChangesetReq {
        start: i64,
        granularity: i64,
        request_id: u64,
    },
    ChatMessage {
        text: String,
        #[serde(default)]
        time: Option<i64>,
        #[serde(default)]
        author_id: Option<String>,
    },
    GetChatMessages {
        start: u64,
        end: u64,
    },
    UserinfoUpdate {
        user_info: UserInfo,
    },
    /// Relayed untouched to the other clients on the pad.
    SuggestUserinfo {
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    /// Relayed untouched to the other clients on the pad.
    ClientMessage {
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    /// Mark the head revision as saved.
    SaveRevision,
    PadDelete {
        pad_id: String,
    },
}

/// Initial snapshot answering CLIENT_READY.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientVars {
    pub pad_id: String,
    pub read_only_id: String,
    pub read_only: bool,
    pub user_id: String,
    pub user_name: Option<String>,
    pub user_color: String,
    pub atext: AText,
    pub apool: PoolJson,
    pub head_rev: u64,
    pub chat_head: i64,
    pub historical_author_data: BTreeMap<String, AuthorInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEntry {
    pub seq: u64,
    pub text: String,
    pub time: i64,
    pub author: Option<String>,
    pub display_name: Option<String>,
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    ClientVars(ClientVars),
    /// A committed revision, transformed against the pre-commit head.
    NewChanges {
        new_rev: u64,
        changeset: String,
        apool: PoolJson,
        author: Option<String>,
        time: i64,
    },
    ChangesetReq {
        request_id: u64,
        start: u64,
        granularity: u64,
        /// `rev(start)` to `rev(actual_end_num)`.
        changeset: String,
        /// The inverse, taking `rev(actual_end_num)` back to `rev(start)`.
        backwards_changeset: String,
        apool: PoolJson,
        actual_end_num: u64,
        /// Milliseconds between the two revisions.
        time_delta: i64,
    },
    ChatMessage(ChatEntry),
    ChatMessages {
        messages: Vec<ChatEntry>,
    },
    UserinfoUpdate {
        user_info: AuthorInfo,
    },
    UserNewinfo {
        user_info: AuthorInfo,
    },
    UserLeave {
        user_info: AuthorInfo,
    },
    SuggestUserinfo {
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    ClientMessage {
        #[serde(flatten)]
        payload: Map<String, Value>,
    },
    PadDeleted {
        pad_id: String,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl ClientMessage {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        encode(self)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        decode(text)
    }

    /// The `data.type` tag, for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::ClientReady { .. } => "CLIENT_READY",
            Self::UserChanges { .. } => "USER_CHANGES",
            Self::ChangesetReq { .. } => "CHANGESET_REQ",
            Self::ChatMessage { .. } => "CHAT_MESSAGE",
            Self::GetChatMessages { .. } => "GET_CHAT_MESSAGES",
            Self::UserinfoUpdate { .. } => "USERINFO_UPDATE",
            Self::SuggestUserinfo { .. } => "SUGGEST_USERINFO",
            Self::ClientMessage { .. } => "CLIENT_MESSAGE",
            Self::SaveRevision => "SAVE_REVISION",
            Self::PadDelete { .. } => "PAD_DELETE",
        }
    }
}

impl ServerMessage {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        encode(self)
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        decode(text)
    }
}

/// Wrap `data` in a pad envelope.
pub fn encode<T: Serialize>(data: &T) -> Result<String, ProtocolError> {
    let envelope = Envelope {
        kind: ENVELOPE_TYPE.to_string(),
        component: Some(ENVELOPE_COMPONENT.to_string()),
        data,
    };
    serde_json::to_string(&envelope).map_err(|e| ProtocolError::SerializationError(e.to_string()))
}

/// Unwrap a pad envelope and decode its `data`.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, ProtocolError> {
    let envelope: Envelope<Value> = serde_json::from_str(text)
        .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
    if envelope.kind != ENVELOPE_TYPE {
        return Err(ProtocolError::InvalidEnvelope(envelope.kind));
    }
    if let Some(component) = envelope.component.filter(|c| c != ENVELOPE_COMPONENT) {
        return Err(ProtocolError::InvalidEnvelope(component));
    }
    serde_json::from_value(envelope.data)
        .map_err(|e| ProtocolError::DeserializationError(e.to_string()))
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    /// Envelope type or component is not ours.
    InvalidEnvelope(String),
    ConnectionClosed,
    Timeout,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidEnvelope(kind) => write!(f, "Invalid envelope: {kind}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Timeout => write!(f, "Connection timeout"),
        }
    }
}

impl std::error::Error for ProtocolError {}
