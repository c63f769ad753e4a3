//! Messages pushed from the server to a connection.

use crate::error::CodecResult;
use crate::model::{ChangeEvent, SyncObject};
use serde::{Deserialize, Serialize};

/// A message delivered to one socket.
///
/// Delivery order across concurrent `evt` commands is best-effort. A client
/// that receives a `changeIndex` other than its last seen index + 1 has
/// missed an update and is expected to resync with `get`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PushMessage {
    /// Full object, sent in reply to `get`.
    Set(SetMessage),
    /// Newly accepted events.
    Evt(EvtMessage),
    /// Reply to `ping`.
    Pong(SignalMessage),
    /// The socket is no longer registered; the client must reconnect.
    Reconnect(SignalMessage),
}

/// Body of a `set` push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetMessage {
    /// Recipient client.
    pub client_id: String,
    /// Object id.
    pub obj_id: String,
    /// Change index of `state`.
    pub change_index: u64,
    /// The object row: snapshot plus the log not yet merged into it.
    pub state: SyncObject,
}

/// Body of an `evt` push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvtMessage {
    /// Recipient client.
    pub client_id: String,
    /// Object id.
    pub obj_id: String,
    /// Change index assigned to these events.
    pub change_index: u64,
    /// The accepted events, in order.
    pub evts: Vec<ChangeEvent>,
}

/// Body of `pong` and `reconnect`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalMessage {
    /// Recipient client.
    pub client_id: String,
    /// Object id.
    pub obj_id: String,
    /// Always 0.
    pub change_index: u64,
}

impl PushMessage {
    /// Builds a `set` message for `client_id` from a committed object.
    pub fn set(client_id: impl Into<String>, object: SyncObject) -> Self {
        PushMessage::Set(SetMessage {
            client_id: client_id.into(),
            obj_id: object.obj_id.clone(),
            change_index: object.change_index,
            state: object,
        })
    }

    /// Builds an `evt` message for one recipient.
    pub fn evt(
        client_id: impl Into<String>,
        obj_id: impl Into<String>,
        change_index: u64,
        evts: Vec<ChangeEvent>,
    ) -> Self {
        PushMessage::Evt(EvtMessage {
            client_id: client_id.into(),
            obj_id: obj_id.into(),
            change_index,
            evts,
        })
    }

    /// Builds a `pong` message.
    pub fn pong(client_id: impl Into<String>, obj_id: impl Into<String>) -> Self {
        PushMessage::Pong(SignalMessage::new(client_id, obj_id))
    }

    /// Builds a `reconnect` message.
    pub fn reconnect(client_id: impl Into<String>, obj_id: impl Into<String>) -> Self {
        PushMessage::Reconnect(SignalMessage::new(client_id, obj_id))
    }

    /// Returns the recipient client id.
    pub fn client_id(&self) -> &str {
        match self {
            PushMessage::Set(m) => &m.client_id,
            PushMessage::Evt(m) => &m.client_id,
            PushMessage::Pong(m) | PushMessage::Reconnect(m) => &m.client_id,
        }
    }

    /// Returns the change index carried by the message.
    pub fn change_index(&self) -> u64 {
        match self {
            PushMessage::Set(m) => m.change_index,
            PushMessage::Evt(m) => m.change_index,
            PushMessage::Pong(m) | PushMessage::Reconnect(m) => m.change_index,
        }
    }

    /// Encodes to JSON bytes.
    pub fn encode(&self) -> CodecResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes from JSON bytes.
    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

impl SignalMessage {
    fn new(client_id: impl Into<String>, obj_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            obj_id: obj_id.into(),
            change_index: 0,
        }
    }
}
