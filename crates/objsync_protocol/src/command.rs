//! Inbound client commands.

use crate::error::{CodecError, CodecResult};
use crate::model::ChangeEvent;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A command sent by a client over its socket.
///
/// Commands arrive alone or as a JSON array; a batch is processed strictly
/// in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    /// Registers the calling socket as the client's current connection.
    CreateClient(ObjectRequest),
    /// Requests the current state, creating the object if needed.
    Get(ObjectRequest),
    /// Appends change events and broadcasts them.
    Evt(EvtRequest),
    /// Liveness check.
    Ping(PingRequest),
    /// Runs disconnect cleanup for the calling socket.
    SimCleanUp(Target),
}

impl Command {
    /// Returns the wire name of the command.
    pub fn type_name(&self) -> &'static str {
        match self {
            Command::CreateClient(_) => "createClient",
            Command::Get(_) => "get",
            Command::Evt(_) => "evt",
            Command::Ping(_) => "ping",
            Command::SimCleanUp(_) => "simCleanUp",
        }
    }

    /// Returns the target object id.
    pub fn obj_id(&self) -> &str {
        match self {
            Command::CreateClient(req) | Command::Get(req) => &req.obj_id,
            Command::Evt(req) => &req.obj_id,
            Command::Ping(req) => &req.obj_id,
            Command::SimCleanUp(req) => &req.obj_id,
        }
    }

    /// Returns the calling client id.
    pub fn client_id(&self) -> &str {
        match self {
            Command::CreateClient(req) | Command::Get(req) => &req.client_id,
            Command::Evt(req) => &req.client_id,
            Command::Ping(req) => &req.client_id,
            Command::SimCleanUp(req) => &req.client_id,
        }
    }

    /// Checks required identifiers and, for `evt`, that events are present.
    pub fn validate(&self) -> CodecResult<()> {
        if self.obj_id().is_empty() {
            return Err(CodecError::MissingField("objId"));
        }
        if self.client_id().is_empty() {
            return Err(CodecError::MissingField("clientId"));
        }
        if let Command::Evt(req) = self {
            if req.events().is_empty() {
                return Err(CodecError::EmptyEvents);
            }
        }
        Ok(())
    }
}

/// Body of `createClient` and `get`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRequest {
    /// Target object.
    pub obj_id: String,
    /// Calling client.
    pub client_id: String,
    /// State to use if the object does not exist yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_state: Option<Value>,
    /// Client map path for a newly created object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_map_prop: Option<String>,
    /// Auto-delete flag for a newly created object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_delete_client_objects: Option<bool>,
}

impl ObjectRequest {
    /// Creates a request without creation hints.
    pub fn new(obj_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            obj_id: obj_id.into(),
            client_id: client_id.into(),
            default_state: None,
            client_map_prop: None,
            auto_delete_client_objects: None,
        }
    }

    /// Sets the default state hint.
    pub fn with_default_state(mut self, state: Value) -> Self {
        self.default_state = Some(state);
        self
    }

    /// Sets the client map hints.
    pub fn with_client_map(mut self, prop: impl Into<String>, auto_delete: bool) -> Self {
        self.client_map_prop = Some(prop.into());
        self.auto_delete_client_objects = Some(auto_delete);
        self
    }

    /// Returns the hints used when the object has to be created.
    pub fn hints(&self) -> ObjectHints {
        ObjectHints {
            default_state: self.default_state.clone(),
            client_map_prop: self.client_map_prop.clone(),
            auto_delete_client_objects: self.auto_delete_client_objects.unwrap_or(false),
        }
    }
}

/// Creation hints passed to the default state provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectHints {
    /// Client-proposed initial state.
    pub default_state: Option<Value>,
    /// Client map path.
    pub client_map_prop: Option<String>,
    /// Whether client map entries are deleted on disconnect.
    pub auto_delete_client_objects: bool,
}

/// Body of `evt`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvtRequest {
    /// Target object.
    pub obj_id: String,
    /// Calling client.
    pub client_id: String,
    /// Events to append, in order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evts: Option<Vec<ChangeEvent>>,
}

impl EvtRequest {
    /// Creates an evt request.
    pub fn new(
        obj_id: impl Into<String>,
        client_id: impl Into<String>,
        evts: Vec<ChangeEvent>,
    ) -> Self {
        Self {
            obj_id: obj_id.into(),
            client_id: client_id.into(),
            evts: Some(evts),
        }
    }

    /// Returns the events, empty when absent.
    pub fn events(&self) -> &[ChangeEvent] {
        self.evts.as_deref().unwrap_or(&[])
    }
}

/// Body of `ping`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingRequest {
    /// Object the client tracks.
    pub obj_id: String,
    /// Calling client.
    pub client_id: String,
    /// When set, the server checks that the socket is still registered.
    #[serde(default)]
    pub pc: bool,
}

/// Body of commands that only name a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    /// Object the client tracks.
    pub obj_id: String,
    /// Calling client.
    pub client_id: String,
}

/// Decodes a single command or an array of commands.
///
/// A JSON `null` decodes to an empty batch.
pub fn decode_batch(bytes: &[u8]) -> CodecResult<Vec<Command>> {
    let value: Value = serde_json::from_slice(bytes)?;
    decode_batch_value(value)
}

/// Decodes an already-parsed single command or array of commands.
pub fn decode_batch_value(value: Value) -> CodecResult<Vec<Command>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                serde_json::from_value(item)
                    .map_err(|source| CodecError::InvalidCommand { index, source })
            })
            .collect(),
        single => serde_json::from_value(single)
            .map(|cmd| vec![cmd])
            .map_err(|source| CodecError::InvalidCommand { index: 0, source }),
    }
}
