//! Persisted rows: objects, client connections and change events.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// An opaque unit of mutation recorded in an object's log.
///
/// The engine never looks inside a change event. Order within the log is
/// the order clients apply them in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeEvent(Value);

impl ChangeEvent {
    /// Wraps a JSON value as a change event.
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Builds the event that removes `prop` from the map found at `path`.
    ///
    /// Emitted on behalf of a disconnecting client when its object keeps a
    /// per-client map that should be cleaned up automatically.
    pub fn delete_prop(prop: &str, path: &str) -> Self {
        Self(json!({
            "type": "delete",
            "prop": prop,
            "path": [path],
        }))
    }

    /// Returns the underlying JSON value.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Consumes the event, returning the underlying JSON value.
    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for ChangeEvent {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// The authoritative replica of one shared object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncObject {
    /// Externally assigned object id.
    pub obj_id: String,
    /// Number of accepted mutations. Starts at 0.
    pub change_index: u64,
    /// Snapshot the log applies on top of.
    pub state: Value,
    /// Change events accepted since the snapshot, in order.
    #[serde(default)]
    pub log: Vec<ChangeEvent>,
    /// Path of a map inside `state` keyed by client id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_map_prop: Option<String>,
    /// Whether a client's entry in `client_map_prop` is deleted on disconnect.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub auto_delete_client_objects: bool,
}

impl SyncObject {
    /// Creates an object at change index 0 with an empty log.
    pub fn new(obj_id: impl Into<String>, state: Value) -> Self {
        Self {
            obj_id: obj_id.into(),
            change_index: 0,
            state,
            log: Vec::new(),
            client_map_prop: None,
            auto_delete_client_objects: false,
        }
    }

    /// Sets the client map path and whether entries are auto-deleted.
    pub fn with_client_map(mut self, prop: impl Into<String>, auto_delete: bool) -> Self {
        self.client_map_prop = Some(prop.into());
        self.auto_delete_client_objects = auto_delete;
        self
    }

    /// Returns the client map path if disconnect cleanup applies to it.
    pub fn auto_delete_prop(&self) -> Option<&str> {
        if self.auto_delete_client_objects {
            self.client_map_prop.as_deref()
        } else {
            None
        }
    }
}

/// Primary key of a connection row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionKey {
    /// Object the client tracks.
    pub obj_id: String,
    /// Client replica id.
    pub client_id: String,
}

impl ConnectionKey {
    /// Creates a connection key.
    pub fn new(obj_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            obj_id: obj_id.into(),
            client_id: client_id.into(),
        }
    }
}

/// A client replica subscribed to one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConnection {
    /// Object the client tracks.
    pub obj_id: String,
    /// Client replica id, stable across reconnects.
    pub client_id: String,
    /// The client's current transport connection.
    pub socket_id: String,
    /// Authenticated principal, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl ClientConnection {
    /// Creates a connection without a user id.
    pub fn new(
        obj_id: impl Into<String>,
        client_id: impl Into<String>,
        socket_id: impl Into<String>,
    ) -> Self {
        Self {
            obj_id: obj_id.into(),
            client_id: client_id.into(),
            socket_id: socket_id.into(),
            user_id: None,
        }
    }

    /// Sets the user id.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Returns the primary key of this row.
    pub fn key(&self) -> ConnectionKey {
        ConnectionKey::new(self.obj_id.clone(), self.client_id.clone())
    }
}
