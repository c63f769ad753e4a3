//! Pluggable extension points.
//!
//! Every hook is injected at construction time and defaults to a
//! pass-through implementation:
//!
//! | hook | default |
//! |---|---|
//! | [`DefaultStateProvider`] | [`HintedDefaultState`]: the client's `defaultState` or `{}` |
//! | [`ConnectionTransform`] | [`IdentityTransform`] |
//! | [`AccessPolicy`] | [`AllowAll`] |
//! | [`LogMerger`] | [`NoMerge`] |
//!
//! [`ShallowSetMerger`] is an opt-in merger for clients that only emit flat
//! `set`/`delete` events.

use crate::error::SyncResult;
use objsync_protocol::{ChangeEvent, ClientConnection, ObjectHints, SyncObject};
use serde_json::{json, Value};
use std::sync::Arc;

/// Materializes the initial state of an object on first access.
///
/// Called at most once per object in the absence of a create race. When two
/// invocations race, both may call the provider but only one result is
/// persisted.
pub trait DefaultStateProvider: Send + Sync {
    /// Returns the initial object for `obj_id`.
    ///
    /// The change index and log of the returned object are reset before it
    /// is written.
    fn provide_default_state(
        &self,
        obj_id: &str,
        client_id: &str,
        hints: &ObjectHints,
    ) -> SyncResult<SyncObject>;
}

/// Uses the client-supplied default state, or an empty JSON object.
#[derive(Debug, Clone, Copy, Default)]
pub struct HintedDefaultState;

impl DefaultStateProvider for HintedDefaultState {
    fn provide_default_state(
        &self,
        obj_id: &str,
        _client_id: &str,
        hints: &ObjectHints,
    ) -> SyncResult<SyncObject> {
        let state = hints
            .default_state
            .clone()
            .unwrap_or_else(|| Value::Object(Default::default()));
        let mut object = SyncObject::new(obj_id, state);
        object.client_map_prop = hints.client_map_prop.clone();
        object.auto_delete_client_objects = hints.auto_delete_client_objects;
        Ok(object)
    }
}

/// Rewrites a connection before it is persisted, e.g. to attach a user id.
///
/// Must be idempotent: reconnecting clients pass through it again.
pub trait ConnectionTransform: Send + Sync {
    /// Returns the connection to store.
    fn transform_connection(&self, candidate: ClientConnection) -> SyncResult<ClientConnection>;
}

/// Stores connections unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl ConnectionTransform for IdentityTransform {
    fn transform_connection(&self, candidate: ClientConnection) -> SyncResult<ClientConnection> {
        Ok(candidate)
    }
}

/// Read and write authorization.
///
/// Both checks are pure predicates evaluated before any state is exposed or
/// mutated.
pub trait AccessPolicy: Send + Sync {
    /// Returns true if `connection` may receive `object`.
    fn check_read_access(&self, connection: &ClientConnection, object: &SyncObject) -> bool;

    /// Returns true if `connection` may append events to its object.
    fn check_write_access(&self, connection: &ClientConnection) -> bool;
}

/// Grants every read and write.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn check_read_access(&self, _connection: &ClientConnection, _object: &SyncObject) -> bool {
        true
    }

    fn check_write_access(&self, _connection: &ClientConnection) -> bool {
        true
    }
}

/// Folds a log into its snapshot.
///
/// This is the only place that knows what change events mean. Returning
/// `None` leaves the object untouched.
pub trait LogMerger: Send + Sync {
    /// Returns the state after applying `log` to `state`.
    fn merge_log(&self, state: &Value, log: &[ChangeEvent]) -> Option<Value>;
}

/// Never merges; logs grow until compacted externally.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMerge;

impl LogMerger for NoMerge {
    fn merge_log(&self, _state: &Value, _log: &[ChangeEvent]) -> Option<Value> {
        None
    }
}

/// Merges `set` and `delete` events on top-level or one-level-deep props.
///
/// Understands `{"type": "set", "prop", "value", "path"?}` and
/// `{"type": "delete", "prop", "path"?}` where `path` holds at most one
/// segment. Declines the whole log if any event is something else.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShallowSetMerger;

impl LogMerger for ShallowSetMerger {
    fn merge_log(&self, state: &Value, log: &[ChangeEvent]) -> Option<Value> {
        let mut merged = state.clone();
        for event in log {
            apply_shallow(&mut merged, event.as_value())?;
        }
        Some(merged)
    }
}

fn apply_shallow(state: &mut Value, event: &Value) -> Option<()> {
    let prop = event.get("prop")?.as_str()?;
    let target = match event.get("path").and_then(Value::as_array) {
        None => state.as_object_mut()?,
        Some(path) if path.is_empty() => state.as_object_mut()?,
        Some(path) if path.len() == 1 => {
            let segment = path[0].as_str()?;
            state
                .as_object_mut()?
                .entry(segment)
                .or_insert_with(|| json!({}))
                .as_object_mut()?
        }
        Some(_) => return None,
    };

    match event.get("type")?.as_str()? {
        "set" => {
            target.insert(prop.to_string(), event.get("value")?.clone());
        }
        "delete" => {
            target.remove(prop);
        }
        _ => return None,
    }
    Some(())
}

/// The set of hooks a processor runs with.
#[derive(Clone)]
pub struct Hooks {
    /// Initial state provider.
    pub default_state: Arc<dyn DefaultStateProvider>,
    /// Connection transform.
    pub transform: Arc<dyn ConnectionTransform>,
    /// Access policy.
    pub access: Arc<dyn AccessPolicy>,
    /// Log merger.
    pub merger: Arc<dyn LogMerger>,
}

impl Hooks {
    /// Creates the pass-through hook set.
    pub fn new() -> Self {
        Self {
            default_state: Arc::new(HintedDefaultState),
            transform: Arc::new(IdentityTransform),
            access: Arc::new(AllowAll),
            merger: Arc::new(NoMerge),
        }
    }

    /// Replaces the default state provider.
    pub fn with_default_state(mut self, provider: impl DefaultStateProvider + 'static) -> Self {
        self.default_state = Arc::new(provider);
        self
    }

    /// Replaces the connection transform.
    pub fn with_transform(mut self, transform: impl ConnectionTransform + 'static) -> Self {
        self.transform = Arc::new(transform);
        self
    }

    /// Replaces the access policy.
    pub fn with_access(mut self, access: impl AccessPolicy + 'static) -> Self {
        self.access = Arc::new(access);
        self
    }

    /// Replaces the log merger.
    pub fn with_merger(mut self, merger: impl LogMerger + 'static) -> Self {
        self.merger = Arc::new(merger);
        self
    }
}

impl Default for Hooks {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks").finish_non_exhaustive()
    }
}
