//! In-memory state store.

use crate::backend::{AppendOutcome, StateStore};
use crate::error::{StoreError, StoreResult};
use crate::page::{Page, PageRequest};
use objsync_protocol::{ChangeEvent, ClientConnection, ConnectionKey, SyncObject};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::Bound;

/// An in-memory state store.
///
/// This store keeps both tables in memory and is suitable for:
/// - Unit and integration tests
/// - The CLI simulator
/// - Single-process deployments that accept losing state on restart
///
/// # Thread Safety
///
/// Every trait method takes the table lock once, so each call is atomic
/// with respect to every other call, matching the conditional primitives a
/// durable key/value store offers.
///
/// # Example
///
/// ```rust
/// use objsync_protocol::ClientConnection;
/// use objsync_store::{InMemoryStore, PageRequest, StateStore};
///
/// let store = InMemoryStore::new();
/// store.put_connection(&ClientConnection::new("o1", "c1", "s1")).unwrap();
/// let page = store.query_connections("o1", &PageRequest::first(10)).unwrap();
/// assert_eq!(page.items.len(), 1);
/// assert!(page.is_last());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    objects: RwLock<BTreeMap<String, SyncObject>>,
    connections: RwLock<BTreeMap<ConnectionKey, ClientConnection>>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of object rows.
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns the number of connection rows.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Returns a copy of every connection row, in key order.
    pub fn connections(&self) -> Vec<ClientConnection> {
        self.connections.read().values().cloned().collect()
    }
}

fn check_limit(page: &PageRequest) -> StoreResult<()> {
    if page.limit == 0 {
        return Err(StoreError::InvalidPage("limit must be at least 1".into()));
    }
    Ok(())
}

fn collect_page<'a>(
    mut rows: impl Iterator<Item = &'a ClientConnection>,
    limit: usize,
) -> Page<ClientConnection> {
    let items: Vec<ClientConnection> = rows.by_ref().take(limit).cloned().collect();
    let has_more = rows.next().is_some();
    let last_key = if has_more {
        items.last().map(ClientConnection::key)
    } else {
        None
    };
    Page { items, last_key }
}

impl StateStore for InMemoryStore {
    fn get_object(&self, obj_id: &str) -> StoreResult<Option<SyncObject>> {
        Ok(self.objects.read().get(obj_id).cloned())
    }

    fn put_object_if_absent(&self, object: &SyncObject) -> StoreResult<bool> {
        let mut objects = self.objects.write();
        if objects.contains_key(&object.obj_id) {
            return Ok(false);
        }
        objects.insert(object.obj_id.clone(), object.clone());
        Ok(true)
    }

    fn append_events(&self, obj_id: &str, events: &[ChangeEvent]) -> StoreResult<AppendOutcome> {
        let mut objects = self.objects.write();
        let object = objects
            .get_mut(obj_id)
            .ok_or_else(|| StoreError::ObjectNotFound(obj_id.to_string()))?;

        object.change_index += 1;
        object.log.extend_from_slice(events);

        Ok(AppendOutcome {
            change_index: object.change_index,
            log_len: object.log.len(),
        })
    }

    fn compact_object(
        &self,
        obj_id: &str,
        expected_change_index: u64,
        state: Value,
    ) -> StoreResult<bool> {
        let mut objects = self.objects.write();
        let object = objects
            .get_mut(obj_id)
            .ok_or_else(|| StoreError::ObjectNotFound(obj_id.to_string()))?;

        if object.change_index != expected_change_index {
            return Ok(false);
        }
        object.state = state;
        object.log.clear();
        Ok(true)
    }

    fn put_connection(&self, connection: &ClientConnection) -> StoreResult<()> {
        self.connections
            .write()
            .insert(connection.key(), connection.clone());
        Ok(())
    }

    fn get_connection(
        &self,
        obj_id: &str,
        client_id: &str,
    ) -> StoreResult<Option<ClientConnection>> {
        let key = ConnectionKey::new(obj_id, client_id);
        Ok(self.connections.read().get(&key).cloned())
    }

    fn delete_connection(&self, obj_id: &str, client_id: &str) -> StoreResult<bool> {
        let key = ConnectionKey::new(obj_id, client_id);
        Ok(self.connections.write().remove(&key).is_some())
    }

    fn delete_connection_if_socket(
        &self,
        obj_id: &str,
        client_id: &str,
        socket_id: &str,
    ) -> StoreResult<bool> {
        let key = ConnectionKey::new(obj_id, client_id);
        let mut connections = self.connections.write();
        match connections.get(&key) {
            Some(connection) if connection.socket_id == socket_id => {
                connections.remove(&key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn query_connections(
        &self,
        obj_id: &str,
        page: &PageRequest,
    ) -> StoreResult<Page<ClientConnection>> {
        check_limit(page)?;
        let start = match &page.exclusive_start {
            Some(key) if key.obj_id != obj_id => {
                return Err(StoreError::InvalidPage(format!(
                    "start key belongs to {}, not {}",
                    key.obj_id, obj_id
                )));
            }
            Some(key) => Bound::Excluded(key.clone()),
            None => Bound::Included(ConnectionKey::new(obj_id, "")),
        };

        let connections = self.connections.read();
        let rows = connections
            .range((start, Bound::Unbounded))
            .map(|(_, connection)| connection)
            .take_while(|connection| connection.obj_id == obj_id);
        Ok(collect_page(rows, page.limit))
    }

    fn query_connections_by_socket(
        &self,
        socket_id: &str,
        page: &PageRequest,
    ) -> StoreResult<Page<ClientConnection>> {
        check_limit(page)?;
        let start = match &page.exclusive_start {
            Some(key) => Bound::Excluded(key.clone()),
            None => Bound::Unbounded,
        };

        let connections = self.connections.read();
        let rows = connections
            .range((start, Bound::Unbounded))
            .map(|(_, connection)| connection)
            .filter(|connection| connection.socket_id == socket_id);
        Ok(collect_page(rows, page.limit))
    }
}
