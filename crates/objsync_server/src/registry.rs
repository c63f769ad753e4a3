//! Connection registry: `(objId, clientId) → socketId`.

use crate::error::SyncResult;
use crate::hooks::ConnectionTransform;
use objsync_protocol::{ClientConnection, ConnectionKey};
use objsync_store::{PageRequest, StateStore};
use std::sync::Arc;
use tracing::debug;

/// CRUD over connection rows.
///
/// Nothing is cached: every call reads or writes the store.
pub struct ConnectionRegistry {
    store: Arc<dyn StateStore>,
    transform: Arc<dyn ConnectionTransform>,
}

impl ConnectionRegistry {
    /// Creates a registry over `store`.
    pub fn new(store: Arc<dyn StateStore>, transform: Arc<dyn ConnectionTransform>) -> Self {
        Self { store, transform }
    }

    /// Registers `socket_id` as the client's current connection.
    ///
    /// The transform hook runs before the row is written. Re-registering
    /// overwrites the previous socket and user ids.
    pub fn register(
        &self,
        obj_id: &str,
        client_id: &str,
        socket_id: &str,
        user_id: Option<&str>,
    ) -> SyncResult<ClientConnection> {
        let mut candidate = ClientConnection::new(obj_id, client_id, socket_id);
        candidate.user_id = user_id.map(str::to_string);

        let connection = self.transform.transform_connection(candidate)?;
        self.store.put_connection(&connection)?;

        debug!(
            obj_id = %connection.obj_id,
            client_id = %connection.client_id,
            socket_id = %connection.socket_id,
            "client registered"
        );
        Ok(connection)
    }

    /// Looks up a client's connection.
    pub fn lookup(&self, obj_id: &str, client_id: &str) -> SyncResult<Option<ClientConnection>> {
        Ok(self.store.get_connection(obj_id, client_id)?)
    }

    /// Removes a client's connection. Returns `true` if a row was removed.
    pub fn remove(&self, obj_id: &str, client_id: &str) -> SyncResult<bool> {
        Ok(self.store.delete_connection(obj_id, client_id)?)
    }

    /// Removes a client's connection if it is still bound to `socket_id`.
    ///
    /// A client that re-registered on another socket keeps its row.
    pub fn remove_if_socket(
        &self,
        obj_id: &str,
        client_id: &str,
        socket_id: &str,
    ) -> SyncResult<bool> {
        Ok(self
            .store
            .delete_connection_if_socket(obj_id, client_id, socket_id)?)
    }

    /// Pages through the connections of one object.
    ///
    /// The iterator is only exhausted after the last page; stopping early
    /// skips subscribers.
    pub fn list_for_object(&self, obj_id: &str, page_size: usize) -> ConnectionPages<'_> {
        ConnectionPages::new(self.store.as_ref(), Scope::Object(obj_id.to_string()), page_size)
    }

    /// Pages through the connections that use one socket.
    pub fn list_for_socket(&self, socket_id: &str, page_size: usize) -> ConnectionPages<'_> {
        ConnectionPages::new(self.store.as_ref(), Scope::Socket(socket_id.to_string()), page_size)
    }

    /// Returns true if any connection row uses `socket_id`.
    pub fn is_socket_registered(&self, socket_id: &str) -> SyncResult<bool> {
        let page = self
            .store
            .query_connections_by_socket(socket_id, &PageRequest::first(1))?;
        Ok(!page.items.is_empty())
    }
}

#[derive(Debug, Clone)]
enum Scope {
    Object(String),
    Socket(String),
}

/// Iterator over pages of connections.
///
/// Yields one `Vec` per store page. A store error is yielded once and ends
/// the iteration.
pub struct ConnectionPages<'a> {
    store: &'a dyn StateStore,
    scope: Scope,
    page_size: usize,
    next: Option<ConnectionKey>,
    done: bool,
}

impl<'a> ConnectionPages<'a> {
    fn new(store: &'a dyn StateStore, scope: Scope, page_size: usize) -> Self {
        Self {
            store,
            scope,
            page_size: page_size.max(1),
            next: None,
            done: false,
        }
    }
}

impl Iterator for ConnectionPages<'_> {
    type Item = SyncResult<Vec<ClientConnection>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let request = PageRequest {
            limit: self.page_size,
            exclusive_start: self.next.take(),
        };
        let result = match &self.scope {
            Scope::Object(obj_id) => self.store.query_connections(obj_id, &request),
            Scope::Socket(socket_id) => self.store.query_connections_by_socket(socket_id, &request),
        };

        match result {
            Ok(page) => {
                self.done = page.last_key.is_none();
                self.next = page.last_key;
                Some(Ok(page.items))
            }
            Err(err) => {
                self.done = true;
                Some(Err(err.into()))
            }
        }
    }
}
