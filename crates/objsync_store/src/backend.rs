//! State store adapter trait definition.

use crate::error::StoreResult;
use crate::page::{Page, PageRequest};
use objsync_protocol::{ChangeEvent, ClientConnection, SyncObject};
use serde_json::Value;

/// Result of an atomic increment-and-append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Change index after the increment.
    pub change_index: u64,
    /// Log length after the append.
    pub log_len: usize,
}

/// Durable storage for object and connection rows.
///
/// # Invariants
///
/// - `put_object_if_absent` never overwrites an existing row
/// - `append_events` increments `change_index` by exactly 1 and appends all
///   events in one atomic step; concurrent callers receive distinct indices
/// - `compact_object` commits only if the row is still at the expected index
/// - `delete_connection_if_socket` never removes a row that was re-registered
///   on another socket
/// - Queries return items in key order and continue after `exclusive_start`
/// - Implementations must be `Send + Sync`
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For testing and local runs
pub trait StateStore: Send + Sync {
    /// Reads an object row.
    fn get_object(&self, obj_id: &str) -> StoreResult<Option<SyncObject>>;

    /// Writes an object row only if none exists for its id.
    ///
    /// Returns `true` if this call created the row.
    fn put_object_if_absent(&self, object: &SyncObject) -> StoreResult<bool>;

    /// Atomically increments the change index and appends `events` to the log.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::ObjectNotFound`] if the row does not
    /// exist, and a retryable error if the store could not commit.
    fn append_events(&self, obj_id: &str, events: &[ChangeEvent]) -> StoreResult<AppendOutcome>;

    /// Replaces the state and clears the log if the row is still at
    /// `expected_change_index`.
    ///
    /// Returns `true` if the write was committed.
    fn compact_object(
        &self,
        obj_id: &str,
        expected_change_index: u64,
        state: Value,
    ) -> StoreResult<bool>;

    /// Upserts a connection row.
    fn put_connection(&self, connection: &ClientConnection) -> StoreResult<()>;

    /// Reads a connection row.
    fn get_connection(&self, obj_id: &str, client_id: &str)
        -> StoreResult<Option<ClientConnection>>;

    /// Deletes a connection row. Returns `true` if a row was removed.
    fn delete_connection(&self, obj_id: &str, client_id: &str) -> StoreResult<bool>;

    /// Deletes a connection row only if it still uses `socket_id`.
    ///
    /// Returns `true` if a row was removed.
    fn delete_connection_if_socket(
        &self,
        obj_id: &str,
        client_id: &str,
        socket_id: &str,
    ) -> StoreResult<bool>;

    /// Lists connections of one object.
    fn query_connections(
        &self,
        obj_id: &str,
        page: &PageRequest,
    ) -> StoreResult<Page<ClientConnection>>;

    /// Lists connections using one socket, via the socket id index.
    fn query_connections_by_socket(
        &self,
        socket_id: &str,
        page: &PageRequest,
    ) -> StoreResult<Page<ClientConnection>>;
}
