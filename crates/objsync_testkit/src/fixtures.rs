//! Test fixtures: fake collaborators and a wired-up processor.
//!
//! The fakes are small on purpose. Each one changes exactly one behavior of
//! the real component it stands in for.

use objsync_protocol::{ChangeEvent, ClientConnection, ObjectHints, SyncObject};
use objsync_server::{
    AccessPolicy, CommandProcessor, ConnectionTransform, DefaultStateProvider, HintedDefaultState,
    Hooks, Invocation, ProcessorConfig, RecordingTransport, RetryConfig, SyncResult,
};
use objsync_store::{
    AppendOutcome, InMemoryStore, Page, PageRequest, StateStore, StoreError, StoreResult,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// An [`InMemoryStore`] that injects append and delete failures.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: InMemoryStore,
    append_failures: Mutex<u32>,
    append_calls: AtomicUsize,
    delete_failures: Mutex<u32>,
    reconnect_on_delete: Mutex<Option<String>>,
}

impl FlakyStore {
    /// Creates a store that never fails.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store whose next `failures` appends report contention.
    pub fn failing_appends(failures: u32) -> Self {
        let store = Self::default();
        *store.append_failures.lock() = failures;
        store
    }

    /// Creates a store whose next `failures` conditional deletes are unavailable.
    pub fn failing_deletes(failures: u32) -> Self {
        let store = Self::default();
        *store.delete_failures.lock() = failures;
        store
    }

    /// Creates a store that moves the row to `socket_id` right before the
    /// first conditional delete, as a client reconnecting mid-cleanup would.
    pub fn reconnecting_on_delete(socket_id: impl Into<String>) -> Self {
        let store = Self::default();
        *store.reconnect_on_delete.lock() = Some(socket_id.into());
        store
    }

    /// Returns the wrapped store.
    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    /// Returns the number of append attempts, including failed ones.
    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }
}

impl StateStore for FlakyStore {
    fn get_object(&self, obj_id: &str) -> StoreResult<Option<SyncObject>> {
        self.inner.get_object(obj_id)
    }

    fn put_object_if_absent(&self, object: &SyncObject) -> StoreResult<bool> {
        self.inner.put_object_if_absent(object)
    }

    fn append_events(&self, obj_id: &str, events: &[ChangeEvent]) -> StoreResult<AppendOutcome> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut failures = self.append_failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(StoreError::Contention(format!(
                    "conditional update on {obj_id} rejected"
                )));
            }
        }
        self.inner.append_events(obj_id, events)
    }

    fn compact_object(
        &self,
        obj_id: &str,
        expected_change_index: u64,
        state: Value,
    ) -> StoreResult<bool> {
        self.inner
            .compact_object(obj_id, expected_change_index, state)
    }

    fn put_connection(&self, connection: &ClientConnection) -> StoreResult<()> {
        self.inner.put_connection(connection)
    }

    fn get_connection(&self, obj_id: &str, client_id: &str) -> StoreResult<Option<ClientConnection>> {
        self.inner.get_connection(obj_id, client_id)
    }

    fn delete_connection(&self, obj_id: &str, client_id: &str) -> StoreResult<bool> {
        self.inner.delete_connection(obj_id, client_id)
    }

    fn delete_connection_if_socket(
        &self,
        obj_id: &str,
        client_id: &str,
        socket_id: &str,
    ) -> StoreResult<bool> {
        {
            let mut failures = self.delete_failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(StoreError::Unavailable(format!(
                    "delete of {obj_id}/{client_id} timed out"
                )));
            }
        }
        if let Some(new_socket) = self.reconnect_on_delete.lock().take() {
            self.inner
                .put_connection(&ClientConnection::new(obj_id, client_id, new_socket))?;
        }
        self.inner
            .delete_connection_if_socket(obj_id, client_id, socket_id)
    }

    fn query_connections(
        &self,
        obj_id: &str,
        page: &PageRequest,
    ) -> StoreResult<Page<ClientConnection>> {
        self.inner.query_connections(obj_id, page)
    }

    fn query_connections_by_socket(
        &self,
        socket_id: &str,
        page: &PageRequest,
    ) -> StoreResult<Page<ClientConnection>> {
        self.inner.query_connections_by_socket(socket_id, page)
    }
}

/// A default state provider that counts its invocations.
#[derive(Debug, Default)]
pub struct CountingProvider {
    calls: AtomicUsize,
}

impl CountingProvider {
    /// Creates a provider with a zero count.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of times a default state was requested.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DefaultStateProvider for CountingProvider {
    fn provide_default_state(
        &self,
        obj_id: &str,
        client_id: &str,
        hints: &ObjectHints,
    ) -> SyncResult<SyncObject> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        HintedDefaultState.provide_default_state(obj_id, client_id, hints)
    }
}

/// An access policy with fixed answers.
#[derive(Debug, Clone, Copy)]
pub struct FixedPolicy {
    /// Answer to every read check.
    pub read: bool,
    /// Answer to every write check.
    pub write: bool,
}

impl FixedPolicy {
    /// Denies reads and writes.
    pub fn deny_all() -> Self {
        Self {
            read: false,
            write: false,
        }
    }

    /// Allows reads, denies writes.
    pub fn read_only() -> Self {
        Self {
            read: true,
            write: false,
        }
    }
}

impl AccessPolicy for FixedPolicy {
    fn check_read_access(&self, _connection: &ClientConnection, _object: &SyncObject) -> bool {
        self.read
    }

    fn check_write_access(&self, _connection: &ClientConnection) -> bool {
        self.write
    }
}

/// Attaches `user-<clientId>` to connections that carry no user id.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttachUser;

impl ConnectionTransform for AttachUser {
    fn transform_connection(&self, candidate: ClientConnection) -> SyncResult<ClientConnection> {
        if candidate.user_id.is_some() {
            return Ok(candidate);
        }
        let user = format!("user-{}", candidate.client_id);
        Ok(candidate.with_user_id(user))
    }
}

/// A processor over an in-memory store and a recording transport.
pub struct Harness {
    /// Backing store.
    pub store: Arc<InMemoryStore>,
    /// Recording transport.
    pub transport: Arc<RecordingTransport>,
    /// Processor under test.
    pub processor: Arc<CommandProcessor>,
}

impl Harness {
    /// Creates a harness with default hooks and configuration.
    pub fn new() -> Self {
        Self::with(Hooks::default(), ProcessorConfig::default())
    }

    /// Creates a harness with the given hooks and configuration.
    pub fn with(hooks: Hooks, config: ProcessorConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let transport = Arc::new(RecordingTransport::new());
        let processor = Arc::new(CommandProcessor::new(
            store.clone(),
            transport.clone(),
            hooks,
            config,
        ));
        Self {
            store,
            transport,
            processor,
        }
    }

    /// Sends a raw message on `socket_id`.
    pub fn send(&self, socket_id: &str, payload: &str) -> SyncResult<()> {
        self.processor
            .handle(&Invocation::message(socket_id, payload))
    }

    /// Sends a JSON command or batch on `socket_id`.
    pub fn send_json(&self, socket_id: &str, message: Value) -> SyncResult<()> {
        self.send(socket_id, &message.to_string())
    }

    /// Registers `client_id` on `obj_id` from `socket_id` and requests state.
    pub fn join(&self, socket_id: &str, obj_id: &str, client_id: &str) -> SyncResult<()> {
        self.send_json(
            socket_id,
            json!([
                {"type": "createClient", "objId": obj_id, "clientId": client_id},
                {"type": "get", "objId": obj_id, "clientId": client_id},
            ]),
        )
    }

    /// Sends one `evt` command.
    pub fn evt(
        &self,
        socket_id: &str,
        obj_id: &str,
        client_id: &str,
        evts: Vec<Value>,
    ) -> SyncResult<()> {
        self.send_json(
            socket_id,
            json!({"type": "evt", "objId": obj_id, "clientId": client_id, "evts": evts}),
        )
    }

    /// Signals that `socket_id` closed.
    pub fn disconnect(&self, socket_id: &str) -> SyncResult<()> {
        self.processor.handle(&Invocation::disconnect(socket_id))
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Retry settings with the given budget and no sleeping between attempts.
pub fn instant_retry(max_attempts: u32) -> RetryConfig {
    RetryConfig::new(max_attempts)
        .with_initial_delay(Duration::ZERO)
        .with_max_delay(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flaky_store_recovers_after_failures() {
        let store = FlakyStore::failing_appends(1);
        store
            .put_object_if_absent(&SyncObject::new("o1", json!({})))
            .unwrap();

        assert!(store.append_events("o1", &[json!(1).into()]).is_err());
        assert_eq!(store.append_events("o1", &[json!(1).into()]).unwrap().change_index, 1);
        assert_eq!(store.append_calls(), 2);
    }

    #[test]
    fn attach_user_keeps_existing_user() {
        let conn = ClientConnection::new("o1", "c1", "s1").with_user_id("alice");
        assert_eq!(
            AttachUser.transform_connection(conn).unwrap().user_id.as_deref(),
            Some("alice")
        );
    }
}
