//! Object state store: authoritative `(state, changeIndex, log)` per object.

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use crate::hooks::DefaultStateProvider;
use objsync_protocol::{ChangeEvent, ObjectHints, SyncObject};
use objsync_store::{AppendOutcome, StateStore, StoreError};
use serde_json::Value;
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

/// Lazy creation and atomic mutation of object rows.
///
/// All writes go through the store's conditional primitives. Nothing here
/// reads a row and writes it back.
pub struct ObjectStateStore {
    store: Arc<dyn StateStore>,
    provider: Arc<dyn DefaultStateProvider>,
    retry: RetryConfig,
}

impl ObjectStateStore {
    /// Creates an object store.
    pub fn new(
        store: Arc<dyn StateStore>,
        provider: Arc<dyn DefaultStateProvider>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            provider,
            retry,
        }
    }

    /// Reads an object without creating it.
    pub fn get(&self, obj_id: &str) -> SyncResult<Option<SyncObject>> {
        Ok(self.store.get_object(obj_id)?)
    }

    /// Returns the object, creating it from the default state provider if
    /// it does not exist.
    ///
    /// Creation is create-if-absent followed by a re-read, so every racing
    /// caller returns the single committed row.
    pub fn get_or_create(
        &self,
        obj_id: &str,
        client_id: &str,
        hints: &ObjectHints,
    ) -> SyncResult<SyncObject> {
        if let Some(object) = self.store.get_object(obj_id)? {
            return Ok(object);
        }

        let mut initial = self
            .provider
            .provide_default_state(obj_id, client_id, hints)?;
        initial.obj_id = obj_id.to_string();
        initial.change_index = 0;
        initial.log.clear();

        if self.store.put_object_if_absent(&initial)? {
            debug!(obj_id, client_id, "object created from default state");
        } else {
            debug!(obj_id, client_id, "object created concurrently, re-reading");
        }

        self.store.get_object(obj_id)?.ok_or_else(|| {
            SyncError::Internal(format!("object {obj_id} missing after create"))
        })
    }

    /// Atomically increments the change index and appends `events`.
    ///
    /// Returns the post-increment change index and log length. Retryable
    /// store failures are retried with backoff up to the configured attempt
    /// budget, then surface as [`SyncError::Concurrency`].
    pub fn append(&self, obj_id: &str, events: &[ChangeEvent]) -> SyncResult<AppendOutcome> {
        let mut attempt = 0;
        loop {
            let delay = self.retry.delay_for_attempt(attempt);
            if !delay.is_zero() {
                thread::sleep(delay);
            }
            attempt += 1;

            match self.store.append_events(obj_id, events) {
                Ok(outcome) => return Ok(outcome),
                Err(StoreError::ObjectNotFound(_)) => {
                    return Err(SyncError::NotFound(format!("object {obj_id}")));
                }
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    warn!(obj_id, attempt, error = %err, "append failed, retrying");
                }
                Err(err) if err.is_retryable() => {
                    return Err(SyncError::Concurrency {
                        obj_id: obj_id.to_string(),
                        attempts: attempt,
                        source: err,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Replaces the state and clears the log if the object is still at
    /// `expected_change_index`. Returns `true` if committed.
    pub fn compact(
        &self,
        obj_id: &str,
        expected_change_index: u64,
        state: Value,
    ) -> SyncResult<bool> {
        Ok(self
            .store
            .compact_object(obj_id, expected_change_index, state)?)
    }
}
