//! Push transport abstraction.

use crate::error::{SyncError, SyncResult};
use objsync_protocol::{CodecResult, PushMessage};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use thiserror::Error;

/// Errors reported by a push transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection no longer exists.
    #[error("connection {0} is gone")]
    Gone(String),

    /// The push failed but the connection may still exist.
    #[error("transient transport failure: {0}")]
    Transient(String),
}

impl TransportError {
    /// Returns true if the connection no longer exists.
    pub fn is_gone(&self) -> bool {
        matches!(self, TransportError::Gone(_))
    }
}

/// Delivers opaque bytes to a live connection.
///
/// This trait abstracts the socket gateway, allowing different
/// implementations (a managed WebSocket gateway, an in-process hub, a
/// recording fake for tests).
pub trait PushTransport: Send + Sync {
    /// Sends `data` to `connection_id`.
    fn send(&self, connection_id: &str, data: &[u8]) -> Result<(), TransportError>;
}

/// Encodes `message` and pushes it to `socket_id`.
pub(crate) fn push_message(
    transport: &dyn PushTransport,
    socket_id: &str,
    message: &PushMessage,
) -> SyncResult<()> {
    let data = message.encode()?;
    transport
        .send(socket_id, &data)
        .map_err(|source| SyncError::Delivery {
            socket_id: socket_id.to_string(),
            source,
        })
}

/// A push that reached a [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Target socket.
    pub socket_id: String,
    /// Raw bytes.
    pub data: Vec<u8>,
}

impl Delivery {
    /// Decodes the pushed message.
    pub fn message(&self) -> CodecResult<PushMessage> {
        PushMessage::decode(&self.data)
    }
}

/// An in-memory transport that records every successful push.
///
/// Sockets can be marked gone or unreachable to exercise failure paths.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    delivered: Mutex<Vec<Delivery>>,
    gone: RwLock<HashSet<String>>,
    unreachable: RwLock<HashSet<String>>,
    attempts: Mutex<usize>,
}

impl RecordingTransport {
    /// Creates a new recording transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every push to `socket_id` fail with [`TransportError::Gone`].
    pub fn mark_gone(&self, socket_id: impl Into<String>) {
        self.gone.write().insert(socket_id.into());
    }

    /// Makes every push to `socket_id` fail with [`TransportError::Transient`].
    pub fn mark_unreachable(&self, socket_id: impl Into<String>) {
        self.unreachable.write().insert(socket_id.into());
    }

    /// Returns all recorded deliveries in push order.
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.delivered.lock().clone()
    }

    /// Removes and returns all recorded deliveries.
    pub fn take(&self) -> Vec<Delivery> {
        std::mem::take(&mut *self.delivered.lock())
    }

    /// Returns the decoded messages delivered to `socket_id`.
    ///
    /// Deliveries that fail to decode are skipped.
    pub fn messages_for(&self, socket_id: &str) -> Vec<PushMessage> {
        self.delivered
            .lock()
            .iter()
            .filter(|d| d.socket_id == socket_id)
            .filter_map(|d| d.message().ok())
            .collect()
    }

    /// Returns the number of send attempts, including failed ones.
    pub fn attempts(&self) -> usize {
        *self.attempts.lock()
    }
}

impl PushTransport for RecordingTransport {
    fn send(&self, connection_id: &str, data: &[u8]) -> Result<(), TransportError> {
        *self.attempts.lock() += 1;
        if self.gone.read().contains(connection_id) {
            return Err(TransportError::Gone(connection_id.to_string()));
        }
        if self.unreachable.read().contains(connection_id) {
            return Err(TransportError::Transient(format!(
                "{connection_id} did not acknowledge"
            )));
        }
        self.delivered.lock().push(Delivery {
            socket_id: connection_id.to_string(),
            data: data.to_vec(),
        });
        Ok(())
    }
}
