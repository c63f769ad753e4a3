//! Error types for the sync engine.

use crate::transport::TransportError;
use objsync_protocol::CodecError;
use objsync_store::StoreError;
use thiserror::Error;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while processing commands.
///
/// Only [`SyncError::BadRequest`] aborts an invocation. Every other kind is
/// logged and the remaining commands of the batch still run.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Malformed command or invocation.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Connection or object missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller's socket is not the one registered for the client.
    #[error("stale connection for client {client_id} on {obj_id}: registered {registered}, caller {caller}")]
    StaleConnection {
        /// Object id.
        obj_id: String,
        /// Client id.
        client_id: String,
        /// Socket id stored in the registry.
        registered: String,
        /// Socket id of the invocation.
        caller: String,
    },

    /// An access hook denied the operation.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// An append could not be committed.
    #[error("append to {obj_id} failed after {attempts} attempt(s): {source}")]
    Concurrency {
        /// Object id.
        obj_id: String,
        /// Attempts made.
        attempts: u32,
        /// Last store error.
        #[source]
        source: StoreError,
    },

    /// A push to one socket failed.
    #[error("delivery to {socket_id} failed: {source}")]
    Delivery {
        /// Target socket.
        socket_id: String,
        /// Transport error.
        #[source]
        source: TransportError,
    },

    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Encoding an outbound message failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A hook failed or returned an unusable value.
    #[error("hook error: {0}")]
    Hook(String),

    /// Internal invariant violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Returns true if this error aborts the whole invocation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::BadRequest(_))
    }

    /// Returns true if this error was caused by the caller's input or
    /// identity rather than by the engine or its collaborators.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SyncError::BadRequest(_)
                | SyncError::NotFound(_)
                | SyncError::StaleConnection { .. }
                | SyncError::AccessDenied(_)
        )
    }

    /// Returns true if the transport reported the target socket gone.
    pub fn is_gone_socket(&self) -> bool {
        matches!(self, SyncError::Delivery { source, .. } if source.is_gone())
    }
}
