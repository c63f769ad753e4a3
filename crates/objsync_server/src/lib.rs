//! # obj-sync Server
//!
//! Object synchronization engine for socket-connected clients.
//!
//! This crate provides:
//! - Command processing (`createClient`, `get`, `evt`, `ping`, `simCleanUp`)
//! - Lazy, idempotent object bootstrap through a default state provider
//! - Atomic increment-and-append of change events with bounded retry
//! - Paginated broadcast fan-out with per-recipient failure isolation
//! - Disconnect cleanup and eviction of sockets the transport reports gone
//!
//! # Architecture
//!
//! The engine keeps no session state. Every invocation reads and writes a
//! shared [`objsync_store::StateStore`], and every mutation of a shared row
//! is a single atomic store operation. Many processors may serve one store
//! concurrently.
//!
//! ```rust
//! use objsync_server::{CommandProcessor, Hooks, Invocation, ProcessorConfig, RecordingTransport};
//! use objsync_store::InMemoryStore;
//! use std::sync::Arc;
//!
//! let transport = Arc::new(RecordingTransport::new());
//! let processor = CommandProcessor::new(
//!     Arc::new(InMemoryStore::new()),
//!     transport.clone(),
//!     Hooks::default(),
//!     ProcessorConfig::default(),
//! );
//!
//! let batch = r#"[
//!     {"type": "createClient", "objId": "o1", "clientId": "c1"},
//!     {"type": "get", "objId": "o1", "clientId": "c1"}
//! ]"#;
//! processor.handle(&Invocation::message("socket-1", batch)).unwrap();
//! assert_eq!(transport.messages_for("socket-1").len(), 1);
//! ```
//!
//! # Protocol
//!
//! Delivery order is best effort. Each `evt` push carries the change index
//! the append produced:
//! 1. Client applies the `set` snapshot and remembers its change index
//! 2. Client expects every following `evt` at exactly index + 1
//! 3. On a gap, client discards pending events and sends `get` to resync

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod broadcast;
mod config;
mod error;
mod hooks;
mod objects;
mod processor;
mod registry;
mod transport;

pub use broadcast::{BroadcastReport, Broadcaster};
pub use config::{ProcessorConfig, RetryConfig, DEFAULT_PAGE_SIZE};
pub use error::{SyncError, SyncResult};
pub use hooks::{
    AccessPolicy, AllowAll, ConnectionTransform, DefaultStateProvider, HintedDefaultState, Hooks,
    IdentityTransform, LogMerger, NoMerge, ShallowSetMerger,
};
pub use objects::ObjectStateStore;
pub use processor::{CommandProcessor, Invocation, InvocationEvent};
pub use registry::{ConnectionPages, ConnectionRegistry};
pub use transport::{Delivery, PushTransport, RecordingTransport, TransportError};
