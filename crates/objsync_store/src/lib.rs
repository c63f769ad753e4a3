//! # obj-sync Store
//!
//! State store adapter trait and implementations for obj-sync.
//!
//! The store holds two tables:
//! - one row per object (`objId` → state snapshot, change index, log)
//! - one row per client connection (`(objId, clientId)` → socket id), with a
//!   secondary index on socket id
//!
//! ## Design Principles
//!
//! - Every mutation of a shared row is a single atomic store operation
//!   (create-if-absent, increment-and-append, compare-and-set)
//! - No read-modify-write from callers
//! - Queries are paginated with an exclusive start key
//! - Stores must be `Send + Sync`; many invocations share one store
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - For testing, local runs and the CLI simulator
//!
//! Production deployments implement [`StateStore`] over their key/value
//! service of choice.
//!
//! ## Example
//!
//! ```rust
//! use objsync_protocol::{ChangeEvent, SyncObject};
//! use objsync_store::{InMemoryStore, StateStore};
//! use serde_json::json;
//!
//! let store = InMemoryStore::new();
//! assert!(store.put_object_if_absent(&SyncObject::new("o1", json!({}))).unwrap());
//! let outcome = store.append_events("o1", &[ChangeEvent::new(json!({"type": "change"}))]).unwrap();
//! assert_eq!(outcome.change_index, 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod backend;
mod error;
mod memory;
mod page;

pub use backend::{AppendOutcome, StateStore};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use page::{Page, PageRequest};
