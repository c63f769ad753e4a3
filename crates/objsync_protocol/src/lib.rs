//! # obj-sync Protocol
//!
//! Wire types and JSON codecs for obj-sync.
//!
//! This crate provides:
//! - [`SyncObject`], [`ClientConnection`] and [`ChangeEvent`], the persisted rows
//! - [`Command`], the inbound client commands, and batch decoding
//! - [`PushMessage`], the messages pushed to a connection
//!
//! This is a pure protocol crate with no I/O operations. Change events are
//! opaque JSON values: nothing here interprets them.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod command;
mod error;
mod model;
mod push;

pub use command::{
    decode_batch, decode_batch_value, Command, EvtRequest, ObjectHints, ObjectRequest, PingRequest,
    Target,
};
pub use error::{CodecError, CodecResult};
pub use model::{ChangeEvent, ClientConnection, ConnectionKey, SyncObject};
pub use push::{EvtMessage, PushMessage, SetMessage, SignalMessage};
