//! # obj-sync Testkit
//!
//! Test utilities for obj-sync.
//!
//! This crate provides:
//! - Fakes for the store and hooks (contended store, counting provider,
//!   fixed access policy, user-attaching transform)
//! - A [`Harness`] wiring a processor to an in-memory store and a recording
//!   transport
//! - Property-based generators for change events and command batches
//! - Thread based stress runners for concurrent appends and bootstrap
//!
//! ## Usage
//!
//! ```rust
//! use objsync_testkit::prelude::*;
//!
//! let harness = Harness::new();
//! harness.join("s1", "o1", "c1").unwrap();
//! assert_eq!(harness.transport.messages_for("s1").len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
