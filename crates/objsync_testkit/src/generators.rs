//! Property-based test generators using proptest.
//!
//! Provides strategies for generating client ids, change events and
//! sequences of `evt` batches.

use objsync_protocol::ChangeEvent;
use proptest::prelude::*;
use serde_json::json;

/// Strategy for generating client ids.
pub fn client_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("c[a-z0-9]{1,12}").expect("Invalid regex")
}

/// Strategy for generating top-level `set` change events.
pub fn change_event_strategy() -> impl Strategy<Value = ChangeEvent> {
    (
        prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex"),
        any::<i64>(),
    )
        .prop_map(|(prop, value)| {
            ChangeEvent::new(json!({"type": "set", "prop": prop, "value": value}))
        })
}

/// Strategy for generating one non-empty `evt` payload.
pub fn event_batch_strategy() -> impl Strategy<Value = Vec<ChangeEvent>> {
    prop::collection::vec(change_event_strategy(), 1..5)
}

/// Strategy for generating a sequence of up to `max_batches` non-empty
/// `evt` payloads.
pub fn event_batches_strategy(max_batches: usize) -> impl Strategy<Value = Vec<Vec<ChangeEvent>>> {
    prop::collection::vec(event_batch_strategy(), 1..=max_batches.max(1))
}
