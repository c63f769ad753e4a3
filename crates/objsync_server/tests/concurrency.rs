//! Ordering and bootstrap guarantees under concurrent invocations.

use objsync_protocol::{ObjectHints, PushMessage};
use objsync_server::{
    HintedDefaultState, Hooks, ObjectStateStore, ProcessorConfig, RetryConfig,
};
use objsync_store::{InMemoryStore, StateStore};
use objsync_testkit::{
    event_batches_strategy, stress_concurrent_appends, stress_concurrent_bootstrap,
    stress_concurrent_commands, CountingProvider, Harness, StressConfig,
};
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

#[test]
fn concurrent_appends_get_unique_increasing_indices() {
    let store = Arc::new(InMemoryStore::new());
    let objects = Arc::new(ObjectStateStore::new(
        store.clone(),
        Arc::new(HintedDefaultState),
        RetryConfig::default(),
    ));
    objects
        .get_or_create("o1", "c0", &ObjectHints::default())
        .unwrap();

    let config = StressConfig {
        threads: 8,
        operations_per_thread: 50,
    };
    let run = stress_concurrent_appends(objects, "o1", &config);
    run.result.print_summary("concurrent appends");

    assert_eq!(run.result.failed_ops, 0);
    assert_eq!(run.sorted_indices(), (1..=400).collect::<Vec<u64>>());
    // Each writer observes its own indices in increasing order.
    for indices in &run.indices {
        assert!(indices.windows(2).all(|w| w[0] < w[1]));
    }
    assert_eq!(store.get_object("o1").unwrap().unwrap().log.len(), 400);
}

#[test]
fn concurrent_bootstrap_persists_one_row() {
    let store = Arc::new(InMemoryStore::new());
    let provider = Arc::new(CountingProvider::new());
    let objects = Arc::new(ObjectStateStore::new(
        store.clone(),
        provider.clone(),
        RetryConfig::default(),
    ));
    let hints = ObjectHints {
        default_state: Some(json!({"board": []})),
        ..ObjectHints::default()
    };

    let observed = stress_concurrent_bootstrap(objects, "o1", 16, hints);

    assert_eq!(observed.len(), 16);
    assert!(provider.calls() >= 1);
    assert_eq!(store.object_count(), 1);
    for object in &observed {
        assert_eq!(object.change_index, 0);
        assert_eq!(object.state, json!({"board": []}));
        assert_eq!(object, &observed[0]);
    }
}

#[test]
fn concurrent_evts_reach_every_client_once() {
    let harness = Harness::new();
    let config = StressConfig {
        threads: 4,
        operations_per_thread: 20,
    };
    let result = stress_concurrent_commands(harness.processor.clone(), "o1", &config);
    assert_eq!(result.failed_ops, 0);

    let object = harness.store.get_object("o1").unwrap().unwrap();
    assert_eq!(object.change_index, 80);

    for t in 0..config.threads {
        let indices: HashSet<u64> = harness
            .transport
            .messages_for(&format!("stress-s{t}"))
            .into_iter()
            .filter_map(|m| match m {
                PushMessage::Evt(evt) => Some(evt.change_index),
                _ => None,
            })
            .collect();
        assert_eq!(indices, (1..=80).collect::<HashSet<u64>>());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn sequential_evts_are_gap_free(batches in event_batches_strategy(12)) {
        let harness = Harness::with(Hooks::default(), ProcessorConfig::default());
        harness.join("s1", "o1", "c1").unwrap();
        harness.join("s2", "o1", "c2").unwrap();

        for batch in &batches {
            let evts: Vec<_> = batch.iter().map(|e| e.as_value().clone()).collect();
            harness.evt("s1", "o1", "c1", evts).unwrap();
        }

        let received: Vec<u64> = harness
            .transport
            .messages_for("s2")
            .into_iter()
            .filter_map(|m| match m {
                PushMessage::Evt(evt) => Some(evt.change_index),
                _ => None,
            })
            .collect();
        let expected: Vec<u64> = (1..=batches.len() as u64).collect();
        prop_assert_eq!(received, expected);

        let object = harness.store.get_object("o1").unwrap().unwrap();
        let total: usize = batches.iter().map(Vec::len).sum();
        prop_assert_eq!(object.change_index, batches.len() as u64);
        prop_assert_eq!(object.log.len(), total);
    }
}
