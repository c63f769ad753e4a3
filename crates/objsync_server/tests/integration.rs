//! Integration tests for the command processor.

use objsync_protocol::{ChangeEvent, EvtMessage, PushMessage, SetMessage};
use objsync_server::{
    CommandProcessor, Hooks, Invocation, ProcessorConfig, RecordingTransport, ShallowSetMerger,
};
use objsync_store::{InMemoryStore, StateStore};
use objsync_testkit::{
    instant_retry, AttachUser, CountingProvider, FixedPolicy, FlakyStore, Harness,
};
use serde_json::json;
use std::sync::Arc;

fn sets(transport: &RecordingTransport, socket: &str) -> Vec<SetMessage> {
    transport
        .messages_for(socket)
        .into_iter()
        .filter_map(|m| match m {
            PushMessage::Set(set) => Some(set),
            _ => None,
        })
        .collect()
}

fn evts(transport: &RecordingTransport, socket: &str) -> Vec<EvtMessage> {
    transport
        .messages_for(socket)
        .into_iter()
        .filter_map(|m| match m {
            PushMessage::Evt(evt) => Some(evt),
            _ => None,
        })
        .collect()
}

/// A join whose object keeps a `players` map cleaned up on disconnect.
fn join_players(obj: &str, client: &str) -> serde_json::Value {
    json!([
        {"type": "createClient", "objId": obj, "clientId": client},
        {
            "type": "get",
            "objId": obj,
            "clientId": client,
            "defaultState": {"players": {}},
            "clientMapProp": "players",
            "autoDeleteClientObjects": true,
        },
    ])
}

#[test]
fn create_and_get_sends_default_state() {
    let provider = Arc::new(CountingProvider::new());
    let hooks = Hooks {
        default_state: provider.clone(),
        ..Hooks::default()
    };
    let harness = Harness::with(hooks, ProcessorConfig::default());

    harness
        .send_json(
            "s1",
            json!({"type": "createClient", "objId": "o1", "clientId": "c1"}),
        )
        .unwrap();
    harness
        .send_json(
            "s1",
            json!({"type": "get", "objId": "o1", "clientId": "c1", "defaultState": {"title": "x"}}),
        )
        .unwrap();

    assert_eq!(provider.calls(), 1);
    let sets = sets(&harness.transport, "s1");
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].client_id, "c1");
    assert_eq!(sets[0].obj_id, "o1");
    assert_eq!(sets[0].change_index, 0);
    assert_eq!(sets[0].state.state, json!({"title": "x"}));
    assert!(sets[0].state.log.is_empty());

    // A second get reads the persisted row.
    harness
        .send_json("s1", json!({"type": "get", "objId": "o1", "clientId": "c1"}))
        .unwrap();
    assert_eq!(provider.calls(), 1);
}

#[test]
fn sequential_evts_get_consecutive_indices() {
    let harness = Harness::new();
    harness.join("s1", "o1", "c1").unwrap();

    harness.evt("s1", "o1", "c1", vec![json!("e1")]).unwrap();
    harness.evt("s1", "o1", "c1", vec![json!("e2")]).unwrap();

    let received = evts(&harness.transport, "s1");
    let indices: Vec<u64> = received.iter().map(|m| m.change_index).collect();
    assert_eq!(indices, vec![1, 2]);
    assert_eq!(received[1].evts, vec![ChangeEvent::new(json!("e2"))]);

    let object = harness.store.get_object("o1").unwrap().unwrap();
    assert_eq!(object.change_index, 2);
    assert_eq!(object.log.len(), 2);
}

#[test]
fn every_subscriber_gets_its_own_client_id() {
    let harness = Harness::new();
    harness.join("s1", "o1", "c1").unwrap();
    harness.join("s2", "o1", "c2").unwrap();

    harness.evt("s1", "o1", "c1", vec![json!({"k": 1})]).unwrap();

    let first = evts(&harness.transport, "s1");
    let second = evts(&harness.transport, "s2");
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(first[0].client_id, "c1");
    assert_eq!(second[0].client_id, "c2");
    assert_eq!(first[0].change_index, second[0].change_index);
    assert_eq!(first[0].evts, second[0].evts);
}

#[test]
fn get_for_unregistered_client_sends_nothing() {
    let harness = Harness::new();
    harness
        .send_json("s1", json!({"type": "get", "objId": "o1", "clientId": "nobody"}))
        .unwrap();

    assert!(harness.transport.deliveries().is_empty());
    assert!(harness.store.get_object("o1").unwrap().is_none());
}

#[test]
fn batch_runs_in_order() {
    let harness = Harness::new();
    harness
        .send_json(
            "s1",
            json!([
                {"type": "createClient", "objId": "o1", "clientId": "c1"},
                {"type": "get", "objId": "o1", "clientId": "c1"},
                {"type": "evt", "objId": "o1", "clientId": "c1", "evts": ["a"]},
            ]),
        )
        .unwrap();

    let messages = harness.transport.messages_for("s1");
    assert_eq!(messages.len(), 2);
    assert!(matches!(&messages[0], PushMessage::Set(set) if set.change_index == 0));
    assert!(matches!(&messages[1], PushMessage::Evt(evt) if evt.change_index == 1));
}

#[test]
fn recovered_failure_does_not_stop_batch() {
    let harness = Harness::new();
    harness
        .send_json(
            "s1",
            json!([
                {"type": "get", "objId": "o1", "clientId": "c1"},
                {"type": "createClient", "objId": "o1", "clientId": "c1"},
                {"type": "get", "objId": "o1", "clientId": "c1"},
            ]),
        )
        .unwrap();

    assert_eq!(sets(&harness.transport, "s1").len(), 1);
}

#[test]
fn malformed_batch_is_rejected() {
    let harness = Harness::new();
    let err = harness
        .send_json("s1", json!([{"type": "createClient", "objId": "o1"}]))
        .unwrap_err();
    assert!(err.is_fatal());

    let err = harness
        .send_json("s1", json!({"type": "teleport", "objId": "o1", "clientId": "c1"}))
        .unwrap_err();
    assert!(err.is_fatal());

    let err = harness
        .send_json("s1", json!({"type": "evt", "objId": "o1", "clientId": "c1"}))
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(harness.store.connection_count(), 0);
}

#[test]
fn broadcast_spans_many_pages() {
    let harness = Harness::with(Hooks::default(), ProcessorConfig::new().with_page_size(10));
    for i in 0..25 {
        harness
            .join(&format!("s{i:02}"), "o1", &format!("c{i:02}"))
            .unwrap();
    }
    harness.transport.take();

    harness.evt("s00", "o1", "c00", vec![json!("e")]).unwrap();

    for i in 0..25 {
        let received = evts(&harness.transport, &format!("s{i:02}"));
        assert_eq!(received.len(), 1, "socket s{i:02}");
        assert_eq!(received[0].client_id, format!("c{i:02}"));
    }
}

#[test]
fn broadcast_isolates_transient_failures() {
    let harness = Harness::new();
    for (socket, client) in [("s1", "c1"), ("s2", "c2"), ("s3", "c3")] {
        harness.join(socket, "o1", client).unwrap();
    }
    harness.transport.mark_unreachable("s2");

    harness.evt("s1", "o1", "c1", vec![json!("e")]).unwrap();

    assert_eq!(evts(&harness.transport, "s1").len(), 1);
    assert!(evts(&harness.transport, "s2").is_empty());
    assert_eq!(evts(&harness.transport, "s3").len(), 1);
    // Transient failures keep the connection.
    assert_eq!(harness.store.connection_count(), 3);
}

#[test]
fn gone_sockets_are_evicted_after_broadcast() {
    let harness = Harness::new();
    for (socket, client) in [("s1", "c1"), ("s2", "c2"), ("s3", "c3")] {
        harness.join(socket, "o1", client).unwrap();
    }
    harness.transport.mark_gone("s2");

    harness.evt("s1", "o1", "c1", vec![json!("e")]).unwrap();

    assert_eq!(evts(&harness.transport, "s3").len(), 1);
    assert!(harness.processor.registry().lookup("o1", "c2").unwrap().is_none());
    assert_eq!(harness.store.connection_count(), 2);
}

#[test]
fn gone_sockets_are_kept_when_eviction_disabled() {
    let harness = Harness::with(
        Hooks::default(),
        ProcessorConfig::new().with_evict_gone_sockets(false),
    );
    harness.join("s1", "o1", "c1").unwrap();
    harness.join("s2", "o1", "c2").unwrap();
    harness.transport.mark_gone("s2");

    harness.evt("s1", "o1", "c1", vec![json!("e")]).unwrap();

    assert_eq!(harness.store.connection_count(), 2);
}

#[test]
fn stale_socket_is_ignored() {
    let harness = Harness::new();
    harness.join("old", "o1", "c1").unwrap();
    // Reconnect on a new socket.
    harness.join("new", "o1", "c1").unwrap();
    harness.transport.take();

    harness
        .send_json("old", json!({"type": "get", "objId": "o1", "clientId": "c1"}))
        .unwrap();
    harness.evt("old", "o1", "c1", vec![json!("e")]).unwrap();

    assert!(harness.transport.deliveries().is_empty());
    assert_eq!(harness.store.get_object("o1").unwrap().unwrap().change_index, 0);

    harness
        .send_json("new", json!({"type": "get", "objId": "o1", "clientId": "c1"}))
        .unwrap();
    assert_eq!(sets(&harness.transport, "new").len(), 1);
}

#[test]
fn denied_read_sends_nothing() {
    let harness = Harness::with(
        Hooks::default().with_access(FixedPolicy::deny_all()),
        ProcessorConfig::default(),
    );
    harness.join("s1", "o1", "c1").unwrap();

    assert!(harness.transport.deliveries().is_empty());
    // The object is still materialized before the check.
    assert!(harness.store.get_object("o1").unwrap().is_some());
}

#[test]
fn denied_write_appends_nothing() {
    let harness = Harness::with(
        Hooks::default().with_access(FixedPolicy::read_only()),
        ProcessorConfig::default(),
    );
    harness.join("s1", "o1", "c1").unwrap();
    harness.transport.take();

    harness.evt("s1", "o1", "c1", vec![json!("e")]).unwrap();

    assert!(harness.transport.deliveries().is_empty());
    assert_eq!(harness.store.get_object("o1").unwrap().unwrap().change_index, 0);
}

#[test]
fn append_contention_is_retried() {
    let store = Arc::new(FlakyStore::failing_appends(2));
    let transport = Arc::new(RecordingTransport::new());
    let processor = CommandProcessor::new(
        store.clone(),
        transport.clone(),
        Hooks::default(),
        ProcessorConfig::new().with_retry(instant_retry(3)),
    );
    let join = json!([
        {"type": "createClient", "objId": "o1", "clientId": "c1"},
        {"type": "get", "objId": "o1", "clientId": "c1"},
        {"type": "evt", "objId": "o1", "clientId": "c1", "evts": ["e"]},
    ]);
    processor
        .handle(&Invocation::message("s1", join.to_string()))
        .unwrap();

    assert_eq!(store.append_calls(), 3);
    assert_eq!(evts(&transport, "s1").len(), 1);
    assert_eq!(store.inner().get_object("o1").unwrap().unwrap().change_index, 1);
}

#[test]
fn exhausted_retries_skip_broadcast() {
    let store = Arc::new(FlakyStore::failing_appends(10));
    let transport = Arc::new(RecordingTransport::new());
    let processor = CommandProcessor::new(
        store.clone(),
        transport.clone(),
        Hooks::default(),
        ProcessorConfig::new().with_retry(instant_retry(2)),
    );
    let join = json!([
        {"type": "createClient", "objId": "o1", "clientId": "c1"},
        {"type": "get", "objId": "o1", "clientId": "c1"},
        {"type": "evt", "objId": "o1", "clientId": "c1", "evts": ["e"]},
    ]);
    processor
        .handle(&Invocation::message("s1", join.to_string()))
        .unwrap();

    assert_eq!(store.append_calls(), 2);
    assert!(evts(&transport, "s1").is_empty());
    assert_eq!(store.inner().get_object("o1").unwrap().unwrap().change_index, 0);
}

#[test]
fn disconnect_deletes_client_entry() {
    let harness = Harness::new();
    harness.send_json("s1", join_players("o1", "c1")).unwrap();
    harness.send_json("s2", join_players("o1", "c2")).unwrap();
    harness.transport.take();

    harness.disconnect("s1").unwrap();

    assert!(harness.processor.registry().lookup("o1", "c1").unwrap().is_none());
    let received = evts(&harness.transport, "s2");
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].change_index, 1);
    assert_eq!(received[0].evts, vec![ChangeEvent::delete_prop("c1", "players")]);
    assert!(evts(&harness.transport, "s1").is_empty());
}

#[test]
fn disconnect_without_client_map_only_removes_rows() {
    let harness = Harness::new();
    harness.join("s1", "o1", "c1").unwrap();
    harness.join("s2", "o1", "c2").unwrap();
    harness.transport.take();

    harness.disconnect("s1").unwrap();

    assert_eq!(harness.store.connection_count(), 1);
    assert!(harness.transport.deliveries().is_empty());
    assert_eq!(harness.store.get_object("o1").unwrap().unwrap().change_index, 0);
}

fn flaky_processor(store: &Arc<FlakyStore>) -> (Arc<RecordingTransport>, CommandProcessor) {
    let transport = Arc::new(RecordingTransport::new());
    let processor = CommandProcessor::new(
        store.clone(),
        transport.clone(),
        Hooks::default(),
        ProcessorConfig::default(),
    );
    (transport, processor)
}

#[test]
fn disconnect_spares_client_that_reconnected_elsewhere() {
    let store = Arc::new(FlakyStore::reconnecting_on_delete("new"));
    let (transport, processor) = flaky_processor(&store);
    processor
        .handle(&Invocation::message("old", join_players("o1", "c1").to_string()))
        .unwrap();
    transport.take();

    processor.handle(&Invocation::disconnect("old")).unwrap();

    let row = store.inner().get_connection("o1", "c1").unwrap().unwrap();
    assert_eq!(row.socket_id, "new");
    // No auto-delete event for a client that is still connected.
    assert_eq!(store.inner().get_object("o1").unwrap().unwrap().change_index, 0);
    assert!(transport.deliveries().is_empty());
}

#[test]
fn failed_delete_does_not_stop_cleanup() {
    let store = Arc::new(FlakyStore::failing_deletes(1));
    let (transport, processor) = flaky_processor(&store);
    for obj in ["o1", "o2", "o3"] {
        processor
            .handle(&Invocation::message("old", join_players(obj, "c1").to_string()))
            .unwrap();
    }
    transport.take();

    processor.handle(&Invocation::disconnect("old")).unwrap();

    let remaining: Vec<_> = store
        .inner()
        .connections()
        .into_iter()
        .filter(|c| c.socket_id == "old")
        .collect();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].obj_id, "o1");
    let objects_cleaned = ["o2", "o3"]
        .iter()
        .filter(|obj| store.inner().get_object(obj).unwrap().unwrap().change_index == 1)
        .count();
    assert_eq!(objects_cleaned, 2);
}

#[test]
fn sim_clean_up_acts_like_disconnect() {
    let harness = Harness::new();
    harness.send_json("s1", join_players("o1", "c1")).unwrap();
    harness.send_json("s2", join_players("o1", "c2")).unwrap();
    harness.transport.take();

    harness
        .send_json("s1", json!({"type": "simCleanUp", "objId": "o1", "clientId": "c1"}))
        .unwrap();

    assert_eq!(harness.store.connection_count(), 1);
    assert_eq!(evts(&harness.transport, "s2").len(), 1);
}

#[test]
fn ping_reconnect_only_for_unknown_socket() {
    let harness = Harness::new();
    harness.join("s1", "o1", "c1").unwrap();
    harness.transport.take();

    harness
        .send_json("s1", json!({"type": "ping", "objId": "o1", "clientId": "c1", "pc": true}))
        .unwrap();
    harness
        .send_json("s9", json!({"type": "ping", "objId": "o1", "clientId": "c1", "pc": true}))
        .unwrap();

    assert_eq!(harness.transport.messages_for("s1"), vec![PushMessage::pong("c1", "o1")]);
    assert_eq!(
        harness.transport.messages_for("s9"),
        vec![PushMessage::reconnect("c1", "o1")]
    );
}

#[test]
fn log_is_merged_at_threshold() {
    let harness = Harness::with(
        Hooks::default().with_merger(ShallowSetMerger),
        ProcessorConfig::new().with_auto_merge(2),
    );
    harness.join("s1", "o1", "c1").unwrap();

    harness
        .evt("s1", "o1", "c1", vec![json!({"type": "set", "prop": "a", "value": 1})])
        .unwrap();
    let object = harness.store.get_object("o1").unwrap().unwrap();
    assert_eq!(object.log.len(), 1);

    harness
        .evt("s1", "o1", "c1", vec![json!({"type": "set", "prop": "b", "value": 2})])
        .unwrap();
    let object = harness.store.get_object("o1").unwrap().unwrap();
    assert_eq!(object.change_index, 2);
    assert!(object.log.is_empty());
    assert_eq!(object.state, json!({"a": 1, "b": 2}));
}

#[test]
fn default_merger_keeps_log() {
    let harness = Harness::with(Hooks::default(), ProcessorConfig::new().with_auto_merge(1));
    harness.join("s1", "o1", "c1").unwrap();
    harness
        .evt("s1", "o1", "c1", vec![json!({"type": "set", "prop": "a", "value": 1})])
        .unwrap();

    let object = harness.store.get_object("o1").unwrap().unwrap();
    assert_eq!(object.log.len(), 1);
    assert_eq!(object.state, json!({}));
}

#[test]
fn transform_attaches_user() {
    let harness = Harness::with(
        Hooks::default().with_transform(AttachUser),
        ProcessorConfig::default(),
    );
    harness.join("s1", "o1", "c1").unwrap();
    harness
        .processor
        .handle(
            &Invocation::message(
                "s2",
                json!({"type": "createClient", "objId": "o1", "clientId": "c2"}).to_string(),
            )
            .with_user_id("alice"),
        )
        .unwrap();

    let registry = harness.processor.registry();
    let c1 = registry.lookup("o1", "c1").unwrap().unwrap();
    let c2 = registry.lookup("o1", "c2").unwrap().unwrap();
    assert_eq!(c1.user_id.as_deref(), Some("user-c1"));
    assert_eq!(c2.user_id.as_deref(), Some("alice"));
}

#[test]
fn processors_share_one_store() {
    let store = Arc::new(InMemoryStore::new());
    let transport = Arc::new(RecordingTransport::new());
    let make = || {
        CommandProcessor::new(
            store.clone(),
            transport.clone(),
            Hooks::default(),
            ProcessorConfig::default(),
        )
    };
    let (first, second) = (make(), make());

    let join = |socket: &str, client: &str| {
        let batch = json!([
            {"type": "createClient", "objId": "o1", "clientId": client},
            {"type": "get", "objId": "o1", "clientId": client},
        ])
        .to_string();
        Invocation::message(socket, batch)
    };
    first.handle(&join("s1", "c1")).unwrap();
    second.handle(&join("s2", "c2")).unwrap();

    let evt = json!({"type": "evt", "objId": "o1", "clientId": "c2", "evts": ["e"]});
    second
        .handle(&Invocation::message("s2", evt.to_string()))
        .unwrap();

    assert_eq!(evts(&transport, "s1").len(), 1);
    assert_eq!(evts(&transport, "s2").len(), 1);
}
