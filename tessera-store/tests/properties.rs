//! Property tests for normalization, collection and optimistic layering.

use proptest::prelude::*;
use serde_json::json;
use tessera_core::{DataId, OptimisticToken, RecordSource, RecordSourceView, StoreConfig};
use tessera_store::{normalize_into, read, NormalizeOptions, Store};
use tessera_test_utils::generators::*;
use tessera_test_utils::{assertions, fixtures};

fn reachable_ids(store: &Store, selector: &tessera_core::Selector) -> Vec<DataId> {
    read(store.get_source(), selector)
        .seen_records
        .into_iter()
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Reading back a complete payload yields the payload.
    #[test]
    fn prop_round_trip((selector, payload) in arb_operation()) {
        let mut source = RecordSource::new();
        normalize_into(&mut source, &selector, &payload, &NormalizeOptions::default()).unwrap();

        let snapshot = read(&source, &selector);
        prop_assert!(!snapshot.is_missing_data);
        prop_assert_eq!(snapshot.data, Some(payload));
    }

    /// A second identical normalization changes nothing.
    #[test]
    fn prop_normalize_is_idempotent((selector, payload) in arb_operation()) {
        let mut store = Store::new(fixtures::no_gc_config()).unwrap();
        store.normalize_response(&selector, &payload).unwrap();
        store.notify();
        let before = store.get_source().clone();

        let output = store.normalize_response(&selector, &payload).unwrap();

        prop_assert!(output.dirty.is_empty());
        prop_assert!(store.pending_dirty().is_empty());
        prop_assert_eq!(store.get_source(), &before);
    }

    /// Everything a retained selector reaches survives a GC pass.
    #[test]
    fn prop_gc_keeps_retained_graph(
        (selector, payload) in arb_operation(),
        garbage in arb_garbage_records(),
    ) {
        let mut store = Store::default();
        let handle = store.retain(&selector);
        store.normalize_response(&selector, &payload).unwrap();
        store.publish(RecordSource::from_records(garbage.clone()));
        let before = store.lookup(&selector);

        store.notify();

        for id in &before.seen_records {
            prop_assert!(!store.get_source().get(id).is_unknown(), "swept reachable {}", id);
        }
        for record in &garbage {
            assertions::assert_unknown(store.get_source(), record.id().as_str());
        }
        prop_assert_eq!(store.lookup(&selector), before);
        store.release(handle).unwrap();
    }

    /// Once the last root goes, the next pass empties the source.
    #[test]
    fn prop_gc_frees_released_graph((selector, payload) in arb_operation()) {
        let mut store = Store::default();
        let handle = store.retain(&selector);
        store.normalize_response(&selector, &payload).unwrap();
        store.notify();
        let reachable = reachable_ids(&store, &selector);
        prop_assert!(!reachable.is_empty());

        store.release(handle).unwrap();
        store.notify();

        prop_assert_eq!(store.get_source().size(), 0);
        for id in reachable {
            prop_assert!(store.get_source().get(&id).is_unknown());
        }
    }

    /// Rolling a layer back restores the earlier lookup exactly.
    #[test]
    fn prop_rollback_restores_lookup(
        (selector, payload) in arb_operation(),
        (other_selector, other_payload) in arb_operation(),
        token in arb_optimistic_token(),
    ) {
        let mut store = Store::new(fixtures::no_gc_config()).unwrap();
        store.normalize_response(&selector, &payload).unwrap();
        store.notify();
        let before = store.lookup(&selector);

        store
            .apply_optimistic_response(token, &other_selector, &other_payload)
            .unwrap();
        store.rollback(token).unwrap();

        prop_assert_eq!(store.optimistic_layer_count(), 0);
        prop_assert_eq!(store.lookup(&selector), before);
    }

    /// Every lookup during commit sees either the optimistic or the confirmed
    /// value, and the confirmed value wins afterwards.
    #[test]
    fn prop_commit_never_exposes_a_gap(
        optimistic in "[A-Z][a-z]{0,8}",
        confirmed in "[A-Z][a-z]{0,8}",
    ) {
        let query = fixtures::user_query();
        let fragment = fixtures::user_fragment("1");
        let mut store = Store::new(fixtures::no_gc_config()).unwrap();
        store
            .normalize_response(&query, &fixtures::user_payload("1", "Ann", None))
            .unwrap();
        let token = OptimisticToken::new();
        store
            .apply_optimistic_response(
                token,
                &query,
                &fixtures::user_payload("1", &optimistic, None),
            )
            .unwrap();
        prop_assert_eq!(
            store.lookup(&fragment).data,
            Some(json!({ "id": "1", "name": optimistic }))
        );

        store
            .commit(token, &query, &fixtures::user_payload("1", &confirmed, None))
            .unwrap();

        let after = store.lookup(&fragment);
        prop_assert!(!after.is_missing_data);
        prop_assert_eq!(after.data, Some(json!({ "id": "1", "name": confirmed })));
        prop_assert!(store.effective_source().get(&DataId::new("1")).is_present());
    }

    /// Layers removed in any order leave the base untouched.
    #[test]
    fn prop_rollback_in_any_order(order in Just(vec![0usize, 1, 2]).prop_shuffle()) {
        let query = fixtures::user_query();
        let mut store = Store::new(StoreConfig::new().with_gc(false)).unwrap();
        store
            .normalize_response(&query, &fixtures::user_payload("1", "Ann", None))
            .unwrap();
        let before = store.lookup(&query);
        let tokens: Vec<OptimisticToken> = (0..3).map(|_| OptimisticToken::new()).collect();
        for (index, token) in tokens.iter().enumerate() {
            let name = format!("Layer{index}");
            store
                .apply_optimistic_response(
                    *token,
                    &query,
                    &fixtures::user_payload("1", &name, None),
                )
                .unwrap();
        }

        for index in order {
            store.rollback(tokens[index]).unwrap();
        }

        prop_assert_eq!(store.lookup(&query), before);
    }
}
