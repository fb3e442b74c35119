//! Query reads through a mock environment.

use std::sync::Arc;

use latch_test_utils::assertions::*;
use latch_test_utils::fixtures::*;
use latch_test_utils::generators::*;
use latch_test_utils::*;
use proptest::prelude::*;
use serde_json::json;

fn network_only() -> ReadOptions {
    ReadOptions::new().with_fetch_policy(FetchPolicy::NetworkOnly)
}

fn server_error() -> FetchError {
    FetchError::ResponseErrors {
        operation: "UserQuery".to_string(),
        messages: vec!["User not found".to_string()],
    }
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[test]
fn test_pending_then_ready_without_refetch() {
    init_test_tracing();
    let (cache, environment, _scheduler) = manual_cache();
    let operation = user_operation("1");

    let placeholder = assert_pending(cache.read_query(&user_query(), &user_variables("1"), network_only()));
    assert_eq!(environment.execute_calls(), 1);

    environment.respond(&operation, json!({"name": "Alice"}));
    environment.complete(&operation);
    assert_eq!(placeholder.settlement(), Some(Settlement::Resolved));

    let result = assert_ready(cache.read_query(&user_query(), &user_variables("1"), network_only()));
    assert_eq!(*result.data, json!({"name": "Alice"}));
    assert!(!result.snapshot.has_missing_data());
    assert_eq!(environment.execute_calls(), 1);
    assert_eq!(cache.in_flight_count(), 0);
}

#[test]
fn test_variable_key_order_shares_entry() {
    let (cache, environment, _scheduler) = manual_cache();
    let forward = Variables::new().with("id", "1").with("first", 10);
    let backward = Variables::new().with("first", 10).with("id", "1");

    let a = assert_pending(cache.read_query(&user_query(), &forward, network_only()));
    let b = assert_pending(cache.read_query(&user_query(), &backward, network_only()));
    assert!(a.ptr_eq(&b));
    assert_eq!(environment.execute_calls(), 1);
}

#[test]
fn test_concurrent_fetches_execute_once() {
    let (cache, environment, _scheduler) = manual_cache();
    let operation = user_operation("1");

    let _first = cache
        .fetch_query(&user_query(), &user_variables("1"), network_only())
        .unwrap();
    let _second = cache
        .fetch_query(&user_query(), &user_variables("1"), network_only())
        .unwrap();

    assert_eq!(environment.execute_calls(), 1);
    assert_eq!(cache.requests().refcount(&operation.fingerprint), 2);
    assert!(cache.entry(&operation.fingerprint).unwrap().is_pending());
}

#[test]
fn test_concurrent_readers_share_failure() {
    let (cache, environment, _scheduler) = manual_cache();
    let operation = user_operation("1");

    let first = assert_pending(cache.read_query(&user_query(), &user_variables("1"), network_only()));
    let second = assert_pending(cache.read_query(&user_query(), &user_variables("1"), network_only()));

    environment.fail(&operation, server_error());

    let expected = Settlement::Rejected(LatchError::Fetch(server_error()));
    assert_eq!(first.settlement(), Some(expected.clone()));
    assert_eq!(second.settlement(), Some(expected));

    // Failures stick until invalidated; no automatic retry.
    for _ in 0..2 {
        let error = assert_network_error(cache.read_query(&user_query(), &user_variables("1"), network_only()));
        assert_eq!(error, server_error());
    }
    assert_eq!(environment.execute_calls(), 1);
    assert_eq!(environment.active_retains(), 0);
}

#[test]
fn test_last_disposal_cancels_request() {
    let (cache, environment, _scheduler) = manual_cache();
    let operation = user_operation("1");

    let mut first = cache
        .fetch_query(&user_query(), &user_variables("1"), network_only())
        .unwrap();
    let mut second = cache
        .fetch_query(&user_query(), &user_variables("1"), network_only())
        .unwrap();

    first.dispose();
    assert_eq!(environment.cancel_calls(), 0);
    assert_eq!(cache.in_flight_count(), 1);

    second.dispose();
    assert_eq!(environment.cancel_calls(), 1);
    assert_eq!(cache.in_flight_count(), 0);
    assert_eq!(environment.active_retains(), 0);

    // The pending entry went with the request, so a later read refetches.
    assert!(cache.entry(&operation.fingerprint).is_none());
    assert_pending(cache.read_query(&user_query(), &user_variables("1"), network_only()));
    assert_eq!(environment.execute_calls(), 2);
}

#[test]
fn test_release_cancels_request_started_by_read() {
    let (cache, environment, _scheduler) = manual_cache();
    let operation = user_operation("1");

    let placeholder = assert_pending(cache.read_query(&user_query(), &user_variables("1"), network_only()));
    assert_eq!(cache.requests().refcount(&operation.fingerprint), 1);

    assert!(cache.release_query(&user_query(), &user_variables("1")));
    assert_eq!(environment.cancel_calls(), 1);
    assert_eq!(cache.in_flight_count(), 0);
    assert_eq!(environment.active_retains(), 0);
    assert!(placeholder.is_settled());
    assert!(cache.entry(&operation.fingerprint).is_none());

    assert!(!cache.release_query(&user_query(), &user_variables("1")));
}

#[test]
fn test_invalidate_cancels_request_started_by_read() {
    let (cache, environment, _scheduler) = manual_cache();
    let operation = user_operation("1");

    assert_pending(cache.read_query(&user_query(), &user_variables("1"), network_only()));
    assert!(cache.invalidate(&operation.fingerprint));
    assert_eq!(environment.cancel_calls(), 1);
    assert_eq!(cache.requests().refcount(&operation.fingerprint), 0);
    assert_eq!(cache.in_flight_count(), 0);
}

#[test]
fn test_release_keeps_request_other_callers_hold() {
    let (cache, environment, _scheduler) = manual_cache();
    let operation = user_operation("1");

    let _fetch = cache
        .fetch_query(&user_query(), &user_variables("1"), network_only())
        .unwrap();
    // The entry is pending, so the read joins without starting a fetch.
    assert_pending(cache.read_query(&user_query(), &user_variables("1"), network_only()));
    assert!(!cache.release_query(&user_query(), &user_variables("1")));
    assert_eq!(environment.cancel_calls(), 0);
    assert_eq!(cache.in_flight_count(), 1);
}

#[test]
fn test_ready_read_takes_over_running_read_fetch() {
    let (cache, environment, _scheduler) = manual_cache();
    let operation = user_operation("1");
    let eager = network_only().with_read_policy(ReadPolicy::Eager);

    assert_pending(cache.read_query(&user_query(), &user_variables("1"), eager));
    environment.respond_partial(&operation, json!({"name": "Alice"}));

    let mut result = assert_ready(cache.read_query(&user_query(), &user_variables("1"), eager));
    assert!(!cache.release_query(&user_query(), &user_variables("1")));
    assert_eq!(cache.in_flight_count(), 1);

    result.disposable.dispose();
    assert_eq!(environment.cancel_calls(), 1);
    assert_eq!(environment.active_retains(), 0);
}

#[test]
fn test_completed_read_fetch_is_not_held() {
    let (cache, environment, _scheduler) = manual_cache();
    let operation = user_operation("1");

    assert_pending(cache.read_query(&user_query(), &user_variables("1"), network_only()));
    environment.respond(&operation, json!({"name": "Alice"}));
    environment.complete(&operation);

    assert!(!cache.release_query(&user_query(), &user_variables("1")));
    assert_eq!(environment.release_calls(), 0);
}

#[test]
fn test_late_joiner_replays_delivered_payload() {
    let (cache, environment, _scheduler) = manual_cache();
    let operation = user_operation("1");

    let _first = cache
        .fetch_query(&user_query(), &user_variables("1"), network_only())
        .unwrap();
    environment.respond(&operation, json!({"name": "Alice"}));
    cache.invalidate(&operation.fingerprint);

    let _late = cache
        .fetch_query(&user_query(), &user_variables("1"), network_only())
        .unwrap();
    assert_eq!(environment.execute_calls(), 1);
    assert_eq!(cache.requests().event_log(&operation.fingerprint).unwrap().len(), 1);
    // The replayed payload re-fulfilled the entry for the late joiner.
    assert_fulfilled(cache.entry(&operation.fingerprint));
}

#[test]
fn test_synchronous_response_is_ready_immediately() {
    let (cache, environment, _scheduler) = manual_cache();
    let operation = user_operation("2");
    environment.respond_immediately(&operation, json!({"name": "Bob"}));

    let mut result = assert_ready(cache.read_query(&user_query(), &user_variables("2"), network_only()));
    assert_eq!(*result.data, json!({"name": "Bob"}));
    assert_eq!(environment.active_retains(), 1);

    result.disposable.dispose();
    assert_eq!(environment.active_retains(), 0);
}

#[test]
fn test_incremental_payload_keeps_lazy_reader_pending() {
    let (cache, environment, _scheduler) = manual_cache();
    let operation = user_operation("1");

    let first = assert_pending(cache.read_query(&user_query(), &user_variables("1"), network_only()));
    environment.respond_partial(&operation, json!({"name": "Alice", "friends": null}));
    assert!(first.is_settled());

    let second = assert_pending(cache.read_query(&user_query(), &user_variables("1"), network_only()));
    assert!(!second.is_settled());

    environment.respond(&operation, json!({"name": "Alice", "friends": []}));
    assert!(second.is_settled());
    let result = assert_ready(cache.read_query(&user_query(), &user_variables("1"), network_only()));
    assert_eq!(*result.data, json!({"name": "Alice", "friends": []}));
}

#[test]
fn test_eager_reader_accepts_partial_payload() {
    let (cache, environment, _scheduler) = manual_cache();
    let operation = user_operation("1");
    let eager = network_only().with_read_policy(ReadPolicy::Eager);

    assert_pending(cache.read_query(&user_query(), &user_variables("1"), eager));
    environment.respond_partial(&operation, json!({"name": "Alice"}));

    let result = assert_ready(cache.read_query(&user_query(), &user_variables("1"), eager));
    assert!(result.snapshot.has_missing_data());
}

// ============================================================================
// POLICIES
// ============================================================================

#[test]
fn test_store_or_network_skips_fetch_when_available() {
    let (cache, environment, _scheduler) = manual_cache();
    let operation = user_operation("1");
    environment.publish(&operation.root, json!({"name": "Alice"}));

    let options = ReadOptions::new().with_fetch_policy(FetchPolicy::StoreOrNetwork);
    let result = assert_ready(cache.read_query(&user_query(), &user_variables("1"), options));
    assert_eq!(*result.data, json!({"name": "Alice"}));
    assert_eq!(environment.execute_calls(), 0);
    assert_eq!(environment.check_calls(), 1);
}

#[test]
fn test_store_or_network_fetches_when_missing() {
    let (cache, environment, _scheduler) = manual_cache();
    let options = ReadOptions::new().with_fetch_policy(FetchPolicy::StoreOrNetwork);

    assert_pending(cache.read_query(&user_query(), &user_variables("1"), options));
    assert_eq!(environment.execute_calls(), 1);
    assert_eq!(environment.check_calls(), 1);
}

#[test]
fn test_store_and_network_returns_local_data_and_fetches() {
    let (cache, environment, _scheduler) = manual_cache();
    let operation = user_operation("1");
    environment.publish(&operation.root, json!({"name": "Stale"}));

    let options = ReadOptions::new().with_fetch_policy(FetchPolicy::StoreAndNetwork);
    let mut result = assert_ready(cache.read_query(&user_query(), &user_variables("1"), options));
    assert_eq!(*result.data, json!({"name": "Stale"}));
    assert_eq!(environment.execute_calls(), 1);

    // The handle still owns the running fetch.
    result.disposable.dispose();
    assert_eq!(environment.cancel_calls(), 1);
}

#[test]
fn test_store_only_partial_data_depends_on_read_policy() {
    let (cache, environment, _scheduler) = manual_cache();
    let operation = user_operation("1");
    environment.publish_partial(&operation.root, json!({"name": "Alice"}));

    assert_not_available(cache.read_query(&user_query(), &user_variables("1"), ReadOptions::store_only()));

    let eager = ReadOptions::store_only().with_read_policy(ReadPolicy::Eager);
    let result = assert_ready(cache.read_query(&user_query(), &user_variables("1"), eager));
    assert!(result.snapshot.has_missing_data());
    assert_eq!(environment.execute_calls(), 0);
}

#[test]
fn test_store_only_joins_external_request() {
    let (cache, environment, _scheduler) = manual_cache();
    let operation = user_operation("1");
    let external = Placeholder::new();
    environment.set_external_request(&operation, external.clone());

    let placeholder = assert_pending(cache.read_query(&user_query(), &user_variables("1"), ReadOptions::store_only()));
    assert!(placeholder.ptr_eq(&external));

    environment.publish(&operation.root, json!({"name": "Alice"}));
    external.resolve();

    let result = assert_ready(cache.read_query(&user_query(), &user_variables("1"), ReadOptions::store_only()));
    assert_eq!(*result.data, json!({"name": "Alice"}));
    assert_eq!(environment.execute_calls(), 0);
}

#[test]
fn test_external_request_failure_is_cached() {
    let (cache, environment, _scheduler) = manual_cache();
    let operation = user_operation("1");
    let external = Placeholder::new();
    environment.set_external_request(&operation, external.clone());

    assert_pending(cache.read_query(&user_query(), &user_variables("1"), ReadOptions::store_only()));
    external.reject(server_error().into());
    assert_network_error(cache.read_query(&user_query(), &user_variables("1"), ReadOptions::store_only()));
}

// ============================================================================
// PRELOAD, INVALIDATE, SET
// ============================================================================

#[test]
fn test_preload_is_noop_when_entry_exists() {
    let (cache, environment, _scheduler) = manual_cache();

    let first = cache
        .preload_query(&user_query(), &user_variables("1"), network_only())
        .unwrap();
    assert!(first.is_active());
    let second = cache
        .preload_query(&user_query(), &user_variables("1"), network_only())
        .unwrap();
    assert!(!second.is_active());
    assert_eq!(environment.execute_calls(), 1);
}

#[test]
fn test_fetch_replaces_failed_entry() {
    let (cache, environment, _scheduler) = manual_cache();
    let operation = user_operation("1");

    let _first = cache
        .fetch_query(&user_query(), &user_variables("1"), network_only())
        .unwrap();
    environment.fail(&operation, server_error());
    assert!(cache.entry(&operation.fingerprint).unwrap().is_failed());

    let _retry = cache
        .fetch_query(&user_query(), &user_variables("1"), network_only())
        .unwrap();
    assert!(cache.entry(&operation.fingerprint).unwrap().is_pending());
    assert_eq!(environment.execute_calls(), 2);
}

#[test]
fn test_invalidate_forces_fresh_read() {
    let (cache, environment, _scheduler) = manual_cache();
    let operation = user_operation("1");

    assert_pending(cache.read_query(&user_query(), &user_variables("1"), network_only()));
    environment.respond(&operation, json!({"name": "Alice"}));
    environment.complete(&operation);

    assert!(cache.invalidate_query(&user_query(), &user_variables("1")));
    assert!(!cache.invalidate_query(&user_query(), &user_variables("1")));

    // The store still has the record, so a local read succeeds.
    environment.publish(&operation.root, json!({"name": "Alice Updated"}));
    let result = assert_ready(cache.read_query(&user_query(), &user_variables("1"), ReadOptions::store_only()));
    assert_eq!(*result.data, json!({"name": "Alice Updated"}));
}

#[test]
fn test_set_rejects_missing_data() {
    let (cache, _environment, _scheduler) = manual_cache();
    let operation = user_operation("1");
    let partial = Snapshot::new(operation.root.clone(), json!({"name": null}), true);

    assert!(!cache.set_query(&user_query(), &user_variables("1"), partial));
    assert!(cache.entry(&operation.fingerprint).is_none());
}

#[test]
fn test_stats_track_hits() {
    let (cache, _environment, _scheduler) = manual_cache();
    let operation = user_operation("1");
    let snapshot = Snapshot::complete(operation.root.clone(), json!({"name": "Alice"}));
    cache.set_query(&user_query(), &user_variables("1"), snapshot);

    for _ in 0..3 {
        assert_ready(cache.read_query(&user_query(), &user_variables("1"), ReadOptions::store_only()));
    }
    let stats = cache.stats();
    assert_eq!(stats.hits, 3);
    assert_eq!(stats.entry_count, 1);
}

#[test]
fn test_capacity_evicts_least_recently_used() {
    let (cache, _environment, _scheduler) = manual_cache_with(test_config().with_capacity(2));
    for id in ["1", "2", "3"] {
        let operation = user_operation(id);
        let snapshot = Snapshot::complete(operation.root.clone(), json!({ "id": id }));
        assert!(cache.set_query(&user_query(), &user_variables(id), snapshot));
    }
    assert!(cache.entry(&user_operation("1").fingerprint).is_none());
    assert_eq!(cache.stats().evictions, 1);
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #[test]
    fn prop_store_only_without_data_is_not_available(
        request in arb_request(),
        variables in arb_variables(),
        read_policy in arb_read_policy()
    ) {
        let (cache, environment, _scheduler) = manual_cache();
        let options = ReadOptions::store_only().with_read_policy(read_policy);

        let outcome = cache.read_query(&request, &variables, options);
        let not_available = matches!(
            outcome,
            Loadable::Failed(LatchError::Read(ReadError::NotAvailable { .. }))
        );
        prop_assert!(not_available);
        prop_assert!(cache.fetch_query(&request, &variables, options).is_err());
        prop_assert_eq!(environment.execute_calls(), 0);
    }

    #[test]
    fn prop_set_then_store_only_read_round_trips(
        request in arb_request(),
        variables in arb_variables(),
        data in arb_json()
    ) {
        let (cache, _environment, _scheduler) = manual_cache();
        let operation = OperationDescriptor::new(request.clone(), variables.clone());
        let snapshot = Snapshot::complete(operation.root.clone(), data.clone());

        prop_assert!(cache.set_query(&request, &variables, snapshot.clone()));
        let result = match cache.read_query(&request, &variables, ReadOptions::store_only()) {
            Loadable::Ready(result) => result,
            other => return Err(TestCaseError::fail(format!("expected ready, got {:?}", other))),
        };
        prop_assert_eq!(result.snapshot.as_singular(), Some(&snapshot));
        prop_assert_eq!(&*result.data, &data);
    }

    #[test]
    fn prop_one_entry_per_fingerprint(
        options in proptest::collection::vec(arb_read_options(), 1..6)
    ) {
        let (cache, environment, _scheduler) = manual_cache();
        let operation = user_operation("1");
        environment.publish(&operation.root, json!({"name": "Alice"}));

        for options in options {
            let _ = cache.fetch_query(&user_query(), &user_variables("1"), options);
        }
        prop_assert_eq!(cache.stats().entry_count, 1);
        prop_assert!(environment.execute_calls() <= 1);
    }
}

#[test]
fn test_cache_is_shareable_across_threads() {
    let (cache, environment, _scheduler) = manual_cache();
    let operation = user_operation("1");
    let cache = Arc::new(cache);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                let _ = cache.read_query(&user_query(), &user_variables("1"), network_only());
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(environment.execute_calls(), 1);

    environment.respond(&operation, json!({"name": "Alice"}));
    assert_ready(cache.read_query(&user_query(), &user_variables("1"), network_only()));
}
