//! latch Test Utilities
//!
//! Shared test infrastructure for the latch workspace:
//! - An in-memory mock environment (store + scriptable network)
//! - Proptest generators for requests, variables and policies
//! - Fixtures for common scenarios
//! - Assertions over read outcomes

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

pub use latch_cache::{
    CacheEntry, DataCache, Environment, EventSink, FragmentRefs, FragmentResult, FragmentSpec,
    Loadable, ManualScheduler, Placeholder, QueryResult, Settlement,
};
pub use latch_core::{
    CacheConfig, ConfigError, DataId, Disposable, EntityRef, EnvironmentId, FetchError,
    FetchPolicy, Fragment, FragmentRef, LatchError, LatchResult, OperationDescriptor, ReadError,
    ReadOptions, ReadPolicy, Request, RequestFingerprint, Selector, Snapshot, Variables,
};

/// Install a test-friendly tracing subscriber, filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// MOCK ENVIRONMENT
// ============================================================================

type RecordKey = (String, String, String);

fn record_key(selector: &Selector) -> RecordKey {
    (
        selector.data_id.as_str().to_string(),
        selector.node.clone(),
        selector.variables.canonical_json(),
    )
}

#[derive(Debug, Clone)]
struct Record {
    data: Value,
    is_missing_data: bool,
}

#[derive(Default)]
struct MockState {
    records: Mutex<HashMap<RecordKey, Record>>,
    sinks: Mutex<HashMap<RequestFingerprint, EventSink>>,
    canned: Mutex<HashMap<RequestFingerprint, Value>>,
    external: Mutex<HashMap<RequestFingerprint, Placeholder>>,
    check_calls: AtomicUsize,
    lookup_calls: AtomicUsize,
    execute_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
    retain_calls: AtomicUsize,
    release_calls: AtomicUsize,
}

/// In-memory environment: a record map standing in for the normalized store
/// and a network whose responses the test drives by hand.
///
/// Clones share state, so a test keeps one handle and gives the cache another.
#[derive(Clone)]
pub struct MockEnvironment {
    id: EnvironmentId,
    state: Arc<MockState>,
}

impl MockEnvironment {
    pub fn new() -> Self {
        Self {
            id: EnvironmentId::new(),
            state: Arc::new(MockState::default()),
        }
    }

    /// Handle typed for [`DataCache::new`].
    pub fn shared(&self) -> Arc<dyn Environment> {
        Arc::new(self.clone())
    }

    /// Write complete data for `selector` into the store.
    pub fn publish(&self, selector: &Selector, data: Value) {
        self.publish_record(selector, data, false);
    }

    /// Write data for `selector` that still lacks some selected fields.
    pub fn publish_partial(&self, selector: &Selector, data: Value) {
        self.publish_record(selector, data, true);
    }

    fn publish_record(&self, selector: &Selector, data: Value, is_missing_data: bool) {
        self.state.records.lock().unwrap().insert(
            record_key(selector),
            Record {
                data,
                is_missing_data,
            },
        );
    }

    /// Publish `payload` as the operation's root data and deliver it as `next`.
    pub fn respond(&self, operation: &OperationDescriptor, payload: Value) {
        self.publish(&operation.root, payload.clone());
        if let Some(sink) = self.sink(&operation.fingerprint) {
            sink.next(payload);
        }
    }

    /// Publish partial root data and deliver it as `next`.
    pub fn respond_partial(&self, operation: &OperationDescriptor, payload: Value) {
        self.publish_partial(&operation.root, payload.clone());
        if let Some(sink) = self.sink(&operation.fingerprint) {
            sink.next(payload);
        }
    }

    pub fn complete(&self, operation: &OperationDescriptor) {
        if let Some(sink) = self.sink(&operation.fingerprint) {
            sink.complete();
        }
    }

    pub fn fail(&self, operation: &OperationDescriptor, error: FetchError) {
        if let Some(sink) = self.sink(&operation.fingerprint) {
            sink.error(error);
        }
    }

    /// Answer the next `execute` for `operation` synchronously with `payload`.
    pub fn respond_immediately(&self, operation: &OperationDescriptor, payload: Value) {
        self.state
            .canned
            .lock()
            .unwrap()
            .insert(operation.fingerprint.clone(), payload);
    }

    /// Report `placeholder` as a request for `operation` started elsewhere.
    pub fn set_external_request(&self, operation: &OperationDescriptor, placeholder: Placeholder) {
        self.state
            .external
            .lock()
            .unwrap()
            .insert(operation.fingerprint.clone(), placeholder);
    }

    pub fn sink(&self, fingerprint: &RequestFingerprint) -> Option<EventSink> {
        self.state.sinks.lock().unwrap().get(fingerprint).cloned()
    }

    pub fn check_calls(&self) -> usize {
        self.state.check_calls.load(Ordering::SeqCst)
    }

    pub fn lookup_calls(&self) -> usize {
        self.state.lookup_calls.load(Ordering::SeqCst)
    }

    pub fn execute_calls(&self) -> usize {
        self.state.execute_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> usize {
        self.state.cancel_calls.load(Ordering::SeqCst)
    }

    pub fn retain_calls(&self) -> usize {
        self.state.retain_calls.load(Ordering::SeqCst)
    }

    pub fn release_calls(&self) -> usize {
        self.state.release_calls.load(Ordering::SeqCst)
    }

    /// Retains not yet released.
    pub fn active_retains(&self) -> usize {
        self.retain_calls() - self.release_calls()
    }
}

impl Default for MockEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for MockEnvironment {
    fn id(&self) -> EnvironmentId {
        self.id
    }

    fn check(&self, operation: &OperationDescriptor) -> bool {
        self.state.check_calls.fetch_add(1, Ordering::SeqCst);
        self.state
            .records
            .lock()
            .unwrap()
            .get(&record_key(&operation.root))
            .is_some_and(|record| !record.is_missing_data)
    }

    fn lookup(&self, selector: &Selector) -> Snapshot {
        self.state.lookup_calls.fetch_add(1, Ordering::SeqCst);
        let record = self
            .state
            .records
            .lock()
            .unwrap()
            .get(&record_key(selector))
            .cloned();
        match record {
            Some(record) => Snapshot::new(selector.clone(), record.data, record.is_missing_data),
            None => Snapshot::new(selector.clone(), Value::Null, true),
        }
    }

    fn execute(&self, operation: &OperationDescriptor, sink: EventSink) -> Disposable {
        self.state.execute_calls.fetch_add(1, Ordering::SeqCst);
        let canned = self.state.canned.lock().unwrap().remove(&operation.fingerprint);
        match canned {
            Some(payload) => {
                self.publish(&operation.root, payload.clone());
                sink.next(payload);
                sink.complete();
            }
            None => {
                self.state
                    .sinks
                    .lock()
                    .unwrap()
                    .insert(operation.fingerprint.clone(), sink);
            }
        }

        let state = Arc::clone(&self.state);
        Disposable::new(move || {
            state.cancel_calls.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn retain(&self, _operation: &OperationDescriptor) -> Disposable {
        self.state.retain_calls.fetch_add(1, Ordering::SeqCst);
        let state = Arc::clone(&self.state);
        Disposable::new(move || {
            state.release_calls.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn in_flight_request(&self, operation: &OperationDescriptor) -> Option<Placeholder> {
        self.state
            .external
            .lock()
            .unwrap()
            .get(&operation.fingerprint)
            .filter(|placeholder| !placeholder.is_settled())
            .cloned()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for latch types.

    use super::*;
    use proptest::prelude::*;
    use serde_json::Map;

    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::from),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,12}".prop_map(Value::from),
        ]
    }

    /// Nested JSON, up to three levels deep.
    pub fn arb_json() -> impl Strategy<Value = Value> {
        arb_scalar().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4)
                    .prop_map(|entries| Value::Object(entries.into_iter().collect())),
            ]
        })
    }

    pub fn arb_variables() -> impl Strategy<Value = Variables> {
        prop::collection::btree_map("[a-z][a-zA-Z]{0,7}", arb_json(), 0..5)
            .prop_map(|entries| Variables::from(entries.into_iter().collect::<Map<String, Value>>()))
    }

    pub fn arb_request() -> impl Strategy<Value = Request> {
        ("[A-Z][a-zA-Z]{2,10}Query", "[a-f0-9]{8}")
            .prop_map(|(name, id)| Request::persisted(name, id))
    }

    pub fn arb_data_id() -> impl Strategy<Value = DataId> {
        "[a-z]{2,8}:[0-9]{1,4}".prop_map(DataId::new)
    }

    pub fn arb_entity_ref(fragment: String) -> impl Strategy<Value = EntityRef> {
        arb_data_id().prop_map(move |id| EntityRef::new(id).spreading(fragment.clone()))
    }

    pub fn arb_fetch_policy() -> impl Strategy<Value = FetchPolicy> {
        prop_oneof![
            Just(FetchPolicy::StoreOnly),
            Just(FetchPolicy::StoreOrNetwork),
            Just(FetchPolicy::StoreAndNetwork),
            Just(FetchPolicy::NetworkOnly),
        ]
    }

    pub fn arb_read_policy() -> impl Strategy<Value = ReadPolicy> {
        prop_oneof![Just(ReadPolicy::Eager), Just(ReadPolicy::Lazy)]
    }

    pub fn arb_read_options() -> impl Strategy<Value = ReadOptions> {
        (arb_fetch_policy(), arb_read_policy()).prop_map(|(fetch_policy, read_policy)| {
            ReadOptions::new()
                .with_fetch_policy(fetch_policy)
                .with_read_policy(read_policy)
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built values for common scenarios.

    use super::*;
    use std::time::Duration;

    pub const TEST_GRACE: Duration = Duration::from_secs(30);

    pub fn user_query() -> Request {
        Request::persisted("UserQuery", "R1")
    }

    pub fn user_variables(id: &str) -> Variables {
        Variables::new().with("id", id)
    }

    pub fn user_operation(id: &str) -> OperationDescriptor {
        OperationDescriptor::new(user_query(), user_variables(id))
    }

    pub fn user_card_fragment() -> Fragment {
        Fragment::new("UserCard_user")
    }

    pub fn friend_list_fragment() -> Fragment {
        Fragment::plural("FriendList_friends")
    }

    pub fn user_ref(id: &str) -> FragmentRef {
        EntityRef::new(id).spreading("UserCard_user").into()
    }

    pub fn friend_refs(ids: &[&str]) -> FragmentRef {
        FragmentRef::Plural(
            ids.iter()
                .map(|id| EntityRef::new(*id).spreading("FriendList_friends"))
                .collect(),
        )
    }

    /// Selector a fragment reads for one record.
    pub fn fragment_selector(fragment: &Fragment, id: &str, variables: &Variables) -> Selector {
        Selector {
            data_id: DataId::new(id),
            node: fragment.name.clone(),
            variables: variables.clone(),
            owner: None,
        }
    }

    pub fn test_config() -> CacheConfig {
        CacheConfig::new()
            .with_capacity(16)
            .with_retention_grace(TEST_GRACE)
    }

    /// A cache over a fresh mock environment, timed by a manual clock.
    pub fn manual_cache() -> (DataCache, MockEnvironment, ManualScheduler) {
        manual_cache_with(test_config())
    }

    pub fn manual_cache_with(config: CacheConfig) -> (DataCache, MockEnvironment, ManualScheduler) {
        let environment = MockEnvironment::new();
        let scheduler = ManualScheduler::new();
        let cache = DataCache::new(environment.shared(), config, Arc::new(scheduler.clone()))
            .expect("test config is valid");
        (cache, environment, scheduler)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over read outcomes.

    use super::*;
    use std::fmt::Debug;

    /// Assert the read is ready and return its value.
    #[track_caller]
    pub fn assert_ready<T: Debug>(loadable: Loadable<T>) -> T {
        match loadable {
            Loadable::Ready(value) => value,
            other => panic!("Expected Ready, got: {:?}", other),
        }
    }

    /// Assert the read suspended and return the placeholder to wait on.
    #[track_caller]
    pub fn assert_pending<T: Debug>(loadable: Loadable<T>) -> Placeholder {
        match loadable {
            Loadable::Pending(placeholder) => placeholder,
            other => panic!("Expected Pending, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_failed<T: Debug>(loadable: Loadable<T>) -> LatchError {
        match loadable {
            Loadable::Failed(error) => error,
            other => panic!("Expected Failed, got: {:?}", other),
        }
    }

    /// Assert the read failed with "not available and not being fetched".
    #[track_caller]
    pub fn assert_not_available<T: Debug>(loadable: Loadable<T>) {
        match assert_failed(loadable) {
            LatchError::Read(ReadError::NotAvailable { .. }) => {}
            other => panic!("Expected NotAvailable, got: {:?}", other),
        }
    }

    /// Assert the read failed with an error from the network layer.
    #[track_caller]
    pub fn assert_network_error<T: Debug>(loadable: Loadable<T>) -> FetchError {
        match assert_failed(loadable) {
            LatchError::Fetch(error) => error,
            other => panic!("Expected network error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_fulfilled(entry: Option<CacheEntry>) {
        assert!(
            matches!(entry, Some(CacheEntry::Fulfilled { .. })),
            "Expected Fulfilled entry, got: {:?}",
            entry
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_mock_lookup_reports_missing_records() {
        let environment = MockEnvironment::new();
        let operation = fixtures::user_operation("1");
        let snapshot = environment.lookup(&operation.root);
        assert!(snapshot.is_missing_data());
        assert_eq!(snapshot.data(), &Value::Null);

        environment.publish(&operation.root, json!({"name": "Alice"}));
        assert!(environment.check(&operation));
        assert_eq!(environment.check_calls(), 1);
    }

    #[test]
    fn test_mock_retain_counts() {
        let environment = MockEnvironment::new();
        let mut handle = environment.retain(&fixtures::user_operation("1"));
        assert_eq!(environment.active_retains(), 1);
        handle.dispose();
        assert_eq!(environment.active_retains(), 0);
    }
}
