//! Per-environment data cache.
//!
//! [`DataCache`] ties the result cache, the request registry and the
//! retention timers to one [`Environment`]. Reads are synchronous and return a
//! [`Loadable`]: data, a placeholder to wait on, or the error every reader of
//! that fingerprint sees.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use latch_core::{
    CacheConfig, Disposable, Fragment, FragmentRef, LatchResult, OperationDescriptor,
    ReadError, ReadOptions, Request, RequestFingerprint, SelectorSet, Snapshot, SnapshotSet,
    Variables,
};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::environment::{lookup_set, Environment};
use crate::loadable::Loadable;
use crate::lock;
use crate::placeholder::{Placeholder, Settlement};
use crate::policy::{decide, FetchDecision};
use crate::registry::{Observer, RequestEvent, RequestRegistry, RequestSubscription};
use crate::result_cache::{CacheEntry, CacheStats, ResultCache};
use crate::retention::{RetentionTimers, WindowId};
use crate::scheduler::Scheduler;

// ============================================================================
// RESULT TYPES
// ============================================================================

/// A fulfilled query read.
#[derive(Debug)]
pub struct QueryResult {
    /// Shared with every other reader of the fingerprint; never mutate.
    pub data: Arc<Value>,
    pub snapshot: SnapshotSet,
    /// Cancels the fetch if still running, otherwise releases its retention.
    pub disposable: Disposable,
}

/// A fulfilled fragment read. `snapshot` is None for a null ref.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentResult {
    pub data: Arc<Value>,
    pub snapshot: Option<SnapshotSet>,
}

impl FragmentResult {
    fn null() -> Self {
        Self {
            data: Arc::new(Value::Null),
            snapshot: None,
        }
    }
}

impl From<SnapshotSet> for FragmentResult {
    fn from(snapshot: SnapshotSet) -> Self {
        Self {
            data: snapshot.shared_data(),
            snapshot: Some(snapshot),
        }
    }
}

/// Fragments a component declares, by the key its refs are passed under.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentSpec {
    fragments: BTreeMap<String, Fragment>,
}

impl FragmentSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, fragment: Fragment) -> Self {
        self.fragments.insert(key.into(), fragment);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Fragment)> {
        self.fragments.iter()
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

/// Refs passed for each declared key; `None` is an explicit null.
pub type FragmentRefs = BTreeMap<String, Option<FragmentRef>>;

/// Fetch handles of reads that returned `Pending`, held until the request
/// terminates or the query is released.
type ReadHandles = Arc<Mutex<HashMap<RequestFingerprint, Vec<Disposable>>>>;

/// Resources one fetch call holds until its handle is disposed.
#[derive(Default)]
struct FetchState {
    subscription: Option<RequestSubscription>,
    retention: Option<Disposable>,
    window: Option<WindowId>,
}

// ============================================================================
// DATA CACHE
// ============================================================================

/// Suspense data cache for one environment.
///
/// Cloning is cheap and shares all state.
#[derive(Clone)]
pub struct DataCache {
    environment: Arc<dyn Environment>,
    results: ResultCache,
    requests: RequestRegistry,
    retention: RetentionTimers,
    reads: ReadHandles,
    config: CacheConfig,
}

impl DataCache {
    pub fn new(
        environment: Arc<dyn Environment>,
        config: CacheConfig,
        scheduler: Arc<dyn Scheduler>,
    ) -> LatchResult<Self> {
        let capacity = config.capacity_nonzero()?;
        Ok(Self::with_capacity(environment, config, capacity, scheduler))
    }

    pub(crate) fn with_capacity(
        environment: Arc<dyn Environment>,
        config: CacheConfig,
        capacity: NonZeroUsize,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            retention: RetentionTimers::new(scheduler, config.retention_grace),
            results: ResultCache::new(capacity),
            requests: RequestRegistry::new(),
            reads: ReadHandles::default(),
            environment,
            config,
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Read a query, fetching according to `options` on a cache miss.
    ///
    /// A fetch started here that is still running when the read returns
    /// `Pending` is held by the cache. [`DataCache::release_query`] and
    /// [`DataCache::invalidate`] dispose it; a later `Ready` read hands it to
    /// the reader inside [`QueryResult::disposable`].
    pub fn read_query(
        &self,
        request: &Request,
        variables: &Variables,
        options: ReadOptions,
    ) -> Loadable<QueryResult> {
        let operation = OperationDescriptor::new(request.clone(), variables.clone());
        let fingerprint = &operation.fingerprint;

        if let Some(entry) = self.results.get(fingerprint) {
            trace!(fingerprint = %fingerprint.digest(), "Query cache hit");
            return self.query_outcome(fingerprint, entry, None);
        }

        let handle = match self.fetch(&operation, options) {
            Ok(handle) => handle,
            Err(error) => return Loadable::Failed(error),
        };

        match self.results.get(fingerprint) {
            Some(entry) => self.query_outcome(fingerprint, entry, Some(handle)),
            None => {
                let mut handle = handle;
                handle.dispose();
                Loadable::Failed(
                    ReadError::NotAvailable {
                        fingerprint: fingerprint.clone(),
                    }
                    .into(),
                )
            }
        }
    }

    /// Run the fetch decision even when an entry exists.
    pub fn fetch_query(
        &self,
        request: &Request,
        variables: &Variables,
        options: ReadOptions,
    ) -> LatchResult<Disposable> {
        let operation = OperationDescriptor::new(request.clone(), variables.clone());
        self.fetch(&operation, options)
    }

    /// Like [`DataCache::fetch_query`], but a no-op when an entry exists.
    pub fn preload_query(
        &self,
        request: &Request,
        variables: &Variables,
        options: ReadOptions,
    ) -> LatchResult<Disposable> {
        let operation = OperationDescriptor::new(request.clone(), variables.clone());
        if self.results.has(&operation.fingerprint) {
            trace!(fingerprint = %operation.fingerprint.digest(), "Preload skipped, entry exists");
            return Ok(Disposable::noop());
        }
        self.fetch(&operation, options)
    }

    pub fn invalidate_query(&self, request: &Request, variables: &Variables) -> bool {
        self.invalidate(&RequestFingerprint::for_request(request, variables))
    }

    /// Dispose the fetches reads of this query started and still hold.
    ///
    /// A request nobody else subscribes to is cancelled; a completed one
    /// releases its retention now. Returns false if no read held a fetch.
    pub fn release_query(&self, request: &Request, variables: &Variables) -> bool {
        self.release_reads(&RequestFingerprint::for_request(request, variables))
    }

    /// Write a complete snapshot straight into the cache.
    ///
    /// Returns false, leaving the cache untouched, if the snapshot has missing data.
    pub fn set_query(&self, request: &Request, variables: &Variables, snapshot: Snapshot) -> bool {
        self.set(
            RequestFingerprint::for_request(request, variables),
            SnapshotSet::Singular(snapshot),
        )
    }

    fn query_outcome(
        &self,
        fingerprint: &RequestFingerprint,
        entry: CacheEntry,
        handle: Option<Disposable>,
    ) -> Loadable<QueryResult> {
        match entry {
            CacheEntry::Fulfilled { snapshot } => {
                let mut handles = lock(&self.reads).remove(fingerprint).unwrap_or_default();
                handles.extend(handle);
                handles.push(self.retention.claim(fingerprint));
                Loadable::Ready(QueryResult {
                    data: snapshot.shared_data(),
                    snapshot,
                    disposable: Disposable::all(handles),
                })
            }
            CacheEntry::Pending { placeholder } => {
                if let Some(handle) = handle {
                    self.hold_read(fingerprint, handle);
                }
                Loadable::Pending(placeholder)
            }
            // The request already terminated and released its retention.
            CacheEntry::Failed { error } => Loadable::Failed(error),
        }
    }

    fn hold_read(&self, fingerprint: &RequestFingerprint, handle: Disposable) {
        if !handle.is_active() {
            return;
        }
        // Checked under the lock so a terminal event either sees this handle
        // or happened before it and leaves nothing to hold.
        let mut reads = lock(&self.reads);
        if self.requests.is_in_flight(fingerprint) {
            reads.entry(fingerprint.clone()).or_default().push(handle);
        }
    }

    fn release_reads(&self, fingerprint: &RequestFingerprint) -> bool {
        let handles = lock(&self.reads).remove(fingerprint);
        let Some(handles) = handles else {
            return false;
        };
        debug!(fingerprint = %fingerprint.digest(), handles = handles.len(), "Releasing read-started fetches");
        let mut handle = Disposable::all(handles);
        handle.dispose();
        true
    }

    fn fetch(&self, operation: &OperationDescriptor, options: ReadOptions) -> LatchResult<Disposable> {
        let fingerprint = &operation.fingerprint;
        let decision = decide(options, || self.environment.check(operation));
        debug!(
            fingerprint = %fingerprint.digest(),
            fetch_policy = %options.fetch_policy,
            read_policy = %options.read_policy,
            read_locally = decision.read_locally,
            should_fetch = decision.should_fetch,
            "Fetching query"
        );

        let mut accepted = false;
        if decision.read_locally {
            let snapshot = SnapshotSet::Singular(self.environment.lookup(&operation.root));
            if decision.accepts(&snapshot) {
                self.results
                    .set(fingerprint.clone(), CacheEntry::Fulfilled { snapshot });
                accepted = true;
            }
        }

        if decision.should_fetch {
            return Ok(self.execute(operation, decision));
        }
        if accepted {
            return Ok(Disposable::noop());
        }

        let in_flight = self
            .requests
            .placeholder(fingerprint)
            .or_else(|| self.environment.in_flight_request(operation));
        match in_flight {
            Some(placeholder) => {
                self.wait_for(operation, decision, placeholder);
                Ok(Disposable::noop())
            }
            None => Err(ReadError::NotAvailable {
                fingerprint: fingerprint.clone(),
            }
            .into()),
        }
    }

    /// Start or join the network request for `operation`.
    fn execute(&self, operation: &OperationDescriptor, decision: FetchDecision) -> Disposable {
        let fingerprint = operation.fingerprint.clone();
        let state = Arc::new(Mutex::new(FetchState {
            retention: Some(self.environment.retain(operation)),
            ..FetchState::default()
        }));

        let observer = self.fetch_observer(operation, decision, &state);
        let environment = Arc::clone(&self.environment);
        let subscription = self.requests.subscribe_or_join(
            &fingerprint,
            |sink| environment.execute(operation, sink),
            observer,
        );

        if let Some(placeholder) = self.requests.placeholder(&fingerprint) {
            let fulfilled = self
                .results
                .peek(&fingerprint)
                .is_some_and(|entry| entry.is_fulfilled());
            if !fulfilled {
                self.results
                    .set(fingerprint.clone(), CacheEntry::Pending { placeholder });
            }
        }
        lock(&state).subscription = Some(subscription);

        let results = self.results.clone();
        let timers = self.retention.clone();
        Disposable::new(move || {
            let (subscription, retention, window) = {
                let mut state = lock(&state);
                (
                    state.subscription.take(),
                    state.retention.take(),
                    state.window.take(),
                )
            };
            if let Some(mut subscription) = subscription {
                if let Some(placeholder) = subscription.dispose() {
                    results.remove_if_pending(&fingerprint, &placeholder);
                }
            }
            if let Some(mut retention) = retention {
                retention.dispose();
            }
            if let Some(window) = window {
                timers.cancel(window);
            }
        })
    }

    fn fetch_observer(
        &self,
        operation: &OperationDescriptor,
        decision: FetchDecision,
        state: &Arc<Mutex<FetchState>>,
    ) -> Observer {
        let fingerprint = operation.fingerprint.clone();
        let root = operation.root.clone();
        let environment = Arc::clone(&self.environment);
        let results = self.results.clone();
        let requests = self.requests.clone();
        let timers = self.retention.clone();
        let reads = Arc::clone(&self.reads);
        let state = Arc::clone(state);

        Arc::new(move |event: &RequestEvent| {
            if event.is_terminal() {
                // Nothing left to cancel; windows time out on their own.
                lock(&reads).remove(&fingerprint);
            }
            match event {
                RequestEvent::Next(_) => {
                    let snapshot = SnapshotSet::Singular(environment.lookup(&root));
                    if decision.accept_partial || !snapshot.has_missing_data() {
                        results.set(fingerprint.clone(), CacheEntry::Fulfilled { snapshot });
                    } else if let Some(placeholder) = requests.placeholder(&fingerprint) {
                        // Incremental payload; wait for the next one.
                        let fulfilled = results
                            .peek(&fingerprint)
                            .is_some_and(|entry| entry.is_fulfilled());
                        if !fulfilled {
                            results.set(fingerprint.clone(), CacheEntry::Pending { placeholder });
                        }
                    }
                }
                RequestEvent::Error(error) => {
                    warn!(fingerprint = %fingerprint.digest(), %error, "Query request failed");
                    results.set(
                        fingerprint.clone(),
                        CacheEntry::Failed {
                            error: error.clone(),
                        },
                    );
                    let retention = lock(&state).retention.take();
                    if let Some(mut retention) = retention {
                        retention.dispose();
                    }
                }
                RequestEvent::Complete => {
                    let fulfilled = results
                        .peek(&fingerprint)
                        .is_some_and(|entry| entry.is_fulfilled());
                    if !fulfilled {
                        let snapshot = SnapshotSet::Singular(environment.lookup(&root));
                        results.set(fingerprint.clone(), CacheEntry::Fulfilled { snapshot });
                    }
                    let retention = lock(&state).retention.take();
                    if let Some(retention) = retention {
                        let window = timers.start(fingerprint.clone(), retention);
                        lock(&state).window = Some(window);
                    }
                }
            }
        })
    }

    /// Suspend on a request this call did not start.
    fn wait_for(&self, operation: &OperationDescriptor, decision: FetchDecision, placeholder: Placeholder) {
        let fingerprint = operation.fingerprint.clone();
        debug!(fingerprint = %fingerprint.digest(), "Joining request already in flight");
        self.results.set(
            fingerprint.clone(),
            CacheEntry::Pending {
                placeholder: placeholder.clone(),
            },
        );

        let results = self.results.clone();
        let environment = Arc::clone(&self.environment);
        let root = operation.root.clone();
        let waiting = placeholder.clone();
        placeholder.on_settled(move |settlement| match settlement {
            Settlement::Resolved => {
                let snapshot = SnapshotSet::Singular(environment.lookup(&root));
                if decision.accepts(&snapshot) {
                    results.replace_if_pending(
                        &fingerprint,
                        &waiting,
                        CacheEntry::Fulfilled { snapshot },
                    );
                } else {
                    results.remove_if_pending(&fingerprint, &waiting);
                }
            }
            Settlement::Rejected(error) => {
                results.replace_if_pending(
                    &fingerprint,
                    &waiting,
                    CacheEntry::Failed {
                        error: error.clone(),
                    },
                );
            }
        });
    }

    // ------------------------------------------------------------------------
    // Fragments
    // ------------------------------------------------------------------------

    /// Read every declared fragment through the refs a parent passed down.
    ///
    /// Pending and failed fragments short-circuit the whole set.
    pub fn read_fragments(
        &self,
        spec: &FragmentSpec,
        refs: &FragmentRefs,
        variables: &Variables,
        parent: &OperationDescriptor,
    ) -> Loadable<BTreeMap<String, FragmentResult>> {
        let mut results = BTreeMap::new();
        for (key, fragment) in spec.iter() {
            let reference = match refs.get(key) {
                Some(Some(reference)) => reference,
                Some(None) => {
                    results.insert(key.clone(), FragmentResult::null());
                    continue;
                }
                None => {
                    return Loadable::Failed(ReadError::MissingFragmentRef { key: key.clone() }.into())
                }
            };
            match self.read_fragment(key, fragment, reference, variables, parent) {
                Loadable::Ready(result) => {
                    results.insert(key.clone(), result);
                }
                Loadable::Pending(placeholder) => return Loadable::Pending(placeholder),
                Loadable::Failed(error) => return Loadable::Failed(error),
            }
        }
        Loadable::Ready(results)
    }

    fn read_fragment(
        &self,
        key: &str,
        fragment: &Fragment,
        reference: &FragmentRef,
        variables: &Variables,
        parent: &OperationDescriptor,
    ) -> Loadable<FragmentResult> {
        let fingerprint = RequestFingerprint::for_fragment(fragment, reference, variables);
        match self.results.get(&fingerprint) {
            Some(CacheEntry::Fulfilled { snapshot }) => return Loadable::Ready(snapshot.into()),
            Some(CacheEntry::Pending { placeholder }) => return Loadable::Pending(placeholder),
            Some(CacheEntry::Failed { error }) => return Loadable::Failed(error),
            None => {}
        }

        let Some(selectors) = SelectorSet::for_fragment(fragment, reference, variables) else {
            return Loadable::Failed(
                ReadError::UnresolvedSelector {
                    fragment: fragment.name.clone(),
                    key: key.to_string(),
                }
                .into(),
            );
        };

        let snapshot = lookup_set(self.environment.as_ref(), &selectors);
        if !snapshot.has_missing_data() {
            self.results.set(
                fingerprint,
                CacheEntry::Fulfilled {
                    snapshot: snapshot.clone(),
                },
            );
            return Loadable::Ready(snapshot.into());
        }

        let in_flight = self
            .requests
            .placeholder(&parent.fingerprint)
            .or_else(|| self.environment.in_flight_request(parent));
        let Some(placeholder) = in_flight else {
            return Loadable::Failed(
                ReadError::MissingFragmentData {
                    fragment: fragment.name.clone(),
                    parent: parent.fingerprint.clone(),
                }
                .into(),
            );
        };

        debug!(
            fragment = %fragment.name,
            parent = %parent.fingerprint.digest(),
            "Fragment has missing data, waiting on parent request"
        );
        self.results.set(
            fingerprint.clone(),
            CacheEntry::Pending {
                placeholder: placeholder.clone(),
            },
        );
        let results = self.results.clone();
        let waiting = placeholder.clone();
        placeholder.on_settled(move |settlement| match settlement {
            // Re-read the store on the next read.
            Settlement::Resolved => {
                results.remove_if_pending(&fingerprint, &waiting);
            }
            Settlement::Rejected(error) => {
                results.replace_if_pending(
                    &fingerprint,
                    &waiting,
                    CacheEntry::Failed {
                        error: error.clone(),
                    },
                );
            }
        });
        Loadable::Pending(placeholder)
    }

    pub fn invalidate_fragment(&self, fragment: &Fragment, reference: &FragmentRef, variables: &Variables) -> bool {
        self.invalidate(&RequestFingerprint::for_fragment(fragment, reference, variables))
    }

    /// Write a complete fragment snapshot straight into the cache.
    pub fn set_fragment(
        &self,
        fragment: &Fragment,
        reference: &FragmentRef,
        variables: &Variables,
        snapshot: SnapshotSet,
    ) -> bool {
        self.set(
            RequestFingerprint::for_fragment(fragment, reference, variables),
            snapshot,
        )
    }

    // ------------------------------------------------------------------------
    // Entries
    // ------------------------------------------------------------------------

    /// Remove the entry for `fingerprint` unconditionally.
    ///
    /// Fetches started by reads of the entry are released as by
    /// [`DataCache::release_query`]; fetch and preload handles are untouched.
    pub fn invalidate(&self, fingerprint: &RequestFingerprint) -> bool {
        let removed = self.results.delete(fingerprint);
        debug!(fingerprint = %fingerprint.digest(), removed, "Invalidated cache entry");
        self.release_reads(fingerprint);
        removed
    }

    fn set(&self, fingerprint: RequestFingerprint, snapshot: SnapshotSet) -> bool {
        if snapshot.has_missing_data() {
            debug!(fingerprint = %fingerprint.digest(), "Rejected snapshot with missing data");
            return false;
        }
        self.results.set(fingerprint, CacheEntry::Fulfilled { snapshot });
        true
    }

    /// Current entry for `fingerprint`, without touching recency.
    pub fn entry(&self, fingerprint: &RequestFingerprint) -> Option<CacheEntry> {
        self.results.peek(fingerprint)
    }

    pub fn stats(&self) -> CacheStats {
        self.results.stats()
    }

    pub fn in_flight_count(&self) -> usize {
        self.requests.len()
    }

    pub fn environment(&self) -> &Arc<dyn Environment> {
        &self.environment
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn requests(&self) -> &RequestRegistry {
        &self.requests
    }

    pub fn retention(&self) -> &RetentionTimers {
        &self.retention
    }
}

impl fmt::Debug for DataCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataCache")
            .field("environment", &self.environment.id())
            .field("entries", &self.results.len())
            .field("in_flight", &self.requests.len())
            .field("retention", &self.retention)
            .finish()
    }
}
