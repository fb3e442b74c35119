//! In-flight request registry.
//!
//! At most one network operation runs per fingerprint. Later callers join the
//! running operation: they receive every event already delivered (replayed in
//! order) and then live events. The operation is cancelled only when its last
//! subscriber disposes.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use latch_core::{Disposable, LatchError, RequestFingerprint};
use serde_json::Value;
use tracing::{debug, trace, warn};

use crate::lock;
use crate::placeholder::Placeholder;

/// One event of a network operation.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestEvent {
    /// A payload was written to the store.
    Next(Value),
    /// The operation failed. Terminal.
    Error(LatchError),
    /// The operation finished. Terminal.
    Complete,
}

impl RequestEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestEvent::Error(_) | RequestEvent::Complete)
    }
}

/// Callback receiving request events.
pub type Observer = Arc<dyn Fn(&RequestEvent) + Send + Sync>;

struct InFlightRequest {
    id: u64,
    events: Vec<RequestEvent>,
    observers: Vec<(u64, Observer)>,
    cancel: Option<Disposable>,
    /// Settles on the next data-bearing event; replaced after each payload.
    placeholder: Placeholder,
}

#[derive(Default)]
struct RegistryState {
    next_request: u64,
    next_observer: u64,
    requests: HashMap<RequestFingerprint, InFlightRequest>,
}

/// Table of in-flight network operations keyed by fingerprint.
#[derive(Clone, Default)]
pub struct RequestRegistry {
    inner: Arc<Mutex<RegistryState>>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the operation in flight for `fingerprint`, or start one.
    ///
    /// `start` runs only when nothing is in flight. It receives the sink the
    /// network layer delivers events into and returns the cancel handle. Events
    /// emitted synchronously from `start` are delivered to `observer` as usual.
    pub fn subscribe_or_join<F>(
        &self,
        fingerprint: &RequestFingerprint,
        start: F,
        observer: Observer,
    ) -> RequestSubscription
    where
        F: FnOnce(EventSink) -> Disposable,
    {
        let (request_id, observer_id, history) = {
            let mut state = lock(&self.inner);
            state.next_observer += 1;
            let observer_id = state.next_observer;

            if let Some(request) = state.requests.get_mut(fingerprint) {
                request.observers.push((observer_id, Arc::clone(&observer)));
                (request.id, observer_id, Some(request.events.clone()))
            } else {
                state.next_request += 1;
                let request_id = state.next_request;
                state.requests.insert(
                    fingerprint.clone(),
                    InFlightRequest {
                        id: request_id,
                        events: Vec::new(),
                        observers: vec![(observer_id, Arc::clone(&observer))],
                        cancel: None,
                        placeholder: Placeholder::new(),
                    },
                );
                (request_id, observer_id, None)
            }
        };

        match history {
            Some(events) => {
                debug!(
                    fingerprint = %fingerprint.digest(),
                    replayed = events.len(),
                    "Joined in-flight request"
                );
                for event in &events {
                    observer(event);
                }
            }
            None => {
                debug!(fingerprint = %fingerprint.digest(), "Starting network request");
                let sink = EventSink {
                    registry: self.clone(),
                    fingerprint: fingerprint.clone(),
                    request_id,
                };
                let cancel = start(sink);

                let mut state = lock(&self.inner);
                match state.requests.get_mut(fingerprint) {
                    Some(request) if request.id == request_id => request.cancel = Some(cancel),
                    // Terminated while starting; there is nothing left to cancel.
                    _ => trace!(fingerprint = %fingerprint.digest(), "Request settled during start"),
                }
            }
        }

        RequestSubscription {
            registry: self.clone(),
            fingerprint: fingerprint.clone(),
            request_id,
            observer_id,
            active: true,
        }
    }

    fn deliver(&self, fingerprint: &RequestFingerprint, request_id: u64, event: RequestEvent) {
        let (observers, settled) = {
            let mut state = lock(&self.inner);
            let request = match state.requests.get_mut(fingerprint) {
                Some(request) if request.id == request_id => request,
                _ => {
                    warn!(fingerprint = %fingerprint.digest(), ?event, "Event for a request that is no longer in flight");
                    return;
                }
            };

            request.events.push(event.clone());
            let observers: Vec<Observer> = request.observers.iter().map(|(_, o)| Arc::clone(o)).collect();
            let settled = if event.is_terminal() {
                state
                    .requests
                    .remove(fingerprint)
                    .map(|request| request.placeholder)
            } else {
                Some(std::mem::take(&mut request.placeholder))
            };
            (observers, settled)
        };

        for observer in &observers {
            observer(&event);
        }

        // Observers update the cache before waiters are woken.
        if let Some(placeholder) = settled {
            match &event {
                RequestEvent::Error(error) => placeholder.reject(error.clone()),
                RequestEvent::Next(_) | RequestEvent::Complete => placeholder.resolve(),
            };
        }
    }

    fn unsubscribe(&self, fingerprint: &RequestFingerprint, request_id: u64, observer_id: u64) -> Option<Placeholder> {
        let cancelled = {
            let mut state = lock(&self.inner);
            let request = match state.requests.get_mut(fingerprint) {
                Some(request) if request.id == request_id => request,
                _ => return None,
            };
            request.observers.retain(|(id, _)| *id != observer_id);
            if !request.observers.is_empty() {
                trace!(
                    fingerprint = %fingerprint.digest(),
                    refcount = request.observers.len(),
                    "Subscriber left in-flight request"
                );
                return None;
            }
            state.requests.remove(fingerprint)?
        };

        debug!(fingerprint = %fingerprint.digest(), "Cancelling request with no subscribers");
        let InFlightRequest {
            cancel, placeholder, ..
        } = cancelled;
        if let Some(mut cancel) = cancel {
            cancel.dispose();
        }
        // Waiters retry and find the entry gone.
        placeholder.resolve();
        Some(placeholder)
    }

    /// Placeholder settling on the next payload of the request in flight.
    pub fn placeholder(&self, fingerprint: &RequestFingerprint) -> Option<Placeholder> {
        lock(&self.inner)
            .requests
            .get(fingerprint)
            .map(|request| request.placeholder.clone())
    }

    pub fn is_in_flight(&self, fingerprint: &RequestFingerprint) -> bool {
        lock(&self.inner).requests.contains_key(fingerprint)
    }

    /// Number of subscribers attached to the request in flight.
    pub fn refcount(&self, fingerprint: &RequestFingerprint) -> usize {
        lock(&self.inner)
            .requests
            .get(fingerprint)
            .map_or(0, |request| request.observers.len())
    }

    /// Events delivered so far to the request in flight.
    pub fn event_log(&self, fingerprint: &RequestFingerprint) -> Option<Vec<RequestEvent>> {
        lock(&self.inner)
            .requests
            .get(fingerprint)
            .map(|request| request.events.clone())
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for RequestRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestRegistry")
            .field("in_flight", &self.len())
            .finish()
    }
}

/// Where the network layer delivers events for one started request.
///
/// Events after a terminal event, or after cancellation, are dropped.
#[derive(Clone)]
pub struct EventSink {
    registry: RequestRegistry,
    fingerprint: RequestFingerprint,
    request_id: u64,
}

impl EventSink {
    pub fn fingerprint(&self) -> &RequestFingerprint {
        &self.fingerprint
    }

    pub fn next(&self, payload: Value) {
        self.registry
            .deliver(&self.fingerprint, self.request_id, RequestEvent::Next(payload));
    }

    pub fn error(&self, error: impl Into<LatchError>) {
        self.registry
            .deliver(&self.fingerprint, self.request_id, RequestEvent::Error(error.into()));
    }

    pub fn complete(&self) {
        self.registry
            .deliver(&self.fingerprint, self.request_id, RequestEvent::Complete);
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("fingerprint", &self.fingerprint)
            .field("request_id", &self.request_id)
            .finish()
    }
}

/// One subscriber's hold on an in-flight request.
#[derive(Debug)]
pub struct RequestSubscription {
    registry: RequestRegistry,
    fingerprint: RequestFingerprint,
    request_id: u64,
    observer_id: u64,
    active: bool,
}

impl RequestSubscription {
    pub fn fingerprint(&self) -> &RequestFingerprint {
        &self.fingerprint
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Detach this subscriber.
    ///
    /// When it was the last one, the operation is cancelled and its pending
    /// placeholder is returned (already resolved).
    pub fn dispose(&mut self) -> Option<Placeholder> {
        if !std::mem::replace(&mut self.active, false) {
            return None;
        }
        self.registry
            .unsubscribe(&self.fingerprint, self.request_id, self.observer_id)
    }
}
