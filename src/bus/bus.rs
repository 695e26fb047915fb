//! # Event bus: named events broadcast to registered observers.
//!
//! [`EventBus`] posts a key + payload to every live observation of that key.
//! It owns a [`Registry`] for delivery, a pending-delivery list for deferred
//! posts, and a bounded log of isolated observer failures.
//!
//! ## Architecture
//! ```text
//! post(key, payload, Immediate) ──► Envelope ──► Registry::dispatch_envelope ──► observers
//!
//! post(key, payload, Queued) ─────► pending: [E1, E2, E3 ...]  (FIFO by post time)
//! post_coalesced(key, payload) ───► same key pending? replace payload in place
//!                                                     : append
//! drain() ────────────────────────► dispatch each pending envelope, in order
//!
//! failing/panicking observer ─────► error log (bounded) + warn!, fan-out continues
//! ```
//!
//! ## Rules
//! - **Immediate** delivery is synchronous on the caller's context; no
//!   implicit context switch.
//! - **Queued** delivery happens at the next `drain()`. A drain flushes the
//!   batch pending when it starts; events queued by callbacks during the drain
//!   wait for the following one.
//! - Coalescing keeps the slot (and sequence number) of the pending envelope
//!   and replaces only its payload.
//! - Invalid keys are rejected synchronously; observer failures never reach
//!   the poster.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{BusError, ObserverCallbackError, StreamError};
use crate::events::{Envelope, EventKey, IntoEventKey};
use crate::registry::{DispatchReport, ObservationHandle, Observer, Owner, Registry};
use crate::stream::Stream;
use crate::subscription::Subscription;

use super::builder::EventBusBuilder;
use super::context::{ContextHandle, DeliveryLoop};

/// How a post is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Deliver now, synchronously, in registration order.
    #[default]
    Immediate,
    /// Append to the pending list; delivered at the next drain.
    Queued,
}

/// What happened to a post.
#[derive(Debug, Clone)]
pub enum PostOutcome {
    /// Delivered immediately.
    Delivered(DispatchReport),
    /// Appended to the pending list.
    Queued,
    /// Replaced the payload of an already pending event with the same key.
    Coalesced,
}

struct BusInner<P> {
    cfg: Config,
    registry: Arc<Registry<P>>,
    pending: Mutex<VecDeque<Envelope<P>>>,
    errors: Mutex<VecDeque<ObserverCallbackError>>,
}

/// Observable event bus.
///
/// Explicitly constructed and passed around by clone (shared inner); there is
/// no process-wide instance.
pub struct EventBus<P> {
    inner: Arc<BusInner<P>>,
}

/// Non-owning reference to a bus, held by its own workers and observers.
pub(crate) struct WeakEventBus<P> {
    inner: Weak<BusInner<P>>,
}

impl<P> Clone for WeakEventBus<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<P> WeakEventBus<P> {
    pub(crate) fn upgrade(&self) -> Option<EventBus<P>> {
        self.inner.upgrade().map(|inner| EventBus { inner })
    }
}

impl<P> Clone for EventBus<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P> EventBus<P> {
    /// Underlying registry.
    pub fn registry(&self) -> &Arc<Registry<P>> {
        &self.inner.registry
    }
}

impl<P: Send + Sync + 'static> EventBus<P> {
    /// Creates a bus with [`Config::default`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a bus with the given configuration.
    #[must_use]
    pub fn with_config(cfg: Config) -> Self {
        Self {
            inner: Arc::new(BusInner {
                cfg,
                registry: Arc::new(Registry::new()),
                pending: Mutex::new(VecDeque::new()),
                errors: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Starts a builder (pre-registered observers, configuration).
    pub fn builder(cfg: Config) -> EventBusBuilder<P> {
        EventBusBuilder::new(cfg)
    }

    /// Configuration this bus was built with.
    pub fn config(&self) -> &Config {
        &self.inner.cfg
    }

    // ---- registration ----

    /// See [`Registry::register`].
    ///
    /// # Errors
    /// [`BusError::InvalidKey`] if `key` is empty.
    pub fn register<K, F>(&self, key: K, owner: &Owner, callback: F) -> Result<ObservationHandle, BusError>
    where
        K: IntoEventKey,
        F: Fn(&Envelope<P>) + Send + Sync + 'static,
    {
        self.inner.registry.register(key, owner, callback)
    }

    /// See [`Registry::observe`].
    ///
    /// # Errors
    /// [`BusError::InvalidKey`] if `key` is empty.
    pub fn observe<K, F>(&self, key: K, callback: F) -> Result<ObservationHandle, BusError>
    where
        K: IntoEventKey,
        F: Fn(&Envelope<P>) + Send + Sync + 'static,
    {
        self.inner.registry.observe(key, callback)
    }

    /// See [`Registry::register_observer`].
    ///
    /// # Errors
    /// [`BusError::InvalidKey`] if `key` is empty.
    pub fn register_observer<K>(
        &self,
        key: K,
        owner: Option<&Owner>,
        observer: Arc<dyn Observer<P>>,
    ) -> Result<ObservationHandle, BusError>
    where
        K: IntoEventKey,
    {
        self.inner.registry.register_observer(key, owner, observer)
    }

    /// See [`Registry::observe_scoped`].
    ///
    /// # Errors
    /// [`BusError::InvalidKey`] if `key` is empty.
    pub fn observe_scoped<K, F>(&self, key: K, callback: F) -> Result<Subscription, BusError>
    where
        K: IntoEventKey,
        F: Fn(&Envelope<P>) + Send + Sync + 'static,
    {
        self.inner.registry.observe_scoped(key, callback)
    }

    /// See [`Registry::unregister`]. Idempotent.
    pub fn unregister(&self, handle: &ObservationHandle) -> bool {
        self.inner.registry.unregister(handle)
    }

    /// See [`Registry::unregister_all`].
    pub fn unregister_all(&self, owner: &Owner) -> usize {
        self.inner.registry.unregister_all(owner)
    }

    // ---- posting ----

    /// Posts `payload` under `key`.
    ///
    /// # Errors
    /// - [`BusError::InvalidKey`] if `key` is empty.
    /// - [`BusError::QueueFull`] for `Queued` posts beyond `Config::pending_capacity`.
    pub fn post<K>(&self, key: K, payload: P, mode: DeliveryMode) -> Result<PostOutcome, BusError>
    where
        K: IntoEventKey,
    {
        let key = key.into_event_key()?;
        match mode {
            DeliveryMode::Immediate => {
                let report = self.deliver(&Envelope::new(key, payload));
                Ok(PostOutcome::Delivered(report))
            }
            DeliveryMode::Queued => {
                self.enqueue(Envelope::new(key, payload))?;
                Ok(PostOutcome::Queued)
            }
        }
    }

    /// Queues `payload` under `key`, replacing the payload of a pending event
    /// with the same key instead of appending a duplicate.
    ///
    /// # Errors
    /// - [`BusError::InvalidKey`] if `key` is empty.
    /// - [`BusError::QueueFull`] if a new slot is needed and the list is full.
    pub fn post_coalesced<K>(&self, key: K, payload: P) -> Result<PostOutcome, BusError>
    where
        K: IntoEventKey,
    {
        let key = key.into_event_key()?;
        // Search and append under one lock: concurrent producers of the same
        // key must end up sharing a single slot.
        let mut pending = self.inner.pending.lock();
        if let Some(slot) = pending.iter_mut().rev().find(|e| e.key == key) {
            slot.payload = Arc::new(payload);
            return Ok(PostOutcome::Coalesced);
        }
        self.push_pending(&mut pending, Envelope::new(key, payload))?;
        Ok(PostOutcome::Queued)
    }

    /// Delivers every event pending when the call starts, in FIFO order.
    ///
    /// Returns the number of envelopes dispatched.
    pub fn drain(&self) -> usize {
        let batch = std::mem::take(&mut *self.inner.pending.lock());
        if batch.is_empty() {
            return 0;
        }
        debug!(events = batch.len(), "draining pending events");
        let count = batch.len();
        for envelope in batch {
            self.deliver(&envelope);
        }
        count
    }

    /// Number of events awaiting the next drain.
    pub fn pending_len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    // ---- diagnostics ----

    /// Removes and returns recorded observer failures, oldest first.
    pub fn take_errors(&self) -> Vec<ObserverCallbackError> {
        self.inner.errors.lock().drain(..).collect()
    }

    /// Number of recorded observer failures.
    pub fn error_count(&self) -> usize {
        self.inner.errors.lock().len()
    }

    /// Records a failure that happened outside the synchronous dispatch path
    /// (async subscriber workers).
    pub(crate) fn record_error(&self, failure: ObserverCallbackError) {
        let cap = self.inner.cfg.error_log_capacity_clamped();
        let mut errors = self.inner.errors.lock();
        while errors.len() >= cap {
            errors.pop_front();
        }
        errors.push_back(failure);
    }

    pub(crate) fn downgrade(&self) -> WeakEventBus<P> {
        WeakEventBus {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // ---- bridges ----

    /// Bridges `key` into the stream core: every post becomes a value.
    ///
    /// The observation is registered per subscriber and removed when the
    /// subscription ends. An invalid key fails each subscription with
    /// [`StreamError::Bus`].
    pub fn stream<K>(&self, key: K) -> Stream<Envelope<P>>
    where
        K: IntoEventKey,
    {
        let key: Result<EventKey, BusError> = key.into_event_key();
        let registry = Arc::clone(&self.inner.registry);
        Stream::create(move |sink| match &key {
            Err(err) => {
                sink.error(StreamError::from(err.clone()));
                Subscription::empty()
            }
            Ok(key) => {
                let out = sink.clone();
                match registry.observe_scoped(key, move |env: &Envelope<P>| out.next(env.clone())) {
                    Ok(sub) => sub,
                    Err(err) => {
                        sink.error(StreamError::from(err));
                        Subscription::empty()
                    }
                }
            }
        })
    }

    /// Creates a channel into this bus for producers on other contexts.
    ///
    /// Run the returned [`DeliveryLoop`] on the delivery context; hand clones
    /// of the [`ContextHandle`] to background producers.
    pub fn delivery_context(&self) -> (ContextHandle<P>, DeliveryLoop<P>) {
        super::context::channel(self.clone())
    }

    fn enqueue(&self, envelope: Envelope<P>) -> Result<(), BusError> {
        let mut pending = self.inner.pending.lock();
        self.push_pending(&mut pending, envelope)
    }

    fn push_pending(&self, pending: &mut VecDeque<Envelope<P>>, envelope: Envelope<P>) -> Result<(), BusError> {
        if let Some(capacity) = self.inner.cfg.pending_limit() {
            if pending.len() >= capacity {
                warn!(key = %envelope.key, capacity, "pending queue full, post rejected");
                return Err(BusError::QueueFull { capacity });
            }
        }
        pending.push_back(envelope);
        Ok(())
    }

    fn deliver(&self, envelope: &Envelope<P>) -> DispatchReport {
        let report = self.inner.registry.dispatch_envelope(envelope);
        for failure in &report.failures {
            self.record_error(failure.clone());
        }
        report
    }
}

impl<P: Send + Sync + 'static> Default for EventBus<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> fmt::Debug for EventBus<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("registry", &self.inner.registry)
            .field("pending", &self.inner.pending.lock().len())
            .field("errors", &self.inner.errors.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ObserverError;
    use crate::registry::ObserverFn;

    #[derive(Debug, Clone, PartialEq)]
    struct Payload {
        x: i32,
    }

    type Log = Arc<Mutex<Vec<String>>>;

    fn tagged(log: &Log, tag: &'static str) -> impl Fn(&Envelope<Payload>) + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |ev| log.lock().push(format!("{tag}:{}", ev.payload().x))
    }

    #[test]
    fn immediate_post_reaches_observers_in_order_then_unregister() {
        let bus = EventBus::<Payload>::new();
        let log: Log = Arc::default();
        let o1 = bus.observe("K", tagged(&log, "O1")).unwrap();
        bus.observe("K", tagged(&log, "O2")).unwrap();

        let outcome = bus.post("K", Payload { x: 1 }, DeliveryMode::Immediate).unwrap();
        assert!(matches!(outcome, PostOutcome::Delivered(ref r) if r.delivered == 2));

        bus.unregister(&o1);
        bus.unregister(&o1);
        bus.post("K", Payload { x: 2 }, DeliveryMode::Immediate).unwrap();

        assert_eq!(*log.lock(), vec!["O1:1", "O2:1", "O2:2"]);
    }

    #[test]
    fn invalid_key_is_rejected_synchronously() {
        let bus = EventBus::<Payload>::new();
        assert_eq!(
            bus.post("", Payload { x: 0 }, DeliveryMode::Queued).unwrap_err(),
            BusError::InvalidKey { key: String::new() }
        );
        assert!(bus.post_coalesced("  ", Payload { x: 0 }).is_err());
        assert_eq!(bus.pending_len(), 0);
    }

    #[test]
    fn queued_posts_wait_for_drain_in_fifo_order() {
        let bus = EventBus::<Payload>::new();
        let log: Log = Arc::default();
        bus.observe("a", tagged(&log, "a")).unwrap();
        bus.observe("b", tagged(&log, "b")).unwrap();

        bus.post("a", Payload { x: 1 }, DeliveryMode::Queued).unwrap();
        bus.post("b", Payload { x: 2 }, DeliveryMode::Queued).unwrap();
        bus.post("a", Payload { x: 3 }, DeliveryMode::Queued).unwrap();
        assert!(log.lock().is_empty());
        assert_eq!(bus.pending_len(), 3);

        assert_eq!(bus.drain(), 3);
        assert_eq!(*log.lock(), vec!["a:1", "b:2", "a:3"]);
        assert_eq!(bus.drain(), 0);
    }

    #[test]
    fn coalesced_posts_keep_one_slot_with_latest_payload() {
        let bus = EventBus::<Payload>::new();
        let log: Log = Arc::default();
        bus.observe("layout", tagged(&log, "layout")).unwrap();
        bus.observe("other", tagged(&log, "other")).unwrap();

        assert!(matches!(
            bus.post_coalesced("layout", Payload { x: 1 }).unwrap(),
            PostOutcome::Queued
        ));
        bus.post("other", Payload { x: 9 }, DeliveryMode::Queued).unwrap();
        assert!(matches!(
            bus.post_coalesced("layout", Payload { x: 2 }).unwrap(),
            PostOutcome::Coalesced
        ));
        assert_eq!(bus.pending_len(), 2);

        bus.drain();
        // original position of "layout" is preserved
        assert_eq!(*log.lock(), vec!["layout:2", "other:9"]);
    }

    #[test]
    fn pending_capacity_bounds_queued_posts_but_not_coalescing() {
        let bus = EventBus::<Payload>::with_config(Config {
            pending_capacity: 1,
            ..Config::default()
        });
        bus.post("a", Payload { x: 1 }, DeliveryMode::Queued).unwrap();
        assert_eq!(
            bus.post("b", Payload { x: 2 }, DeliveryMode::Queued).unwrap_err(),
            BusError::QueueFull { capacity: 1 }
        );
        assert!(matches!(
            bus.post_coalesced("a", Payload { x: 3 }).unwrap(),
            PostOutcome::Coalesced
        ));
    }

    #[test]
    fn posts_queued_during_drain_wait_for_next_drain() {
        let bus = EventBus::<Payload>::new();
        let log: Log = Arc::default();
        {
            let bus2 = bus.clone();
            bus.observe("ping", move |ev: &Envelope<Payload>| {
                bus2.post("pong", ev.payload().clone(), DeliveryMode::Queued)
                    .expect("queued post");
            })
            .unwrap();
        }
        bus.observe("pong", tagged(&log, "pong")).unwrap();

        bus.post("ping", Payload { x: 4 }, DeliveryMode::Queued).unwrap();
        assert_eq!(bus.drain(), 1);
        assert!(log.lock().is_empty());
        assert_eq!(bus.drain(), 1);
        assert_eq!(*log.lock(), vec!["pong:4"]);
    }

    #[test]
    fn observer_failures_are_recorded_not_propagated() {
        let bus = EventBus::<Payload>::with_config(Config {
            error_log_capacity: 2,
            ..Config::default()
        });
        let log: Log = Arc::default();
        bus.register_observer(
            "k",
            None,
            Arc::new(ObserverFn::new("validator", |ev: &Envelope<Payload>| -> Result<(), ObserverError> {
                Err(ObserverError::new(format!("bad x={}", ev.payload().x)))
            })),
        )
        .unwrap();
        bus.observe("k", tagged(&log, "after")).unwrap();

        for x in 0..3 {
            bus.post("k", Payload { x }, DeliveryMode::Immediate).unwrap();
        }

        assert_eq!(log.lock().len(), 3);
        let errors = bus.take_errors();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].message, "bad x=1");
        assert_eq!(errors[1].message, "bad x=2");
        assert_eq!(bus.error_count(), 0);
    }

    #[test]
    fn owner_teardown_removes_its_observations() {
        let bus = EventBus::<Payload>::new();
        let log: Log = Arc::default();
        let vm = Owner::new("profile-vm");
        bus.register("k", &vm, tagged(&log, "vm")).unwrap();
        bus.register("k2", &vm, tagged(&log, "vm2")).unwrap();
        assert_eq!(bus.unregister_all(&vm), 2);
        bus.post("k", Payload { x: 1 }, DeliveryMode::Immediate).unwrap();
        assert!(log.lock().is_empty());
    }

    #[test]
    fn bus_stream_bridges_posts_and_detaches_on_drop() {
        let bus = EventBus::<Payload>::new();
        let seen: Arc<Mutex<Vec<i32>>> = Arc::default();
        let s = Arc::clone(&seen);
        let sub = bus
            .stream("k")
            .map(|ev| ev.payload().x)
            .subscribe_values(move |x| s.lock().push(x));

        bus.post("k", Payload { x: 1 }, DeliveryMode::Immediate).unwrap();
        bus.post("k", Payload { x: 2 }, DeliveryMode::Queued).unwrap();
        bus.drain();
        assert_eq!(bus.registry().len(), 1);

        drop(sub);
        assert!(bus.registry().is_empty());
        bus.post("k", Payload { x: 3 }, DeliveryMode::Immediate).unwrap();
        assert_eq!(*seen.lock(), vec![1, 2]);
    }

    #[test]
    fn bus_stream_with_invalid_key_errors() {
        let bus = EventBus::<Payload>::new();
        let errors: Arc<Mutex<Vec<String>>> = Arc::default();
        let e = Arc::clone(&errors);
        let _sub = bus
            .stream("")
            .subscribe(|_| {}, move |err| e.lock().push(err.as_label().to_string()), || {});
        assert_eq!(*errors.lock(), vec!["stream_bus"]);
    }

    #[test]
    fn concurrent_coalescing_producers_share_one_slot() {
        let bus = EventBus::<Payload>::with_config(Config {
            pending_capacity: 1,
            ..Config::default()
        });
        for _ in 0..50 {
            std::thread::scope(|scope| {
                for x in 0..8 {
                    let bus = bus.clone();
                    scope.spawn(move || {
                        let outcome = bus.post_coalesced("layout", Payload { x });
                        assert!(outcome.is_ok(), "coalescing must never overflow: {outcome:?}");
                    });
                }
            });
            assert_eq!(bus.pending_len(), 1);
            assert_eq!(bus.drain(), 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn dispatches_from_many_threads_never_overlap() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let bus = EventBus::<Payload>::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let calls = Arc::new(AtomicUsize::new(0));
        {
            let (inside, peak, calls) = (Arc::clone(&inside), Arc::clone(&peak), Arc::clone(&calls));
            bus.observe("k", move |_: &Envelope<Payload>| {
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::yield_now();
                calls.fetch_add(1, Ordering::SeqCst);
                inside.fetch_sub(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let bus = bus.clone();
                tokio::task::spawn_blocking(move || {
                    for x in 0..250 {
                        bus.post("k", Payload { x }, DeliveryMode::Immediate).unwrap();
                    }
                })
            })
            .collect();
        for p in producers {
            p.await.unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1000);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
