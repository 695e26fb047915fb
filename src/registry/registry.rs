//! # Subscription registry: observer registrations per event key.
//!
//! ## Architecture
//! ```text
//! register(key, owner, cb) ──► HashMap<EventKey, Vec<Observation>>   (registration order)
//!
//! dispatch(envelope)
//!   ├─► lock dispatch (re-entrant: nested posts from callbacks are allowed)
//!   ├─► snapshot observations for envelope.key
//!   └─► for each in snapshot:
//!         ├─ inactive (unregistered meanwhile) ─► skip
//!         ├─ owner dropped                     ─► prune, skip
//!         └─ on_event(envelope) under catch_unwind
//!               ├─ Ok      ─► delivered += 1
//!               └─ Err/panic ─► failure recorded, continue
//! ```
//!
//! ## Rules
//! - Observers for one key run in registration order.
//! - The snapshot is taken at dispatch start: observers registered by a callback
//!   first run on the next dispatch; observers unregistered by a callback are
//!   skipped for the rest of this dispatch.
//! - Dispatches on one registry never overlap across threads.
//! - `unregister` is idempotent.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, warn};

use crate::error::{panic_message, BusError, ObserverCallbackError};
use crate::events::{Envelope, EventKey, IntoEventKey};
use crate::subscription::Subscription;

use super::observer::Observer;
use super::owner::{Owner, OwnerRef};

/// Handle identifying one registration.
///
/// Pass it to [`Registry::unregister`]; it does not cancel on drop (use
/// [`Registry::observe_scoped`] for that).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObservationHandle {
    id: u64,
    key: EventKey,
}

impl ObservationHandle {
    /// Key the observation was registered under.
    #[inline]
    pub fn key(&self) -> &EventKey {
        &self.key
    }
}

/// Outcome of one dispatch.
#[derive(Debug, Default, Clone)]
pub struct DispatchReport {
    /// Observers whose callback returned successfully.
    pub delivered: usize,
    /// Observations dropped because their owner was released.
    pub pruned: usize,
    /// Callbacks that returned an error or panicked.
    pub failures: Vec<ObserverCallbackError>,
}

impl DispatchReport {
    /// Number of failed callbacks.
    #[inline]
    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

struct Observation<P> {
    id: u64,
    name: Arc<str>,
    observer: Arc<dyn Observer<P>>,
    owner: Option<OwnerRef>,
    active: AtomicBool,
}

impl<P> Observation<P> {
    #[inline]
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    #[inline]
    fn owner_alive(&self) -> bool {
        self.owner.as_ref().map_or(true, OwnerRef::is_alive)
    }

    #[inline]
    fn is_live(&self) -> bool {
        self.is_active() && self.owner_alive()
    }

    #[inline]
    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

/// Registry of observations keyed by [`EventKey`].
pub struct Registry<P> {
    observations: Mutex<HashMap<EventKey, Vec<Arc<Observation<P>>>>>,
    dispatch_lock: ReentrantMutex<()>,
    next_id: AtomicU64,
}

impl<P> Registry<P> {
    /// Marks the observation inactive and removes it.
    ///
    /// Returns `true` if it was still registered. Calling it again is a no-op.
    pub fn unregister(&self, handle: &ObservationHandle) -> bool {
        let mut map = self.observations.lock();
        let Some(list) = map.get_mut(&handle.key) else {
            return false;
        };
        let Some(pos) = list.iter().position(|o| o.id == handle.id) else {
            return false;
        };
        let removed = list.remove(pos);
        removed.deactivate();
        if list.is_empty() {
            map.remove(&handle.key);
        }
        true
    }
}

impl<P: Send + Sync + 'static> Registry<P> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            observations: Mutex::new(HashMap::new()),
            dispatch_lock: ReentrantMutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers `callback` for `key` on behalf of `owner`.
    ///
    /// The observation stays live while `owner` (or a clone) is alive.
    ///
    /// # Errors
    /// [`BusError::InvalidKey`] if `key` is empty.
    pub fn register<K, F>(
        &self,
        key: K,
        owner: &Owner,
        callback: F,
    ) -> Result<ObservationHandle, BusError>
    where
        K: IntoEventKey,
        F: Fn(&Envelope<P>) + Send + Sync + 'static,
    {
        self.register_observer(key, Some(owner), Arc::new(callback))
    }

    /// Registers `callback` for `key` with no owner.
    ///
    /// The observation lives until [`Registry::unregister`].
    ///
    /// # Errors
    /// [`BusError::InvalidKey`] if `key` is empty.
    pub fn observe<K, F>(&self, key: K, callback: F) -> Result<ObservationHandle, BusError>
    where
        K: IntoEventKey,
        F: Fn(&Envelope<P>) + Send + Sync + 'static,
    {
        self.register_observer(key, None, Arc::new(callback))
    }

    /// Registers any [`Observer`] implementation.
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
        let key = key.into_event_key()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let observation = Arc::new(Observation {
            id,
            name: Arc::from(observer.name()),
            observer,
            owner: owner.map(Owner::downgrade),
            active: AtomicBool::new(true),
        });

        self.observations
            .lock()
            .entry(key.clone())
            .or_default()
            .push(observation);

        Ok(ObservationHandle { id, key })
    }

    /// Removes every observation registered on behalf of `owner`.
    ///
    /// Returns the number removed. Intended for the owner's teardown path.
    pub fn unregister_all(&self, owner: &Owner) -> usize {
        let owner_id = owner.id();
        let mut removed = 0;
        let mut map = self.observations.lock();
        map.retain(|_, list| {
            list.retain(|o| {
                let owned = o.owner.as_ref().is_some_and(|r| r.id() == owner_id);
                if owned {
                    o.deactivate();
                    removed += 1;
                }
                !owned
            });
            !list.is_empty()
        });
        removed
    }

    /// Builds an envelope for `payload` and dispatches it.
    ///
    /// # Errors
    /// [`BusError::InvalidKey`] if `key` is empty.
    pub fn dispatch<K>(&self, key: K, payload: P) -> Result<DispatchReport, BusError>
    where
        K: IntoEventKey,
    {
        let key = key.into_event_key()?;
        Ok(self.dispatch_envelope(&Envelope::new(key, payload)))
    }

    /// Invokes every live observation for `envelope.key`, in registration order.
    pub fn dispatch_envelope(&self, envelope: &Envelope<P>) -> DispatchReport {
        let _serial = self.dispatch_lock.lock();

        let snapshot: Vec<Arc<Observation<P>>> = self
            .observations
            .lock()
            .get(&envelope.key)
            .cloned()
            .unwrap_or_default();

        let mut report = DispatchReport::default();
        let mut dead = Vec::new();

        for obs in snapshot {
            if !obs.is_active() {
                continue;
            }
            if !obs.owner_alive() {
                obs.deactivate();
                dead.push(obs.id);
                continue;
            }

            let outcome = catch_unwind(AssertUnwindSafe(|| obs.observer.on_event(envelope)));
            let (message, panicked) = match outcome {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(err)) => (err.to_string(), false),
                Err(payload) => (panic_message(payload.as_ref()), true),
            };

            let failure = ObserverCallbackError {
                key: envelope.key.clone(),
                observer: Arc::clone(&obs.name),
                seq: envelope.seq,
                message,
                panicked,
            };
            warn!(
                label = failure.as_label(),
                observer = %failure.observer,
                key = %failure.key,
                seq = failure.seq,
                "observer callback failed: {}",
                failure.message
            );
            report.failures.push(failure);
        }

        if !dead.is_empty() {
            report.pruned = dead.len();
            debug!(key = %envelope.key, pruned = dead.len(), "pruned observations of dropped owners");
            self.prune(&envelope.key, &dead);
        }
        report
    }

    /// Number of live observations for `key`.
    pub fn observer_count(&self, key: &EventKey) -> usize {
        self.observations
            .lock()
            .get(key)
            .map_or(0, |list| list.iter().filter(|o| o.is_live()).count())
    }

    /// Total number of registered observations (including not yet pruned ones).
    #[must_use]
    pub fn len(&self) -> usize {
        self.observations.lock().values().map(Vec::len).sum()
    }

    /// True if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune(&self, key: &EventKey, ids: &[u64]) {
        let mut map = self.observations.lock();
        if let Some(list) = map.get_mut(key) {
            list.retain(|o| !ids.contains(&o.id));
            if list.is_empty() {
                map.remove(key);
            }
        }
    }
}

impl<P: Send + Sync + 'static> Registry<P> {
    /// Registers `callback` and ties its lifetime to the returned [`Subscription`].
    ///
    /// Cancelling or dropping the subscription unregisters the observation.
    ///
    /// # Errors
    /// [`BusError::InvalidKey`] if `key` is empty.
    pub fn observe_scoped<K, F>(self: &Arc<Self>, key: K, callback: F) -> Result<Subscription, BusError>
    where
        K: IntoEventKey,
        F: Fn(&Envelope<P>) + Send + Sync + 'static,
    {
        let handle = self.observe(key, callback)?;
        let registry: Weak<Self> = Arc::downgrade(self);
        Ok(Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.unregister(&handle);
            }
        }))
    }
}

impl<P: Send + Sync + 'static> Default for Registry<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> fmt::Debug for Registry<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let map = self.observations.lock();
        f.debug_struct("Registry")
            .field("keys", &map.len())
            .field("observations", &map.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ObserverError;
    use crate::registry::ObserverFn;

    type Log = Arc<Mutex<Vec<String>>>;

    fn recorder(log: &Log, tag: &'static str) -> impl Fn(&Envelope<i32>) + Send + Sync + 'static {
        let log = Arc::clone(log);
        move |ev| log.lock().push(format!("{tag}:{}", ev.payload()))
    }

    #[test]
    fn delivers_in_registration_order_once_per_dispatch() {
        let reg = Registry::<i32>::new();
        let log: Log = Arc::default();
        reg.observe("k", recorder(&log, "o1")).unwrap();
        reg.observe("k", recorder(&log, "o2")).unwrap();
        reg.observe("other", recorder(&log, "x")).unwrap();

        let report = reg.dispatch("k", 1).unwrap();
        assert_eq!(report.delivered, 2);
        assert_eq!(*log.lock(), vec!["o1:1", "o2:1"]);
    }

    #[test]
    fn unregister_stops_delivery_and_is_idempotent() {
        let reg = Registry::<i32>::new();
        let log: Log = Arc::default();
        let o1 = reg.observe("K", recorder(&log, "o1")).unwrap();
        reg.observe("K", recorder(&log, "o2")).unwrap();

        reg.dispatch("K", 1).unwrap();
        assert!(reg.unregister(&o1));
        assert!(!reg.unregister(&o1));
        reg.dispatch("K", 2).unwrap();

        assert_eq!(*log.lock(), vec!["o1:1", "o2:1", "o2:2"]);
    }

    #[test]
    fn empty_key_is_rejected() {
        let reg = Registry::<i32>::new();
        let err = reg.observe("", |_: &Envelope<i32>| {}).unwrap_err();
        assert_eq!(err.as_label(), "bus_invalid_key");
        assert!(reg.dispatch(" ", 1).is_err());
    }

    #[test]
    fn dropped_owner_is_pruned_silently() {
        let reg = Registry::<i32>::new();
        let log: Log = Arc::default();
        let owner = Owner::new("vm");
        reg.register("k", &owner, recorder(&log, "owned")).unwrap();
        reg.observe("k", recorder(&log, "free")).unwrap();
        assert_eq!(reg.observer_count(&EventKey::new("k").unwrap()), 2);

        drop(owner);
        let report = reg.dispatch("k", 7).unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.pruned, 1);
        assert_eq!(reg.len(), 1);
        assert_eq!(*log.lock(), vec!["free:7"]);
    }

    #[test]
    fn unregister_all_removes_only_that_owner() {
        let reg = Registry::<i32>::new();
        let log: Log = Arc::default();
        let a = Owner::new("a");
        let b = Owner::new("b");
        reg.register("k1", &a, recorder(&log, "a1")).unwrap();
        reg.register("k2", &a, recorder(&log, "a2")).unwrap();
        reg.register("k1", &b, recorder(&log, "b1")).unwrap();

        assert_eq!(reg.unregister_all(&a), 2);
        assert_eq!(reg.unregister_all(&a), 0);
        reg.dispatch("k1", 1).unwrap();
        reg.dispatch("k2", 1).unwrap();
        assert_eq!(*log.lock(), vec!["b1:1"]);
    }

    #[test]
    fn failing_and_panicking_observers_are_isolated() {
        let reg = Registry::<i32>::new();
        let log: Log = Arc::default();
        reg.register_observer(
            "k",
            None,
            Arc::new(ObserverFn::new("fails", |_: &Envelope<i32>| {
                Err(ObserverError::new("nope"))
            })),
        )
        .unwrap();
        reg.observe("k", |_: &Envelope<i32>| panic!("kaboom")).unwrap();
        reg.observe("k", recorder(&log, "last")).unwrap();

        let report = reg.dispatch("k", 3).unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed(), 2);
        assert_eq!(&*report.failures[0].observer, "fails");
        assert_eq!(report.failures[0].message, "nope");
        assert!(!report.failures[0].panicked);
        assert!(report.failures[1].panicked);
        assert_eq!(report.failures[1].message, "kaboom");
        assert_eq!(*log.lock(), vec!["last:3"]);
    }

    #[test]
    fn mutation_during_dispatch_uses_snapshot() {
        let reg = Arc::new(Registry::<i32>::new());
        let log: Log = Arc::default();
        let victim: Arc<Mutex<Option<ObservationHandle>>> = Arc::default();
        let added = Arc::new(AtomicBool::new(false));

        {
            let reg2 = Arc::clone(&reg);
            let log2 = Arc::clone(&log);
            let victim = Arc::clone(&victim);
            let added = Arc::clone(&added);
            reg.observe("k", move |ev: &Envelope<i32>| {
                log2.lock().push(format!("first:{}", ev.payload()));
                if let Some(h) = victim.lock().take() {
                    reg2.unregister(&h);
                }
                if !added.swap(true, Ordering::SeqCst) {
                    reg2.observe("k", recorder(&log2, "newcomer")).unwrap();
                }
            })
            .unwrap();
        }
        let second = reg.observe("k", recorder(&log, "second")).unwrap();
        *victim.lock() = Some(second);

        reg.dispatch("k", 1).unwrap();
        reg.dispatch("k", 2).unwrap();

        // "second" was unregistered mid-dispatch, "newcomer" joined for the next one
        assert_eq!(*log.lock(), vec!["first:1", "first:2", "newcomer:2"]);
    }

    #[test]
    fn nested_dispatch_from_callback_is_allowed() {
        let reg = Arc::new(Registry::<i32>::new());
        let log: Log = Arc::default();
        {
            let reg2 = Arc::clone(&reg);
            reg.observe("outer", move |ev: &Envelope<i32>| {
                reg2.dispatch("inner", ev.payload() + 1).unwrap();
            })
            .unwrap();
        }
        reg.observe("inner", recorder(&log, "inner")).unwrap();

        reg.dispatch("outer", 1).unwrap();
        assert_eq!(*log.lock(), vec!["inner:2"]);
    }

    #[test]
    fn scoped_observation_unregisters_on_drop() {
        let reg = Arc::new(Registry::<i32>::new());
        let log: Log = Arc::default();
        let sub = reg.observe_scoped("k", recorder(&log, "scoped")).unwrap();

        reg.dispatch("k", 1).unwrap();
        drop(sub);
        reg.dispatch("k", 2).unwrap();

        assert!(reg.is_empty());
        assert_eq!(*log.lock(), vec!["scoped:1"]);
    }
}
