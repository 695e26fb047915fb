//! # Reactive state container.
//!
//! [`ReactiveState`] holds a current value and re-publishes it on every
//! mutation. It is the observable-property half of a view model: producers
//! call [`ReactiveState::set`], consumers subscribe or bridge it into the
//! stream core with [`ReactiveState::as_stream`].
//!
//! ## Rules
//! - `set` notifies synchronously, on the caller's context, in subscription order.
//! - `as_stream` replays the current value to each new subscriber, then follows updates.
//! - Inside a [`ReactiveState::batch`] scope, mutations are coalesced and
//!   subscribers see only the final value, once, when the outermost guard drops.
//! - No locking discipline is imposed on callers, but mutation from several
//!   contexts at once has no ordering guarantee; route it through one delivery
//!   context (see [`ContextHandle::submit`](crate::ContextHandle::submit)).

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};

use crate::stream::{Stream, Subject};
use crate::subscription::Subscription;

struct StateInner<V> {
    current: Mutex<V>,
    // Orders store + notify against replay in `as_stream`; re-entrant so
    // subscribers may mutate the state from inside a notification.
    notify: ReentrantMutex<()>,
    subject: Subject<V>,
    batch_depth: AtomicUsize,
    dirty: AtomicBool,
}

/// Observable value container.
///
/// Cloning shares the same value and subscribers.
pub struct ReactiveState<V> {
    inner: Arc<StateInner<V>>,
}

impl<V> Clone for ReactiveState<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> ReactiveState<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates a container holding `initial`.
    pub fn new(initial: V) -> Self {
        Self {
            inner: Arc::new(StateInner {
                current: Mutex::new(initial),
                notify: ReentrantMutex::new(()),
                subject: Subject::new(),
                batch_depth: AtomicUsize::new(0),
                dirty: AtomicBool::new(false),
            }),
        }
    }

    /// Returns a copy of the current value.
    pub fn get(&self) -> V {
        self.inner.current.lock().clone()
    }

    /// Replaces the value and notifies subscribers.
    pub fn set(&self, value: V) {
        let _order = self.inner.notify.lock();
        *self.inner.current.lock() = value.clone();
        self.publish(value);
    }

    /// Mutates the value in place and notifies subscribers.
    ///
    /// `f` runs while the value is locked: it must not call back into this
    /// state (`get`, `set`, ...) or it deadlocks. Subscribers notified
    /// afterwards may.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut V),
    {
        let _order = self.inner.notify.lock();
        let value = {
            let mut current = self.inner.current.lock();
            f(&mut current);
            current.clone()
        };
        self.publish(value);
    }

    /// Replaces the value only if it differs; returns whether it changed.
    pub fn set_if_changed(&self, value: V) -> bool
    where
        V: PartialEq,
    {
        let _order = self.inner.notify.lock();
        {
            let mut current = self.inner.current.lock();
            if *current == value {
                return false;
            }
            *current = value.clone();
        }
        self.publish(value);
        true
    }

    /// Listens for future updates (no replay of the current value).
    pub fn subscribe<F>(&self, on_value: F) -> Subscription
    where
        F: Fn(V) + Send + Sync + 'static,
    {
        self.inner.subject.as_stream().subscribe_values(on_value)
    }

    /// Bridges into the stream core: replays the current value, then updates.
    pub fn as_stream(&self) -> Stream<V> {
        let inner = Arc::clone(&self.inner);
        Stream::create(move |sink| {
            // No update may land between reading the replay value, attaching,
            // and delivering the replay.
            let _order = inner.notify.lock();
            let value = inner.current.lock().clone();
            let upstream = inner.subject.as_stream().subscribe_sink(sink.clone());
            sink.next(value);
            upstream
        })
    }

    /// Defers notifications until the returned guard (and any outer one) drops.
    pub fn batch(&self) -> BatchGuard<'_, V> {
        self.inner.batch_depth.fetch_add(1, Ordering::AcqRel);
        BatchGuard { state: self }
    }

    /// Number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subject.subscriber_count()
    }

    fn publish(&self, value: V) {
        if self.inner.batch_depth.load(Ordering::Acquire) > 0 {
            self.inner.dirty.store(true, Ordering::Release);
            return;
        }
        self.inner.subject.send(value);
    }
}

impl<V: Default + Clone + Send + Sync + 'static> Default for ReactiveState<V> {
    fn default() -> Self {
        Self::new(V::default())
    }
}

impl<V: fmt::Debug> fmt::Debug for ReactiveState<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveState")
            .field("current", &*self.inner.current.lock())
            .finish_non_exhaustive()
    }
}

/// Scope guard returned by [`ReactiveState::batch`].
#[must_use = "notifications resume when the guard is dropped"]
pub struct BatchGuard<'a, V>
where
    V: Clone + Send + Sync + 'static,
{
    state: &'a ReactiveState<V>,
}

impl<V> Drop for BatchGuard<'_, V>
where
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        let inner = &self.state.inner;
        let _order = inner.notify.lock();
        if inner.batch_depth.fetch_sub(1, Ordering::AcqRel) == 1
            && inner.dirty.swap(false, Ordering::AcqRel)
        {
            inner.subject.send(self.state.get());
        }
    }
}
