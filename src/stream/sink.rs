//! # Sinks: the receiving end of one subscription.
//!
//! A [`Sink`] wraps the three subscriber callbacks and enforces the terminal
//! rules: after `error` or `complete` (or after cancellation) nothing else is
//! delivered, and each terminal callback fires at most once.
//!
//! Operator sinks are *chained*: they also report closed when the sink they
//! feed is closed, so cold sources stop producing as soon as nobody downstream
//! wants values.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

type ValueFn<T> = Box<dyn Fn(T) + Send + Sync>;
type ErrorFn<E> = Box<dyn Fn(E) + Send + Sync>;
type CompleteFn = Box<dyn Fn() + Send + Sync>;

trait Liveness: Send + Sync {
    fn is_closed(&self) -> bool;
}

struct SinkCore<T, E> {
    on_value: ValueFn<T>,
    on_error: ErrorFn<E>,
    on_complete: CompleteFn,
    closed: AtomicBool,
    downstream: Option<Arc<dyn Liveness>>,
}

impl<T, E> Liveness for SinkCore<T, E> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
            || self.downstream.as_ref().is_some_and(|d| d.is_closed())
    }
}

/// Receiving end of a subscription, handed to stream sources.
///
/// Cheap to clone; clones refer to the same subscriber.
pub struct Sink<T, E> {
    core: Arc<SinkCore<T, E>>,
}

impl<T, E> Clone for Sink<T, E> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: 'static, E: 'static> Sink<T, E> {
    /// Creates a terminal sink from subscriber callbacks.
    pub fn new<V, Er, C>(on_value: V, on_error: Er, on_complete: C) -> Self
    where
        V: Fn(T) + Send + Sync + 'static,
        Er: Fn(E) + Send + Sync + 'static,
        C: Fn() + Send + Sync + 'static,
    {
        Self::build(
            Box::new(on_value),
            Box::new(on_error),
            Box::new(on_complete),
            None,
        )
    }

    /// Creates an operator sink feeding `down`: values go through `on_value`,
    /// errors and completion are forwarded unchanged.
    pub(crate) fn relay<U, V>(down: &Sink<U, E>, on_value: V) -> Self
    where
        U: 'static,
        V: Fn(T) + Send + Sync + 'static,
    {
        let on_error = {
            let down = down.clone();
            move |e| down.error(e)
        };
        let on_complete = {
            let down = down.clone();
            move || down.complete()
        };
        Self::chained(down, on_value, on_error, on_complete)
    }

    /// Creates an operator sink with custom terminal handling, closed whenever
    /// `down` is closed.
    pub(crate) fn chained<U, V, Er, C>(down: &Sink<U, E>, on_value: V, on_error: Er, on_complete: C) -> Self
    where
        U: 'static,
        V: Fn(T) + Send + Sync + 'static,
        Er: Fn(E) + Send + Sync + 'static,
        C: Fn() + Send + Sync + 'static,
    {
        let downstream: Arc<dyn Liveness> = down.core.clone();
        Self::build(
            Box::new(on_value),
            Box::new(on_error),
            Box::new(on_complete),
            Some(downstream),
        )
    }

    fn build(
        on_value: ValueFn<T>,
        on_error: ErrorFn<E>,
        on_complete: CompleteFn,
        downstream: Option<Arc<dyn Liveness>>,
    ) -> Self {
        Self {
            core: Arc::new(SinkCore {
                on_value,
                on_error,
                on_complete,
                closed: AtomicBool::new(false),
                downstream,
            }),
        }
    }

    /// Delivers one value; ignored once the sink is closed.
    pub fn next(&self, value: T) {
        if self.is_closed() {
            return;
        }
        (self.core.on_value)(value);
    }

    /// Delivers a terminal error; at most once, nothing follows it.
    pub fn error(&self, err: E) {
        if self.is_closed() || self.core.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        (self.core.on_error)(err);
    }

    /// Delivers completion; at most once, nothing follows it.
    pub fn complete(&self) {
        if self.is_closed() || self.core.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        (self.core.on_complete)();
    }

    /// True once terminated, cancelled, or when the downstream is closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Closes without invoking any callback (cancellation path).
    pub(crate) fn close(&self) {
        self.core.closed.store(true, Ordering::Release);
    }

    pub(crate) fn downgrade(&self) -> WeakSink<T, E> {
        WeakSink {
            core: Arc::downgrade(&self.core),
        }
    }
}

impl<T, E> fmt::Debug for Sink<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sink")
            .field("closed", &self.core.is_closed())
            .finish()
    }
}

/// Non-owning reference held by multicast sources.
pub(crate) struct WeakSink<T, E> {
    core: Weak<SinkCore<T, E>>,
}

impl<T, E> WeakSink<T, E> {
    pub(crate) fn upgrade(&self) -> Option<Sink<T, E>> {
        self.core.upgrade().map(|core| Sink { core })
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.core, &other.core)
    }
}
