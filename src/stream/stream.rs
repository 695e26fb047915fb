//! # Stream core: lazy, push-based value streams.
//!
//! A [`Stream`] is a recipe: nothing runs until [`Stream::subscribe`] attaches
//! a subscriber. Subscribing activates the chain from this stream up to its
//! root source; values then flow down through each operator in order.
//!
//! ## Sources
//! - [`Stream::just`]: one value, then completion (replayed per subscriber)
//! - [`Stream::from_iter`]: a finite or infinite sequence, stops early when
//!   the subscriber goes away
//! - [`Stream::empty`], [`Stream::fail`]: immediate completion / error
//! - [`Subject::as_stream`](crate::Subject::as_stream): live multicast, no replay
//! - [`ReactiveState::as_stream`](crate::ReactiveState::as_stream): replays the current value
//! - [`Stream::create`]: anything else
//!
//! ## Ownership
//! ```text
//! Subscription ─► downstream sink ◄─ operator sink ◄─weak─ Subject
//!      │                                 ▲
//!      └──────► upstream Subscription ───┘
//! ```
//! Sources never own their subscribers. Dropping the [`Subscription`] releases
//! the whole chain.

use std::fmt;
use std::sync::Arc;

use crate::error::StreamError;
use crate::subscription::Subscription;

use super::sink::Sink;

type OnSubscribe<T, E> = dyn Fn(Sink<T, E>) -> Subscription + Send + Sync;

/// Composable push-based value stream with completion/error signaling.
///
/// Cloning is cheap and yields the same recipe.
pub struct Stream<T, E = StreamError> {
    on_subscribe: Arc<OnSubscribe<T, E>>,
}

impl<T, E> Clone for Stream<T, E> {
    fn clone(&self) -> Self {
        Self {
            on_subscribe: Arc::clone(&self.on_subscribe),
        }
    }
}

impl<T, E> fmt::Debug for Stream<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream").finish_non_exhaustive()
    }
}

impl<T, E> Stream<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Wraps a source. `on_subscribe` runs once per subscriber; it must feed
    /// the sink and return whatever tears the source down.
    ///
    /// ## Example
    /// ```rust
    /// use reactbus::{Stream, StreamError, Subscription};
    ///
    /// let countdown: Stream<u32> = Stream::create(|sink| {
    ///     for n in (1..=3).rev() {
    ///         sink.next(n);
    ///     }
    ///     sink.complete();
    ///     Subscription::empty()
    /// });
    /// let _sub = countdown.subscribe(|n| println!("{n}"), |_e: StreamError| {}, || {});
    /// ```
    pub fn create<F>(on_subscribe: F) -> Self
    where
        F: Fn(Sink<T, E>) -> Subscription + Send + Sync + 'static,
    {
        Self {
            on_subscribe: Arc::new(on_subscribe),
        }
    }

    /// Single-value stream: each subscriber gets `value`, then completion.
    pub fn just(value: T) -> Self {
        Self::create(move |sink| {
            sink.next(value.clone());
            sink.complete();
            Subscription::empty()
        })
    }

    /// Emits every item of `items` (re-iterated per subscriber), then completes.
    ///
    /// Infinite iterators are fine as long as something downstream (e.g.
    /// [`Stream::take`]) closes the subscription.
    pub fn from_iter<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T> + Clone + Send + Sync + 'static,
    {
        Self::create(move |sink| {
            for item in items.clone() {
                if sink.is_closed() {
                    return Subscription::empty();
                }
                sink.next(item);
            }
            sink.complete();
            Subscription::empty()
        })
    }

    /// Completes immediately without values.
    pub fn empty() -> Self {
        Self::create(|sink| {
            sink.complete();
            Subscription::empty()
        })
    }

    /// Fails immediately with `err`.
    pub fn fail(err: E) -> Self {
        Self::create(move |sink| {
            sink.error(err.clone());
            Subscription::empty()
        })
    }

    /// Attaches a subscriber and activates the chain.
    ///
    /// `on_complete` / `on_error` fire at most once, and only one of them.
    /// Dropping the returned [`Subscription`] detaches it.
    pub fn subscribe<V, Er, C>(&self, on_value: V, on_error: Er, on_complete: C) -> Subscription
    where
        V: Fn(T) + Send + Sync + 'static,
        Er: Fn(E) + Send + Sync + 'static,
        C: Fn() + Send + Sync + 'static,
    {
        self.subscribe_sink(Sink::new(on_value, on_error, on_complete))
    }

    /// Attaches a value-only subscriber; terminal events are ignored.
    pub fn subscribe_values<V>(&self, on_value: V) -> Subscription
    where
        V: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe(on_value, |_| {}, || {})
    }

    /// Attaches an already built sink.
    pub fn subscribe_sink(&self, sink: Sink<T, E>) -> Subscription {
        let upstream = (self.on_subscribe)(sink.clone());
        Subscription::new(move || {
            sink.close();
            upstream.cancel();
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Records `v<value>`, `e:<err>` and `done` in delivery order.
    pub(crate) struct Recorder {
        pub(crate) log: Arc<Mutex<Vec<String>>>,
    }

    impl Recorder {
        pub(crate) fn new() -> Self {
            Self {
                log: Arc::default(),
            }
        }

        pub(crate) fn attach<T, E>(&self, stream: &Stream<T, E>) -> Subscription
        where
            T: Clone + Send + Sync + fmt::Debug + 'static,
            E: Clone + Send + Sync + fmt::Display + 'static,
        {
            let (a, b, c) = (
                Arc::clone(&self.log),
                Arc::clone(&self.log),
                Arc::clone(&self.log),
            );
            stream.subscribe(
                move |v| a.lock().push(format!("v{v:?}")),
                move |e| b.lock().push(format!("e:{e}")),
                move || c.lock().push("done".to_string()),
            )
        }

        pub(crate) fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.log.lock())
        }
    }

    #[test]
    fn just_replays_to_every_subscriber() {
        let s = Stream::<i32>::just(7);
        let r1 = Recorder::new();
        let r2 = Recorder::new();
        let _a = r1.attach(&s);
        let _b = r2.attach(&s);
        assert_eq!(r1.take(), vec!["v7", "done"]);
        assert_eq!(r2.take(), vec!["v7", "done"]);
    }

    #[test]
    fn nothing_runs_before_subscribe() {
        let runs = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&runs);
        let s: Stream<i32> = Stream::create(move |sink| {
            *counter.lock() += 1;
            sink.complete();
            Subscription::empty()
        });
        let mapped = s.map(|v| v + 1);
        assert_eq!(*runs.lock(), 0);

        let _sub = mapped.subscribe_values(|_| {});
        assert_eq!(*runs.lock(), 1);
    }

    #[test]
    fn from_iter_emits_then_completes() {
        let r = Recorder::new();
        let _s = r.attach(&Stream::<i32>::from_iter(vec![1, 2, 3]));
        assert_eq!(r.take(), vec!["v1", "v2", "v3", "done"]);
    }

    #[test]
    fn empty_and_fail_are_terminal() {
        let r = Recorder::new();
        let _a = r.attach(&Stream::<i32>::empty());
        let _b = r.attach(&Stream::<i32>::fail(StreamError::terminated("offline")));
        assert_eq!(r.take(), vec!["done", "e:stream terminated: offline"]);
    }

    #[test]
    fn cancel_runs_source_teardown_once() {
        let torn = Arc::new(Mutex::new(0));
        let t = Arc::clone(&torn);
        let s: Stream<i32> = Stream::create(move |_sink| {
            let t = Arc::clone(&t);
            Subscription::new(move || *t.lock() += 1)
        });
        let sub = s.subscribe_values(|_| {});
        sub.cancel();
        sub.cancel();
        drop(sub);
        assert_eq!(*torn.lock(), 1);
    }
}
