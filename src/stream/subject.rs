//! # Subject: live multicast source.
//!
//! A [`Subject`] is one producer feeding many concurrently active
//! subscribers. It keeps only weak references to their sinks, so a subscriber
//! that goes away is detached without the subject's cooperation.
//!
//! ## Rules
//! - No replay: a late subscriber misses values sent before it attached.
//! - Terminal events are sticky: after `complete()`/`error()`, new subscribers
//!   receive that terminal event immediately and `send` is ignored.
//! - A panicking subscriber is cut off (its subscription closed) and logged;
//!   siblings keep receiving.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::error::{panic_message, StreamError};
use crate::subscription::Subscription;

use super::sink::{Sink, WeakSink};
use super::stream::Stream;

enum Terminal<E> {
    Completed,
    Failed(E),
}

impl<E: Clone> Terminal<E> {
    fn cloned(&self) -> Self {
        match self {
            Terminal::Completed => Terminal::Completed,
            Terminal::Failed(err) => Terminal::Failed(err.clone()),
        }
    }
}

struct SubjectState<T, E> {
    sinks: Vec<WeakSink<T, E>>,
    terminal: Option<Terminal<E>>,
}

/// Live multicast stream source.
pub struct Subject<T, E = StreamError> {
    state: Arc<Mutex<SubjectState<T, E>>>,
}

impl<T, E> Clone for Subject<T, E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T, E> Subject<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Creates a subject with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SubjectState {
                sinks: Vec::new(),
                terminal: None,
            })),
        }
    }

    /// Pushes `value` to every live subscriber, in subscription order.
    pub fn send(&self, value: T) {
        for sink in self.live_sinks() {
            let outcome = catch_unwind(AssertUnwindSafe(|| sink.next(value.clone())));
            if let Err(payload) = outcome {
                sink.close();
                warn!(
                    "stream subscriber panicked, subscription closed: {}",
                    panic_message(payload.as_ref())
                );
            }
        }
    }

    /// Completes every subscriber; later subscribers complete immediately.
    pub fn complete(&self) {
        let Some(sinks) = self.terminate(Terminal::Completed) else {
            return;
        };
        for sink in sinks {
            sink.complete();
        }
    }

    /// Fails every subscriber with `err`; later subscribers get it immediately.
    pub fn error(&self, err: E) {
        let Some(sinks) = self.terminate(Terminal::Failed(err.clone())) else {
            return;
        };
        for sink in sinks {
            sink.error(err.clone());
        }
    }

    /// Live view of this subject.
    pub fn as_stream(&self) -> Stream<T, E> {
        let state = Arc::clone(&self.state);
        Stream::create(move |sink| {
            let replay = {
                let mut st = state.lock();
                let replay = st.terminal.as_ref().map(Terminal::cloned);
                if replay.is_none() {
                    st.sinks.push(sink.downgrade());
                }
                replay
            };
            match replay {
                Some(Terminal::Completed) => {
                    sink.complete();
                    return Subscription::empty();
                }
                Some(Terminal::Failed(err)) => {
                    sink.error(err);
                    return Subscription::empty();
                }
                None => {}
            }

            let weak = sink.downgrade();
            let detach_from = Arc::downgrade(&state);
            Subscription::new(move || {
                if let Some(state) = detach_from.upgrade() {
                    state.lock().sinks.retain(|s| !s.ptr_eq(&weak));
                }
            })
        })
    }

    /// Number of attached, still open subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.state
            .lock()
            .sinks
            .iter()
            .filter(|w| w.upgrade().is_some_and(|s| !s.is_closed()))
            .count()
    }

    /// True after `complete()` or `error()`.
    pub fn is_terminated(&self) -> bool {
        self.state.lock().terminal.is_some()
    }

    /// Prunes dead sinks and returns strong handles to the rest.
    fn live_sinks(&self) -> Vec<Sink<T, E>> {
        let mut st = self.state.lock();
        if st.terminal.is_some() {
            return Vec::new();
        }
        let mut live = Vec::with_capacity(st.sinks.len());
        st.sinks.retain(|w| match w.upgrade() {
            Some(s) if !s.is_closed() => {
                live.push(s);
                true
            }
            _ => false,
        });
        live
    }

    fn terminate(&self, terminal: Terminal<E>) -> Option<Vec<Sink<T, E>>> {
        let mut st = self.state.lock();
        if st.terminal.is_some() {
            return None;
        }
        st.terminal = Some(terminal);
        let sinks = std::mem::take(&mut st.sinks);
        Some(sinks.iter().filter_map(WeakSink::upgrade).collect())
    }
}

impl<T, E> Default for Subject<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> fmt::Debug for Subject<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        f.debug_struct("Subject")
            .field("sinks", &st.sinks.len())
            .field("terminated", &st.terminal.is_some())
            .finish()
    }
}
