//! # Stream operators.
//!
//! Each operator returns a new downstream [`Stream`]; state such as the
//! latest values of `combine_latest` or the buffers of `zip` is created per
//! subscription, so two subscribers of the same operator never share it.
//!
//! ## Combination semantics
//! ```text
//! combine_latest:  A ──1─────2───────3──
//!                  B ─────a───────b─────
//!                  ⇒ ─────(1,a)(2,a)(2,b)(3,b)
//!
//! zip:             A ──1──2──3──────────
//!                  B ────────────a───b──
//!                  ⇒ ────────────(1,a)(2,b)      (3 stays buffered)
//! ```
//! Errors from either side terminate the combined subscription.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::subscription::Subscription;

use super::sink::Sink;
use super::stream::Stream;

struct Latest<A, B> {
    left: Option<A>,
    right: Option<B>,
    left_done: bool,
    right_done: bool,
}

struct Pairs<A, B> {
    left: VecDeque<A>,
    right: VecDeque<B>,
    left_done: bool,
    right_done: bool,
}

impl<A, B> Pairs<A, B> {
    /// No further pair can be formed once a finished side has an empty buffer.
    fn exhausted(&self) -> bool {
        (self.left_done && self.left.is_empty()) || (self.right_done && self.right.is_empty())
    }
}

impl<T, E> Stream<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Transforms every value with `f`.
    pub fn map<U, F>(&self, f: F) -> Stream<U, E>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let upstream = self.clone();
        let f = Arc::new(f);
        Stream::create(move |down: Sink<U, E>| {
            let f = Arc::clone(&f);
            let out = down.clone();
            upstream.subscribe_sink(Sink::relay(&down, move |v: T| out.next(f(v))))
        })
    }

    /// Transforms every value with a fallible `f`.
    ///
    /// The first `Err` terminates this subscription only; other subscribers of
    /// the same upstream are unaffected.
    pub fn try_map<U, F>(&self, f: F) -> Stream<U, E>
    where
        U: Clone + Send + Sync + 'static,
        F: Fn(T) -> Result<U, E> + Send + Sync + 'static,
    {
        let upstream = self.clone();
        let f = Arc::new(f);
        Stream::create(move |down: Sink<U, E>| {
            let f = Arc::clone(&f);
            let out = down.clone();
            upstream.subscribe_sink(Sink::relay(&down, move |v: T| match f(v) {
                Ok(u) => out.next(u),
                Err(e) => out.error(e),
            }))
        })
    }

    /// Passes through values for which `predicate` holds.
    pub fn filter<F>(&self, predicate: F) -> Stream<T, E>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let upstream = self.clone();
        let predicate = Arc::new(predicate);
        Stream::create(move |down: Sink<T, E>| {
            let predicate = Arc::clone(&predicate);
            let out = down.clone();
            upstream.subscribe_sink(Sink::relay(&down, move |v: T| {
                if predicate(&v) {
                    out.next(v);
                }
            }))
        })
    }

    /// Emits the first `n` values, then completes and releases the upstream.
    pub fn take(&self, n: usize) -> Stream<T, E> {
        let upstream = self.clone();
        Stream::create(move |down: Sink<T, E>| {
            if n == 0 {
                down.complete();
                return Subscription::empty();
            }
            let seen = AtomicUsize::new(0);
            let out = down.clone();
            upstream.subscribe_sink(Sink::relay(&down, move |v: T| {
                let count = seen.fetch_add(1, Ordering::AcqRel) + 1;
                if count <= n {
                    out.next(v);
                }
                if count >= n {
                    out.complete();
                }
            }))
        })
    }

    /// Drops values equal to the previously emitted one.
    pub fn distinct_until_changed(&self) -> Stream<T, E>
    where
        T: PartialEq,
    {
        let upstream = self.clone();
        Stream::create(move |down: Sink<T, E>| {
            let last: Mutex<Option<T>> = Mutex::new(None);
            let out = down.clone();
            upstream.subscribe_sink(Sink::relay(&down, move |v: T| {
                {
                    let mut last = last.lock();
                    if last.as_ref() == Some(&v) {
                        return;
                    }
                    *last = Some(v.clone());
                }
                out.next(v);
            }))
        })
    }

    /// Emits `(latest self, latest other)` whenever either side emits, once
    /// both have emitted at least once.
    ///
    /// Completes when both sides complete, or as soon as one side completes
    /// without ever emitting.
    pub fn combine_latest<U>(&self, other: &Stream<U, E>) -> Stream<(T, U), E>
    where
        U: Clone + Send + Sync + 'static,
    {
        let left = self.clone();
        let right = other.clone();
        Stream::create(move |down: Sink<(T, U), E>| {
            let state = Arc::new(Mutex::new(Latest::<T, U> {
                left: None,
                right: None,
                left_done: false,
                right_done: false,
            }));

            let left_sink = {
                let (st, out) = (Arc::clone(&state), down.clone());
                let (st_done, out_done) = (Arc::clone(&state), down.clone());
                let out_err = down.clone();
                Sink::chained(
                    &down,
                    move |v: T| {
                        let pair = {
                            let mut st = st.lock();
                            let pair = st.right.as_ref().map(|r| (v.clone(), r.clone()));
                            st.left = Some(v);
                            pair
                        };
                        if let Some(pair) = pair {
                            out.next(pair);
                        }
                    },
                    move |e| out_err.error(e),
                    move || {
                        let finished = {
                            let mut st = st_done.lock();
                            st.left_done = true;
                            st.right_done || st.left.is_none()
                        };
                        if finished {
                            out_done.complete();
                        }
                    },
                )
            };

            let right_sink = {
                let (st, out) = (Arc::clone(&state), down.clone());
                let (st_done, out_done) = (Arc::clone(&state), down.clone());
                let out_err = down.clone();
                Sink::chained(
                    &down,
                    move |v: U| {
                        let pair = {
                            let mut st = st.lock();
                            let pair = st.left.as_ref().map(|l| (l.clone(), v.clone()));
                            st.right = Some(v);
                            pair
                        };
                        if let Some(pair) = pair {
                            out.next(pair);
                        }
                    },
                    move |e| out_err.error(e),
                    move || {
                        let finished = {
                            let mut st = st_done.lock();
                            st.right_done = true;
                            st.left_done || st.right.is_none()
                        };
                        if finished {
                            out_done.complete();
                        }
                    },
                )
            };

            let left_sub = left.subscribe_sink(left_sink);
            let right_sub = right.subscribe_sink(right_sink);
            Subscription::new(move || {
                left_sub.cancel();
                right_sub.cancel();
            })
        })
    }

    /// Emits pairs by index: the n-th value of `self` with the n-th of `other`.
    ///
    /// The faster side is buffered. Completes once either side has completed
    /// and its buffer is drained.
    pub fn zip<U>(&self, other: &Stream<U, E>) -> Stream<(T, U), E>
    where
        U: Clone + Send + Sync + 'static,
    {
        let left = self.clone();
        let right = other.clone();
        Stream::create(move |down: Sink<(T, U), E>| {
            let state = Arc::new(Mutex::new(Pairs::<T, U> {
                left: VecDeque::new(),
                right: VecDeque::new(),
                left_done: false,
                right_done: false,
            }));

            let left_sink = {
                let (st, out) = (Arc::clone(&state), down.clone());
                let (st_done, out_done) = (Arc::clone(&state), down.clone());
                let out_err = down.clone();
                Sink::chained(
                    &down,
                    move |v: T| {
                        let (pair, exhausted) = {
                            let mut st = st.lock();
                            st.left.push_back(v);
                            (pop_pair(&mut st), st.exhausted())
                        };
                        if let Some(pair) = pair {
                            out.next(pair);
                        }
                        if exhausted {
                            out.complete();
                        }
                    },
                    move |e| out_err.error(e),
                    move || {
                        let exhausted = {
                            let mut st = st_done.lock();
                            st.left_done = true;
                            st.exhausted()
                        };
                        if exhausted {
                            out_done.complete();
                        }
                    },
                )
            };

            let right_sink = {
                let (st, out) = (Arc::clone(&state), down.clone());
                let (st_done, out_done) = (Arc::clone(&state), down.clone());
                let out_err = down.clone();
                Sink::chained(
                    &down,
                    move |v: U| {
                        let (pair, exhausted) = {
                            let mut st = st.lock();
                            st.right.push_back(v);
                            (pop_pair(&mut st), st.exhausted())
                        };
                        if let Some(pair) = pair {
                            out.next(pair);
                        }
                        if exhausted {
                            out.complete();
                        }
                    },
                    move |e| out_err.error(e),
                    move || {
                        let exhausted = {
                            let mut st = st_done.lock();
                            st.right_done = true;
                            st.exhausted()
                        };
                        if exhausted {
                            out_done.complete();
                        }
                    },
                )
            };

            let left_sub = left.subscribe_sink(left_sink);
            let right_sub = right.subscribe_sink(right_sink);
            Subscription::new(move || {
                left_sub.cancel();
                right_sub.cancel();
            })
        })
    }
}

fn pop_pair<A, B>(st: &mut Pairs<A, B>) -> Option<(A, B)> {
    if st.left.is_empty() || st.right.is_empty() {
        return None;
    }
    match (st.left.pop_front(), st.right.pop_front()) {
        (Some(a), Some(b)) => Some((a, b)),
        _ => None,
    }
}
