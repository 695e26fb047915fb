//! # Subscription handles and cancellation.
//!
//! A [`Subscription`] is the scoped lifetime of one delivery link: a stream
//! subscription, a scoped bus observation, or a reactive-state listener.
//!
//! ## Rules
//! - `cancel()` is terminal and idempotent; calling it twice is a no-op.
//! - Dropping a handle cancels it. Keep the handle for exactly as long as
//!   delivery is wanted.
//! - Cancellation is not cooperative: an in-flight callback finishes, only
//!   future deliveries are prevented.
//!
//! ```text
//! Subscription ──owns──► teardown ──owns──► upstream Subscription ──► ... ──► source
//!       ▲                                                                    │
//!       └──────────────────── weak back-reference ───────────────────────────┘
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

type Teardown = Box<dyn FnOnce() + Send>;

/// Handle owning one active delivery link.
///
/// Lifecycle: `active → cancelled`. The teardown runs at most once, on the
/// first `cancel()` or on drop.
#[must_use = "dropping a Subscription cancels it"]
pub struct Subscription {
    cancelled: AtomicBool,
    teardown: Mutex<Option<Teardown>>,
}

impl Subscription {
    /// Creates a subscription that runs `teardown` when cancelled.
    pub fn new<F>(teardown: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cancelled: AtomicBool::new(false),
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    /// A subscription with nothing to tear down.
    pub fn empty() -> Self {
        Self {
            cancelled: AtomicBool::new(false),
            teardown: Mutex::new(None),
        }
    }

    /// Cancels delivery and detaches from the upstream.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        // Run outside the lock: teardown may cancel other subscriptions.
        let teardown = self.teardown.lock().take();
        if let Some(teardown) = teardown {
            teardown();
        }
    }

    /// True once `cancel()` has been called (or the handle dropped).
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Owner-held collection of subscriptions cancelled together.
///
/// Drop the bag (or call [`CancelBag::cancel_all`]) on owner teardown.
#[derive(Default)]
pub struct CancelBag {
    subs: Mutex<Vec<Subscription>>,
}

impl CancelBag {
    /// Creates an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a subscription; it stays active until the bag is cancelled.
    pub fn insert(&self, sub: Subscription) {
        self.subs.lock().push(sub);
    }

    /// Cancels every stored subscription and empties the bag.
    pub fn cancel_all(&self) {
        let subs = std::mem::take(&mut *self.subs.lock());
        for sub in &subs {
            sub.cancel();
        }
    }

    /// Number of stored subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subs.lock().len()
    }

    /// True if the bag holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subs.lock().is_empty()
    }
}

impl Extend<Subscription> for CancelBag {
    fn extend<I: IntoIterator<Item = Subscription>>(&mut self, iter: I) {
        self.subs.get_mut().extend(iter);
    }
}

impl fmt::Debug for CancelBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelBag").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn counting() -> (Arc<AtomicUsize>, Subscription) {
        let runs = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&runs);
        let sub = Subscription::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        (runs, sub)
    }

    #[test]
    fn cancel_is_idempotent() {
        let (runs, sub) = counting();
        assert!(!sub.is_cancelled());
        sub.cancel();
        sub.cancel();
        assert!(sub.is_cancelled());
        drop(sub);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_cancels() {
        let (runs, sub) = counting();
        drop(sub);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn bag_cancels_everything_once() {
        let bag = CancelBag::new();
        let (a, sa) = counting();
        let (b, sb) = counting();
        bag.insert(sa);
        bag.insert(sb);
        assert_eq!(bag.len(), 2);

        bag.cancel_all();
        assert!(bag.is_empty());
        drop(bag);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_bag_cancels() {
        let (runs, sub) = counting();
        let mut bag = CancelBag::new();
        bag.extend([sub, Subscription::empty()]);
        drop(bag);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}
