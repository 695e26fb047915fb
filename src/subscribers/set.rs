//! # SubscriberSet: non-blocking fan-out of one key to async subscribers
//!
//! [`SubscriberSet::attach`] registers a single observer for a key on an
//! [`EventBus`]. That observer hands every envelope to each subscriber's
//! bounded queue **without awaiting** processing.
//!
//! ## Architecture
//! ```text
//! bus.post(key, ..) ──► forwarding observer
//!                            │        (Envelope clone shares the payload)
//!                            ├──► [queue S1] ──► worker S1 ──► on_event()
//!                            │    (bounded)          └──────► panic → recorded, continue
//!                            ├──► [queue S2] ──► worker S2 ──► on_event()
//!                            └──► [queue SN] ──► worker SN ──► on_event()
//! ```
//!
//! ## Rules
//! - **Per-subscriber FIFO**: each subscriber sees events in post order.
//! - **No cross-subscriber ordering**.
//! - **Overflow**: event dropped for that subscriber only; the drop is logged
//!   and recorded on the bus error log.
//! - **Isolation**: a panicking subscriber is recorded and keeps its worker.
//!
//! **Warning**: `AssertUnwindSafe` is used, which can leave shared state
//! inconsistent if a subscriber panics while holding a lock.

use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::warn;

use crate::bus::{EventBus, WeakEventBus};
use crate::error::{panic_message, BusError, ObserverCallbackError};
use crate::events::{Envelope, EventKey, IntoEventKey};
use crate::registry::ObservationHandle;

use super::Subscribe;

/// Per-subscriber channel metadata.
struct SubscriberChannel<P> {
    name: Arc<str>,
    sender: mpsc::Sender<Envelope<P>>,
}

type Channels<P> = Arc<Mutex<Option<Vec<SubscriberChannel<P>>>>>;

/// Fan-out coordinator for async subscribers of one event key.
///
/// [`SubscriberSet::shutdown`] stops it and waits for queued events to be
/// handled. Dropping the set detaches it as well, without waiting: workers
/// finish what is already queued in the background.
pub struct SubscriberSet<P> {
    key: EventKey,
    handle: ObservationHandle,
    bus: WeakEventBus<P>,
    channels: Channels<P>,
    workers: Vec<JoinHandle<()>>,
}

impl<P: Send + Sync + 'static> SubscriberSet<P> {
    /// Spawns one worker per subscriber and starts forwarding `key`.
    ///
    /// # Errors
    /// [`BusError::InvalidKey`] if `key` is empty.
    ///
    /// # Panics
    /// Must be called within a Tokio runtime.
    pub fn attach<K>(bus: &EventBus<P>, key: K, subs: Vec<Arc<dyn Subscribe<P>>>) -> Result<Self, BusError>
    where
        K: IntoEventKey,
    {
        let key = key.into_event_key()?;
        let weak = bus.downgrade();
        let default_cap = bus.config().subscriber_queue_capacity;

        let mut channels = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let cap = sub.queue_capacity().unwrap_or(default_cap).max(1);
            let name: Arc<str> = Arc::from(sub.name());
            let (tx, mut rx) = mpsc::channel::<Envelope<P>>(cap);
            let worker_bus = weak.clone();
            let worker_name = Arc::clone(&name);

            let handle = tokio::spawn(async move {
                while let Some(ev) = rx.recv().await {
                    let fut = sub.on_event(&ev);
                    if let Err(panic_err) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                        let message = panic_message(panic_err.as_ref());
                        warn!(subscriber = %worker_name, key = %ev.key, seq = ev.seq, "subscriber panicked: {message}");
                        record(&worker_bus, &ev, &worker_name, message, true);
                    }
                }
            });
            channels.push(SubscriberChannel { name, sender: tx });
            workers.push(handle);
        }

        let channels: Channels<P> = Arc::new(Mutex::new(Some(channels)));
        let forward = Arc::clone(&channels);
        let forward_bus = weak.clone();
        let handle = bus.observe(&key, move |ev: &Envelope<P>| {
            let guard = forward.lock();
            let Some(channels) = guard.as_ref() else {
                return;
            };
            for channel in channels {
                let reason = match channel.sender.try_send(ev.clone()) {
                    Ok(()) => continue,
                    Err(mpsc::error::TrySendError::Full(_)) => "queue full",
                    Err(mpsc::error::TrySendError::Closed(_)) => "worker closed",
                };
                warn!(subscriber = %channel.name, key = %ev.key, seq = ev.seq, "subscriber dropped event: {reason}");
                record(&forward_bus, ev, &channel.name, format!("dropped: {reason}"), false);
            }
        })?;

        Ok(Self {
            key,
            handle,
            bus: weak,
            channels,
            workers,
        })
    }

    /// Gracefully shuts down: unregisters, closes all queues, awaits workers.
    ///
    /// Events already queued are still processed.
    pub async fn shutdown(mut self) {
        self.detach();

        for h in std::mem::take(&mut self.workers) {
            let _ = h.await;
        }
    }

    /// Key this set is attached to.
    pub fn key(&self) -> &EventKey {
        &self.key
    }

    /// True if there are no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Number of subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }
}

impl<P> SubscriberSet<P> {
    /// Unregisters the forwarding observer and closes every queue. Idempotent.
    fn detach(&self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.registry().unregister(&self.handle);
        }
        drop(self.channels.lock().take());
    }
}

impl<P> Drop for SubscriberSet<P> {
    fn drop(&mut self) {
        self.detach();
    }
}

fn record<P: Send + Sync + 'static>(
    bus: &WeakEventBus<P>,
    ev: &Envelope<P>,
    name: &Arc<str>,
    message: String,
    panicked: bool,
) {
    if let Some(bus) = bus.upgrade() {
        bus.record_error(ObserverCallbackError {
            key: ev.key.clone(),
            observer: Arc::clone(name),
            seq: ev.seq,
            message,
            panicked,
        });
    }
}

impl<P> fmt::Debug for SubscriberSet<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberSet")
            .field("key", &self.key)
            .field("workers", &self.workers.len())
            .finish()
    }
}
