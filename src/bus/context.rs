//! # Delivery context: posting into a bus from other threads and tasks.
//!
//! The bus core never switches context on its own. Producers running
//! elsewhere (background tasks, blocking threads) talk to the bus through a
//! [`ContextHandle`]; a single [`DeliveryLoop`] applies their commands on the
//! delivery context and drains the pending list after each batch.
//!
//! ```text
//! producer A ─┐                                  ┌─► bus.post / post_coalesced
//! producer B ─┼─► ContextHandle ─► [bounded mpsc] ─► DeliveryLoop ─┤
//! producer C ─┘     (try_send)                    │   (one task)  └─► submitted closures
//!                                                 └─► drain() after each batch
//! ```
//!
//! ## Rules
//! - Key validation happens on the producer side, before anything is sent.
//! - Non-async methods never wait: a full channel is
//!   [`BusError::ContextBacklogged`], a stopped loop is [`BusError::ContextClosed`].
//! - On cancellation the loop applies what is already buffered, drains once
//!   more and returns.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{panic_message, BusError};
use crate::events::{EventKey, IntoEventKey};

use super::bus::{DeliveryMode, EventBus};

type Job = Box<dyn FnOnce() + Send>;

enum Command<P> {
    Post {
        key: EventKey,
        payload: P,
        mode: DeliveryMode,
    },
    Coalesce {
        key: EventKey,
        payload: P,
    },
    Run(Job),
}

pub(super) fn channel<P: Send + Sync + 'static>(bus: EventBus<P>) -> (ContextHandle<P>, DeliveryLoop<P>) {
    let capacity = bus.config().context_capacity_clamped();
    let (tx, rx) = mpsc::channel(capacity);
    (ContextHandle { tx, capacity }, DeliveryLoop { bus, rx })
}

/// Producer-side handle into a delivery context. Cheap to clone.
pub struct ContextHandle<P> {
    tx: mpsc::Sender<Command<P>>,
    capacity: usize,
}

impl<P> Clone for ContextHandle<P> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            capacity: self.capacity,
        }
    }
}

impl<P: Send + Sync + 'static> ContextHandle<P> {
    /// Forwards a post to the delivery context without waiting.
    ///
    /// # Errors
    /// [`BusError::InvalidKey`], [`BusError::ContextBacklogged`] or
    /// [`BusError::ContextClosed`].
    pub fn post<K: IntoEventKey>(&self, key: K, payload: P, mode: DeliveryMode) -> Result<(), BusError> {
        let key = key.into_event_key()?;
        self.try_send(Command::Post { key, payload, mode })
    }

    /// Forwards a coalesced post to the delivery context without waiting.
    ///
    /// # Errors
    /// Same as [`ContextHandle::post`].
    pub fn post_coalesced<K: IntoEventKey>(&self, key: K, payload: P) -> Result<(), BusError> {
        let key = key.into_event_key()?;
        self.try_send(Command::Coalesce { key, payload })
    }

    /// Runs `job` on the delivery context (e.g. a reactive-state update that
    /// must happen where observers run).
    ///
    /// # Errors
    /// [`BusError::ContextBacklogged`] or [`BusError::ContextClosed`].
    pub fn submit<F>(&self, job: F) -> Result<(), BusError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.try_send(Command::Run(Box::new(job)))
    }

    /// Like [`ContextHandle::post`] but waits for channel capacity.
    ///
    /// # Errors
    /// [`BusError::InvalidKey`] or [`BusError::ContextClosed`].
    pub async fn post_wait<K: IntoEventKey>(&self, key: K, payload: P, mode: DeliveryMode) -> Result<(), BusError> {
        let key = key.into_event_key()?;
        self.send(Command::Post { key, payload, mode }).await
    }

    /// Like [`ContextHandle::submit`] but waits for channel capacity.
    ///
    /// # Errors
    /// [`BusError::ContextClosed`].
    pub async fn submit_wait<F>(&self, job: F) -> Result<(), BusError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(Command::Run(Box::new(job))).await
    }

    /// True once the delivery loop is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn try_send(&self, cmd: Command<P>) -> Result<(), BusError> {
        match self.tx.try_send(cmd) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(capacity = self.capacity, "delivery context backlogged, command dropped");
                Err(BusError::ContextBacklogged {
                    capacity: self.capacity,
                })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(BusError::ContextClosed),
        }
    }

    async fn send(&self, cmd: Command<P>) -> Result<(), BusError> {
        self.tx.send(cmd).await.map_err(|_| BusError::ContextClosed)
    }
}

impl<P> fmt::Debug for ContextHandle<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextHandle")
            .field("capacity", &self.capacity)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Consumer side of a delivery context. Run it where observers should run.
pub struct DeliveryLoop<P> {
    bus: EventBus<P>,
    rx: mpsc::Receiver<Command<P>>,
}

impl<P: Send + Sync + 'static> DeliveryLoop<P> {
    /// Applies commands until `token` is cancelled or every handle is dropped.
    ///
    /// Returns the number of commands applied.
    pub async fn run(mut self, token: CancellationToken) -> usize {
        let mut applied = 0;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => {
                        self.apply(cmd);
                        applied += 1 + self.run_once();
                    }
                    None => break,
                },
            }
        }

        self.rx.close();
        applied += self.run_once();
        debug!(applied, "delivery loop stopped");
        applied
    }

    /// Applies every buffered command, then drains the bus.
    ///
    /// For hosts that drive delivery from their own tick instead of [`run`](Self::run).
    pub fn run_once(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(cmd) = self.rx.try_recv() {
            self.apply(cmd);
            applied += 1;
        }
        self.bus.drain();
        applied
    }

    fn apply(&self, cmd: Command<P>) {
        let result = match cmd {
            Command::Post { key, payload, mode } => self.bus.post(key, payload, mode).map(drop),
            Command::Coalesce { key, payload } => self.bus.post_coalesced(key, payload).map(drop),
            Command::Run(job) => {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
                    warn!(
                        panic = %panic_message(panic.as_ref()),
                        "submitted job panicked on delivery context"
                    );
                }
                Ok(())
            }
        };
        if let Err(err) = result {
            warn!(label = err.as_label(), "forwarded post rejected: {err}");
        }
    }
}

impl<P> fmt::Debug for DeliveryLoop<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryLoop").field("bus", &self.bus).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::config::Config;
    use crate::events::Envelope;
    use crate::state::ReactiveState;

    #[tokio::test]
    async fn posts_from_background_tasks_are_delivered_on_the_loop() {
        let bus = EventBus::<u32>::new();
        let seen: Arc<Mutex<Vec<u32>>> = Arc::default();
        let s = Arc::clone(&seen);
        bus.observe("n", move |ev: &Envelope<u32>| s.lock().push(*ev.payload()))
            .unwrap();

        let (handle, delivery) = bus.delivery_context();
        let token = CancellationToken::new();
        let runner = tokio::spawn(delivery.run(token.clone()));

        let producer = {
            let handle = handle.clone();
            tokio::spawn(async move {
                for n in 0..5 {
                    handle.post_wait("n", n, DeliveryMode::Queued).await.unwrap();
                }
            })
        };
        producer.await.unwrap();
        drop(handle);

        let applied = runner.await.unwrap();
        assert_eq!(applied, 5);
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3, 4]);
        assert_eq!(bus.pending_len(), 0);
    }

    #[tokio::test]
    async fn invalid_key_rejected_on_producer_side() {
        let bus = EventBus::<u32>::new();
        let (handle, _delivery) = bus.delivery_context();
        assert_eq!(
            handle.post("", 1, DeliveryMode::Immediate).unwrap_err().as_label(),
            "bus_invalid_key"
        );
    }

    #[tokio::test]
    async fn full_channel_reports_backlog_and_closed_loop_reports_closed() {
        let bus = EventBus::<u32>::with_config(Config {
            context_capacity: 1,
            ..Config::default()
        });
        let (handle, delivery) = bus.delivery_context();
        handle.post("k", 1, DeliveryMode::Queued).unwrap();
        assert_eq!(
            handle.post("k", 2, DeliveryMode::Queued).unwrap_err(),
            BusError::ContextBacklogged { capacity: 1 }
        );

        drop(delivery);
        assert!(handle.is_closed());
        assert_eq!(handle.submit(|| {}).unwrap_err(), BusError::ContextClosed);
    }

    #[tokio::test]
    async fn cancellation_flushes_buffered_commands() {
        let bus = EventBus::<u32>::new();
        let seen: Arc<Mutex<Vec<u32>>> = Arc::default();
        let s = Arc::clone(&seen);
        bus.observe("k", move |ev: &Envelope<u32>| s.lock().push(*ev.payload()))
            .unwrap();

        let (handle, delivery) = bus.delivery_context();
        handle.post_coalesced("k", 1).unwrap();
        handle.post_coalesced("k", 2).unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let applied = delivery.run(token).await;

        assert_eq!(applied, 2);
        assert_eq!(*seen.lock(), vec![2]);
    }

    #[tokio::test]
    async fn submitted_jobs_update_state_on_the_loop() {
        let bus = EventBus::<()>::new();
        let state = ReactiveState::new(0u32);
        let (handle, mut delivery) = bus.delivery_context();

        for n in 1..=3 {
            let st = state.clone();
            handle.submit_wait(move || st.set(n)).await.unwrap();
        }
        handle.submit(|| panic!("bad job")).unwrap();
        assert_eq!(state.get(), 0);

        assert_eq!(delivery.run_once(), 4);
        assert_eq!(state.get(), 3);
    }
}
