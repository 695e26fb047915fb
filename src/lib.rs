//! # reactbus
//!
//! **reactbus** is an in-process observable event bus with a small push-based
//! reactive stream engine on top.
//!
//! It lets decoupled components publish named events and lets owners (screens,
//! view models, services) observe them with automatic cleanup when the owner
//! goes away. Observable values compose through streams and reactive state.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   producer ──► EventBus::post(key, payload, mode)
//!                    │
//!                    ├─ Immediate ─────────────────────────┐
//!                    └─ Queued / Coalesced ─► pending ─► drain()
//!                                                          ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Registry (per key, registration order)                           │
//! │  - snapshot at dispatch start                                     │
//! │  - dropped owners pruned lazily                                   │
//! │  - failing/panicking callbacks isolated, recorded                 │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!   Observer cb        bus.stream(key)     SubscriberSet
//!   (sync)                  │              (async workers, bounded queues)
//!                           ▼
//!          Stream ─► map / filter / combine_latest / zip ─► Subscription
//!                           ▲
//!          ReactiveState::as_stream (replays current value)
//! ```
//!
//! ### Contexts
//! ```text
//! background task ──► ContextHandle ──► [bounded channel] ──► DeliveryLoop ──► bus
//! ```
//! The core never hops threads on its own; callbacks run where the post runs.
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                        |
//! |-------------------|--------------------------------------------------------------|-------------------------------------------|
//! | **Bus**           | Post named events, immediate or queued, with coalescing.     | [`EventBus`], [`DeliveryMode`]            |
//! | **Registry**      | Owner-scoped observations, lazy pruning, failure isolation.  | [`Registry`], [`Owner`], [`Observer`]     |
//! | **Streams**       | Lazy push streams with operators and multicast subjects.     | [`Stream`], [`Subject`], [`Sink`]         |
//! | **State**         | Observable values with replay and batched updates.           | [`ReactiveState`]                         |
//! | **Cancellation**  | Idempotent, drop-to-cancel handles.                          | [`Subscription`], [`CancelBag`]           |
//! | **Async fan-out** | Slow consumers on worker tasks.                              | [`Subscribe`], [`SubscriberSet`]          |
//! | **Errors**        | Typed errors, recorded callback failures.                    | [`BusError`], [`ObserverCallbackError`]   |
//! | **Configuration** | Queue and log capacities.                                    | [`Config`]                                |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```rust
//! use reactbus::{DeliveryMode, Envelope, EventBus, Owner, ReactiveState};
//!
//! #[derive(Debug)]
//! struct Login {
//!     user: String,
//! }
//!
//! let bus = EventBus::<Login>::new();
//! let screen = Owner::new("welcome-screen");
//!
//! let greeting = ReactiveState::new(String::from("nobody"));
//! let g = greeting.clone();
//! bus.register("user.login", &screen, move |ev: &Envelope<Login>| {
//!     g.set(format!("hello, {}", ev.payload().user));
//! })?;
//!
//! let _sub = greeting
//!     .as_stream()
//!     .map(|s| s.len())
//!     .subscribe_values(|len| println!("greeting is {len} chars"));
//!
//! bus.post("user.login", Login { user: "ann".into() }, DeliveryMode::Immediate)?;
//! assert_eq!(greeting.get(), "hello, ann");
//!
//! // the screen is gone: its observation is pruned on the next dispatch
//! drop(screen);
//! bus.post("user.login", Login { user: "bob".into() }, DeliveryMode::Immediate)?;
//! assert_eq!(greeting.get(), "hello, ann");
//! # Ok::<(), reactbus::BusError>(())
//! ```
mod bus;
mod config;
mod error;
mod events;
mod registry;
mod state;
mod stream;
mod subscribers;
mod subscription;

// ---- Public re-exports ----

pub use bus::{ContextHandle, DeliveryLoop, DeliveryMode, EventBus, EventBusBuilder, PostOutcome};
pub use config::Config;
pub use error::{BusError, ObserverCallbackError, ObserverError, StreamError};
pub use events::{Envelope, EventKey, IntoEventKey};
pub use registry::{DispatchReport, ObservationHandle, Observer, ObserverFn, Owner, Registry};
pub use state::{BatchGuard, ReactiveState};
pub use stream::{Sink, Stream, Subject};
pub use subscribers::{Subscribe, SubscriberSet};
pub use subscription::{CancelBag, Subscription};

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
