//! # Async subscribers for bus events.
//!
//! The synchronous observer path runs callbacks on the posting context. For
//! consumers that must await (I/O, batching), implement [`Subscribe`] and
//! attach them with a [`SubscriberSet`].
//!
//! ```text
//! bus.post(key) ──► Registry ──► forwarding observer ──► SubscriberSet
//!                                                             │
//!                                                   ┌─────────┼─────────┐
//!                                                   ▼         ▼         ▼
//!                                               LogWriter   Audit    Custom
//! ```

mod set;
mod subscribe;

#[cfg(feature = "logging")]
mod log;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
