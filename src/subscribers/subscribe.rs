//! # Async subscriber trait
//!
//! `Subscribe` is the extension point for slow consumers of bus events (I/O,
//! batching, remote sinks). Each subscriber is driven by a dedicated worker
//! task fed by a bounded queue owned by the [`SubscriberSet`](crate::SubscriberSet).
//!
//! ## Contract
//! - Implementations may be slow; they never block the posting context or
//!   other subscribers.
//! - A subscriber may declare its own queue capacity via
//!   [`Subscribe::queue_capacity`]. On overflow, events for that subscriber are
//!   **dropped** and recorded on the bus error log.
//!
//! ## Example
//! ```rust
//! use reactbus::{Envelope, Subscribe};
//!
//! struct Audit;
//!
//! #[async_trait::async_trait]
//! impl Subscribe<String> for Audit {
//!     async fn on_event(&self, ev: &Envelope<String>) {
//!         let _ = (ev.seq, ev.payload());
//!     }
//!     fn name(&self) -> &str { "audit" }
//!     fn queue_capacity(&self) -> Option<usize> { Some(512) }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Envelope;

/// Contract for async event subscribers.
///
/// Called from a subscriber-dedicated worker task. Implementations should avoid
/// blocking the async runtime (prefer async I/O and cooperative waits).
#[async_trait]
pub trait Subscribe<P>: Send + Sync + 'static
where
    P: Send + Sync + 'static,
{
    /// Handle a single event for this subscriber.
    async fn on_event(&self, event: &Envelope<P>);

    /// Human-readable name (for logs and recorded failures).
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Preferred capacity of this subscriber's queue.
    ///
    /// `None` uses `Config::subscriber_queue_capacity`.
    fn queue_capacity(&self) -> Option<usize> {
        None
    }
}
