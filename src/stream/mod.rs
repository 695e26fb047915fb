//! Stream core: composable push-based value streams.
//!
//! ## Contents
//! - [`Stream`] lazy stream recipe with constructors and operators
//! - [`Subject`] live multicast source (no replay)
//! - [`Sink`] receiving end handed to custom sources
//!
//! Subscribing returns a [`Subscription`](crate::Subscription); see
//! `subscription.rs` for lifetime rules.

mod operators;
mod sink;
#[allow(clippy::module_inception)]
mod stream;
mod subject;

pub use sink::Sink;
pub use stream::Stream;
pub use subject::Subject;
