//! Subscription registry: who observes which event key.
//!
//! ## Contents
//! - [`Registry`] keyed observation store with snapshot dispatch
//! - [`Owner`] liveness token; observations of dropped owners are pruned
//! - [`Observer`] callback capability (closures implement it), [`ObserverFn`]
//! - [`ObservationHandle`], [`DispatchReport`]
//!
//! The [`EventBus`](crate::EventBus) owns one registry and delivers through it.

mod observer;
mod owner;
#[allow(clippy::module_inception)]
mod registry;

pub use observer::{Observer, ObserverFn};
pub use owner::Owner;
pub use registry::{DispatchReport, ObservationHandle, Registry};
