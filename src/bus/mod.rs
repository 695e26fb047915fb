//! Event bus, its builder and the cross-context delivery channel.

#[allow(clippy::module_inception)]
mod bus;
mod builder;
mod context;

pub use bus::{DeliveryMode, EventBus, PostOutcome};
pub(crate) use bus::WeakEventBus;
pub use builder::EventBusBuilder;
pub use context::{ContextHandle, DeliveryLoop};
