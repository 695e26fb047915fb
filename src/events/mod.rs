//! Event data model: keys and envelopes.
//!
//! ## Contents
//! - [`EventKey`] validated event-class identifier (and [`IntoEventKey`])
//! - [`Envelope`] posted event with sequence number, timestamp and shared payload
//!
//! Producers hand a key and a payload to the [`EventBus`](crate::EventBus);
//! the bus stamps the envelope and the registry delivers it.

mod envelope;
mod key;

pub use envelope::Envelope;
pub use key::{EventKey, IntoEventKey};
