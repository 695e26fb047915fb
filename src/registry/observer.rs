//! # Observer callback capability.
//!
//! [`Observer`] is the interface the registry dispatches through. Plain
//! closures `Fn(&Envelope<P>)` implement it and never fail; implement the trait
//! (or use [`ObserverFn`]) when a callback needs to report errors or a name.
//!
//! ## Example
//! ```rust
//! use reactbus::{Envelope, Observer, ObserverError, ObserverFn};
//!
//! let audit = ObserverFn::new("audit", |ev: &Envelope<u32>| {
//!     if *ev.payload() == 0 {
//!         return Err(ObserverError::new("zero not allowed"));
//!     }
//!     Ok(())
//! });
//! assert_eq!(Observer::<u32>::name(&audit), "audit");
//! ```

use std::sync::Arc;

use crate::error::ObserverError;
use crate::events::Envelope;

/// Contract for bus observers.
///
/// Called synchronously on the dispatching context. A returned error or a
/// panic is recorded and does not stop delivery to other observers.
pub trait Observer<P>: Send + Sync + 'static {
    /// Handle one delivered envelope.
    fn on_event(&self, event: &Envelope<P>) -> Result<(), ObserverError>;

    /// Human-readable name (for logs and recorded errors).
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl<P, F> Observer<P> for F
where
    F: Fn(&Envelope<P>) + Send + Sync + 'static,
{
    fn on_event(&self, event: &Envelope<P>) -> Result<(), ObserverError> {
        self(event);
        Ok(())
    }
}

/// Named, fallible closure observer.
pub struct ObserverFn<F> {
    name: Arc<str>,
    f: F,
}

impl<F> ObserverFn<F> {
    /// Wraps `f` under `name`.
    pub fn new(name: impl Into<Arc<str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<P, F> Observer<P> for ObserverFn<F>
where
    F: Fn(&Envelope<P>) -> Result<(), ObserverError> + Send + Sync + 'static,
{
    fn on_event(&self, event: &Envelope<P>) -> Result<(), ObserverError> {
        (self.f)(event)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
