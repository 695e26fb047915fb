//! # Event keys.
//!
//! [`EventKey`] names a class of events. Many observers may share one key.
//! Keys are validated once, at construction, so the registry and the bus never
//! see an empty name.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use crate::error::BusError;

/// Opaque, comparable identifier naming an event class.
///
/// Cheap to clone (`Arc<str>` inside).
///
/// ## Example
/// ```rust
/// use reactbus::EventKey;
///
/// let key = EventKey::new("session.expired").unwrap();
/// assert_eq!(key.as_str(), "session.expired");
/// assert!(EventKey::new("   ").is_err());
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey(Arc<str>);

impl EventKey {
    /// Validates and creates a key.
    ///
    /// # Errors
    /// [`BusError::InvalidKey`] if `name` is empty or only whitespace.
    pub fn new(name: impl AsRef<str>) -> Result<Self, BusError> {
        let name = name.as_ref();
        if name.trim().is_empty() {
            return Err(BusError::InvalidKey {
                key: name.to_string(),
            });
        }
        Ok(Self(Arc::from(name)))
    }

    /// Returns the key as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventKey({:?})", &*self.0)
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EventKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for EventKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Conversion into a validated [`EventKey`].
///
/// Implemented for already-validated keys and for string types, so call sites
/// can pass either `"name"` or a stored `EventKey`.
pub trait IntoEventKey {
    /// Performs the conversion.
    ///
    /// # Errors
    /// [`BusError::InvalidKey`] for empty names.
    fn into_event_key(self) -> Result<EventKey, BusError>;
}

impl IntoEventKey for EventKey {
    fn into_event_key(self) -> Result<EventKey, BusError> {
        Ok(self)
    }
}

impl IntoEventKey for &EventKey {
    fn into_event_key(self) -> Result<EventKey, BusError> {
        Ok(self.clone())
    }
}

impl IntoEventKey for &str {
    fn into_event_key(self) -> Result<EventKey, BusError> {
        EventKey::new(self)
    }
}

impl IntoEventKey for String {
    fn into_event_key(self) -> Result<EventKey, BusError> {
        EventKey::new(self)
    }
}

impl IntoEventKey for &String {
    fn into_event_key(self) -> Result<EventKey, BusError> {
        EventKey::new(self)
    }
}
