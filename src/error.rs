//! Error types used by the bus, the registry and the stream core.
//!
//! This module defines:
//!
//! - [`BusError`]: errors surfaced synchronously to callers of `register`/`post`.
//! - [`ObserverError`]: failure returned by a fallible observer callback.
//! - [`ObserverCallbackError`]: the recorded form of an isolated callback failure.
//! - [`StreamError`]: default terminal error carried by [`Stream`](crate::Stream)s.
//!
//! Cancelling twice is a no-op, so there is no error for it.
//! Error enums provide `as_label` for logs, mirroring each other.

use std::sync::Arc;

use thiserror::Error;

use crate::events::EventKey;

/// # Errors produced by the event bus and the subscription registry.
///
/// These are rejected synchronously, before any observer runs.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The event key was empty or contained only whitespace.
    #[error("invalid event key {key:?}: must be non-empty")]
    InvalidKey {
        /// The rejected key as given by the caller.
        key: String,
    },

    /// The pending-delivery list reached its configured capacity.
    #[error("pending queue full (capacity {capacity})")]
    QueueFull {
        /// Configured `Config::pending_capacity`.
        capacity: usize,
    },

    /// The delivery context has stopped; nothing will drain this post.
    #[error("delivery context closed")]
    ContextClosed,

    /// The channel into the delivery context is full.
    #[error("delivery context backlogged (capacity {capacity})")]
    ContextBacklogged {
        /// Configured `Config::context_capacity`.
        capacity: usize,
    },
}

impl BusError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use reactbus::BusError;
    ///
    /// let err = BusError::InvalidKey { key: String::new() };
    /// assert_eq!(err.as_label(), "bus_invalid_key");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            BusError::InvalidKey { .. } => "bus_invalid_key",
            BusError::QueueFull { .. } => "bus_queue_full",
            BusError::ContextClosed => "bus_context_closed",
            BusError::ContextBacklogged { .. } => "bus_context_backlogged",
        }
    }
}

/// Failure reported by an observer callback.
///
/// Returned from [`Observer::on_event`](crate::Observer::on_event); the registry
/// records it and keeps delivering to the remaining observers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ObserverError {
    message: String,
}

impl ObserverError {
    /// Creates an error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// An observer callback failure caught at the dispatch boundary.
///
/// Kept in the bus error log (see [`EventBus::take_errors`](crate::EventBus::take_errors)).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("observer '{observer}' failed on '{key}' (seq {seq}): {message}")]
pub struct ObserverCallbackError {
    /// Key of the event being delivered.
    pub key: EventKey,
    /// Name of the observer that failed.
    pub observer: Arc<str>,
    /// Sequence number of the envelope being delivered.
    pub seq: u64,
    /// Error message, or the panic payload if `panicked`.
    pub message: String,
    /// True if the callback panicked instead of returning an error.
    pub panicked: bool,
}

impl ObserverCallbackError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        if self.panicked {
            "observer_panicked"
        } else {
            "observer_failed"
        }
    }
}

/// # Terminal errors carried by streams.
///
/// Delivered once through `on_error`, then the subscription is finished.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The stream's source reported failure.
    #[error("stream terminated: {reason}")]
    Terminated {
        /// Human-readable reason.
        reason: String,
    },

    /// A bridged bus stream could not be attached.
    #[error("bus error: {0}")]
    Bus(#[from] BusError),
}

impl StreamError {
    /// Shorthand for [`StreamError::Terminated`].
    pub fn terminated(reason: impl Into<String>) -> Self {
        StreamError::Terminated {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            StreamError::Terminated { .. } => "stream_terminated",
            StreamError::Bus(_) => "stream_bus",
        }
    }
}

/// Extracts a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
