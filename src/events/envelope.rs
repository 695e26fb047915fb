//! # Posted events.
//!
//! An [`Envelope`] is what observers receive: the key it was posted under, an
//! immutable shared payload, and ordering metadata stamped at post time.
//!
//! ## Ordering guarantees
//! Each envelope has a process-wide sequence number (`seq`) that increases
//! monotonically in post order. Use `seq` to restore order across buses.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::SystemTime;

use super::EventKey;

/// Global sequence counter for envelope ordering.
static ENVELOPE_SEQ: AtomicU64 = AtomicU64::new(0);

/// A posted event: key, payload, and metadata.
///
/// The payload is behind an `Arc` and never mutated after posting, so cloning
/// an envelope (fan-out, queues) does not copy it.
pub struct Envelope<P> {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp of the post.
    pub at: SystemTime,
    /// Event class this envelope was posted under.
    pub key: EventKey,
    /// Immutable payload.
    pub payload: Arc<P>,
}

impl<P> Envelope<P> {
    /// Creates an envelope with the current timestamp and next sequence number.
    pub fn new(key: EventKey, payload: P) -> Self {
        Self::from_arc(key, Arc::new(payload))
    }

    /// Same as [`Envelope::new`] for an already shared payload.
    pub fn from_arc(key: EventKey, payload: Arc<P>) -> Self {
        Self {
            seq: ENVELOPE_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            key,
            payload,
        }
    }

    /// Borrows the payload.
    #[inline]
    pub fn payload(&self) -> &P {
        &self.payload
    }
}

// Manual impl: cloning shares the payload, so `P: Clone` is not required.
impl<P> Clone for Envelope<P> {
    fn clone(&self) -> Self {
        Self {
            seq: self.seq,
            at: self.at,
            key: self.key.clone(),
            payload: Arc::clone(&self.payload),
        }
    }
}

impl<P: fmt::Debug> fmt::Debug for Envelope<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("seq", &self.seq)
            .field("key", &self.key)
            .field("payload", &self.payload)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let key = EventKey::new("k").unwrap();
        let a = Envelope::new(key.clone(), 1);
        let b = Envelope::new(key, 2);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn clone_shares_payload() {
        let env = Envelope::new(EventKey::new("k").unwrap(), vec![1, 2, 3]);
        let copy = env.clone();
        assert!(Arc::ptr_eq(&env.payload, &copy.payload));
        assert_eq!(copy.seq, env.seq);
    }
}
