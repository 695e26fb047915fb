//! # Observation owners.
//!
//! An [`Owner`] is a liveness token held by whatever object registered the
//! observations (a view model, a controller, a session). The registry keeps
//! only a non-owning back-reference and checks it before every invocation:
//! once every clone of the owner is dropped, its observations are skipped and
//! pruned on the next dispatch.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static OWNER_ID: AtomicU64 = AtomicU64::new(1);

struct OwnerInner {
    id: u64,
    label: Arc<str>,
}

/// Liveness token for observation owners.
///
/// Cloning shares identity: the owner stays alive until the last clone drops.
#[derive(Clone)]
pub struct Owner {
    inner: Arc<OwnerInner>,
}

impl Owner {
    /// Creates a new owner with a human-readable label (for logs).
    pub fn new(label: impl Into<Arc<str>>) -> Self {
        Self {
            inner: Arc::new(OwnerInner {
                id: OWNER_ID.fetch_add(1, Ordering::Relaxed),
                label: label.into(),
            }),
        }
    }

    /// Process-unique owner id.
    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Label given at construction.
    #[inline]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub(crate) fn downgrade(&self) -> OwnerRef {
        OwnerRef {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl PartialEq for Owner {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Owner {}

impl fmt::Debug for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Owner")
            .field("id", &self.inner.id)
            .field("label", &&*self.inner.label)
            .finish()
    }
}

/// Non-owning back-reference from an observation to its owner.
pub(crate) struct OwnerRef {
    id: u64,
    inner: Weak<OwnerInner>,
}

impl OwnerRef {
    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub(crate) fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liveness_follows_last_clone() {
        let owner = Owner::new("vm");
        let clone = owner.clone();
        let back = owner.downgrade();
        assert_eq!(back.id(), owner.id());

        drop(owner);
        assert!(back.is_alive());
        drop(clone);
        assert!(!back.is_alive());
    }

    #[test]
    fn owners_have_distinct_ids() {
        let a = Owner::new("a");
        let b = Owner::new("a");
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert_eq!(a.label(), "a");
    }
}
