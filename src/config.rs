//! # Bus configuration.
//!
//! Provides [`Config`], centralized settings for an [`EventBus`](crate::EventBus)
//! and the pieces wired to it (delivery context, async subscriber fan-out).
//!
//! ## Sentinel values
//! - `pending_capacity = 0` → unbounded pending-delivery list
//! - `error_log_capacity`, `context_capacity` are clamped to a minimum of 1

/// Configuration for an event bus instance.
///
/// ## Field semantics
/// - `pending_capacity`: max queued (not yet drained) events (`0` = unbounded)
/// - `error_log_capacity`: recorded observer failures kept (oldest evicted first)
/// - `context_capacity`: channel size between background producers and the delivery context
/// - `subscriber_queue_capacity`: default per-subscriber queue for async fan-out
///
/// ## Notes
/// All fields are public. Prefer the helper accessors to avoid sprinkling
/// sentinel checks (`0`) across the codebase.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum number of queued events awaiting the next drain.
    ///
    /// - `0` = unbounded
    /// - `n > 0` = `post(.., Queued)` fails with `BusError::QueueFull` beyond `n`
    ///
    /// Coalescing into an already pending slot never counts against the limit.
    pub pending_capacity: usize,

    /// Number of recorded observer callback failures retained by the bus.
    pub error_log_capacity: usize,

    /// Capacity of the bounded channel feeding the delivery context.
    pub context_capacity: usize,

    /// Default queue capacity for subscribers of a `SubscriberSet`.
    ///
    /// Used when a subscriber does not override `Subscribe::queue_capacity`.
    pub subscriber_queue_capacity: usize,
}

impl Config {
    /// Returns the pending-list limit as an `Option`.
    ///
    /// - `None` → unbounded
    /// - `Some(n)` → at most `n` pending events
    #[inline]
    pub fn pending_limit(&self) -> Option<usize> {
        if self.pending_capacity == 0 {
            None
        } else {
            Some(self.pending_capacity)
        }
    }

    /// Returns the error log capacity clamped to a minimum of 1.
    #[inline]
    pub fn error_log_capacity_clamped(&self) -> usize {
        self.error_log_capacity.max(1)
    }

    /// Returns the delivery context channel capacity clamped to a minimum of 1.
    #[inline]
    pub fn context_capacity_clamped(&self) -> usize {
        self.context_capacity.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `pending_capacity = 0` (unbounded)
    /// - `error_log_capacity = 256`
    /// - `context_capacity = 1024`
    /// - `subscriber_queue_capacity = 1024`
    fn default() -> Self {
        Self {
            pending_capacity: 0,
            error_log_capacity: 256,
            context_capacity: 1024,
            subscriber_queue_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_pending_capacity_means_unbounded() {
        let cfg = Config::default();
        assert_eq!(cfg.pending_limit(), None);

        let cfg = Config {
            pending_capacity: 8,
            ..Config::default()
        };
        assert_eq!(cfg.pending_limit(), Some(8));
    }

    #[test]
    fn capacities_are_clamped() {
        let cfg = Config {
            error_log_capacity: 0,
            context_capacity: 0,
            ..Config::default()
        };
        assert_eq!(cfg.error_log_capacity_clamped(), 1);
        assert_eq!(cfg.context_capacity_clamped(), 1);
    }
}
