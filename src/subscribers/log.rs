//! # LogWriter: events to `tracing`
//!
//! A minimal subscriber that logs every envelope at `info` level.
//! Use it for tests or demos.
//!
//! ## Example output (with a fmt subscriber installed)
//! ```text
//! INFO reactbus::subscribers::log: event key=user.login seq=3 payload="ann"
//! ```

use std::fmt;

use async_trait::async_trait;
use tracing::info;

use crate::events::Envelope;
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default, Debug)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<P> Subscribe<P> for LogWriter
where
    P: fmt::Debug + Send + Sync + 'static,
{
    async fn on_event(&self, ev: &Envelope<P>) {
        info!(key = %ev.key, seq = ev.seq, payload = ?ev.payload, "event");
    }

    fn name(&self) -> &str {
        "log_writer"
    }
}
