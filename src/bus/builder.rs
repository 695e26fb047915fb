use std::sync::Arc;

use crate::config::Config;
use crate::events::EventKey;
use crate::registry::{Observer, Owner};

use super::bus::EventBus;

/// Builder for an [`EventBus`] with observers registered up front.
pub struct EventBusBuilder<P> {
    cfg: Config,
    observers: Vec<(EventKey, Option<Owner>, Arc<dyn Observer<P>>)>,
}

impl<P: Send + Sync + 'static> EventBusBuilder<P> {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            observers: Vec::new(),
        }
    }

    /// Adds an observer for `key`, living as long as the bus.
    pub fn with_observer(mut self, key: EventKey, observer: Arc<dyn Observer<P>>) -> Self {
        self.observers.push((key, None, observer));
        self
    }

    /// Adds an observer for `key`, tied to `owner`.
    pub fn with_owned_observer(mut self, key: EventKey, owner: &Owner, observer: Arc<dyn Observer<P>>) -> Self {
        self.observers.push((key, Some(owner.clone()), observer));
        self
    }

    /// Builds the bus. Observers are registered in the order they were added.
    pub fn build(self) -> EventBus<P> {
        let bus = EventBus::with_config(self.cfg);
        for (key, owner, observer) in self.observers {
            // keys are already validated, registration cannot fail
            let _ = bus.register_observer(key, owner.as_ref(), observer);
        }
        bus
    }
}
