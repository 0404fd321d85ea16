use std::sync::Arc;

use tokio::sync::broadcast;

use super::{PoolConfig, WorkerPool};
use crate::error::{LogReporter, ReportError};
use crate::events::{Event, EventBus};
use crate::signals::SignalBus;
use crate::subscribers::{Subscribe, SubscriberSet};

/// Builder for a [`WorkerPool`] with optional collaborators.
pub struct PoolBuilder {
    cfg: PoolConfig,
    bus: Option<SignalBus>,
    reporter: Option<Arc<dyn ReportError>>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl PoolBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: PoolConfig) -> Self {
        Self {
            cfg,
            bus: None,
            reporter: None,
            subscribers: Vec::new(),
        }
    }

    /// Uses an existing signal bus instead of creating one.
    pub fn with_bus(mut self, bus: SignalBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Sets the sink for failures no task-set handler absorbed.
    ///
    /// A bus created by this builder reports callback failures to the same sink.
    pub fn with_reporter(mut self, reporter: impl ReportError) -> Self {
        self.reporter = Some(Arc::new(reporter));
        self
    }

    /// Sets runtime event subscribers.
    ///
    /// Each subscriber gets its own bounded queue and delivery thread.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the pool. No worker is started until `run()` or `set_workers()`.
    pub fn build(self) -> WorkerPool {
        let reporter: Arc<dyn ReportError> = self.reporter.unwrap_or_else(|| Arc::new(LogReporter));
        let bus = self
            .bus
            .unwrap_or_else(|| SignalBus::with_reporter(Arc::clone(&reporter)));

        let (tx, _rx) = broadcast::channel::<Event>(self.cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(self.subscribers, tx.clone()));
        let events = EventBus::with_fanout(tx, subs);

        WorkerPool::from_parts(self.cfg, bus, events, reporter)
    }
}
