//! Event Bus implementation.
//!
//! The engine owns one `EventBus` and hands out clones of its `Arc` to
//! anything that wants to observe engine activity. Handlers run on the
//! publishing thread, in the order they subscribed.

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::events::EngineEvent;

type EventHandler = Box<dyn Fn(&EngineEvent) + Send + Sync>;

/// History settings for the event bus
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Whether to keep event history.
    pub enable_history: bool,
    /// Maximum number of events to retain in history.
    pub max_history_size: usize,
    /// How long to retain events in history.
    pub history_retention: Duration,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            enable_history: false,
            max_history_size: 1000,
            history_retention: Duration::from_secs(300),
        }
    }
}

/// Publish/subscribe hub for engine events
pub struct EventBus {
    handlers: RwLock<Vec<EventHandler>>,
    history: RwLock<VecDeque<(Instant, EngineEvent)>>,
    config: EventBusConfig,
}

impl EventBus {
    /// Create a new event bus with default configuration
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Create a new event bus with custom configuration
    pub fn with_config(config: EventBusConfig) -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::new()),
            config,
        }
    }

    /// Hand an event to every subscriber and record it in history
    pub fn publish(&self, event: EngineEvent) {
        for handler in self.handlers.read().iter() {
            handler(&event);
        }
        if self.config.enable_history {
            self.record(event);
        }
    }

    /// Register a handler for every event published from now on
    ///
    /// Handlers must not subscribe or publish on the same bus.
    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        let mut handlers = self.handlers.write();
        handlers.push(Box::new(handler));
        tracing::debug!("event subscriber {} added", handlers.len());
    }

    /// Events published at or after `since`, or all kept history if None
    ///
    /// Always empty when history is disabled.
    pub fn history(&self, since: Option<Instant>) -> Vec<EngineEvent> {
        self.history
            .read()
            .iter()
            .filter(|(at, _)| since.map_or(true, |since| *at >= since))
            .map(|(_, event)| event.clone())
            .collect()
    }

    fn record(&self, event: EngineEvent) {
        let now = Instant::now();
        let mut history = self.history.write();
        history.push_back((now, event));

        let retention = self.config.history_retention;
        while history
            .front()
            .is_some_and(|(at, _)| now.duration_since(*at) > retention)
        {
            history.pop_front();
        }
        while history.len() > self.config.max_history_size {
            history.pop_front();
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.handlers.read().len())
            .field("config", &self.config)
            .finish()
    }
}
