//! Run observability hooks.
//!
//! The state-machine executor broadcasts structured events around detection,
//! state entry/exit, and transitions so callers can attach metrics or
//! logging without the core knowing about either.

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Structured events emitted while a run advances.
#[derive(Debug, Clone)]
pub enum RunEvent {
    RunStarted {
        timestamp: DateTime<Utc>,
    },
    DetectionResolved {
        state: String,
        detected: bool,
        confidence: f64,
        reasoning: String,
        timestamp: DateTime<Utc>,
    },
    StateEntered {
        state: String,
        timestamp: DateTime<Utc>,
    },
    StateExited {
        state: String,
        timestamp: DateTime<Utc>,
    },
    Transition {
        from: String,
        to: Option<String>,
        timestamp: DateTime<Utc>,
    },
    RunFinished {
        outcome: String,
        visited: usize,
        timestamp: DateTime<Utc>,
    },
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &RunEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: RunEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

/// Handler that forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &RunEvent) {
        match event {
            RunEvent::RunStarted { .. } => log::info!("run started"),
            RunEvent::DetectionResolved {
                state,
                detected,
                confidence,
                reasoning,
                ..
            } => {
                log::debug!(
                    "detection {state}: detected={detected} confidence={confidence:.2} ({reasoning})"
                );
            }
            RunEvent::StateEntered { state, .. } => log::info!("entering {state}"),
            RunEvent::StateExited { state, .. } => log::debug!("exited {state}"),
            RunEvent::Transition { from, to, .. } => match to {
                Some(to) => log::info!("transition {from} -> {to}"),
                None => log::info!("transition {from} -> (end)"),
            },
            RunEvent::RunFinished {
                outcome, visited, ..
            } => {
                log::info!("run finished: {outcome} after {visited} state(s)");
            }
        }
    }
}
