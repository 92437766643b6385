//! States and the state-machine executor.
//!
//! A state bundles its detection logic with the work to perform on the page
//! it represents. The executor locates the initially active state, then
//! loops enter → execute → transition → exit until a state yields no next
//! name, merging each state's output back into the shared context.

use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

use crate::context::Context;
use crate::detection::DetectionResult;
use crate::events::{EventDispatcher, RunEvent};

/// Construction errors for [`StateMachine`].
#[derive(Debug, Error)]
pub enum MachineError {
    #[error("duplicate state name '{0}'")]
    DuplicateState(String),
}

/// One page context or interaction phase in the scraping workflow.
///
/// States are responsible for detecting when they are active, doing their
/// work, and naming the state that follows them. They hold no cross-run
/// state of their own; telemetry lives in the metrics/scaler/rotator
/// subsystems.
pub trait State: Send + Sync {
    /// Unique name used for transition targets.
    fn name(&self) -> &str;

    /// Is this state currently active?
    fn detect(&self, ctx: &Context) -> DetectionResult;

    /// State-specific setup on entry. Default: nothing.
    fn enter(&mut self, _ctx: &mut Context) {}

    /// Main logic: scraping, navigation, interaction. Any returned map is
    /// merged into the context, overwriting existing keys.
    fn execute(&mut self, ctx: &mut Context) -> Option<HashMap<String, Value>>;

    /// Name of the next state, or `None` when the workflow is complete.
    fn transition(&self, ctx: &Context) -> Option<String>;

    /// Teardown on exit. Default: nothing.
    fn exit(&mut self, _ctx: &mut Context) {}
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// No state's detector matched the initial context.
    NoInitialState,
    /// A state returned `None` from `transition`.
    Completed,
    /// A state named a transition target that is not registered. The run
    /// stops cleanly, but the report keeps this distinct from graceful
    /// completion so a mistyped state name is visible to the caller.
    UnknownTransition { from: String, target: String },
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::NoInitialState => f.write_str("no initial state detected"),
            RunOutcome::Completed => f.write_str("completed"),
            RunOutcome::UnknownTransition { from, target } => {
                write!(f, "unknown transition target '{target}' from '{from}'")
            }
        }
    }
}

/// Summary returned by [`StateMachine::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// State names in visit order.
    pub visited: Vec<String>,
    pub outcome: RunOutcome,
}

/// Drives a collection of states over a shared context.
///
/// The executor imposes no cycle limit; loop protection is a property of
/// how states encode their transitions.
pub struct StateMachine {
    states: Vec<Box<dyn State>>,
    index: HashMap<String, usize>,
    dispatcher: EventDispatcher,
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field(
                "states",
                &self.states.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl StateMachine {
    /// Build the machine, rejecting duplicate state names eagerly.
    pub fn new(states: Vec<Box<dyn State>>) -> Result<Self, MachineError> {
        let mut index = HashMap::with_capacity(states.len());
        for (position, state) in states.iter().enumerate() {
            let name = state.name().to_string();
            if index.insert(name.clone(), position).is_some() {
                return Err(MachineError::DuplicateState(name));
            }
        }
        Ok(Self {
            states,
            index,
            dispatcher: EventDispatcher::new(),
        })
    }

    pub fn with_dispatcher(mut self, dispatcher: EventDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn state_names(&self) -> impl Iterator<Item = &str> {
        self.states.iter().map(|state| state.name())
    }

    /// Run until no next state is found.
    ///
    /// The initial state is the first, in declared order, whose detector
    /// reports a positive result. Detecting no initial state is reported,
    /// not fatal.
    pub fn run(&mut self, ctx: &mut Context) -> RunReport {
        self.dispatcher.dispatch(RunEvent::RunStarted {
            timestamp: ctx.now(),
        });

        let mut current = self.find_initial_state(ctx);
        if current.is_none() {
            log::warn!("no initial state detected; ending run");
            let report = RunReport {
                visited: Vec::new(),
                outcome: RunOutcome::NoInitialState,
            };
            self.finish(ctx, &report);
            return report;
        }

        let mut visited = Vec::new();
        let outcome = loop {
            let Some(position) = current else {
                break RunOutcome::Completed;
            };

            let name = self.states[position].name().to_string();
            visited.push(name.clone());

            self.dispatcher.dispatch(RunEvent::StateEntered {
                state: name.clone(),
                timestamp: ctx.now(),
            });
            self.states[position].enter(ctx);

            if let Some(output) = self.states[position].execute(ctx) {
                ctx.merge(output);
            }

            let target = self.states[position].transition(ctx);
            self.dispatcher.dispatch(RunEvent::Transition {
                from: name.clone(),
                to: target.clone(),
                timestamp: ctx.now(),
            });

            self.states[position].exit(ctx);
            self.dispatcher.dispatch(RunEvent::StateExited {
                state: name.clone(),
                timestamp: ctx.now(),
            });

            match target {
                None => break RunOutcome::Completed,
                Some(target) => match self.index.get(&target) {
                    Some(&next) => current = Some(next),
                    None => {
                        log::warn!(
                            "state '{name}' named unknown transition target '{target}'; ending run"
                        );
                        break RunOutcome::UnknownTransition { from: name, target };
                    }
                },
            }
        };

        let report = RunReport { visited, outcome };
        self.finish(ctx, &report);
        report
    }

    fn find_initial_state(&self, ctx: &Context) -> Option<usize> {
        for (position, state) in self.states.iter().enumerate() {
            let result = state.detect(ctx);
            self.dispatcher.dispatch(RunEvent::DetectionResolved {
                state: state.name().to_string(),
                detected: result.detected,
                confidence: result.confidence,
                reasoning: result.reasoning.clone(),
                timestamp: ctx.now(),
            });
            if result.detected {
                return Some(position);
            }
        }
        None
    }

    fn finish(&self, ctx: &Context, report: &RunReport) {
        self.dispatcher.dispatch(RunEvent::RunFinished {
            outcome: report.outcome.to_string(),
            visited: report.visited.len(),
            timestamp: ctx.now(),
        });
    }
}
