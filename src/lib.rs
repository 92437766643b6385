//! # crawlstate
//!
//! A state-machine driven control loop for resilient web scraping.
//!
//! The crate supplies the "intelligence" of a scraping agent: which page
//! state is currently active (and with what confidence), what to do about
//! it, how fast it is safe to act, and which egress point to use. The
//! pieces:
//!
//! - **Cascading detection** ([`detection`]): multi-signal detectors (URL,
//!   DOM, text, composites) with confidence scoring and ordered,
//!   confidence-gated fallback.
//! - **Selector cascades** ([`cascade`]): ordered typed selectors tried
//!   until one yields a result, with running metrics on how deep into the
//!   cascade wins happen.
//! - **Behavior scaling** ([`behavior`]): a continuous dial between
//!   machine-like speed and human-like stealth, adjusted from success and
//!   cascade telemetry.
//! - **Network rotation** ([`network`]): a proxy pool with per-endpoint
//!   reliability tracking and quarantine of blocked egress points.
//! - **The executor** ([`state`]): drives user-defined states over a shared
//!   [`context::Context`] until the workflow completes.
//!
//! Actual navigation, element queries, and waiting are external
//! collaborators reached through the narrow [`driver::Driver`] boundary;
//! driver faults are absorbed into graded confidence signals and never
//! abort a run.
//!
//! ## Example
//!
//! ```no_run
//! use crawlstate::{Context, StateMachine};
//! # fn states() -> Vec<Box<dyn crawlstate::State>> { Vec::new() }
//!
//! let mut machine = StateMachine::new(states())?;
//! let mut ctx = Context::new();
//! let report = machine.run(&mut ctx);
//! println!("run ended: {} ({} states)", report.outcome, report.visited.len());
//! # Ok::<(), crawlstate::MachineError>(())
//! ```

pub mod behavior;
pub mod cascade;
pub mod config;
pub mod context;
pub mod detection;
pub mod driver;
pub mod events;
pub mod network;
pub mod state;

pub use crate::behavior::{BehaviorProfile, BehaviorScaler, DEFAULT_ADJUSTMENT_RATE};
pub use crate::cascade::{
    CascadeExecutor,
    CascadeMatch,
    CascadeMetrics,
    CascadeMetricsSnapshot,
    CascadeSelector,
    CascadeValue,
    SelectorKind,
    VisualProbe,
};
pub use crate::config::{ConfigError, CrawlConfig, CrawlConfigBuilder};
pub use crate::context::{Clock, Context, FixedClock, SystemClock};
pub use crate::detection::{
    CascadeDetector,
    CompositeDetector,
    CompositeLogic,
    DEFAULT_MIN_CONFIDENCE,
    DetectionResult,
    Detector,
    DetectorError,
    DomElementDetector,
    DomQueryKind,
    TextContentDetector,
    UrlPatternDetector,
};
pub use crate::driver::{Driver, DriverError, ElementHandle};
pub use crate::events::{EventDispatcher, EventHandler, LoggingHandler, RunEvent};
pub use crate::network::{
    DEFAULT_BLOCK_QUARANTINE,
    NetworkRotator,
    ProxyConfig,
    ProxyProtocol,
    RotationTrigger,
    RotatorMetrics,
};
pub use crate::state::{MachineError, RunOutcome, RunReport, State, StateMachine};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
