//! Browser/page driver boundary.
//!
//! The core never performs navigation or DOM queries itself; it talks to an
//! injected [`Driver`] and treats every fault from it as "no match".

use thiserror::Error;
use url::Url;

/// Error surfaced by a driver query.
///
/// Callers inside the detection and cascade layers downgrade these to
/// negative results; they never abort a run.
#[derive(Debug, Clone, Error)]
pub enum DriverError {
    #[error("driver fault: {0}")]
    Fault(String),
    #[error("driver unavailable")]
    Unavailable,
}

/// Opaque handle to an element located on the current page.
///
/// The core only counts handles and forwards them to callers; interaction
/// with the element happens through the driver that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    pub id: String,
    pub text: Option<String>,
}

impl ElementHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: None,
        }
    }

    pub fn with_text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: Some(text.into()),
        }
    }
}

/// Synchronous page query interface implemented by the browser integration.
///
/// All methods may fail; every caller in this crate treats `Err` as a missing
/// signal rather than a fatal condition.
pub trait Driver: Send + Sync {
    /// Locate elements by path expression (e.g. an XPath-style query).
    fn find_by_path_expr(&self, expr: &str) -> Result<Vec<ElementHandle>, DriverError>;

    /// Locate elements by style selector (e.g. a CSS-style query).
    fn find_by_style_selector(&self, selector: &str) -> Result<Vec<ElementHandle>, DriverError>;

    /// Full text content of the current page.
    fn page_text(&self) -> Result<String, DriverError>;

    /// URL the driver is currently on.
    fn current_url(&self) -> Result<Url, DriverError>;
}
