//! Cascading element selection.
//!
//! A cascade is an ordered list of typed selectors tried against the driver
//! until one yields an acceptable result. Ordering most-reliable-first is a
//! caller convention; the executor only guarantees "stop on first success"
//! and that a fault in one selector never aborts the rest.

pub mod metrics;

use std::sync::Arc;

use crate::context::Context;
use crate::driver::{DriverError, ElementHandle};

pub use metrics::{CascadeMetrics, CascadeMetricsSnapshot};

/// Selector kinds, roughly ordered by structural reliability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectorKind {
    PathExpr,
    StyleSelector,
    Text,
    Visual,
}

impl SelectorKind {
    /// Path expressions and style selectors query actual markup; text and
    /// visual matches do not.
    pub fn is_structural(self) -> bool {
        matches!(self, SelectorKind::PathExpr | SelectorKind::StyleSelector)
    }
}

impl std::fmt::Display for SelectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SelectorKind::PathExpr => "path-expr",
            SelectorKind::StyleSelector => "style-selector",
            SelectorKind::Text => "text",
            SelectorKind::Visual => "visual",
        };
        f.write_str(name)
    }
}

/// One selector in a cascade, declared at state-construction time.
#[derive(Debug, Clone)]
pub struct CascadeSelector {
    pub selector: String,
    pub kind: SelectorKind,
    pub description: String,
}

impl CascadeSelector {
    pub fn new(
        selector: impl Into<String>,
        kind: SelectorKind,
        description: impl Into<String>,
    ) -> Self {
        Self {
            selector: selector.into(),
            kind,
            description: description.into(),
        }
    }
}

/// What a winning selector produced.
#[derive(Debug, Clone, PartialEq)]
pub enum CascadeValue {
    /// Non-empty element set from a structural selector.
    Elements(Vec<ElementHandle>),
    /// Sentinel for a text selector whose needle is present in the page.
    TextPresent,
    /// Match reported by an injected visual probe.
    VisualMatch(ElementHandle),
}

/// Successful cascade execution: which selector won and what it found.
///
/// Position and kind are propagated so callers can feed
/// [`metrics::CascadeMetrics`].
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeMatch {
    pub position: usize,
    pub kind: SelectorKind,
    pub value: CascadeValue,
}

/// Pluggable visual recognition capability.
///
/// The core ships no implementation; without an injected probe, visual
/// selectors never match.
pub trait VisualProbe: Send + Sync {
    fn locate(&self, selector: &str, ctx: &Context) -> Result<Option<ElementHandle>, DriverError>;
}

/// Executes a selector cascade against the context's driver.
pub struct CascadeExecutor {
    selectors: Vec<CascadeSelector>,
    visual_probe: Option<Arc<dyn VisualProbe>>,
}

impl CascadeExecutor {
    pub fn new(selectors: Vec<CascadeSelector>) -> Self {
        Self {
            selectors,
            visual_probe: None,
        }
    }

    /// Build from `(selector, kind, description)` tuples.
    pub fn from_specs<I, S, D>(specs: I) -> Self
    where
        I: IntoIterator<Item = (S, SelectorKind, D)>,
        S: Into<String>,
        D: Into<String>,
    {
        Self::new(
            specs
                .into_iter()
                .map(|(selector, kind, description)| {
                    CascadeSelector::new(selector, kind, description)
                })
                .collect(),
        )
    }

    /// Inject a visual recognition backend for `SelectorKind::Visual`.
    pub fn with_visual_probe(mut self, probe: Arc<dyn VisualProbe>) -> Self {
        self.visual_probe = Some(probe);
        self
    }

    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    pub fn selectors(&self) -> &[CascadeSelector] {
        &self.selectors
    }

    /// Try each selector in declared order; stop on the first success.
    ///
    /// Per-selector driver faults continue to the next selector. No driver
    /// in the context means an immediate `None`.
    pub fn execute(&self, ctx: &Context) -> Option<CascadeMatch> {
        ctx.driver()?;

        for (position, selector) in self.selectors.iter().enumerate() {
            match self.try_selector(selector, ctx) {
                Ok(Some(value)) => {
                    if position > 0 {
                        log::debug!(
                            "cascade fell back to position {position} ({}: {})",
                            selector.kind,
                            selector.description
                        );
                    }
                    return Some(CascadeMatch {
                        position,
                        kind: selector.kind,
                        value,
                    });
                }
                Ok(None) => {}
                Err(fault) => {
                    log::debug!(
                        "cascade selector '{}' faulted: {fault}; trying next",
                        selector.selector
                    );
                }
            }
        }

        None
    }

    fn try_selector(
        &self,
        selector: &CascadeSelector,
        ctx: &Context,
    ) -> Result<Option<CascadeValue>, DriverError> {
        let driver = ctx.driver().ok_or(DriverError::Unavailable)?;

        match selector.kind {
            SelectorKind::PathExpr => {
                let elements = driver.find_by_path_expr(&selector.selector)?;
                Ok((!elements.is_empty()).then_some(CascadeValue::Elements(elements)))
            }
            SelectorKind::StyleSelector => {
                let elements = driver.find_by_style_selector(&selector.selector)?;
                Ok((!elements.is_empty()).then_some(CascadeValue::Elements(elements)))
            }
            SelectorKind::Text => {
                let page_text = driver.page_text()?;
                Ok(page_text
                    .contains(&selector.selector)
                    .then_some(CascadeValue::TextPresent))
            }
            SelectorKind::Visual => match &self.visual_probe {
                Some(probe) => Ok(probe
                    .locate(&selector.selector, ctx)?
                    .map(CascadeValue::VisualMatch)),
                None => Ok(None),
            },
        }
    }
}
