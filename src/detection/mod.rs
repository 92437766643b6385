//! Page-state detection with confidence scoring.
//!
//! Detectors decide whether a given page state is currently active and how
//! trustworthy that verdict is. Driver faults are absorbed at the point of
//! use and reported through the result's reasoning text; nothing in this
//! module aborts a run.

use regex::Regex;
use thiserror::Error;

use crate::context::Context;

/// Construction-time detector errors. Invalid patterns are programming
/// contract violations and fail fast here, never at detection time.
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("invalid detection pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
}

/// Outcome of a single detection attempt.
///
/// Immutable once constructed. Confidence is always clamped into `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    pub detected: bool,
    pub confidence: f64,
    pub reasoning: String,
}

impl DetectionResult {
    pub fn new(detected: bool, confidence: f64, reasoning: impl Into<String>) -> Self {
        Self {
            detected,
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: reasoning.into(),
        }
    }

    pub fn positive(confidence: f64, reasoning: impl Into<String>) -> Self {
        Self::new(true, confidence, reasoning)
    }

    pub fn negative(reasoning: impl Into<String>) -> Self {
        Self::new(false, 0.0, reasoning)
    }

    /// Boolean view of the verdict, equal to `detected`.
    pub fn is_detected(&self) -> bool {
        self.detected
    }
}

impl std::fmt::Display for DetectionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DetectionResult(detected={}, confidence={:.2} ({}))",
            self.detected, self.confidence, self.reasoning
        )
    }
}

/// Detection strategy interface.
///
/// Infallible by contract: underlying driver faults are downgraded to
/// negative results inside each implementation.
pub trait Detector: Send + Sync {
    fn detect(&self, ctx: &Context) -> DetectionResult;
}

/// Structural query kinds accepted by [`DomElementDetector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomQueryKind {
    PathExpr,
    StyleSelector,
}

#[derive(Debug)]
enum UrlPatterns {
    Literal(Vec<String>),
    Regex(Vec<Regex>),
}

/// Matches the context's current URL against literal substrings or regular
/// expressions. A match is the strongest signal this crate knows about, so
/// it scores confidence 1.0.
#[derive(Debug)]
pub struct UrlPatternDetector {
    patterns: UrlPatterns,
}

impl UrlPatternDetector {
    /// Literal substring matching.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: UrlPatterns::Literal(patterns.into_iter().map(Into::into).collect()),
        }
    }

    /// Regex matching. Patterns compile eagerly; an invalid pattern is a
    /// construction error, not a runtime one.
    pub fn with_regex<I, S>(patterns: I) -> Result<Self, DetectorError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let compiled = patterns
            .into_iter()
            .map(|pattern| {
                Regex::new(pattern.as_ref()).map_err(|source| DetectorError::InvalidPattern {
                    pattern: pattern.as_ref().to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            patterns: UrlPatterns::Regex(compiled),
        })
    }
}

impl Detector for UrlPatternDetector {
    fn detect(&self, ctx: &Context) -> DetectionResult {
        let Some(url) = ctx.current_url() else {
            return DetectionResult::negative("no current url in context");
        };

        let matched = match &self.patterns {
            UrlPatterns::Literal(patterns) => patterns
                .iter()
                .find(|pattern| url.contains(pattern.as_str()))
                .map(|pattern| pattern.to_string()),
            UrlPatterns::Regex(patterns) => patterns
                .iter()
                .find(|pattern| pattern.is_match(&url))
                .map(|pattern| pattern.as_str().to_string()),
        };

        match matched {
            Some(pattern) => DetectionResult::positive(
                1.0,
                format!("url pattern '{pattern}' matched '{url}'"),
            ),
            None => DetectionResult::negative(format!("no url pattern matched '{url}'")),
        }
    }
}

/// Checks for the presence of DOM elements, trying selectors in order and
/// answering on the first one that yields at least one element.
///
/// A driver fault on one selector is swallowed and iteration continues; the
/// last fault seen is what the negative reasoning reports.
pub struct DomElementDetector {
    selectors: Vec<String>,
    kind: DomQueryKind,
}

impl DomElementDetector {
    pub fn new<I, S>(selectors: I, kind: DomQueryKind) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            selectors: selectors.into_iter().map(Into::into).collect(),
            kind,
        }
    }

    pub fn path_expr<I, S>(selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(selectors, DomQueryKind::PathExpr)
    }

    pub fn style_selector<I, S>(selectors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(selectors, DomQueryKind::StyleSelector)
    }
}

impl Detector for DomElementDetector {
    fn detect(&self, ctx: &Context) -> DetectionResult {
        let Some(driver) = ctx.driver() else {
            return DetectionResult::negative("no driver in context");
        };

        let mut last_fault = None;
        for selector in &self.selectors {
            let found = match self.kind {
                DomQueryKind::PathExpr => driver.find_by_path_expr(selector),
                DomQueryKind::StyleSelector => driver.find_by_style_selector(selector),
            };
            match found {
                Ok(elements) if !elements.is_empty() => {
                    return DetectionResult::positive(
                        0.9,
                        format!(
                            "selector '{selector}' matched {} element(s)",
                            elements.len()
                        ),
                    );
                }
                Ok(_) => {}
                Err(fault) => {
                    log::debug!("dom detector fault on '{selector}': {fault}");
                    last_fault = Some(fault);
                }
            }
        }

        match last_fault {
            Some(fault) => DetectionResult::negative(format!(
                "no selector matched (last driver fault: {fault})"
            )),
            None => DetectionResult::negative("no selector matched"),
        }
    }
}

/// Scans the page body for literal substrings. Text is the least
/// structurally reliable signal, hence the lower 0.7 confidence.
pub struct TextContentDetector {
    patterns: Vec<String>,
    case_sensitive: bool,
}

impl TextContentDetector {
    /// Case-insensitive matching.
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
            case_sensitive: false,
        }
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }
}

impl Detector for TextContentDetector {
    fn detect(&self, ctx: &Context) -> DetectionResult {
        let Some(driver) = ctx.driver() else {
            return DetectionResult::negative("no driver in context");
        };

        let page_text = match driver.page_text() {
            Ok(text) => text,
            Err(fault) => {
                return DetectionResult::negative(format!("page text unavailable: {fault}"));
            }
        };

        let haystack = if self.case_sensitive {
            page_text
        } else {
            page_text.to_lowercase()
        };

        for pattern in &self.patterns {
            let needle = if self.case_sensitive {
                pattern.clone()
            } else {
                pattern.to_lowercase()
            };
            if haystack.contains(&needle) {
                return DetectionResult::positive(0.7, format!("text '{pattern}' found in page"));
            }
        }

        DetectionResult::negative("no text pattern found in page")
    }
}

/// AND/OR combination rule for [`CompositeDetector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeLogic {
    /// All children must detect; confidence is the weakest link (minimum).
    All,
    /// Any child suffices; confidence is the best evidence (maximum).
    Any,
}

/// Aggregates child detectors under AND/OR logic.
pub struct CompositeDetector {
    detectors: Vec<Box<dyn Detector>>,
    logic: CompositeLogic,
}

impl CompositeDetector {
    pub fn new(detectors: Vec<Box<dyn Detector>>, logic: CompositeLogic) -> Self {
        Self { detectors, logic }
    }
}

impl Detector for CompositeDetector {
    fn detect(&self, ctx: &Context) -> DetectionResult {
        if self.detectors.is_empty() {
            return DetectionResult::negative("composite has no detectors");
        }

        let results: Vec<DetectionResult> = self
            .detectors
            .iter()
            .map(|detector| detector.detect(ctx))
            .collect();
        let matched = results.iter().filter(|result| result.detected).count();

        match self.logic {
            CompositeLogic::All => {
                let detected = matched == results.len();
                let confidence = results
                    .iter()
                    .map(|result| result.confidence)
                    .fold(f64::INFINITY, f64::min);
                DetectionResult::new(
                    detected,
                    confidence,
                    format!("AND: {matched}/{} detectors matched", results.len()),
                )
            }
            CompositeLogic::Any => {
                let detected = matched > 0;
                let confidence = results
                    .iter()
                    .map(|result| result.confidence)
                    .fold(0.0, f64::max);
                DetectionResult::new(
                    detected,
                    confidence,
                    format!("OR: {matched}/{} detectors matched", results.len()),
                )
            }
        }
    }
}

/// Ordered, confidence-gated fallback over child detectors.
///
/// Children are tried most-reliable-first by caller convention (DOM > URL >
/// text). The first child that detects with confidence at or above the gate
/// wins immediately, so slower low-confidence signals are only consulted
/// when the structural ones stay silent. When nothing clears the gate, the
/// highest-confidence result seen is returned as the fallback, which may
/// itself be negative.
pub struct CascadeDetector {
    detectors: Vec<Box<dyn Detector>>,
    min_confidence: f64,
}

/// Default confidence gate for cascade early-exit.
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.7;

impl CascadeDetector {
    pub fn new(detectors: Vec<Box<dyn Detector>>) -> Self {
        Self::with_min_confidence(detectors, DEFAULT_MIN_CONFIDENCE)
    }

    pub fn with_min_confidence(detectors: Vec<Box<dyn Detector>>, min_confidence: f64) -> Self {
        Self {
            detectors,
            min_confidence: min_confidence.clamp(0.0, 1.0),
        }
    }
}

impl Detector for CascadeDetector {
    fn detect(&self, ctx: &Context) -> DetectionResult {
        let mut fallback: Option<DetectionResult> = None;

        for (position, detector) in self.detectors.iter().enumerate() {
            let result = detector.detect(ctx);

            if result.detected && result.confidence >= self.min_confidence {
                return DetectionResult::new(
                    true,
                    result.confidence,
                    format!("[cascade position {position}] {}", result.reasoning),
                );
            }

            let better = fallback
                .as_ref()
                .is_none_or(|best| result.confidence > best.confidence);
            if better {
                fallback = Some(result);
            }
        }

        fallback.unwrap_or_else(|| DetectionResult::negative("cascade has no detectors"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Driver, DriverError, ElementHandle};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    struct StubDriver {
        elements: Vec<ElementHandle>,
        text: Result<String, DriverError>,
        faulty_selectors: Vec<String>,
    }

    impl StubDriver {
        fn empty() -> Self {
            Self {
                elements: Vec::new(),
                text: Ok(String::new()),
                faulty_selectors: Vec::new(),
            }
        }
    }

    impl Driver for StubDriver {
        fn find_by_path_expr(&self, expr: &str) -> Result<Vec<ElementHandle>, DriverError> {
            if self.faulty_selectors.iter().any(|s| s == expr) {
                return Err(DriverError::Fault("stale element tree".into()));
            }
            Ok(self.elements.clone())
        }

        fn find_by_style_selector(&self, selector: &str) -> Result<Vec<ElementHandle>, DriverError> {
            self.find_by_path_expr(selector)
        }

        fn page_text(&self) -> Result<String, DriverError> {
            self.text.clone()
        }

        fn current_url(&self) -> Result<Url, DriverError> {
            Err(DriverError::Unavailable)
        }
    }

    struct ScriptedDetector {
        result: DetectionResult,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedDetector {
        fn new(result: DetectionResult) -> (Box<dyn Detector>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Box::new(Self {
                    result,
                    calls: Arc::clone(&calls),
                }),
                calls,
            )
        }
    }

    impl Detector for ScriptedDetector {
        fn detect(&self, _ctx: &Context) -> DetectionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    #[test]
    fn url_detector_matches_literal_substring() {
        let mut ctx = Context::new();
        ctx.set(crate::context::keys::URL, "https://example.com/login?next=/");
        let detector = UrlPatternDetector::new(["/login", "/sign-in"]);
        let result = detector.detect(&ctx);
        assert!(result.detected);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn url_detector_regex_rejects_invalid_pattern_at_construction() {
        let err = UrlPatternDetector::with_regex(["/profile/(unclosed"]).unwrap_err();
        assert!(matches!(err, DetectorError::InvalidPattern { .. }));
    }

    #[test]
    fn url_detector_regex_matches() {
        let mut ctx = Context::new();
        ctx.set(crate::context::keys::URL, "https://example.com/in/jane-doe");
        let detector = UrlPatternDetector::with_regex([r"/in/[a-z-]+"]).unwrap();
        assert!(detector.detect(&ctx).detected);
    }

    #[test]
    fn dom_detector_without_driver_is_negative() {
        let detector = DomElementDetector::path_expr(["//form"]);
        let result = detector.detect(&Context::new());
        assert!(!result.detected);
        assert_eq!(result.confidence, 0.0);
        assert!(result.reasoning.contains("no driver"));
    }

    #[test]
    fn dom_detector_reports_matching_selector() {
        let driver = StubDriver {
            elements: vec![ElementHandle::new("e1"), ElementHandle::new("e2")],
            ..StubDriver::empty()
        };
        let ctx = Context::new().with_driver(Arc::new(driver));
        let detector = DomElementDetector::path_expr(["//form[@id='login']"]);
        let result = detector.detect(&ctx);
        assert!(result.detected);
        assert_eq!(result.confidence, 0.9);
        assert!(result.reasoning.contains("//form[@id='login']"));
        assert!(result.reasoning.contains("2 element(s)"));
    }

    #[test]
    fn dom_detector_swallows_driver_faults_and_continues() {
        let driver = StubDriver {
            elements: vec![ElementHandle::new("e1")],
            faulty_selectors: vec!["//broken".to_string()],
            ..StubDriver::empty()
        };
        let ctx = Context::new().with_driver(Arc::new(driver));
        let detector = DomElementDetector::path_expr(["//broken", "//form"]);
        assert!(detector.detect(&ctx).detected);
    }

    #[test]
    fn dom_detector_records_last_fault_when_nothing_matches() {
        let driver = StubDriver {
            faulty_selectors: vec!["//broken".to_string()],
            ..StubDriver::empty()
        };
        let ctx = Context::new().with_driver(Arc::new(driver));
        let detector = DomElementDetector::path_expr(["//broken"]);
        let result = detector.detect(&ctx);
        assert!(!result.detected);
        assert!(result.reasoning.contains("stale element tree"));
    }

    #[test]
    fn text_detector_is_case_insensitive_by_default() {
        let driver = StubDriver {
            text: Ok("Welcome back to your Dashboard".to_string()),
            ..StubDriver::empty()
        };
        let ctx = Context::new().with_driver(Arc::new(driver));
        let detector = TextContentDetector::new(["dashboard"]);
        let result = detector.detect(&ctx);
        assert!(result.detected);
        assert_eq!(result.confidence, 0.7);
    }

    #[test]
    fn text_detector_downgrades_driver_fault() {
        let driver = StubDriver {
            text: Err(DriverError::Fault("render timeout".into())),
            ..StubDriver::empty()
        };
        let ctx = Context::new().with_driver(Arc::new(driver));
        let detector = TextContentDetector::new(["anything"]);
        let result = detector.detect(&ctx);
        assert!(!result.detected);
        assert!(result.reasoning.contains("render timeout"));
    }

    #[test]
    fn composite_and_takes_minimum_confidence() {
        let (a, _) = ScriptedDetector::new(DetectionResult::positive(0.9, "a"));
        let (b, _) = ScriptedDetector::new(DetectionResult::positive(0.3, "b"));
        let detector = CompositeDetector::new(vec![a, b], CompositeLogic::All);
        let result = detector.detect(&Context::new());
        assert!(result.detected);
        assert_eq!(result.confidence, 0.3);
    }

    #[test]
    fn composite_or_takes_maximum_confidence() {
        let (a, _) = ScriptedDetector::new(DetectionResult::positive(0.9, "a"));
        let (b, _) = ScriptedDetector::new(DetectionResult::positive(0.3, "b"));
        let detector = CompositeDetector::new(vec![a, b], CompositeLogic::Any);
        let result = detector.detect(&Context::new());
        assert!(result.detected);
        assert_eq!(result.confidence, 0.9);
    }

    #[test]
    fn composite_and_fails_when_one_child_misses() {
        let (a, _) = ScriptedDetector::new(DetectionResult::positive(0.9, "a"));
        let (b, _) = ScriptedDetector::new(DetectionResult::negative("b"));
        let detector = CompositeDetector::new(vec![a, b], CompositeLogic::All);
        assert!(!detector.detect(&Context::new()).detected);
    }

    #[test]
    fn cascade_stops_at_first_confident_detector() {
        let (first, first_calls) = ScriptedDetector::new(DetectionResult::positive(0.9, "dom"));
        let (second, second_calls) = ScriptedDetector::new(DetectionResult::positive(1.0, "url"));
        let cascade = CascadeDetector::new(vec![first, second]);

        let result = cascade.detect(&Context::new());
        assert!(result.detected);
        assert_eq!(result.confidence, 0.9);
        assert!(result.reasoning.contains("cascade position 0"));
        assert_eq!(first_calls.load(Ordering::SeqCst), 1);
        // Later detectors are never invoked after an early exit.
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cascade_falls_through_to_best_candidate() {
        let (first, _) = ScriptedDetector::new(DetectionResult::negative("dom missed"));
        let (second, _) = ScriptedDetector::new(DetectionResult::new(true, 0.5, "weak text"));
        let cascade = CascadeDetector::with_min_confidence(vec![first, second], 0.7);

        let result = cascade.detect(&Context::new());
        // Nothing cleared the gate, so the highest-confidence candidate wins.
        assert!(result.detected);
        assert_eq!(result.confidence, 0.5);
        assert!(result.reasoning.contains("weak text"));
    }

    #[test]
    fn cascade_returns_negative_fallback_when_everything_misses() {
        let (first, _) = ScriptedDetector::new(DetectionResult::negative("dom missed"));
        let (second, _) = ScriptedDetector::new(DetectionResult::negative("text missed"));
        let cascade = CascadeDetector::new(vec![first, second]);
        assert!(!cascade.detect(&Context::new()).detected);
    }

    #[test]
    fn empty_cascade_is_negative() {
        let cascade = CascadeDetector::new(Vec::new());
        let result = cascade.detect(&Context::new());
        assert!(!result.detected);
    }
}
