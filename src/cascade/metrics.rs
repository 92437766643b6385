//! Running statistics over cascade executions.
//!
//! Purely observational: nothing here blocks or mutates cascade behavior.
//! The behavior scaler reads snapshots to decide how fast it is safe to go.

use super::SelectorKind;

/// Derived view over the raw counters, computed on demand so the ratios can
/// never drift from their inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CascadeMetricsSnapshot {
    /// Mean normalized position across successful attempts (0.0 = primary
    /// selector, 1.0 = last resort).
    pub avg_position: f64,
    pub text_fallback_rate: f64,
    pub visual_fallback_rate: f64,
    pub primary_success_rate: f64,
    pub overall_success_rate: f64,
    /// Share of attempts won by a path-expr or style selector.
    pub structural_success_rate: f64,
}

impl Default for CascadeMetricsSnapshot {
    /// Cold-start prior: optimistic about structure, pessimistic about
    /// fallbacks.
    fn default() -> Self {
        Self {
            avg_position: 0.0,
            text_fallback_rate: 0.0,
            visual_fallback_rate: 0.0,
            primary_success_rate: 1.0,
            overall_success_rate: 1.0,
            structural_success_rate: 1.0,
        }
    }
}

/// Counters tracking which selectors win cascades.
///
/// Frequent wins by text or visual fallbacks are the earliest sign of site
/// changes or bot detection, well before raw request failures show up.
#[derive(Debug, Clone, Default)]
pub struct CascadeMetrics {
    total_attempts: u64,
    primary_successes: u64,
    fallback_successes: u64,
    structural_successes: u64,
    text_fallbacks: u64,
    visual_fallbacks: u64,
    position_sum: f64,
    cascade_length: usize,
}

impl CascadeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a cascade that succeeded at `position` with a selector of
    /// `kind`, in a cascade of `cascade_length` selectors.
    pub fn record_success(&mut self, position: usize, kind: SelectorKind, cascade_length: usize) {
        self.total_attempts += 1;
        self.cascade_length = cascade_length;

        if position == 0 {
            self.primary_successes += 1;
        } else {
            self.fallback_successes += 1;
        }

        // Normalize position to [0, 1]; a length-1 cascade is always 0.
        let normalized = if cascade_length > 1 {
            position as f64 / (cascade_length - 1) as f64
        } else {
            0.0
        };
        self.position_sum += normalized;

        match kind {
            SelectorKind::Text => self.text_fallbacks += 1,
            SelectorKind::Visual => self.visual_fallbacks += 1,
            SelectorKind::PathExpr | SelectorKind::StyleSelector => {
                self.structural_successes += 1;
            }
        }
    }

    /// Record a cascade where every selector failed.
    pub fn record_failure(&mut self) {
        self.total_attempts += 1;
    }

    pub fn total_attempts(&self) -> u64 {
        self.total_attempts
    }

    pub fn snapshot(&self) -> CascadeMetricsSnapshot {
        if self.total_attempts == 0 {
            return CascadeMetricsSnapshot::default();
        }

        let attempts = self.total_attempts as f64;
        let successes = self.primary_successes + self.fallback_successes;

        CascadeMetricsSnapshot {
            // Average over successful attempts only; folding failures in
            // would read as "position 0" and mask degradation.
            avg_position: self.position_sum / (successes.max(1) as f64),
            text_fallback_rate: self.text_fallbacks as f64 / attempts,
            visual_fallback_rate: self.visual_fallbacks as f64 / attempts,
            primary_success_rate: self.primary_successes as f64 / attempts,
            overall_success_rate: successes as f64 / attempts,
            structural_success_rate: self.structural_successes as f64 / attempts,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cold_start_uses_optimistic_prior() {
        let metrics = CascadeMetrics::new();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.primary_success_rate, 1.0);
        assert_eq!(snapshot.overall_success_rate, 1.0);
        assert_eq!(snapshot.structural_success_rate, 1.0);
        assert_eq!(snapshot.text_fallback_rate, 0.0);
        assert_eq!(snapshot.visual_fallback_rate, 0.0);
        assert_eq!(snapshot.avg_position, 0.0);
    }

    #[test]
    fn primary_win_keeps_position_at_zero() {
        let mut metrics = CascadeMetrics::new();
        metrics.record_success(0, SelectorKind::PathExpr, 3);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.avg_position, 0.0);
        assert_eq!(snapshot.primary_success_rate, 1.0);
        assert_eq!(snapshot.structural_success_rate, 1.0);
    }

    #[test]
    fn fallback_wins_raise_position_and_fallback_rates() {
        let mut metrics = CascadeMetrics::new();
        metrics.record_success(0, SelectorKind::PathExpr, 3);
        metrics.record_success(2, SelectorKind::Text, 3);
        let snapshot = metrics.snapshot();
        assert!((snapshot.avg_position - 0.5).abs() < 1e-9);
        assert_eq!(snapshot.primary_success_rate, 0.5);
        assert_eq!(snapshot.text_fallback_rate, 0.5);
        assert_eq!(snapshot.structural_success_rate, 0.5);
    }

    #[test]
    fn failures_count_against_rates_but_not_position() {
        let mut metrics = CascadeMetrics::new();
        metrics.record_success(1, SelectorKind::StyleSelector, 2);
        metrics.record_failure();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.overall_success_rate, 0.5);
        // Position averages over the one success only.
        assert!((snapshot.avg_position - 1.0).abs() < 1e-9);
    }

    #[test]
    fn length_one_cascade_normalizes_to_zero() {
        let mut metrics = CascadeMetrics::new();
        metrics.record_success(0, SelectorKind::PathExpr, 1);
        assert_eq!(metrics.snapshot().avg_position, 0.0);
    }

    #[test]
    fn reset_clears_everything() {
        let mut metrics = CascadeMetrics::new();
        metrics.record_success(1, SelectorKind::Visual, 4);
        metrics.reset();
        assert_eq!(metrics.total_attempts(), 0);
        assert_eq!(metrics.snapshot(), CascadeMetricsSnapshot::default());
    }
}
