//! Adaptive behavior scaling between machine-like and human-like profiles.
//!
//! The scaler maintains a single humanness level in `[0, 1]` and converts
//! recent success/failure telemetry into adjustments of that level. It
//! reacts to structural degradation (failing selectors, deep cascade
//! fallbacks) faster than to raw request failures, because structural
//! degradation shows up first when a site changes or starts detecting the
//! agent.

use once_cell::sync::Lazy;
use rand::Rng;
use std::time::Duration;

use crate::cascade::CascadeMetricsSnapshot;

/// Default per-call adjustment applied by [`BehaviorScaler::escalate`].
pub const DEFAULT_ADJUSTMENT_RATE: f64 = 0.1;

static MACHINE_LIKE: Lazy<BehaviorProfile> = Lazy::new(|| BehaviorProfile {
    delay_range: (0.0, 0.1),
    mouse_movement: false,
    scroll_behavior: false,
    typing_cadence: None,
    jitter: 0.0,
});

static HUMAN_LIKE: Lazy<BehaviorProfile> = Lazy::new(|| BehaviorProfile {
    delay_range: (1.0, 3.0),
    mouse_movement: true,
    scroll_behavior: true,
    typing_cadence: Some((0.05, 0.15)),
    jitter: 0.3,
});

/// Timing and interaction parameters controlling how human-like the agent's
/// actions appear.
///
/// Always produced fresh by interpolation; never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct BehaviorProfile {
    /// Min/max delay between actions, in seconds.
    pub delay_range: (f64, f64),
    pub mouse_movement: bool,
    pub scroll_behavior: bool,
    /// Min/max delay between keystrokes in seconds; `None` means instant
    /// text input.
    pub typing_cadence: Option<(f64, f64)>,
    /// Randomness factor in `[0, 1]` applied when sampling delays.
    pub jitter: f64,
}

impl BehaviorProfile {
    /// Fast, efficient profile (level 0.0).
    pub fn machine_like() -> Self {
        MACHINE_LIKE.clone()
    }

    /// Slow, stealthy profile (level 1.0).
    pub fn human_like() -> Self {
        HUMAN_LIKE.clone()
    }

    /// Sample an inter-action delay. The core computes durations; an
    /// external scheduler performs the actual wait.
    pub fn sample_delay<R: Rng>(&self, rng: &mut R) -> Duration {
        Self::sample_range(self.delay_range, self.jitter, rng)
    }

    /// Sample a keystroke delay, or `None` when input is instant.
    pub fn sample_keystroke_delay<R: Rng>(&self, rng: &mut R) -> Option<Duration> {
        self.typing_cadence
            .map(|cadence| Self::sample_range(cadence, self.jitter, rng))
    }

    fn sample_range<R: Rng>((min, max): (f64, f64), jitter: f64, rng: &mut R) -> Duration {
        let base = if max > min {
            rng.gen_range(min..=max)
        } else {
            min
        };
        let variance = if jitter > 0.0 {
            rng.gen_range(1.0 - jitter..=1.0 + jitter)
        } else {
            1.0
        };
        Duration::from_secs_f64((base * variance).max(0.0))
    }
}

/// Maps a humanness level plus feedback signals to a concrete
/// [`BehaviorProfile`].
#[derive(Debug, Clone)]
pub struct BehaviorScaler {
    min_profile: BehaviorProfile,
    max_profile: BehaviorProfile,
    current_level: f64,
}

impl BehaviorScaler {
    /// Scaler between the two given endpoints, starting machine-like
    /// (level 0.0).
    pub fn new(min_profile: BehaviorProfile, max_profile: BehaviorProfile) -> Self {
        Self {
            min_profile,
            max_profile,
            current_level: 0.0,
        }
    }

    /// Start from a given humanness level, clamped into `[0, 1]`. This is
    /// how a configured `start_level` reaches the scaler.
    pub fn with_level(mut self, level: f64) -> Self {
        self.current_level = level.clamp(0.0, 1.0);
        self
    }

    /// Current humanness level in `[0, 1]`.
    pub fn current_level(&self) -> f64 {
        self.current_level
    }

    /// Pure interpolation between the endpoint profiles. Does not touch the
    /// stored level.
    ///
    /// Numeric fields interpolate linearly. Typing cadence interpolates
    /// from a zero baseline when only the human-like endpoint has one.
    /// Boolean features switch on at level >= 0.5, and only when the
    /// human-like endpoint enables them.
    pub fn scale(&self, level: f64) -> BehaviorProfile {
        let level = level.clamp(0.0, 1.0);

        let delay_range = (
            lerp(self.min_profile.delay_range.0, self.max_profile.delay_range.0, level),
            lerp(self.min_profile.delay_range.1, self.max_profile.delay_range.1, level),
        );

        let typing_cadence = match (self.min_profile.typing_cadence, self.max_profile.typing_cadence)
        {
            (Some(min), Some(max)) => {
                Some((lerp(min.0, max.0, level), lerp(min.1, max.1, level)))
            }
            // Interpolate from a zero baseline, but level 0 stays truly
            // instant rather than a zero-length cadence.
            (None, Some(max)) => {
                (level > 0.0).then(|| (lerp(0.0, max.0, level), lerp(0.0, max.1, level)))
            }
            _ => None,
        };

        BehaviorProfile {
            delay_range,
            mouse_movement: self.max_profile.mouse_movement && level >= 0.5,
            scroll_behavior: self.max_profile.scroll_behavior && level >= 0.5,
            typing_cadence,
            jitter: lerp(self.min_profile.jitter, self.max_profile.jitter, level),
        }
    }

    /// Adjust the humanness level from recent telemetry and return the
    /// profile for the new level.
    ///
    /// The raw success rate is first adjusted by cascade signals:
    /// - structural selectors succeeding less than 70% of the time is the
    ///   strongest penalty (site structure changed);
    /// - combined text+visual fallback rate above 20% penalizes
    ///   proportionally;
    /// - stable structure (structural rate > 0.9, average position < 0.1)
    ///   earns a capped boost, so the agent speeds back up;
    /// - an average cascade position past the midpoint penalizes
    ///   proportionally.
    ///
    /// An adjusted rate above 0.95 lowers the level, below 0.7 raises it;
    /// the band between leaves the level unchanged so it cannot oscillate.
    pub fn escalate(
        &mut self,
        success_rate: f64,
        cascade: Option<&CascadeMetricsSnapshot>,
        adjustment_rate: f64,
    ) -> BehaviorProfile {
        let mut adjusted = success_rate;

        if let Some(snapshot) = cascade {
            if snapshot.structural_success_rate < 0.7 {
                adjusted *= 0.8;
            }

            let fallback_rate = snapshot.text_fallback_rate + snapshot.visual_fallback_rate;
            if fallback_rate > 0.2 {
                adjusted *= 1.0 - fallback_rate * 0.4;
            }

            if snapshot.structural_success_rate > 0.9 && snapshot.avg_position < 0.1 {
                adjusted = (adjusted * 1.1).min(1.0);
            }

            if snapshot.avg_position > 0.5 {
                adjusted *= 1.0 - snapshot.avg_position * 0.3;
            }
        }

        if adjusted > 0.95 {
            self.current_level = (self.current_level - adjustment_rate).max(0.0);
            log::debug!(
                "behavior level lowered to {:.2} (adjusted rate {adjusted:.3})",
                self.current_level
            );
        } else if adjusted < 0.7 {
            self.current_level = (self.current_level + adjustment_rate).min(1.0);
            log::info!(
                "behavior level raised to {:.2} (adjusted rate {adjusted:.3})",
                self.current_level
            );
        }

        self.scale(self.current_level)
    }

    /// Profile for the current level.
    pub fn current_profile(&self) -> BehaviorProfile {
        self.scale(self.current_level)
    }

    /// Back to fully machine-like.
    pub fn reset(&mut self) {
        self.current_level = 0.0;
    }
}

impl Default for BehaviorScaler {
    fn default() -> Self {
        Self::new(BehaviorProfile::machine_like(), BehaviorProfile::human_like())
    }
}

// Endpoint-exact form: levels 0 and 1 reproduce the profiles bit-for-bit.
fn lerp(min: f64, max: f64, level: f64) -> f64 {
    min * (1.0 - level) + max * level
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn scale_zero_is_the_machine_profile() {
        let scaler = BehaviorScaler::default();
        assert_eq!(scaler.scale(0.0), BehaviorProfile::machine_like());
    }

    #[test]
    fn scale_one_is_the_human_profile() {
        let scaler = BehaviorScaler::default();
        assert_eq!(scaler.scale(1.0), BehaviorProfile::human_like());
    }

    #[test]
    fn scale_is_idempotent() {
        let scaler = BehaviorScaler::default();
        assert_eq!(scaler.scale(0.35), scaler.scale(0.35));
    }

    #[test]
    fn midpoint_interpolates_numerics_and_enables_booleans() {
        let scaler = BehaviorScaler::default();
        let profile = scaler.scale(0.5);
        assert!(approx(profile.delay_range.0, 0.5));
        assert!(approx(profile.delay_range.1, 1.55));
        assert!(profile.mouse_movement);
        assert!(profile.scroll_behavior);
        let cadence = profile.typing_cadence.unwrap();
        assert!(approx(cadence.0, 0.025));
        assert!(approx(cadence.1, 0.075));
        assert!(approx(profile.jitter, 0.15));
    }

    #[test]
    fn features_disabled_on_the_human_endpoint_never_switch_on() {
        let mut stealthy = BehaviorProfile::human_like();
        stealthy.mouse_movement = false;
        let scaler = BehaviorScaler::new(BehaviorProfile::machine_like(), stealthy);
        assert!(!scaler.scale(1.0).mouse_movement);
    }

    #[test]
    fn with_level_sets_the_starting_profile() {
        let scaler = BehaviorScaler::default().with_level(0.8);
        assert!(approx(scaler.current_level(), 0.8));
        assert_eq!(scaler.current_profile(), scaler.scale(0.8));
    }

    #[test]
    fn with_level_clamps_out_of_range_input() {
        assert_eq!(BehaviorScaler::default().with_level(1.5).current_level(), 1.0);
        assert_eq!(BehaviorScaler::default().with_level(-0.2).current_level(), 0.0);
    }

    #[test]
    fn high_success_rate_lowers_the_level() {
        let mut scaler = BehaviorScaler::default();
        scaler.current_level = 0.5;
        scaler.escalate(0.97, None, DEFAULT_ADJUSTMENT_RATE);
        assert!(approx(scaler.current_level(), 0.4));
    }

    #[test]
    fn low_success_rate_raises_the_level() {
        let mut scaler = BehaviorScaler::default();
        scaler.current_level = 0.5;
        scaler.escalate(0.5, None, DEFAULT_ADJUSTMENT_RATE);
        assert!(approx(scaler.current_level(), 0.6));
    }

    #[test]
    fn level_clamps_at_the_extremes() {
        let mut scaler = BehaviorScaler::default();
        scaler.current_level = 1.0;
        scaler.escalate(0.1, None, DEFAULT_ADJUSTMENT_RATE);
        assert_eq!(scaler.current_level(), 1.0);
        scaler.current_level = 0.0;
        scaler.escalate(1.0, None, DEFAULT_ADJUSTMENT_RATE);
        assert_eq!(scaler.current_level(), 0.0);
    }

    #[test]
    fn hysteresis_band_leaves_level_unchanged() {
        let mut scaler = BehaviorScaler::default();
        scaler.current_level = 0.5;
        scaler.escalate(0.85, None, DEFAULT_ADJUSTMENT_RATE);
        assert!(approx(scaler.current_level(), 0.5));
    }

    #[test]
    fn failing_structural_selectors_force_escalation() {
        let mut scaler = BehaviorScaler::default();
        scaler.current_level = 0.5;
        let snapshot = CascadeMetricsSnapshot {
            structural_success_rate: 0.5,
            ..Default::default()
        };
        // 0.8 success would sit in the hysteresis band, but the structural
        // penalty (x0.8) pushes it below the 0.7 threshold.
        scaler.escalate(0.8, Some(&snapshot), DEFAULT_ADJUSTMENT_RATE);
        assert!(approx(scaler.current_level(), 0.6));
    }

    #[test]
    fn heavy_fallback_use_forces_escalation() {
        let mut scaler = BehaviorScaler::default();
        scaler.current_level = 0.5;
        let snapshot = CascadeMetricsSnapshot {
            text_fallback_rate: 0.3,
            visual_fallback_rate: 0.2,
            ..Default::default()
        };
        // 0.85 * (1 - 0.5 * 0.4) = 0.68 < 0.7.
        scaler.escalate(0.85, Some(&snapshot), DEFAULT_ADJUSTMENT_RATE);
        assert!(approx(scaler.current_level(), 0.6));
    }

    #[test]
    fn stable_structure_earns_a_speed_boost() {
        let mut scaler = BehaviorScaler::default();
        scaler.current_level = 0.5;
        let snapshot = CascadeMetricsSnapshot {
            structural_success_rate: 0.95,
            avg_position: 0.05,
            ..Default::default()
        };
        // 0.9 * 1.1 = 0.99 > 0.95 lowers the level even though the raw
        // rate sat in the hysteresis band.
        scaler.escalate(0.9, Some(&snapshot), DEFAULT_ADJUSTMENT_RATE);
        assert!(approx(scaler.current_level(), 0.4));
    }

    #[test]
    fn deep_average_position_penalizes() {
        let mut scaler = BehaviorScaler::default();
        scaler.current_level = 0.5;
        let snapshot = CascadeMetricsSnapshot {
            avg_position: 0.8,
            ..Default::default()
        };
        // 0.9 * (1 - 0.8 * 0.3) = 0.684 < 0.7.
        scaler.escalate(0.9, Some(&snapshot), DEFAULT_ADJUSTMENT_RATE);
        assert!(approx(scaler.current_level(), 0.6));
    }

    #[test]
    fn sampled_delays_stay_in_the_jittered_envelope() {
        let profile = BehaviorProfile::human_like();
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let delay = profile.sample_delay(&mut rng).as_secs_f64();
            assert!(delay >= 1.0 * (1.0 - profile.jitter) - 1e-9);
            assert!(delay <= 3.0 * (1.0 + profile.jitter) + 1e-9);
        }
    }

    #[test]
    fn machine_profile_has_no_keystroke_delay() {
        let profile = BehaviorProfile::machine_like();
        let mut rng = rand::thread_rng();
        assert!(profile.sample_keystroke_delay(&mut rng).is_none());
    }
}
