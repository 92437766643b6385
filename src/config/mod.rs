//! Run configuration.
//!
//! Plain struct with a builder and JSON loading. Validation happens once at
//! build/load time; the rest of the crate can trust the ranges.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::behavior::DEFAULT_ADJUSTMENT_RATE;
use crate::detection::DEFAULT_MIN_CONFIDENCE;
use crate::network::{DEFAULT_BLOCK_QUARANTINE, ProxyConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{field} must be within [0, 1], got {value}")]
    OutOfRange { field: &'static str, value: f64 },
    #[error("quarantine duration must be positive")]
    NonPositiveQuarantine,
}

fn default_min_confidence() -> f64 {
    DEFAULT_MIN_CONFIDENCE
}

fn default_adjustment_rate() -> f64 {
    DEFAULT_ADJUSTMENT_RATE
}

fn default_quarantine_secs() -> u64 {
    DEFAULT_BLOCK_QUARANTINE.as_secs()
}

/// Tunables for one scraping run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Confidence gate for cascade detector early-exit.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    /// Per-escalation humanness adjustment.
    #[serde(default = "default_adjustment_rate")]
    pub adjustment_rate: f64,
    /// Quarantine applied to blocked proxies, in seconds.
    #[serde(default = "default_quarantine_secs")]
    pub block_quarantine_secs: u64,
    /// Initial humanness level, applied with
    /// [`crate::behavior::BehaviorScaler::with_level`].
    #[serde(default)]
    pub start_level: f64,
    /// Proxy pool for the network rotator.
    #[serde(default)]
    pub proxies: Vec<ProxyConfig>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            adjustment_rate: DEFAULT_ADJUSTMENT_RATE,
            block_quarantine_secs: DEFAULT_BLOCK_QUARANTINE.as_secs(),
            start_level: 0.0,
            proxies: Vec::new(),
        }
    }
}

impl CrawlConfig {
    pub fn builder() -> CrawlConfigBuilder {
        CrawlConfigBuilder::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn block_quarantine(&self) -> Duration {
        Duration::from_secs(self.block_quarantine_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("min_confidence", self.min_confidence),
            ("adjustment_rate", self.adjustment_rate),
            ("start_level", self.start_level),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange { field, value });
            }
        }
        if self.block_quarantine_secs == 0 {
            return Err(ConfigError::NonPositiveQuarantine);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct CrawlConfigBuilder {
    min_confidence: Option<f64>,
    adjustment_rate: Option<f64>,
    block_quarantine_secs: Option<u64>,
    start_level: Option<f64>,
    proxies: Vec<ProxyConfig>,
}

impl CrawlConfigBuilder {
    pub fn min_confidence(mut self, value: f64) -> Self {
        self.min_confidence = Some(value);
        self
    }

    pub fn adjustment_rate(mut self, value: f64) -> Self {
        self.adjustment_rate = Some(value);
        self
    }

    pub fn block_quarantine(mut self, duration: Duration) -> Self {
        self.block_quarantine_secs = Some(duration.as_secs());
        self
    }

    pub fn start_level(mut self, value: f64) -> Self {
        self.start_level = Some(value);
        self
    }

    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxies.push(proxy);
        self
    }

    pub fn build(self) -> Result<CrawlConfig, ConfigError> {
        let defaults = CrawlConfig::default();
        let config = CrawlConfig {
            min_confidence: self.min_confidence.unwrap_or(defaults.min_confidence),
            adjustment_rate: self.adjustment_rate.unwrap_or(defaults.adjustment_rate),
            block_quarantine_secs: self
                .block_quarantine_secs
                .unwrap_or(defaults.block_quarantine_secs),
            start_level: self.start_level.unwrap_or(defaults.start_level),
            proxies: self.proxies,
        };
        config.validate()?;
        Ok(config)
    }
}
