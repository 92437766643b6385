//! Proxy pool management and trigger-based rotation.
//!
//! Tracks per-proxy reliability, quarantines endpoints that get blocked, and
//! always hands out the healthiest egress point available. Quarantine expiry
//! is checked lazily on selection, never by a background timer, and the
//! clock is injected so expiry is deterministic under test.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::context::{Clock, SystemClock};

/// Default quarantine applied to blocked proxies.
pub const DEFAULT_BLOCK_QUARANTINE: Duration = Duration::from_secs(3600);

/// Why a rotation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationTrigger {
    /// Rate limited; rotate immediately.
    RateLimit,
    /// Hit a captcha; rotate and let the scaler raise humanness.
    Captcha,
    /// IP blocked; quarantine the proxy and rotate.
    Block,
    /// Caller needs a different region for content.
    Geographic,
    /// Proactive rotation after N requests.
    Scheduled,
}

impl std::fmt::Display for RotationTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RotationTrigger::RateLimit => "rate_limit",
            RotationTrigger::Captcha => "captcha",
            RotationTrigger::Block => "block",
            RotationTrigger::Geographic => "geographic",
            RotationTrigger::Scheduled => "scheduled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks5,
}

impl Default for ProxyProtocol {
    fn default() -> Self {
        ProxyProtocol::Http
    }
}

impl std::fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks5 => "socks5",
        };
        f.write_str(name)
    }
}

/// A single proxy endpoint with selection metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: ProxyProtocol,
    /// Geographic region identifier, e.g. "us-east".
    #[serde(default)]
    pub region: Option<String>,
    /// Provider/service name, for tracking which service performs best.
    #[serde(default)]
    pub provider: Option<String>,
}

impl ProxyConfig {
    pub fn new(host: impl Into<String>, port: u16, protocol: ProxyProtocol) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
            region: None,
            provider: None,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Identity for counting purposes. Two configs with the same
    /// host/port/protocol are the same proxy; region and provider are
    /// metadata.
    fn key(&self) -> ProxyKey {
        ProxyKey {
            host: self.host.clone(),
            port: self.port,
            protocol: self.protocol,
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

impl std::fmt::Display for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.endpoint())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ProxyKey {
    host: String,
    port: u16,
    protocol: ProxyProtocol,
}

/// Raw per-proxy counters.
#[derive(Debug, Clone, Default)]
pub struct ProxyRecord {
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub rate_limits: u64,
    pub captchas: u64,
    pub blocks: u64,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
}

impl ProxyRecord {
    pub fn success_rate(&self) -> f64 {
        // Untested proxies get the benefit of the doubt so new egress
        // points are tried before being penalized.
        if self.total_requests == 0 {
            return 1.0;
        }
        self.successes as f64 / self.total_requests as f64
    }
}

#[derive(Debug)]
struct ProxyEntry {
    config: ProxyConfig,
    record: ProxyRecord,
    quarantined_until: Option<DateTime<Utc>>,
}

/// Per-proxy health line in a metrics report.
#[derive(Debug, Clone)]
pub struct ProxyHealthEntry {
    pub proxy: ProxyConfig,
    pub success_rate: f64,
    pub total_requests: u64,
    pub rate_limits: u64,
    pub captchas: u64,
    pub blocks: u64,
    pub quarantined: bool,
}

/// Requests/successes aggregated over a region or provider.
#[derive(Debug, Clone, Default)]
pub struct GroupStats {
    pub requests: u64,
    pub successes: u64,
}

impl GroupStats {
    pub fn success_rate(&self) -> f64 {
        self.successes as f64 / self.requests.max(1) as f64
    }
}

/// Aggregated rotator metrics.
#[derive(Debug, Clone)]
pub struct RotatorMetrics {
    pub per_proxy: Vec<ProxyHealthEntry>,
    pub per_region: HashMap<String, GroupStats>,
    pub per_provider: HashMap<String, GroupStats>,
    pub overall_success_rate: f64,
    pub quarantined_count: usize,
}

/// Proxy pool with reliability tracking and trigger-based rotation.
///
/// Shared across workers to aggregate fleet-wide signal; callers that share
/// an instance must serialize access (one mutex per rotator).
pub struct NetworkRotator {
    pool: Vec<ProxyEntry>,
    current: Option<ProxyKey>,
    block_quarantine: Duration,
    clock: Arc<dyn Clock>,
}

impl NetworkRotator {
    pub fn new(proxies: Vec<ProxyConfig>) -> Self {
        Self::with_clock(proxies, Arc::new(SystemClock))
    }

    pub fn with_clock(proxies: Vec<ProxyConfig>, clock: Arc<dyn Clock>) -> Self {
        let mut rotator = Self {
            pool: Vec::new(),
            current: None,
            block_quarantine: DEFAULT_BLOCK_QUARANTINE,
            clock,
        };
        for proxy in proxies {
            rotator.add_proxy(proxy);
        }
        rotator
    }

    pub fn set_block_quarantine(&mut self, duration: Duration) {
        if duration > Duration::ZERO {
            self.block_quarantine = duration;
        }
    }

    /// Add a proxy to the pool. Duplicate host/port/protocol entries merge
    /// into the existing record.
    pub fn add_proxy(&mut self, proxy: ProxyConfig) {
        let key = proxy.key();
        if self.pool.iter().any(|entry| entry.config.key() == key) {
            log::debug!("proxy {proxy} already pooled; merging");
            return;
        }
        self.pool.push(ProxyEntry {
            config: proxy,
            record: ProxyRecord::default(),
            quarantined_until: None,
        });
    }

    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    /// Best available proxy by observed success rate, or `None` when the
    /// whole pool is quarantined.
    pub fn get_proxy(&mut self) -> Option<ProxyConfig> {
        self.expire_stale_quarantines();

        let best = self
            .pool
            .iter()
            .filter(|entry| entry.quarantined_until.is_none())
            .max_by(|a, b| {
                a.record
                    .success_rate()
                    .partial_cmp(&b.record.success_rate())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })?;

        let config = best.config.clone();
        self.current = Some(config.key());
        Some(config)
    }

    /// Currently selected proxy, if any.
    pub fn current_proxy(&self) -> Option<&ProxyConfig> {
        let key = self.current.as_ref()?;
        self.pool
            .iter()
            .find(|entry| entry.config.key() == *key)
            .map(|entry| &entry.config)
    }

    pub fn report_success(&mut self, proxy: &ProxyConfig) {
        let now = self.clock.now();
        if let Some(entry) = self.entry_mut(proxy) {
            entry.record.total_requests += 1;
            entry.record.successes += 1;
            entry.record.last_success = Some(now);
        }
    }

    /// Record a failure and react according to the trigger: rate limits,
    /// captchas, and blocks force a rotation, and blocks additionally
    /// quarantine the proxy before rotating so it cannot be re-selected.
    pub fn report_failure(
        &mut self,
        proxy: &ProxyConfig,
        trigger: RotationTrigger,
        detail: Option<&str>,
    ) {
        let now = self.clock.now();
        if let Some(entry) = self.entry_mut(proxy) {
            entry.record.total_requests += 1;
            entry.record.failures += 1;
            entry.record.last_failure = Some(now);
            match trigger {
                RotationTrigger::RateLimit => entry.record.rate_limits += 1,
                RotationTrigger::Captcha => entry.record.captchas += 1,
                RotationTrigger::Block => entry.record.blocks += 1,
                RotationTrigger::Geographic | RotationTrigger::Scheduled => {}
            }
        } else {
            log::debug!("failure reported for unknown proxy {proxy}; ignoring");
            return;
        }

        if let Some(detail) = detail {
            log::warn!("proxy {proxy} failed ({trigger}): {detail}");
        } else {
            log::warn!("proxy {proxy} failed ({trigger})");
        }

        match trigger {
            RotationTrigger::Block => {
                let quarantine = self.block_quarantine;
                self.quarantine(proxy, quarantine);
                self.rotate(trigger);
            }
            RotationTrigger::RateLimit | RotationTrigger::Captcha => {
                self.rotate(trigger);
            }
            RotationTrigger::Geographic | RotationTrigger::Scheduled => {}
        }
    }

    /// Switch away from the current proxy when an alternative exists.
    pub fn rotate(&mut self, reason: RotationTrigger) {
        self.expire_stale_quarantines();

        let current = self.current.clone();
        let has_alternative = self.pool.iter().any(|entry| {
            entry.quarantined_until.is_none() && Some(entry.config.key()) != current
        });

        if has_alternative {
            let previous = current;
            // Temporarily hide the current proxy so selection moves off it.
            if let Some(key) = &previous {
                if let Some(selected) = self
                    .pool
                    .iter()
                    .filter(|entry| {
                        entry.quarantined_until.is_none() && entry.config.key() != *key
                    })
                    .max_by(|a, b| {
                        a.record
                            .success_rate()
                            .partial_cmp(&b.record.success_rate())
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                {
                    let config = selected.config.clone();
                    log::info!("rotating proxy ({reason}) -> {config}");
                    self.current = Some(config.key());
                    return;
                }
            }
            if let Some(next) = self.get_proxy() {
                log::info!("rotating proxy ({reason}) -> {next}");
            }
        } else if self
            .current
            .as_ref()
            .and_then(|key| self.pool.iter().find(|entry| entry.config.key() == *key))
            .is_some_and(|entry| entry.quarantined_until.is_some())
        {
            log::warn!("rotation requested ({reason}) but no proxy is available");
            self.current = None;
        }
    }

    /// Remove a proxy from the selectable pool until `duration` from now.
    ///
    /// Non-positive durations are ignored; quarantine is always a positive,
    /// finite window.
    pub fn quarantine(&mut self, proxy: &ProxyConfig, duration: Duration) {
        if duration.is_zero() {
            log::debug!("ignoring zero-length quarantine for {proxy}");
            return;
        }
        let expiry = self.clock.now()
            + chrono::Duration::from_std(duration)
                .unwrap_or_else(|_| chrono::Duration::seconds(i64::MAX / 1_000));
        if let Some(entry) = self.entry_mut(proxy) {
            entry.quarantined_until = Some(expiry);
            log::info!("quarantined {proxy} until {expiry}");
        }
    }

    /// Aggregated health metrics for the whole pool.
    pub fn metrics(&self) -> RotatorMetrics {
        let now = self.clock.now();
        let mut per_proxy = Vec::with_capacity(self.pool.len());
        let mut per_region: HashMap<String, GroupStats> = HashMap::new();
        let mut per_provider: HashMap<String, GroupStats> = HashMap::new();
        let mut total_requests = 0u64;
        let mut total_successes = 0u64;
        let mut quarantined_count = 0usize;

        for entry in &self.pool {
            let quarantined = entry
                .quarantined_until
                .is_some_and(|until| until > now);
            if quarantined {
                quarantined_count += 1;
            }

            per_proxy.push(ProxyHealthEntry {
                proxy: entry.config.clone(),
                success_rate: entry.record.success_rate(),
                total_requests: entry.record.total_requests,
                rate_limits: entry.record.rate_limits,
                captchas: entry.record.captchas,
                blocks: entry.record.blocks,
                quarantined,
            });

            total_requests += entry.record.total_requests;
            total_successes += entry.record.successes;

            if let Some(region) = &entry.config.region {
                let stats = per_region.entry(region.clone()).or_default();
                stats.requests += entry.record.total_requests;
                stats.successes += entry.record.successes;
            }
            if let Some(provider) = &entry.config.provider {
                let stats = per_provider.entry(provider.clone()).or_default();
                stats.requests += entry.record.total_requests;
                stats.successes += entry.record.successes;
            }
        }

        RotatorMetrics {
            per_proxy,
            per_region,
            per_provider,
            overall_success_rate: total_successes as f64 / total_requests.max(1) as f64,
            quarantined_count,
        }
    }

    /// Reset counters for one proxy, or for the whole pool.
    pub fn reset_metrics(&mut self, proxy: Option<&ProxyConfig>) {
        match proxy {
            Some(proxy) => {
                if let Some(entry) = self.entry_mut(proxy) {
                    entry.record = ProxyRecord::default();
                }
            }
            None => {
                for entry in &mut self.pool {
                    entry.record = ProxyRecord::default();
                }
            }
        }
    }

    fn entry_mut(&mut self, proxy: &ProxyConfig) -> Option<&mut ProxyEntry> {
        let key = proxy.key();
        self.pool.iter_mut().find(|entry| entry.config.key() == key)
    }

    fn expire_stale_quarantines(&mut self) {
        let now = self.clock.now();
        for entry in &mut self.pool {
            if entry.quarantined_until.is_some_and(|until| until <= now) {
                log::debug!("quarantine expired for {}", entry.config);
                entry.quarantined_until = None;
            }
        }
    }
}

impl std::fmt::Debug for NetworkRotator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkRotator")
            .field("pool_size", &self.pool.len())
            .field("current", &self.current_proxy().map(ProxyConfig::endpoint))
            .finish()
    }
}
