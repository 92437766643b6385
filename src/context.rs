//! Shared execution context threaded through every detect/execute/transition
//! call.
//!
//! The value map is intentionally schemaless (states agree on key names by
//! convention) but access goes through typed accessors so key handling stays
//! in one place. Time is read from an injected [`Clock`] so time-dependent
//! states stay deterministic under test.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::driver::Driver;

/// Well-known context keys shared between states.
///
/// States may use any keys they like; these are the conventions the crate
/// itself reads or documents.
pub mod keys {
    /// Fallback current URL when no driver is attached.
    pub const URL: &str = "url";
    /// Most recent run status marker set by states.
    pub const STATUS: &str = "status";
    /// Backoff duration (seconds) computed by a rate-limit state for an
    /// external scheduler to honor. The core never sleeps on it.
    pub const BACKOFF_SECONDS: &str = "backoff_seconds";
}

/// Source of "now" for quarantine expiries and event timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock implementation used outside tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let mut now = self.now.lock().expect("clock poisoned");
        *now += duration;
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        let mut now = self.now.lock().expect("clock poisoned");
        *now = instant;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock poisoned")
    }
}

/// Mutable run-scoped state shared by the executor, states, and the adaptive
/// subsystems.
///
/// Owned by the state-machine executor for the lifetime of one scraping run;
/// each state's `execute` output is merged back into the value map,
/// overwriting existing keys.
#[derive(Clone)]
pub struct Context {
    driver: Option<Arc<dyn Driver>>,
    clock: Arc<dyn Clock>,
    values: HashMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            driver: None,
            clock: Arc::new(SystemClock),
            values: HashMap::new(),
        }
    }

    pub fn with_driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn driver(&self) -> Option<&Arc<dyn Driver>> {
        self.driver.as_ref()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Current URL as a string: the driver's live URL when one is attached
    /// and answering, otherwise the [`keys::URL`] value. Driver faults
    /// downgrade to the fallback.
    pub fn current_url(&self) -> Option<String> {
        if let Some(driver) = &self.driver {
            if let Ok(url) = driver.current_url() {
                return Some(url.to_string());
            }
        }
        self.get_str(keys::URL).map(str::to_string)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(Value::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(Value::as_bool)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Merge a state's output into the context, overwriting existing keys.
    pub fn merge(&mut self, output: HashMap<String, Value>) {
        for (key, value) in output {
            self.values.insert(key, value);
        }
    }

    pub fn values(&self) -> &HashMap<String, Value> {
        &self.values
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("driver", &self.driver.is_some())
            .field("values", &self.values)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_overwrites_existing_keys() {
        let mut ctx = Context::new();
        ctx.set(keys::STATUS, "pending");
        ctx.set("page", 1);

        let mut output = HashMap::new();
        output.insert(keys::STATUS.to_string(), json!("logged_in"));
        output.insert("items".to_string(), json!(["a", "b"]));
        ctx.merge(output);

        assert_eq!(ctx.get_str(keys::STATUS), Some("logged_in"));
        assert_eq!(ctx.get_f64("page"), Some(1.0));
        assert!(ctx.contains("items"));
    }

    #[test]
    fn current_url_falls_back_to_value_map() {
        let mut ctx = Context::new();
        assert_eq!(ctx.current_url(), None);
        ctx.set(keys::URL, "https://example.com/login");
        assert_eq!(ctx.current_url().as_deref(), Some("https://example.com/login"));
    }

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::new(Utc::now());
        let start = clock.now();
        clock.advance(chrono::Duration::seconds(90));
        assert_eq!(clock.now() - start, chrono::Duration::seconds(90));
    }
}
