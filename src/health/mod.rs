//! Composite health monitor: combines latency, market-data freshness and
//! heartbeat signals into a single pass/fail gate for the execution router,
//! with a short TTL cache so a hot order path doesn't re-evaluate on every call.

pub mod heartbeat;

pub use heartbeat::HeartbeatMonitor;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::config::HealthConfig;

#[derive(Debug, Clone, Copy, Default)]
pub struct HealthInputs {
    pub latency_ms: Option<f64>,
    pub market_data_age_sec: Option<i64>,
    pub heartbeat_alive: Option<bool>,
}

struct Cached {
    healthy: bool,
    reasons: HashMap<String, String>,
    computed_at: Instant,
}

pub struct CompositeHealthMonitor {
    config: HealthConfig,
    heartbeat: Arc<HeartbeatMonitor>,
    degrade_latency_ms: f64,
    cache: Mutex<Option<Cached>>,
}

impl CompositeHealthMonitor {
    pub fn new(config: HealthConfig, heartbeat: Arc<HeartbeatMonitor>) -> Self {
        let degrade_latency_ms = (config.max_latency_ms as f64) * 0.7;
        Self { config, heartbeat, degrade_latency_ms, cache: Mutex::new(None) }
    }

    /// Cached for `cache_ttl_sec`; pass the freshest inputs you have, they're
    /// only used on a cache miss.
    pub fn is_system_healthy(&self, inputs: HealthInputs) -> bool {
        self.evaluate(inputs, false).healthy
    }

    /// Forces a fresh evaluation, bypassing the TTL cache, and returns the
    /// structured reason map (including `*_warn` keys for degraded-but-healthy
    /// signals that did not flip the healthy flag).
    pub fn reasons(&self, inputs: HealthInputs) -> HashMap<String, String> {
        self.evaluate(inputs, true).reasons
    }

    fn evaluate(&self, inputs: HealthInputs, force: bool) -> CachedView {
        if !force {
            if let Some(cached) = self.cache.lock().as_ref() {
                if cached.computed_at.elapsed().as_secs_f64() < self.config.cache_ttl_sec {
                    return CachedView { healthy: cached.healthy, reasons: cached.reasons.clone() };
                }
            }
        }

        let mut reasons = HashMap::new();
        let mut healthy = true;

        if let Some(latency) = inputs.latency_ms {
            if latency > self.config.max_latency_ms as f64 {
                healthy = false;
                reasons.insert("latency".to_string(), format!("too_high:{latency:.0}ms"));
            } else if latency > self.degrade_latency_ms {
                reasons.insert("latency_warn".to_string(), format!("degraded:{latency:.0}ms"));
            }
        }

        match inputs.market_data_age_sec {
            Some(age) if age > self.config.max_market_data_age_sec => {
                healthy = false;
                reasons.insert("market_data".to_string(), format!("stale:{age}s"));
            }
            None => {
                reasons.insert("market_data_warn".to_string(), "no_timestamp".to_string());
            }
            _ => {}
        }

        let stale = self.heartbeat.stale();
        if let Some((service, age)) = stale.iter().max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal)) {
            healthy = false;
            reasons.insert("heartbeat".to_string(), format!("stale:{service}:{age:.0}s"));
        }

        if inputs.heartbeat_alive == Some(false) {
            healthy = false;
            reasons.insert("heartbeat_alive".to_string(), "false".to_string());
        }

        *self.cache.lock() = Some(Cached { healthy, reasons: reasons.clone(), computed_at: Instant::now() });
        CachedView { healthy, reasons }
    }
}

struct CachedView {
    healthy: bool,
    reasons: HashMap<String, String>,
}
