//! Token-bucket admission control: a global bucket and a per-symbol bucket,
//! both refilled continuously at `rate / window_sec` tokens per second.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::util::atomic_file::atomic_write_json;

struct Buckets {
    global_tokens: f64,
    symbol_tokens: HashMap<String, f64>,
    last_refill: Instant,
}

pub struct RateLimiter {
    global_rate: f64,
    per_symbol_rate: f64,
    global_refill_per_sec: f64,
    symbol_refill_per_sec: f64,
    enabled: bool,
    persist_path: Option<PathBuf>,
    state: Mutex<Buckets>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RateLimiterSnapshot {
    global_tokens: f64,
    symbol_tokens: HashMap<String, f64>,
}

impl RateLimiter {
    pub fn new(enabled: bool, global_rate: u32, per_symbol_rate: u32, window_sec: u64) -> Self {
        let window = window_sec.max(1) as f64;
        Self {
            global_rate: global_rate as f64,
            per_symbol_rate: per_symbol_rate as f64,
            global_refill_per_sec: global_rate as f64 / window,
            symbol_refill_per_sec: per_symbol_rate as f64 / window,
            enabled,
            persist_path: None,
            state: Mutex::new(Buckets {
                global_tokens: global_rate as f64,
                symbol_tokens: HashMap::new(),
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn with_persist_path(mut self, path: PathBuf) -> Self {
        self.persist_path = Some(path);
        self
    }

    fn refill(&self, buckets: &mut Buckets) {
        let now = Instant::now();
        let elapsed = now.duration_since(buckets.last_refill).as_secs_f64();
        if elapsed <= 0.0 {
            return;
        }
        buckets.last_refill = now;
        buckets.global_tokens = (buckets.global_tokens + elapsed * self.global_refill_per_sec).min(self.global_rate);
        for tokens in buckets.symbol_tokens.values_mut() {
            *tokens = (*tokens + elapsed * self.symbol_refill_per_sec).min(self.per_symbol_rate);
        }
    }

    /// Returns `Ok(())` if a token was consumed, or `Err(reason)` — one of
    /// `rate_limit_global` or `rate_limit_symbol:{symbol}` — if denied.
    pub fn try_consume(&self, symbol: &str) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        let mut buckets = self.state.lock();
        self.refill(&mut buckets);

        if buckets.global_tokens < 1.0 {
            return Err("rate_limit_global".to_string());
        }
        let symbol_tokens = *buckets.symbol_tokens.entry(symbol.to_string()).or_insert(self.per_symbol_rate);
        if symbol_tokens < 1.0 {
            return Err(format!("rate_limit_symbol:{symbol}"));
        }

        buckets.global_tokens -= 1.0;
        buckets.symbol_tokens.insert(symbol.to_string(), symbol_tokens - 1.0);
        Ok(())
    }

    pub fn snapshot_state(&self) -> Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let mut buckets = self.state.lock();
        self.refill(&mut buckets);
        let snapshot = RateLimiterSnapshot {
            global_tokens: buckets.global_tokens,
            symbol_tokens: buckets.symbol_tokens.clone(),
        };
        atomic_write_json(path, &snapshot)
    }
}

pub fn default_persist_path(data_dir: &Path) -> PathBuf {
    data_dir.join("risk").join("rate_limiter_state.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_limiter_always_allows() {
        let limiter = RateLimiter::new(false, 0, 0, 60);
        assert!(limiter.try_consume("EURUSD").is_ok());
    }

    #[test]
    fn global_bucket_denies_after_capacity_exhausted() {
        let limiter = RateLimiter::new(true, 2, 5, 60);
        assert!(limiter.try_consume("EURUSD").is_ok());
        assert!(limiter.try_consume("GBPUSD").is_ok());
        let err = limiter.try_consume("EURUSD").unwrap_err();
        assert_eq!(err, "rate_limit_global");
    }

    #[test]
    fn per_symbol_bucket_denies_independently_of_global() {
        let limiter = RateLimiter::new(true, 100, 1, 60);
        assert!(limiter.try_consume("EURUSD").is_ok());
        let err = limiter.try_consume("EURUSD").unwrap_err();
        assert_eq!(err, "rate_limit_symbol:EURUSD");
        assert!(limiter.try_consume("GBPUSD").is_ok());
    }

    #[test]
    fn persists_snapshot_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rate_limiter_state.json");
        let limiter = RateLimiter::new(true, 5, 5, 60).with_persist_path(path.clone());
        limiter.try_consume("EURUSD").unwrap();
        limiter.snapshot_state().unwrap();
        assert!(path.exists());
    }
}
