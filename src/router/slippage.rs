//! Per-symbol slippage tracking in pips, bounded ring buffer, persisted for
//! post-session review.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::util::atomic_file::atomic_write_json;
use crate::util::percentile::percentile;

#[derive(Debug, Clone, Serialize, Default)]
pub struct SlippageStats {
    pub avg: f64,
    pub p95: f64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlippageSample {
    pub symbol: String,
    pub expected_price: f64,
    pub executed_price: f64,
    pub pips: f64,
    pub recorded_at: chrono::DateTime<Utc>,
}

pub struct SlippageTracker {
    max_samples: usize,
    persist_path: Option<PathBuf>,
    samples: RwLock<HashMap<String, VecDeque<SlippageSample>>>,
}

#[derive(Debug, Clone, Serialize)]
struct SlippageSnapshot {
    timestamp: chrono::DateTime<Utc>,
    stats: HashMap<String, SlippageStats>,
}

impl SlippageTracker {
    pub fn new(max_samples: usize, persist_path: Option<PathBuf>) -> Self {
        Self { max_samples, persist_path, samples: RwLock::new(HashMap::new()) }
    }

    /// Records the signed slippage, in pips, between `expected_price` and
    /// `executed_price`, and returns it.
    pub fn record(&self, symbol: &str, expected_price: f64, executed_price: f64, pip_factor: f64) -> f64 {
        let pips = if pip_factor > 0.0 { (executed_price - expected_price) / pip_factor } else { 0.0 };
        let sample = SlippageSample {
            symbol: symbol.to_string(),
            expected_price,
            executed_price,
            pips,
            recorded_at: Utc::now(),
        };
        let mut samples = self.samples.write();
        let ring = samples.entry(symbol.to_string()).or_default();
        if ring.len() >= self.max_samples {
            ring.pop_front();
        }
        ring.push_back(sample);
        pips
    }

    pub fn recent_samples(&self, symbol: &str, n: usize) -> Vec<SlippageSample> {
        let samples = self.samples.read();
        samples.get(symbol).map(|ring| ring.iter().rev().take(n).rev().cloned().collect()).unwrap_or_default()
    }

    pub fn current_stats(&self, symbol: &str) -> SlippageStats {
        let samples = self.samples.read();
        let Some(ring) = samples.get(symbol) else {
            return SlippageStats::default();
        };
        let values: Vec<f64> = ring.iter().map(|s| s.pips).collect();
        SlippageStats {
            avg: values.iter().sum::<f64>() / values.len().max(1) as f64,
            p95: percentile(&values, 0.95),
            count: values.len(),
        }
    }

    pub fn persist_snapshot(&self) -> Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let symbols: Vec<String> = self.samples.read().keys().cloned().collect();
        let stats = symbols.into_iter().map(|symbol| { let s = self.current_stats(&symbol); (symbol, s) }).collect();
        atomic_write_json(path, &SlippageSnapshot { timestamp: Utc::now(), stats })
    }
}

pub fn default_persist_path(data_dir: &Path) -> PathBuf {
    data_dir.join("risk").join("slippage.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn record_computes_signed_pip_slippage() {
        let tracker = SlippageTracker::new(1000, None);
        let pips = tracker.record("EURUSD", 1.0900, 1.0903, 0.0001);
        assert!((pips - 3.0).abs() < 1e-9);
    }

    #[test]
    fn ring_buffer_bounded_by_max_samples() {
        let tracker = SlippageTracker::new(3, None);
        for i in 0..10 {
            tracker.record("EURUSD", 1.09, 1.09 + i as f64 * 0.0001, 0.0001);
        }
        let stats = tracker.current_stats("EURUSD");
        assert_eq!(stats.count, 3);
    }

    #[test]
    fn recent_samples_retains_expected_and_executed_price() {
        let tracker = SlippageTracker::new(100, None);
        tracker.record("EURUSD", 1.0900, 1.0903, 0.0001);
        let samples = tracker.recent_samples("EURUSD", 10);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].expected_price, 1.0900);
        assert_eq!(samples[0].executed_price, 1.0903);
    }

    #[test]
    fn unknown_symbol_has_zero_stats() {
        let tracker = SlippageTracker::new(100, None);
        let stats = tracker.current_stats("GBPUSD");
        assert_eq!(stats.count, 0);
        assert_eq!(stats.avg, 0.0);
    }

    #[test]
    fn persist_snapshot_writes_file_when_path_set() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("slippage.json");
        let tracker = SlippageTracker::new(100, Some(path.clone()));
        tracker.record("EURUSD", 1.09, 1.0905, 0.0001);
        tracker.persist_snapshot().unwrap();
        assert!(path.exists());
    }
}
