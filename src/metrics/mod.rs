//! Execution metrics aggregation: rolling counters and latency percentiles,
//! persisted as three JSON artifacts — live, summary, and a cross-restart
//! cumulative total.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::util::atomic_file::{atomic_write_json, read_json_or_default};
use crate::util::percentile::percentile_sorted;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LatencyPercentiles {
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

fn compute_percentiles(samples: &[f64]) -> LatencyPercentiles {
    let mut sorted: Vec<f64> = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    LatencyPercentiles {
        p50: percentile_sorted(&sorted, 0.50),
        p75: percentile_sorted(&sorted, 0.75),
        p90: percentile_sorted(&sorted, 0.90),
        p95: percentile_sorted(&sorted, 0.95),
        p99: percentile_sorted(&sorted, 0.99),
    }
}

#[derive(Debug, Clone, Serialize)]
struct LiveSnapshot {
    timestamp: DateTime<Utc>,
    orders_total: u64,
    orders_ok: u64,
    orders_failed: u64,
    avg_latency_ms: f64,
    latency_samples_count: usize,
    latency_percentiles: LatencyPercentiles,
}

#[derive(Debug, Clone, Serialize)]
struct SummarySnapshot {
    generated: DateTime<Utc>,
    orders_total: u64,
    orders_ok: u64,
    orders_failed: u64,
    latency_avg_ms: f64,
    latency_percentiles: LatencyPercentiles,
    history: Vec<HistoryEntryOwned>,
}

#[derive(Debug, Clone, Serialize)]
struct HistoryEntryOwned {
    generated: DateTime<Utc>,
    orders_total: u64,
    orders_ok: u64,
    orders_failed: u64,
    avg_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct CumulativeState {
    orders_total: u64,
    orders_ok: u64,
    orders_failed: u64,
    sessions: u64,
    first_seen: Option<DateTime<Utc>>,
    last_updated: Option<DateTime<Utc>>,
}

struct Counters {
    orders_total: u64,
    orders_ok: u64,
    orders_failed: u64,
    latency_samples_ms: VecDeque<f64>,
    history: VecDeque<HistoryEntryOwned>,
}

pub struct MetricsAggregator {
    metrics_dir: PathBuf,
    history_limit: usize,
    latency_samples_limit: usize,
    counters: RwLock<Counters>,
    cumulative: RwLock<CumulativeState>,
    last_persist: RwLock<Instant>,
    /// Session counters already folded into `cumulative` as of the last
    /// persist, so repeated `force_persist` calls add only the delta.
    cumulative_baseline: RwLock<(u64, u64, u64)>,
}

impl MetricsAggregator {
    pub fn load(metrics_dir: &Path, history_limit: usize, latency_samples_limit: usize) -> Result<Self> {
        let mut cumulative: CumulativeState = read_json_or_default(&cumulative_path(metrics_dir))?;
        cumulative.sessions += 1;
        if cumulative.first_seen.is_none() {
            cumulative.first_seen = Some(Utc::now());
        }

        Ok(Self {
            metrics_dir: metrics_dir.to_path_buf(),
            history_limit,
            latency_samples_limit,
            counters: RwLock::new(Counters {
                orders_total: 0,
                orders_ok: 0,
                orders_failed: 0,
                latency_samples_ms: VecDeque::new(),
                history: VecDeque::new(),
            }),
            cumulative: RwLock::new(cumulative),
            last_persist: RwLock::new(Instant::now() - std::time::Duration::from_secs(3600)),
            cumulative_baseline: RwLock::new((0, 0, 0)),
        })
    }

    pub fn record_order(&self, success: bool, latency_ms: f64) {
        let mut counters = self.counters.write();
        counters.orders_total += 1;
        if success {
            counters.orders_ok += 1;
        } else {
            counters.orders_failed += 1;
        }
        if counters.latency_samples_ms.len() >= self.latency_samples_limit {
            counters.latency_samples_ms.pop_front();
        }
        counters.latency_samples_ms.push_back(latency_ms);
    }

    fn avg_latency(counters: &Counters) -> f64 {
        if counters.latency_samples_ms.is_empty() {
            return 0.0;
        }
        counters.latency_samples_ms.iter().sum::<f64>() / counters.latency_samples_ms.len() as f64
    }

    /// No-op unless `interval_seconds` has elapsed since the last persist.
    pub fn maybe_persist(&self, interval_seconds: f64) -> Result<bool> {
        let elapsed = self.last_persist.read().elapsed().as_secs_f64();
        if elapsed < interval_seconds {
            return Ok(false);
        }
        self.force_persist()?;
        Ok(true)
    }

    pub fn force_persist(&self) -> Result<()> {
        *self.last_persist.write() = Instant::now();
        self.persist_live_and_summary()?;
        self.persist_cumulative()
    }

    fn persist_live_and_summary(&self) -> Result<()> {
        let samples: Vec<f64> = {
            let mut counters = self.counters.write();
            let avg = Self::avg_latency(&counters);
            let percentiles = compute_percentiles(counters.latency_samples_ms.make_contiguous());

            let entry = HistoryEntryOwned {
                generated: Utc::now(),
                orders_total: counters.orders_total,
                orders_ok: counters.orders_ok,
                orders_failed: counters.orders_failed,
                avg_latency_ms: avg,
            };
            if counters.history.len() >= self.history_limit {
                counters.history.pop_front();
            }
            counters.history.push_back(entry);

            let live = LiveSnapshot {
                timestamp: Utc::now(),
                orders_total: counters.orders_total,
                orders_ok: counters.orders_ok,
                orders_failed: counters.orders_failed,
                avg_latency_ms: avg,
                latency_samples_count: counters.latency_samples_ms.len(),
                latency_percentiles: percentiles.clone(),
            };
            atomic_write_json(&live_path(&self.metrics_dir), &live)?;

            let summary = SummarySnapshot {
                generated: Utc::now(),
                orders_total: counters.orders_total,
                orders_ok: counters.orders_ok,
                orders_failed: counters.orders_failed,
                latency_avg_ms: avg,
                latency_percentiles: percentiles,
                history: counters.history.iter().cloned().collect(),
            };
            atomic_write_json(&summary_path(&self.metrics_dir), &summary)?;

            counters.latency_samples_ms.iter().copied().collect()
        };
        let _ = samples;
        Ok(())
    }

    fn persist_cumulative(&self) -> Result<()> {
        let counters = self.counters.read();
        let mut baseline = self.cumulative_baseline.write();
        let mut cumulative = self.cumulative.write();
        cumulative.orders_total += counters.orders_total.saturating_sub(baseline.0);
        cumulative.orders_ok += counters.orders_ok.saturating_sub(baseline.1);
        cumulative.orders_failed += counters.orders_failed.saturating_sub(baseline.2);
        cumulative.last_updated = Some(Utc::now());
        *baseline = (counters.orders_total, counters.orders_ok, counters.orders_failed);
        atomic_write_json(&cumulative_path(&self.metrics_dir), &*cumulative)
    }

    pub fn snapshot(&self) -> (u64, u64, u64, f64) {
        let counters = self.counters.read();
        (counters.orders_total, counters.orders_ok, counters.orders_failed, Self::avg_latency(&counters))
    }
}

fn live_path(dir: &Path) -> PathBuf {
    dir.join("metrics_live.json")
}
fn summary_path(dir: &Path) -> PathBuf {
    dir.join("metrics_summary.json")
}
fn cumulative_path(dir: &Path) -> PathBuf {
    dir.join("metrics_cumulative.json")
}
