//! Persistent memory of pattern outcomes, keyed by (symbol, timeframe,
//! pattern type), used to bias future confidence toward historically
//! profitable setups.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::models::{FvgStatus, MemoryEntry};
use crate::util::atomic_file::{atomic_write_json, read_json_or_default};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Table {
    entries: Vec<MemoryEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct Snapshot {
    version: u32,
    created_at: Option<chrono::DateTime<Utc>>,
    last_cleanup: Option<chrono::DateTime<Utc>>,
    tables: HashMap<String, Table>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStatistics {
    pub count: usize,
    pub filled: usize,
    pub partial: usize,
    pub unfilled: usize,
    pub avg_fill_time_sec: f64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalBonus {
    pub bonus: f64,
    pub samples: usize,
}

pub struct MemoryStore {
    path: PathBuf,
    max_records_per_symbol: usize,
    max_age_days: i64,
    state: RwLock<Snapshot>,
}

fn table_key(symbol: &str, timeframe: &str, pattern_type: &str) -> String {
    format!("{symbol}::{timeframe}::{pattern_type}")
}

impl MemoryStore {
    pub fn load(path: &Path, max_records_per_symbol: usize, max_age_days: i64) -> Result<Self> {
        let mut snapshot: Snapshot = read_json_or_default(path)?;
        if snapshot.created_at.is_none() {
            snapshot.created_at = Some(Utc::now());
            snapshot.version = 1;
        }
        Ok(Self {
            path: path.to_path_buf(),
            max_records_per_symbol,
            max_age_days,
            state: RwLock::new(snapshot),
        })
    }

    pub fn persist(&self) -> Result<()> {
        let snapshot = self.state.read().clone();
        atomic_write_json(&self.path, &snapshot)
    }

    pub fn add(&self, mut record: MemoryEntry) -> String {
        if record.id.is_empty() {
            record.id = uuid::Uuid::new_v4().to_string();
        }
        let key = table_key(&record.symbol, &format!("{:?}", record.timeframe), &record.pattern_type);
        let id = record.id.clone();

        let mut state = self.state.write();
        let table = state.tables.entry(key).or_insert_with(|| Table { entries: Vec::new() });
        table.entries.push(record);
        if table.entries.len() > self.max_records_per_symbol {
            table.entries.remove(0);
        }
        id
    }

    pub fn update_status(&self, id: &str, status: FvgStatus, fill_pct: f64) -> bool {
        let mut state = self.state.write();
        for table in state.tables.values_mut() {
            if let Some(entry) = table.entries.iter_mut().find(|e| e.id == id) {
                if !entry.status.can_transition_to(status) {
                    return false;
                }
                entry.status = status;
                entry.fill_pct = fill_pct;
                if status != FvgStatus::Unfilled && entry.filled_at.is_none() {
                    entry.filled_at = Some(Utc::now());
                }
                return true;
            }
        }
        false
    }

    pub fn active_for(&self, symbol: Option<&str>, timeframe: Option<&str>) -> Vec<MemoryEntry> {
        let state = self.state.read();
        state
            .tables
            .iter()
            .filter(|(key, _)| {
                let mut parts = key.splitn(3, "::");
                let sym = parts.next().unwrap_or("");
                let tf = parts.next().unwrap_or("");
                symbol.map(|s| s == sym).unwrap_or(true) && timeframe.map(|t| t == tf).unwrap_or(true)
            })
            .flat_map(|(_, table)| table.entries.iter().filter(|e| e.status != FvgStatus::Filled).cloned())
            .collect()
    }

    pub fn statistics(&self, symbol: Option<&str>, timeframe: Option<&str>) -> MemoryStatistics {
        let entries: Vec<MemoryEntry> = {
            let state = self.state.read();
            state
                .tables
                .iter()
                .filter(|(key, _)| {
                    let mut parts = key.splitn(3, "::");
                    let sym = parts.next().unwrap_or("");
                    let tf = parts.next().unwrap_or("");
                    symbol.map(|s| s == sym).unwrap_or(true) && timeframe.map(|t| t == tf).unwrap_or(true)
                })
                .flat_map(|(_, table)| table.entries.iter().cloned())
                .collect()
        };

        let count = entries.len();
        let filled = entries.iter().filter(|e| e.status == FvgStatus::Filled).count();
        let partial = entries.iter().filter(|e| e.status == FvgStatus::PartiallyFilled).count();
        let unfilled = entries.iter().filter(|e| e.status == FvgStatus::Unfilled).count();

        let fill_times: Vec<f64> = entries
            .iter()
            .filter_map(|e| e.filled_at.map(|f| (f - e.created_at).num_seconds() as f64))
            .collect();
        let avg_fill_time_sec = if fill_times.is_empty() { 0.0 } else { fill_times.iter().sum::<f64>() / fill_times.len() as f64 };

        let success_rate = if count > 0 { filled as f64 / count as f64 } else { 0.0 };

        MemoryStatistics { count, filled, partial, unfilled, avg_fill_time_sec, success_rate }
    }

    pub fn historical_bonus(&self, symbol: &str, timeframe: &str, break_level: f64) -> HistoricalBonus {
        let tolerance = 0.0015;
        let state = self.state.read();
        let key_prefix = format!("{symbol}::{timeframe}::");
        let matching: Vec<&MemoryEntry> = state
            .tables
            .iter()
            .filter(|(key, _)| key.starts_with(&key_prefix))
            .flat_map(|(_, table)| table.entries.iter())
            .filter(|e| e.break_level.map(|lvl| (lvl - break_level).abs() <= tolerance).unwrap_or(false))
            .collect();

        let samples = matching.len();
        if samples == 0 {
            return HistoricalBonus { bonus: 0.0, samples: 0 };
        }
        let wins = matching.iter().filter(|e| e.status == FvgStatus::Filled).count();
        let win_rate = wins as f64 / samples as f64;
        HistoricalBonus { bonus: (win_rate * 10.0).min(10.0), samples }
    }

    pub fn cleanup(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::days(self.max_age_days);
        let mut state = self.state.write();
        let mut removed = 0usize;
        for table in state.tables.values_mut() {
            let before = table.entries.len();
            table.entries.retain(|e| e.created_at >= cutoff);
            removed += before - table.entries.len();
        }
        state.last_cleanup = Some(Utc::now());
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Session, Timeframe};
    use tempfile::tempdir;

    fn entry(symbol: &str, status: FvgStatus) -> MemoryEntry {
        MemoryEntry {
            id: String::new(),
            symbol: symbol.to_string(),
            timeframe: Timeframe::M15,
            pattern_type: "fvg".to_string(),
            status,
            fill_pct: 0.0,
            quality_score: 70.0,
            created_at: Utc::now(),
            filled_at: None,
            session_at_creation: Session::London,
            break_level: Some(1.1000),
        }
    }

    #[test]
    fn add_then_active_for_round_trips() {
        let dir = tempdir().unwrap();
        let store = MemoryStore::load(&dir.path().join("memory.json"), 100, 30).unwrap();
        let id = store.add(entry("EURUSD", FvgStatus::Unfilled));
        let active = store.active_for(Some("EURUSD"), None);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, id);
    }

    #[test]
    fn status_transition_rejects_regression() {
        let dir = tempdir().unwrap();
        let store = MemoryStore::load(&dir.path().join("memory.json"), 100, 30).unwrap();
        let id = store.add(entry("EURUSD", FvgStatus::Filled));
        assert!(!store.update_status(&id, FvgStatus::Unfilled, 0.0));
    }

    #[test]
    fn persistence_round_trips_structurally() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("memory.json");
        {
            let store = MemoryStore::load(&path, 100, 30).unwrap();
            store.add(entry("EURUSD", FvgStatus::Unfilled));
            store.persist().unwrap();
        }
        let reloaded = MemoryStore::load(&path, 100, 30).unwrap();
        let stats = reloaded.statistics(Some("EURUSD"), None);
        assert_eq!(stats.count, 1);
    }

    #[test]
    fn statistics_success_rate_reflects_filled_fraction() {
        let dir = tempdir().unwrap();
        let store = MemoryStore::load(&dir.path().join("memory.json"), 100, 30).unwrap();
        store.add(entry("EURUSD", FvgStatus::Filled));
        store.add(entry("EURUSD", FvgStatus::Unfilled));
        let stats = store.statistics(Some("EURUSD"), None);
        assert_eq!(stats.count, 2);
        assert!((stats.success_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn max_records_per_symbol_evicts_oldest() {
        let dir = tempdir().unwrap();
        let store = MemoryStore::load(&dir.path().join("memory.json"), 2, 30).unwrap();
        store.add(entry("EURUSD", FvgStatus::Unfilled));
        store.add(entry("EURUSD", FvgStatus::Unfilled));
        store.add(entry("EURUSD", FvgStatus::Unfilled));
        let stats = store.statistics(Some("EURUSD"), None);
        assert_eq!(stats.count, 2);
    }
}
