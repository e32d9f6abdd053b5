//! Per-symbol net exposure tracking: signed sum of confirmed execution
//! volumes, persisted atomically.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::models::Action;
use crate::util::atomic_file::{atomic_write_json, read_json_or_default};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ExposureSnapshot {
    exposure: HashMap<String, f64>,
}

pub struct ExposureTracker {
    path: PathBuf,
    state: RwLock<ExposureSnapshot>,
}

impl ExposureTracker {
    pub fn load(path: &Path) -> Result<Self> {
        let state = read_json_or_default(path)?;
        Ok(Self { path: path.to_path_buf(), state: RwLock::new(state) })
    }

    pub fn apply_execution(&self, symbol: &str, volume: f64, action: Action) {
        let signed = match action {
            Action::Buy => volume,
            Action::Sell => -volume,
        };
        let mut state = self.state.write();
        *state.exposure.entry(symbol.to_string()).or_insert(0.0) += signed;
    }

    pub fn net_exposure(&self, symbol: &str) -> f64 {
        self.state.read().exposure.get(symbol).copied().unwrap_or(0.0)
    }

    pub fn snapshot(&self) -> HashMap<String, f64> {
        self.state.read().exposure.clone()
    }

    pub fn persist(&self) -> Result<()> {
        let snapshot = self.state.read().clone();
        atomic_write_json(&self.path, &snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn exposure_accumulates_signed_volume() {
        let dir = tempdir().unwrap();
        let tracker = ExposureTracker::load(&dir.path().join("exposure.json")).unwrap();
        tracker.apply_execution("EURUSD", 1.0, Action::Buy);
        tracker.apply_execution("EURUSD", 0.4, Action::Sell);
        assert!((tracker.net_exposure("EURUSD") - 0.6).abs() < 1e-9);
    }

    #[test]
    fn unknown_symbol_has_zero_exposure() {
        let dir = tempdir().unwrap();
        let tracker = ExposureTracker::load(&dir.path().join("exposure.json")).unwrap();
        assert_eq!(tracker.net_exposure("GBPUSD"), 0.0);
    }

    #[test]
    fn persists_and_reloads() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exposure.json");
        {
            let tracker = ExposureTracker::load(&path).unwrap();
            tracker.apply_execution("EURUSD", 2.0, Action::Buy);
            tracker.persist().unwrap();
        }
        let reloaded = ExposureTracker::load(&path).unwrap();
        assert_eq!(reloaded.net_exposure("EURUSD"), 2.0);
    }
}
