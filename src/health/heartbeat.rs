//! Liveness beacons from internal services (pipeline loop, router, scan
//! loop), checked for staleness by the composite health monitor.

use std::collections::HashMap;
use std::time::Instant;

use parking_lot::RwLock;
use serde::Serialize;

pub struct HeartbeatMonitor {
    stale_threshold_sec: f64,
    last_beat: RwLock<HashMap<String, Instant>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatReport {
    pub total_services: usize,
    pub stale: HashMap<String, f64>,
    pub stale_count: usize,
}

impl HeartbeatMonitor {
    pub fn new(stale_threshold_sec: f64) -> Self {
        Self { stale_threshold_sec, last_beat: RwLock::new(HashMap::new()) }
    }

    pub fn beat(&self, service: &str) {
        self.last_beat.write().insert(service.to_string(), Instant::now());
    }

    pub fn stale(&self) -> HashMap<String, f64> {
        let beats = self.last_beat.read();
        beats
            .iter()
            .filter_map(|(service, at)| {
                let age = at.elapsed().as_secs_f64();
                (age > self.stale_threshold_sec).then(|| (service.clone(), age))
            })
            .collect()
    }

    pub fn report(&self) -> HeartbeatReport {
        let total_services = self.last_beat.read().len();
        let stale = self.stale();
        HeartbeatReport { stale_count: stale.len(), total_services, stale }
    }
}
