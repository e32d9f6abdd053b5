//! Pre-trade compliance rules: blacklist, restricted hours, spread cap,
//! and a post-loss cooldown.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplianceViolation {
    SymbolBlacklisted,
    HourRestricted,
    SpreadTooWide,
    LossCooldownActive,
}

impl ComplianceViolation {
    pub fn code(self) -> &'static str {
        match self {
            Self::SymbolBlacklisted => "SYMBOL_BLACKLISTED",
            Self::HourRestricted => "HOUR_RESTRICTED",
            Self::SpreadTooWide => "SPREAD_TOO_WIDE",
            Self::LossCooldownActive => "LOSS_COOLDOWN_ACTIVE",
        }
    }
}

pub struct ComplianceChecker {
    blacklist: Vec<String>,
    restricted_hours_utc: Vec<u32>,
    max_spread_points: f64,
    loss_cooldown: Duration,
    cooldown_until: Mutex<HashMap<String, Instant>>,
}

impl ComplianceChecker {
    pub fn new(blacklist: Vec<String>, restricted_hours_utc: Vec<u32>, max_spread_points: f64, loss_cooldown_sec: i64) -> Self {
        Self {
            blacklist,
            restricted_hours_utc,
            max_spread_points,
            loss_cooldown: Duration::from_secs(loss_cooldown_sec.max(0) as u64),
            cooldown_until: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_loss(&self, symbol: &str) {
        self.cooldown_until.lock().insert(symbol.to_string(), Instant::now() + self.loss_cooldown);
    }

    pub fn check(&self, symbol: &str, hour_utc: u32, spread_points: f64) -> Vec<ComplianceViolation> {
        let mut violations = Vec::new();
        if self.blacklist.iter().any(|s| s.eq_ignore_ascii_case(symbol)) {
            violations.push(ComplianceViolation::SymbolBlacklisted);
        }
        if self.restricted_hours_utc.contains(&hour_utc) {
            violations.push(ComplianceViolation::HourRestricted);
        }
        if spread_points > self.max_spread_points {
            violations.push(ComplianceViolation::SpreadTooWide);
        }
        if let Some(until) = self.cooldown_until.lock().get(symbol) {
            if Instant::now() < *until {
                violations.push(ComplianceViolation::LossCooldownActive);
            }
        }
        violations
    }
}
