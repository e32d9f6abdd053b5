//! Adaptive configuration: market conditions modulate detector thresholds
//! before each scan rather than detectors reading mutable globals.

use crate::config::DetectorConfig;
use crate::models::{Session, Tick};

#[derive(Debug, Clone, Copy)]
pub struct MarketConditions {
    pub volatility: f64,
    pub momentum: f64,
    pub session: Session,
    pub kill_zone: bool,
}

pub fn market_conditions(ticks: &[Tick], hour_utc: u32) -> MarketConditions {
    let window = 20usize.min(ticks.len());
    let recent: Vec<f64> = ticks.iter().rev().take(window).map(|t| t.mid()).collect();

    let volatility = if recent.len() >= 2 {
        let mean = recent.iter().sum::<f64>() / recent.len() as f64;
        (recent.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / recent.len() as f64).sqrt()
    } else {
        0.0
    };

    let momentum = if recent.len() >= 2 {
        (recent.first().copied().unwrap_or(0.0) - recent.last().copied().unwrap_or(0.0))
            / recent.last().copied().unwrap_or(1.0)
    } else {
        0.0
    };

    MarketConditions {
        volatility,
        momentum,
        session: Session::from_utc_hour(hour_utc),
        kill_zone: Session::is_kill_zone(hour_utc),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AdaptiveConfig {
    pub min_gap_size_pips: f64,
    pub fill_tolerance_pips: f64,
}

impl AdaptiveConfig {
    pub fn derive(base: &DetectorConfig, conditions: MarketConditions) -> Self {
        let mut gap_size = base.min_gap_size_pips;
        let mut tolerance = base.fill_tolerance_pips;

        // low volatility tightens thresholds, high volatility relaxes them
        if conditions.volatility < 0.0003 {
            gap_size *= 0.8;
            tolerance *= 0.8;
        } else if conditions.volatility > 0.0012 {
            gap_size *= 1.3;
            tolerance *= 1.3;
        }

        if conditions.momentum < -0.001 {
            tolerance *= 0.7;
        } else if conditions.momentum > 0.001 {
            tolerance *= 1.2;
        }

        if conditions.kill_zone {
            gap_size *= 0.85;
        }

        match conditions.session {
            Session::Tokyo => {
                gap_size *= 0.7;
            }
            Session::NewYork if conditions.kill_zone => {
                gap_size *= 0.9;
                tolerance *= 1.1;
            }
            _ => {}
        }

        Self {
            min_gap_size_pips: gap_size.clamp(0.8, 6.0),
            fill_tolerance_pips: tolerance.clamp(0.1, 1.0),
        }
    }
}
