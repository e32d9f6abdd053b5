//! Fixed-risk position sizing: `volume = (balance * risk_pct) / (stop_distance * pip_value)`.

pub struct PositionSizer {
    pub risk_pct: f64,
    pub max_symbol_volume: f64,
}

impl PositionSizer {
    pub fn new(risk_pct: f64, max_symbol_volume: f64) -> Self {
        Self { risk_pct, max_symbol_volume }
    }

    /// Returns `None` if `stop_distance` is non-positive (no stop given or degenerate).
    pub fn fixed_risk(&self, balance: f64, stop_distance: f64, pip_value: f64) -> Option<f64> {
        if stop_distance <= 0.0 || pip_value <= 0.0 {
            return None;
        }
        let volume = (balance * self.risk_pct) / (stop_distance * pip_value);
        Some(volume.min(self.max_symbol_volume).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_volume_from_fixed_risk_formula() {
        let sizer = PositionSizer::new(0.01, 10.0);
        let volume = sizer.fixed_risk(10_000.0, 20.0, 10.0).unwrap();
        assert!((volume - 0.5).abs() < 1e-9);
    }

    #[test]
    fn caps_at_max_symbol_volume() {
        let sizer = PositionSizer::new(0.5, 1.0);
        let volume = sizer.fixed_risk(10_000.0, 5.0, 10.0).unwrap();
        assert_eq!(volume, 1.0);
    }

    #[test]
    fn none_for_non_positive_stop_distance() {
        let sizer = PositionSizer::new(0.01, 10.0);
        assert!(sizer.fixed_risk(10_000.0, 0.0, 10.0).is_none());
    }
}
