//! Displacement detection: large directional moves with an institutional
//! volume/candle signature, used to estimate a probable target.

use chrono::Utc;

use crate::models::{pip_factor, Candle, DisplacementSignal, DisplacementType};

pub struct DisplacementDetector {
    pub window: usize,
    pub min_pips: f64,
    pub momentum_threshold: f64,
}

impl Default for DisplacementDetector {
    fn default() -> Self {
        Self { window: 16, min_pips: 50.0, momentum_threshold: 0.7 }
    }
}

impl DisplacementDetector {
    pub fn detect(&self, candles: &[Candle], historical_success_rate: f64) -> Option<DisplacementSignal> {
        if candles.len() < self.window {
            return None;
        }
        let slice = &candles[candles.len() - self.window..];
        let start_price = slice.first()?.open;
        let end_price = slice.last()?.close;
        let pip = pip_factor(&slice[0].symbol);
        let pips = (end_price - start_price).abs() * pip;

        if pips < self.min_pips {
            return None;
        }

        let velocity = pips / self.window as f64 / 50.0; // normalized against a 50-pip/candle reference
        let volume_score = {
            let mean_vol = slice.iter().map(|c| c.volume as f64).sum::<f64>() / slice.len() as f64;
            let last_vol = slice.last().map(|c| c.volume as f64).unwrap_or(0.0);
            if mean_vol > 0.0 { (last_vol / mean_vol / 2.0).min(1.0) } else { 0.0 }
        };
        let directional_consistency = {
            let rising = slice.windows(2).filter(|w| w[1].close >= w[0].close).count();
            let falling = slice.windows(2).filter(|w| w[1].close <= w[0].close).count();
            rising.max(falling) as f64 / (slice.len() - 1) as f64
        };

        let momentum = (0.4 * velocity.min(1.0) + 0.3 * volume_score + 0.3 * directional_consistency).min(1.0);
        if momentum < self.momentum_threshold {
            return None;
        }

        let last = slice.last().unwrap();
        let mean_range = slice.iter().map(|c| c.range()).sum::<f64>() / slice.len() as f64;
        let large_candle = last.range() >= mean_range * 1.5;
        let volume_spike = volume_score >= 0.8;
        let institutional_signature = volume_spike && large_candle;

        let target_multiplier = if pips > 100.0 {
            2.0
        } else if pips >= 75.0 {
            2.5
        } else {
            3.0
        };
        let direction_sign = if end_price >= start_price { 1.0 } else { -1.0 };
        let target_estimation = end_price + direction_sign * (pips / pip) * (target_multiplier - 1.0);

        Some(DisplacementSignal {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: last.symbol.clone(),
            timeframe: last.timeframe,
            displacement_type: if end_price >= start_price {
                DisplacementType::BullishDisplacement
            } else {
                DisplacementType::BearishDisplacement
            },
            start_price,
            end_price,
            pips,
            momentum_score: momentum,
            institutional_signature,
            target_estimation,
            historical_success_rate,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Timeframe;

    fn candle(symbol: &str, o: f64, h: f64, l: f64, c: f64, v: u64) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            timeframe: Timeframe::M15,
            bucket_start: Utc::now(),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: v,
            tick_count: 1,
        }
    }

    #[test]
    fn no_signal_below_minimum_pips() {
        let candles: Vec<Candle> = (0..16).map(|i| candle("EURUSD", 1.09, 1.0901, 1.0899, 1.09 + i as f64 * 0.00001, 50)).collect();
        let detector = DisplacementDetector::default();
        assert!(detector.detect(&candles, 0.5).is_none());
    }

    #[test]
    fn strong_directional_move_with_volume_spike_is_detected() {
        let mut candles = Vec::new();
        for i in 0..16 {
            let base = 1.0900 + i as f64 * 0.0006;
            let vol = if i == 15 { 800 } else { 100 };
            candles.push(candle("EURUSD", base, base + 0.0006, base - 0.0001, base + 0.0005, vol));
        }
        let detector = DisplacementDetector::default();
        let signal = detector.detect(&candles, 0.6);
        assert!(signal.is_some());
        let signal = signal.unwrap();
        assert_eq!(signal.displacement_type, DisplacementType::BullishDisplacement);
        assert!(signal.pips >= 50.0);
    }
}
