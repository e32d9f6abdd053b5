//! Order Block detection: enhanced swing-point identification with
//! entry/stop/target formulas and quality tiering.

use chrono::Utc;

use crate::models::{pip_factor, Candle, OrderBlock, OrderBlockType, QualityTier};

pub struct OrderBlockDetector {
    pub lookback: usize,
    pub max_distance_pips: f64,
    pub min_confidence: f64,
}

impl OrderBlockDetector {
    pub fn new(lookback: usize, max_distance_pips: f64, min_confidence: f64) -> Self {
        Self { lookback, max_distance_pips, min_confidence }
    }

    pub fn detect(&self, candles: &[Candle], current_price: f64, health_score: f64) -> Vec<OrderBlock> {
        let l = 4usize;
        let mut blocks = Vec::new();

        // Only scan the configured lookback window (default 25 candles), not
        // the whole passed-in history.
        let scan = if candles.len() > self.lookback { &candles[candles.len() - self.lookback..] } else { candles };
        if scan.len() < 2 * l + 1 {
            return blocks;
        }

        let mean_volume = scan.iter().map(|c| c.volume as f64).sum::<f64>() / scan.len() as f64;

        for i in l..scan.len() - l {
            let window = &scan[i - l..=i + l];
            let candle = &scan[i];

            let is_swing_low = window.iter().all(|c| c.low >= candle.low);
            let is_swing_high = window.iter().all(|c| c.high <= candle.high);
            let volume_confirmed = mean_volume <= 0.0 || candle.volume as f64 >= mean_volume * 0.8;

            if is_swing_low && volume_confirmed {
                if let Some(block) = self.build_block(OrderBlockType::Demand, candle, current_price, health_score) {
                    blocks.push(block);
                }
            } else if is_swing_high && volume_confirmed {
                if let Some(block) = self.build_block(OrderBlockType::Supply, candle, current_price, health_score) {
                    blocks.push(block);
                }
            }
        }

        blocks
    }

    fn build_block(
        &self,
        block_type: OrderBlockType,
        candle: &Candle,
        current_price: f64,
        health_score: f64,
    ) -> Option<OrderBlock> {
        let range = candle.range();
        let health_multiplier = 1.0 + (health_score - 0.5);

        let (entry, stop) = match block_type {
            OrderBlockType::Demand => (candle.high, candle.low - 0.2 * range),
            OrderBlockType::Supply => (candle.low, candle.high + 0.2 * range),
            _ => (candle.high, candle.low),
        };

        let take_profit = match block_type {
            OrderBlockType::Demand => entry + 2.0 * (entry - stop) * health_multiplier,
            OrderBlockType::Supply => entry - 2.0 * (stop - entry) * health_multiplier,
            _ => entry,
        };

        let risk = (entry - stop).abs();
        let reward = (take_profit - entry).abs();
        let risk_reward = if risk > 0.0 { reward / risk } else { 0.0 };

        let pip = pip_factor(&candle.symbol);
        let distance_pips = (current_price - entry).abs() * pip;

        let confidence = (0.5 + health_score * 0.3 + (risk_reward / 5.0).min(0.2)).clamp(0.0, 1.0);

        if distance_pips > self.max_distance_pips
            || confidence < self.min_confidence
            || risk_reward < 1.5
            || health_score < 0.6
        {
            return None;
        }

        let combined = confidence * 100.0 * 0.4
            + health_score * 100.0 * 0.3
            + (risk_reward * 20.0).min(100.0) * 0.2
            + (100.0 - distance_pips).max(0.0) * 0.1;

        Some(OrderBlock {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: candle.symbol.clone(),
            timeframe: candle.timeframe,
            block_type,
            entry,
            stop,
            take_profit,
            confidence,
            distance_pips,
            risk_reward,
            quality_tier: QualityTier::from_score(combined),
            created_at: Utc::now(),
            health_score_at_creation: health_score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Timeframe;

    fn flat_candles(n: usize, base: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle {
                symbol: "EURUSD".into(),
                timeframe: Timeframe::M15,
                bucket_start: Utc::now(),
                open: base,
                high: base + 0.0005,
                low: base - 0.0005,
                close: base,
                volume: 100,
                tick_count: 10,
            })
            .enumerate()
            .map(|(_, c)| c)
            .take(n)
            .collect()
    }

    #[test]
    fn no_blocks_with_insufficient_history() {
        let detector = OrderBlockDetector::new(25, 150.0, 0.5);
        let candles = flat_candles(5, 1.09);
        assert!(detector.detect(&candles, 1.09, 0.8).is_empty());
    }

    #[test]
    fn demand_block_has_entry_gte_stop() {
        let detector = OrderBlockDetector::new(25, 1000.0, 0.0);
        let mut candles = flat_candles(9, 1.09);
        // Depress the middle candle to form an obvious swing low.
        candles[4].low = 1.0850;
        candles[4].high = 1.0900;
        candles[4].volume = 500;
        let blocks = detector.detect(&candles, 1.09, 0.9);
        let demand_blocks: Vec<_> = blocks.iter().filter(|b| b.block_type == OrderBlockType::Demand).collect();
        assert!(!demand_blocks.is_empty(), "expected a demand block from the depressed swing low");
        for block in demand_blocks {
            assert!(block.entry >= block.stop);
        }
    }

    #[test]
    fn scan_is_limited_to_the_configured_lookback_window() {
        let detector = OrderBlockDetector::new(9, 1000.0, 0.0);
        let mut candles = flat_candles(20, 1.09);
        // Swing low outside the lookback window (last 9 candles start at
        // index 11) - must be ignored.
        candles[3].low = 1.0700;
        candles[3].high = 1.0750;
        candles[3].volume = 500;
        // Swing low inside the lookback window, centered so L=4 holds on
        // both sides - must be detected.
        candles[15].low = 1.0800;
        candles[15].high = 1.0850;
        candles[15].volume = 500;

        let blocks = detector.detect(&candles, 1.09, 0.9);
        let demand_blocks: Vec<_> = blocks.iter().filter(|b| b.block_type == OrderBlockType::Demand).collect();
        assert!(
            demand_blocks.iter().any(|b| (b.entry - candles[15].high).abs() < 1e-9),
            "expected the in-window swing low at index 15 to produce a demand block"
        );
        assert!(
            demand_blocks.iter().all(|b| (b.entry - candles[3].high).abs() > 1e-9),
            "the swing low at index 3 is outside the lookback window and must not be scanned"
        );
    }

    #[test]
    fn quality_tier_thresholds_are_ordered() {
        assert_eq!(QualityTier::from_score(95.0), QualityTier::Premium);
        assert_eq!(QualityTier::from_score(80.0), QualityTier::High);
        assert_eq!(QualityTier::from_score(65.0), QualityTier::Medium);
        assert_eq!(QualityTier::from_score(10.0), QualityTier::Low);
    }
}
