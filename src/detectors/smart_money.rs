//! Smart Money structure analysis: market structure classification,
//! liquidity sweeps, break of structure, change of character, manipulation
//! and institutional-flow divergence, with confluence-boosted scoring.

use chrono::Utc;

use crate::memory::MemoryStore;
use crate::models::{pip_factor, Candle, Direction, MarketStructure, SmartMoneySignal, SmartMoneySignalType};

pub struct SmartMoneyDetector {
    pub equal_level_tolerance_pips: f64,
}

impl Default for SmartMoneyDetector {
    fn default() -> Self {
        Self { equal_level_tolerance_pips: 5.0 }
    }
}

struct SwingPoints {
    highs: Vec<f64>,
    lows: Vec<f64>,
}

fn swing_points(candles: &[Candle]) -> SwingPoints {
    let l = 3usize;
    let mut highs = Vec::new();
    let mut lows = Vec::new();
    if candles.len() < 2 * l + 1 {
        return SwingPoints { highs, lows };
    }
    for i in l..candles.len() - l {
        let window = &candles[i - l..=i + l];
        if window.iter().all(|c| c.high <= candles[i].high) {
            highs.push(candles[i].high);
        }
        if window.iter().all(|c| c.low >= candles[i].low) {
            lows.push(candles[i].low);
        }
    }
    SwingPoints { highs, lows }
}

fn classify_structure(points: &SwingPoints) -> MarketStructure {
    if points.highs.len() < 2 || points.lows.len() < 2 {
        return MarketStructure::Ranging;
    }
    let higher_highs = points.highs[points.highs.len() - 1] > points.highs[points.highs.len() - 2];
    let higher_lows = points.lows[points.lows.len() - 1] > points.lows[points.lows.len() - 2];
    let lower_highs = points.highs[points.highs.len() - 1] < points.highs[points.highs.len() - 2];
    let lower_lows = points.lows[points.lows.len() - 1] < points.lows[points.lows.len() - 2];

    if higher_highs && higher_lows {
        MarketStructure::Bullish
    } else if lower_highs && lower_lows {
        MarketStructure::Bearish
    } else {
        MarketStructure::Transition
    }
}

impl SmartMoneyDetector {
    /// `order_block_levels` are nearby Order Block entry prices used for
    /// confluence boosts; `volume_above_average` and `active_session` feed
    /// the remaining confluence terms. `memory` supplies the historical-bonus
    /// lookup (§4.5) used to bias CHoCH confidence toward levels that broke
    /// profitably in the past.
    pub fn detect(
        &self,
        candles: &[Candle],
        order_block_levels: &[f64],
        volume_above_average: bool,
        active_session: bool,
        memory: Option<&MemoryStore>,
    ) -> Vec<SmartMoneySignal> {
        if candles.len() < 8 {
            return Vec::new();
        }

        let points = swing_points(candles);
        let structure = classify_structure(&points);
        let mut signals = Vec::new();

        signals.extend(self.detect_bos(candles, &points, structure));
        signals.extend(self.detect_choch(candles, structure, memory));
        signals.extend(self.detect_liquidity_sweeps(candles, &points));
        signals.extend(self.detect_manipulation(candles, structure));
        signals.extend(self.detect_institutional_flow(candles, structure));

        for signal in signals.iter_mut() {
            self.apply_confluences(signal, order_block_levels, volume_above_average, active_session);
        }

        signals.sort_by(|a, b| b.quality_score.partial_cmp(&a.quality_score).unwrap_or(std::cmp::Ordering::Equal));
        signals.truncate(3);
        signals
    }

    fn detect_bos(&self, candles: &[Candle], points: &SwingPoints, structure: MarketStructure) -> Vec<SmartMoneySignal> {
        let mut out = Vec::new();
        let last = candles.last().unwrap();

        if structure == MarketStructure::Bearish {
            if let Some(&last_high) = points.highs.last() {
                if last.high > last_high {
                    out.push(self.build_signal(
                        SmartMoneySignalType::Bos,
                        Direction::Bullish,
                        last_high,
                        last,
                        structure,
                        88.0,
                    ));
                }
            }
        } else if structure == MarketStructure::Bullish {
            if let Some(&last_low) = points.lows.last() {
                if last.low < last_low {
                    out.push(self.build_signal(
                        SmartMoneySignalType::Bos,
                        Direction::Bearish,
                        last_low,
                        last,
                        structure,
                        88.0,
                    ));
                }
            }
        }
        out
    }

    fn detect_choch(&self, candles: &[Candle], structure: MarketStructure, memory: Option<&MemoryStore>) -> Vec<SmartMoneySignal> {
        let window = 10usize.min(candles.len());
        if window < 4 {
            return Vec::new();
        }
        let closes: Vec<f64> = candles.iter().rev().take(window).map(|c| c.close).collect();
        let momentum: Vec<f64> = closes.windows(2).map(|w| w[0] - w[1]).collect();
        if momentum.len() < 4 {
            return Vec::new();
        }
        let current = momentum[0];
        let prior_mean: f64 = momentum[1..4].iter().sum::<f64>() / 3.0;

        let flipped = current.signum() != 0.0 && prior_mean.signum() != 0.0 && current.signum() != prior_mean.signum();
        if flipped && current.abs() >= 0.5 * prior_mean.abs() {
            let direction = if current > 0.0 { Direction::Bullish } else { Direction::Bearish };
            let last = candles.last().unwrap();
            let mut signal = self.build_signal(SmartMoneySignalType::Choch, direction, last.close, last, structure, 65.0);
            if let Some(store) = memory {
                let bonus = store.historical_bonus(&last.symbol, &format!("{:?}", last.timeframe), last.close);
                signal.confidence = (signal.confidence + bonus.bonus).min(98.0);
            }
            return vec![signal];
        }
        Vec::new()
    }

    /// A candle whose range dwarfs both neighbors but whose close lands in
    /// the opposite 30% of its own body reads as a fake breakout (stop-hunt
    /// followed by a reversal inside the same candle).
    fn detect_manipulation(&self, candles: &[Candle], structure: MarketStructure) -> Vec<SmartMoneySignal> {
        let mut out = Vec::new();
        if candles.len() < 3 {
            return out;
        }
        for i in 1..candles.len() - 1 {
            let prev = &candles[i - 1];
            let candle = &candles[i];
            let next = &candles[i + 1];
            let range = candle.range();
            if range <= 0.0 || prev.range() <= 0.0 || next.range() <= 0.0 {
                continue;
            }
            if range < 1.5 * prev.range() || range < 1.5 * next.range() {
                continue;
            }

            let close_position = (candle.close - candle.low) / range;
            let bullish_body = candle.close >= candle.open;

            let direction = if bullish_body && close_position <= 0.3 {
                Some(Direction::Bearish)
            } else if !bullish_body && close_position >= 0.7 {
                Some(Direction::Bullish)
            } else {
                None
            };

            if let Some(direction) = direction {
                out.push(self.build_signal(SmartMoneySignalType::Manipulation, direction, candle.close, candle, structure, 72.0));
            }
        }
        out
    }

    /// Divergence between short-window price momentum and volume momentum:
    /// price pushing one way while participation fades the other, read as
    /// distribution/accumulation rather than genuine directional conviction.
    fn detect_institutional_flow(&self, candles: &[Candle], structure: MarketStructure) -> Vec<SmartMoneySignal> {
        let window = 6usize.min(candles.len());
        if window < 4 {
            return Vec::new();
        }
        let recent = &candles[candles.len() - window..];
        let price_momentum = recent.last().unwrap().close - recent.first().unwrap().close;

        let half = window / 2;
        let early_volume: f64 = recent[..half].iter().map(|c| c.volume as f64).sum::<f64>() / half as f64;
        let late_volume: f64 = recent[half..].iter().map(|c| c.volume as f64).sum::<f64>() / (window - half) as f64;
        let volume_momentum = late_volume - early_volume;

        let diverges = (price_momentum > 0.0 && volume_momentum < 0.0) || (price_momentum < 0.0 && volume_momentum > 0.0);
        if !diverges {
            return Vec::new();
        }

        // Volume fading against the price move is read as the weaker side
        // of the divergence about to give way: the signal points opposite
        // the recent price direction.
        let direction = if price_momentum > 0.0 { Direction::Bearish } else { Direction::Bullish };
        let last = candles.last().unwrap();
        vec![self.build_signal(SmartMoneySignalType::InstitutionalFlow, direction, last.close, last, structure, 68.0)]
    }

    fn detect_liquidity_sweeps(&self, candles: &[Candle], points: &SwingPoints) -> Vec<SmartMoneySignal> {
        let mut out = Vec::new();
        let last = candles.last().unwrap();
        let pip = pip_factor(&last.symbol);
        let tolerance = self.equal_level_tolerance_pips / pip;

        let equal_highs: Vec<f64> = distinct_within_tolerance(&points.highs, tolerance);
        let equal_lows: Vec<f64> = distinct_within_tolerance(&points.lows, tolerance);

        for level in equal_highs {
            if last.high > level {
                let structure = classify_structure(points);
                out.push(self.build_signal(
                    SmartMoneySignalType::LiquiditySweep,
                    Direction::Bearish,
                    level,
                    last,
                    structure,
                    70.0,
                ));
            }
        }
        for level in equal_lows {
            if last.low < level {
                let structure = classify_structure(points);
                out.push(self.build_signal(
                    SmartMoneySignalType::LiquiditySweep,
                    Direction::Bullish,
                    level,
                    last,
                    structure,
                    70.0,
                ));
            }
        }
        out
    }

    fn build_signal(
        &self,
        signal_type: SmartMoneySignalType,
        direction: Direction,
        price_level: f64,
        last: &Candle,
        structure: MarketStructure,
        base_confidence: f64,
    ) -> SmartMoneySignal {
        let pip = pip_factor(&last.symbol);
        let entry = match direction {
            Direction::Bullish => price_level + 0.00013,
            Direction::Bearish => price_level - 0.00013,
        };
        let stop = match direction {
            Direction::Bullish => price_level - 0.0020,
            Direction::Bearish => price_level + 0.0020,
        };
        let risk = (entry - stop).abs();
        let take_profit = match direction {
            Direction::Bullish => entry + 2.5 * risk,
            Direction::Bearish => entry - 2.5 * risk,
        };
        let _ = pip;

        SmartMoneySignal {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: last.symbol.clone(),
            timeframe: last.timeframe,
            signal_type,
            direction,
            confidence: base_confidence,
            strength: base_confidence / 100.0,
            price_level,
            entry,
            stop,
            take_profit,
            structure,
            order_block_confluence: false,
            volume_confluence: false,
            session_confluence: false,
            quality_score: base_confidence,
            created_at: Utc::now(),
        }
    }

    fn apply_confluences(
        &self,
        signal: &mut SmartMoneySignal,
        order_block_levels: &[f64],
        volume_above_average: bool,
        active_session: bool,
    ) {
        let near_ob = order_block_levels.iter().any(|level| (level - signal.price_level).abs() * 10_000.0 <= 10.0);
        if near_ob {
            signal.order_block_confluence = true;
            signal.confidence = (signal.confidence + 8.0).min(98.0);
        }
        if volume_above_average {
            signal.volume_confluence = true;
            signal.confidence = (signal.confidence + 5.0).min(98.0);
        }
        if active_session {
            signal.session_confluence = true;
            signal.confidence = (signal.confidence + 3.0).min(98.0);
        }

        let risk = (signal.entry - signal.stop).abs();
        let reward = (signal.take_profit - signal.entry).abs();
        let risk_reward = if risk > 0.0 { reward / risk } else { 0.0 };

        signal.quality_score = 0.4 * signal.confidence
            + 0.3 * (signal.strength * 100.0)
            + 0.2 * (signal.confidence / 100.0 * 100.0)
            + 0.1 * (risk_reward * 10.0).min(100.0);
    }
}

fn distinct_within_tolerance(levels: &[f64], tolerance: f64) -> Vec<f64> {
    let mut out = Vec::new();
    for (i, &a) in levels.iter().enumerate() {
        let matches = levels.iter().enumerate().filter(|(j, &b)| *j != i && (a - b).abs() <= tolerance).count();
        if matches >= 1 && !out.iter().any(|&v: &f64| (v - a).abs() <= tolerance) {
            out.push(a);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Timeframe;

    fn candle(symbol: &str, h: f64, l: f64, c: f64) -> Candle {
        Candle {
            symbol: symbol.to_string(),
            timeframe: Timeframe::M15,
            bucket_start: Utc::now(),
            open: c,
            high: h,
            low: l,
            close: c,
            volume: 100,
            tick_count: 1,
        }
    }

    #[test]
    fn bos_scenario_s6() {
        // Zigzag with two swing highs (1.1050 then a lower 1.1030) and two
        // swing lows (1.0990 then a lower 1.0970) establishes a BEARISH
        // market structure, then the final candle breaks above the last
        // structural high (1.1030) - a bullish Break of Structure.
        let points: [(f64, f64); 17] = [
            (1.1020, 1.1010),
            (1.1035, 1.1025),
            (1.1045, 1.1035),
            (1.1050, 1.1040), // swing high #1
            (1.1035, 1.1025),
            (1.1015, 1.1005),
            (1.1000, 1.0990), // swing low #1
            (1.1012, 1.1002),
            (1.1022, 1.1012),
            (1.1030, 1.1020), // swing high #2 (lower than #1 -> lower highs)
            (1.1018, 1.1008),
            (1.1000, 1.0990),
            (1.0980, 1.0970), // swing low #2 (lower than #1 -> lower lows)
            (1.0995, 1.0985),
            (1.1010, 1.1000),
            (1.1020, 1.1010),
            (1.1040, 1.1030), // breakout above swing high #2 (1.1030)
        ];
        let candles: Vec<Candle> =
            points.iter().map(|&(h, l)| candle("EURUSD", h, l, (h + l) / 2.0)).collect();

        let detector = SmartMoneyDetector::default();
        let signals = detector.detect(&candles, &[], false, false, None);
        let bos = signals
            .iter()
            .find(|s| s.signal_type == SmartMoneySignalType::Bos)
            .expect("expected a BOS signal from the bearish-structure breakout");
        assert_eq!(bos.direction, Direction::Bullish);
        assert!((bos.price_level - 1.1030).abs() < 1e-9);
        assert!(bos.confidence >= 85.0);
    }

    #[test]
    fn returns_at_most_three_signals() {
        let candles: Vec<Candle> = (0..20)
            .map(|i| {
                let base = 1.09 + (i as f64) * 0.0003 * if i % 2 == 0 { 1.0 } else { -1.0 };
                candle("EURUSD", base + 0.001, base - 0.001, base)
            })
            .collect();
        let detector = SmartMoneyDetector::default();
        let signals = detector.detect(&candles, &[], true, true, None);
        assert!(signals.len() <= 3);
    }

    #[test]
    fn short_window_produces_no_signals() {
        let candles = vec![candle("EURUSD", 1.09, 1.089, 1.0895)];
        let detector = SmartMoneyDetector::default();
        assert!(detector.detect(&candles, &[], false, false, None).is_empty());
    }

    #[test]
    fn manipulation_detects_fake_breakout_candle() {
        let prev = candle("EURUSD", 1.1010, 1.1000, 1.1005);
        let spike = Candle {
            symbol: "EURUSD".to_string(),
            timeframe: Timeframe::M15,
            bucket_start: Utc::now(),
            open: 1.0955,
            high: 1.1050,
            low: 1.0950,
            close: 1.0965,
            volume: 100,
            tick_count: 1,
        };
        let next = candle("EURUSD", 1.0975, 1.0965, 1.0970);
        let candles = vec![prev, spike, next];

        let detector = SmartMoneyDetector::default();
        let signals = detector.detect_manipulation(&candles, MarketStructure::Ranging);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].signal_type, SmartMoneySignalType::Manipulation);
        assert_eq!(signals[0].direction, Direction::Bearish);
    }

    #[test]
    fn institutional_flow_detects_price_volume_divergence() {
        let closes = [1.1000, 1.1005, 1.1010, 1.1015, 1.1020, 1.1025];
        let volumes = [500u64, 450, 400, 150, 100, 50];
        let candles: Vec<Candle> = closes
            .iter()
            .zip(volumes.iter())
            .map(|(&c, &volume)| Candle {
                symbol: "EURUSD".to_string(),
                timeframe: Timeframe::M15,
                bucket_start: Utc::now(),
                open: c,
                high: c + 0.0005,
                low: c - 0.0005,
                close: c,
                volume,
                tick_count: 1,
            })
            .collect();

        let detector = SmartMoneyDetector::default();
        let signals = detector.detect_institutional_flow(&candles, MarketStructure::Ranging);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].signal_type, SmartMoneySignalType::InstitutionalFlow);
        // Price rose while volume faded - divergence points against the move.
        assert_eq!(signals[0].direction, Direction::Bearish);
    }

    #[test]
    fn choch_confidence_is_boosted_by_historical_bonus() {
        use crate::models::{FvgStatus, MemoryEntry, Session};

        let closes = [1.0000, 1.0005, 1.0010, 1.0015, 1.0020, 1.0025, 1.0030, 1.0035, 1.0040, 1.0010];
        let candles: Vec<Candle> = closes.iter().map(|&c| candle("EURUSD", c + 0.0005, c - 0.0005, c)).collect();
        let detector = SmartMoneyDetector::default();
        let points = swing_points(&candles);
        let structure = classify_structure(&points);

        let baseline = detector.detect_choch(&candles, structure, None);
        let baseline_signal = baseline.first().expect("expected a CHoCH signal from the momentum flip");
        assert!((baseline_signal.confidence - 65.0).abs() < 1e-9);

        let dir = tempfile::tempdir().unwrap();
        let memory = MemoryStore::load(&dir.path().join("memory.json"), 100, 30).unwrap();
        for _ in 0..4 {
            memory.add(MemoryEntry {
                id: String::new(),
                symbol: "EURUSD".to_string(),
                timeframe: Timeframe::M15,
                pattern_type: "choch".to_string(),
                status: FvgStatus::Filled,
                fill_pct: 1.0,
                quality_score: 80.0,
                created_at: Utc::now(),
                filled_at: Some(Utc::now()),
                session_at_creation: Session::London,
                break_level: Some(candles.last().unwrap().close),
            });
        }

        let boosted = detector.detect_choch(&candles, structure, Some(&memory));
        let boosted_signal = boosted.first().expect("expected a CHoCH signal from the momentum flip");
        assert!(boosted_signal.confidence > baseline_signal.confidence);
        assert!((boosted_signal.confidence - 75.0).abs() < 1e-9);
    }
}
