//! Market data sanity checks run just before an order is placed: candle
//! gaps, staleness, and range outliers relative to recent volatility.

use chrono::{DateTime, Utc};
use statrs::statistics::Statistics;

use crate::models::Candle;

#[derive(Debug, Clone, Copy)]
pub struct MarketDataValidatorConfig {
    pub max_gap_seconds: i64,
    pub stale_seconds: i64,
    pub max_range_sigma: f64,
    pub min_samples_for_range_stats: usize,
}

impl Default for MarketDataValidatorConfig {
    fn default() -> Self {
        Self {
            max_gap_seconds: 300,
            stale_seconds: 120,
            max_range_sigma: 6.0,
            min_samples_for_range_stats: 20,
        }
    }
}

pub struct MarketDataValidator {
    config: MarketDataValidatorConfig,
}

impl MarketDataValidator {
    pub fn new(mut config: MarketDataValidatorConfig) -> Self {
        config.stale_seconds = config.stale_seconds.max(10);
        Self { config }
    }

    /// `candles` must already be in chronological order. Returns a list of
    /// short reason tags; an empty vec means the data passed every check.
    pub fn validate_candles(&self, candles: &[Candle], now: DateTime<Utc>) -> Vec<String> {
        let mut issues = Vec::new();
        if candles.len() < 2 {
            return issues;
        }

        let deltas: Vec<i64> = candles
            .windows(2)
            .map(|w| (w[1].bucket_start - w[0].bucket_start).num_seconds())
            .collect();
        let expected_interval = mode_of_first_n(&deltas, 3);

        for &delta in &deltas {
            if expected_interval > 0 && delta > expected_interval * 3 {
                issues.push(format!("gap_interval_anomaly:{delta}s"));
            }
            if delta > self.config.max_gap_seconds {
                issues.push(format!("large_gap:{delta}s"));
            }
        }

        let last = candles.last().unwrap();
        let age = (now - last.bucket_start).num_seconds();
        if age > self.config.stale_seconds {
            issues.push(format!("stale_last:{age}s"));
        }

        if candles.len() > self.config.min_samples_for_range_stats {
            let history = &candles[..candles.len() - 1];
            let window = &history[history.len() - self.config.min_samples_for_range_stats..];
            let ranges: Vec<f64> = window.iter().map(Candle::range).collect();
            let mean_range = ranges.as_slice().mean();
            let current_range = last.range();
            if mean_range > 0.0 && current_range > mean_range * self.config.max_range_sigma {
                issues.push(format!("range_outlier:{current_range:.5}>{:.5}", mean_range * self.config.max_range_sigma));
            }
        }

        issues
    }
}

fn mode_of_first_n(values: &[i64], n: usize) -> i64 {
    let sample = &values[..n.min(values.len())];
    if sample.is_empty() {
        return 0;
    }
    let mut counts: std::collections::HashMap<i64, usize> = std::collections::HashMap::new();
    for &v in sample {
        *counts.entry(v).or_insert(0) += 1;
    }
    counts.into_iter().max_by_key(|(_, count)| *count).map(|(v, _)| v).unwrap_or(sample[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Timeframe;

    fn candle(bucket_start: DateTime<Utc>, high: f64, low: f64) -> Candle {
        Candle {
            symbol: "EURUSD".into(),
            timeframe: Timeframe::M1,
            bucket_start,
            open: (high + low) / 2.0,
            high,
            low,
            close: (high + low) / 2.0,
            volume: 10,
            tick_count: 1,
        }
    }

    #[test]
    fn regular_spacing_has_no_issues() {
        let base = Utc::now() - chrono::Duration::minutes(30);
        let candles: Vec<Candle> = (0..25).map(|i| candle(base + chrono::Duration::minutes(i), 1.0905, 1.0900)).collect();
        let validator = MarketDataValidator::new(MarketDataValidatorConfig { stale_seconds: 600, ..Default::default() });
        let issues = validator.validate_candles(&candles, base + chrono::Duration::minutes(25));
        assert!(issues.iter().all(|i| !i.starts_with("gap_interval_anomaly")));
    }

    #[test]
    fn large_gap_is_flagged() {
        let base = Utc::now();
        let candles = vec![candle(base, 1.09, 1.0895), candle(base + chrono::Duration::seconds(600), 1.091, 1.0895)];
        let validator = MarketDataValidator::new(MarketDataValidatorConfig::default());
        let issues = validator.validate_candles(&candles, base + chrono::Duration::seconds(600));
        assert!(issues.iter().any(|i| i.starts_with("large_gap")));
    }

    #[test]
    fn stale_last_candle_is_flagged() {
        let base = Utc::now() - chrono::Duration::minutes(10);
        let candles = vec![candle(base, 1.09, 1.0895), candle(base + chrono::Duration::minutes(1), 1.091, 1.0895)];
        let validator = MarketDataValidator::new(MarketDataValidatorConfig::default());
        let issues = validator.validate_candles(&candles, Utc::now());
        assert!(issues.iter().any(|i| i.starts_with("stale_last")));
    }

    #[test]
    fn range_outlier_flagged_against_recent_average() {
        let base = Utc::now() - chrono::Duration::minutes(30);
        let mut candles: Vec<Candle> =
            (0..25).map(|i| candle(base + chrono::Duration::minutes(i), 1.0901, 1.0900)).collect();
        let last_idx = candles.len() - 1;
        candles[last_idx].high = 1.1100;
        candles[last_idx].low = 1.0800;
        let validator = MarketDataValidator::new(MarketDataValidatorConfig { stale_seconds: 600, ..Default::default() });
        let now = candles[last_idx].bucket_start;
        let issues = validator.validate_candles(&candles, now);
        assert!(issues.iter().any(|i| i.starts_with("range_outlier")));
    }
}
