//! Real-time market data pipeline: tick ingestion, validation, candle
//! aggregation and fan-out to subscribers.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::adapter::BrokerAdapter;
use crate::config::PipelineConfig;
use crate::models::{Candle, MarketState, Session, Tick, Timeframe, Trend};
use crate::util::percentile;

pub type Callback = Arc<dyn Fn(&str, &Tick, &MarketState) + Send + Sync>;

struct SubscriberSlot {
    name: String,
    callback: Callback,
    consecutive_failures: AtomicU32,
    disabled: AtomicBool,
    latency_samples_us: RwLock<VecDeque<f64>>,
}

struct SymbolBuffer {
    ticks: VecDeque<Tick>,
    candles: HashMap<Timeframe, VecDeque<Candle>>,
    state: MarketState,
}

impl SymbolBuffer {
    fn new(symbol: &str) -> Self {
        Self {
            ticks: VecDeque::new(),
            candles: HashMap::new(),
            state: MarketState {
                symbol: symbol.to_string(),
                last_tick: None,
                current_candle: None,
                trend: Trend::Unknown,
                volatility: 0.0,
                session: Session::Transition,
                is_active: true,
            },
        }
    }
}

pub struct MarketDataPipeline {
    config: PipelineConfig,
    adapter: Arc<dyn BrokerAdapter>,
    buffers: RwLock<HashMap<String, SymbolBuffer>>,
    candle_history_limit: usize,
    subscribers: RwLock<Vec<SubscriberSlot>>,
    running: AtomicBool,
    shutdown: Arc<Notify>,
    rejected_ticks: AtomicU64,
    fetch_errors: AtomicU64,
}

impl MarketDataPipeline {
    pub fn new(config: PipelineConfig, adapter: Arc<dyn BrokerAdapter>) -> Self {
        let mut buffers = HashMap::new();
        for symbol in &config.symbols {
            buffers.insert(symbol.clone(), SymbolBuffer::new(symbol));
        }
        Self {
            config,
            adapter,
            buffers: RwLock::new(buffers),
            candle_history_limit: 500,
            subscribers: RwLock::new(Vec::new()),
            running: AtomicBool::new(false),
            shutdown: Arc::new(Notify::new()),
            rejected_ticks: AtomicU64::new(0),
            fetch_errors: AtomicU64::new(0),
        }
    }

    /// Returns true if this call started the loop, false if already running.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            pipeline.run_loop().await;
        });
        true
    }

    /// Idempotent; returns true once the running flag transitions to false.
    pub async fn stop(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return true;
        }
        self.shutdown.notify_waiters();
        let timeout = std::time::Duration::from_secs_f64(self.config.shutdown_timeout_sec);
        tokio::time::sleep(timeout.min(std::time::Duration::from_millis(50))).await;
        true
    }

    pub fn register_callback<F>(&self, name: &str, callback: F)
    where
        F: Fn(&str, &Tick, &MarketState) + Send + Sync + 'static,
    {
        self.subscribers.write().push(SubscriberSlot {
            name: name.to_string(),
            callback: Arc::new(callback),
            consecutive_failures: AtomicU32::new(0),
            disabled: AtomicBool::new(false),
            latency_samples_us: RwLock::new(VecDeque::with_capacity(256)),
        });
    }

    pub fn current_tick(&self, symbol: &str) -> Option<Tick> {
        self.buffers.read().get(symbol)?.state.last_tick.clone()
    }

    pub fn current_candle(&self, symbol: &str) -> Option<Candle> {
        self.buffers.read().get(symbol)?.state.current_candle.clone()
    }

    pub fn recent_ticks(&self, symbol: &str, n: usize) -> Vec<Tick> {
        self.buffers
            .read()
            .get(symbol)
            .map(|b| b.ticks.iter().rev().take(n).rev().cloned().collect())
            .unwrap_or_default()
    }

    pub fn recent_candles(&self, symbol: &str, timeframe: Timeframe, n: usize) -> Vec<Candle> {
        self.buffers
            .read()
            .get(symbol)
            .and_then(|b| b.candles.get(&timeframe))
            .map(|c| c.iter().rev().take(n).rev().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn counters(&self) -> (u64, u64) {
        (
            self.rejected_ticks.load(Ordering::Relaxed),
            self.fetch_errors.load(Ordering::Relaxed),
        )
    }

    async fn run_loop(self: Arc<Self>) {
        info!(symbols = ?self.config.symbols, "market data pipeline starting");
        let interval = std::time::Duration::from_secs_f64(self.config.tick_interval_sec);
        let mut consecutive_fetch_failures: u32 = 0;

        loop {
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            let symbols: Vec<String> = self.config.symbols.clone();
            for symbol in symbols {
                if !self.running.load(Ordering::SeqCst) {
                    break;
                }
                match self.adapter.tick(&symbol).await {
                    Ok(Some(tick)) => {
                        consecutive_fetch_failures = 0;
                        self.ingest(&symbol, tick).await;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
                        consecutive_fetch_failures += 1;
                        warn!(symbol = %symbol, error = %e.reason_code(), "tick fetch failed");
                        if consecutive_fetch_failures >= self.config.max_consecutive_fetch_failures {
                            warn!(symbol = %symbol, "too many consecutive fetch failures");
                        }
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.shutdown.notified() => break,
            }
        }
        info!("market data pipeline stopped");
    }

    async fn ingest(&self, symbol: &str, tick: Tick) {
        if let Err(reason) = validate_tick(&tick, self.config.max_tick_age_sec, self.config.max_clock_skew_sec) {
            self.rejected_ticks.fetch_add(1, Ordering::Relaxed);
            debug!(symbol = %symbol, reason = %reason, "tick rejected");
            return;
        }

        let snapshot = {
            let mut buffers = self.buffers.write();
            let Some(buffer) = buffers.get_mut(symbol) else {
                return;
            };

            if buffer.ticks.len() >= self.config.buffer_size {
                buffer.ticks.pop_front();
            }
            buffer.ticks.push_back(tick.clone());

            for timeframe in [Timeframe::M1, Timeframe::M5, Timeframe::M15, Timeframe::H1, Timeframe::H4, Timeframe::D1] {
                update_candle(buffer, timeframe, &tick, self.candle_history_limit);
            }

            let volatility = rolling_volatility(&buffer.ticks);
            let trend = derive_trend(&buffer.ticks);
            let hour = tick.timestamp.format("%H").to_string().parse::<u32>().unwrap_or(0);

            buffer.state.last_tick = Some(tick.clone());
            buffer.state.current_candle = buffer.candles.get(&Timeframe::M1).and_then(|c| c.back()).cloned();
            buffer.state.trend = trend;
            buffer.state.volatility = volatility;
            buffer.state.session = Session::from_utc_hour(hour);

            buffer.state.clone()
        };

        self.fan_out(symbol, &tick, &snapshot).await;
    }

    async fn fan_out(&self, symbol: &str, tick: &Tick, snapshot: &MarketState) {
        let budget = std::time::Duration::from_millis(self.config.callback_budget_ms);
        let subscribers = self.subscribers.read();
        for slot in subscribers.iter() {
            if slot.disabled.load(Ordering::SeqCst) {
                continue;
            }
            let start = Instant::now();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                (slot.callback)(symbol, tick, snapshot);
            }));
            let elapsed = start.elapsed();

            {
                let mut samples = slot.latency_samples_us.write();
                if samples.len() >= 256 {
                    samples.pop_front();
                }
                samples.push_back(elapsed.as_micros() as f64);
            }

            match result {
                Ok(()) => {
                    slot.consecutive_failures.store(0, Ordering::SeqCst);
                    if elapsed > budget {
                        let samples: Vec<f64> = slot.latency_samples_us.read().iter().copied().collect();
                        let p95 = percentile(&samples, 0.95);
                        warn!(subscriber = %slot.name, latency_us = elapsed.as_micros(), p95_us = p95, "slow subscriber callback");
                    }
                }
                Err(_) => {
                    let failures = slot.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                    warn!(subscriber = %slot.name, consecutive_failures = failures, "subscriber callback panicked");
                    if failures >= self.config.max_consecutive_callback_failures {
                        slot.disabled.store(true, Ordering::SeqCst);
                        warn!(subscriber = %slot.name, "subscriber auto-disabled after repeated failures");
                    }
                }
            }
        }
    }
}

fn validate_tick(tick: &Tick, max_age_sec: i64, max_skew_sec: i64) -> Result<(), &'static str> {
    if tick.bid <= 0.0 {
        return Err("non_positive_bid");
    }
    if tick.ask <= tick.bid {
        return Err("inverted_spread");
    }
    let age = (Utc::now() - tick.timestamp).num_seconds();
    if age > max_age_sec {
        return Err("stale_tick");
    }
    if age < -max_skew_sec {
        return Err("future_tick");
    }
    Ok(())
}

fn bucket_start(timeframe: Timeframe, timestamp: DateTime<Utc>) -> DateTime<Utc> {
    let seconds = timeframe.seconds();
    let epoch = timestamp.timestamp();
    let aligned = (epoch / seconds) * seconds;
    DateTime::from_timestamp(aligned, 0).unwrap_or(timestamp)
}

fn update_candle(buffer: &mut SymbolBuffer, timeframe: Timeframe, tick: &Tick, history_limit: usize) {
    let bucket = bucket_start(timeframe, tick.timestamp);
    let history = buffer.candles.entry(timeframe).or_default();

    match history.back_mut() {
        Some(candle) if candle.bucket_start == bucket => {
            candle.fold_tick(tick);
        }
        _ => {
            let mut candle = Candle::new(buffer.state.symbol.clone(), timeframe, bucket, tick.mid());
            candle.fold_tick(tick);
            if history.len() >= history_limit {
                history.pop_front();
            }
            history.push_back(candle);
        }
    }
}

fn rolling_volatility(ticks: &VecDeque<Tick>) -> f64 {
    let window = 20usize.min(ticks.len());
    if window < 2 {
        return 0.0;
    }
    let prices: Vec<f64> = ticks.iter().rev().take(window).map(|t| t.mid()).collect();
    let mean = prices.iter().sum::<f64>() / prices.len() as f64;
    let variance = prices.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / prices.len() as f64;
    variance.sqrt()
}

fn derive_trend(ticks: &VecDeque<Tick>) -> Trend {
    let window = 10usize.min(ticks.len());
    if window < 2 {
        return Trend::Unknown;
    }
    let recent: Vec<f64> = ticks.iter().rev().take(window).map(|t| t.mid()).collect();
    let delta = recent.first().copied().unwrap_or(0.0) - recent.last().copied().unwrap_or(0.0);
    let pip_threshold = 0.00005;
    if delta > pip_threshold {
        Trend::Up
    } else if delta < -pip_threshold {
        Trend::Down
    } else {
        Trend::Sideways
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::SimulatedBrokerAdapter;
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::AtomicU32 as StdAtomicU32;

    fn pipeline() -> Arc<MarketDataPipeline> {
        let mut prices = StdHashMap::new();
        prices.insert("EURUSD".to_string(), 1.09);
        let adapter: Arc<dyn BrokerAdapter> = Arc::new(SimulatedBrokerAdapter::new(1, prices));
        let mut config = PipelineConfig::default();
        config.symbols = vec!["EURUSD".to_string()];
        config.tick_interval_sec = 0.01;
        Arc::new(MarketDataPipeline::new(config, adapter))
    }

    #[test]
    fn validate_tick_rejects_inverted_spread() {
        let tick = Tick { symbol: "EURUSD".into(), timestamp: Utc::now(), bid: 1.1, ask: 1.09, volume: 1 };
        assert!(validate_tick(&tick, 60, 5).is_err());
    }

    #[test]
    fn validate_tick_rejects_stale() {
        let tick = Tick {
            symbol: "EURUSD".into(),
            timestamp: Utc::now() - chrono::Duration::seconds(120),
            bid: 1.09,
            ask: 1.091,
            volume: 1,
        };
        assert!(validate_tick(&tick, 60, 5).is_err());
    }

    #[test]
    fn validate_tick_accepts_good_tick() {
        let tick = Tick { symbol: "EURUSD".into(), timestamp: Utc::now(), bid: 1.09, ask: 1.091, volume: 10 };
        assert!(validate_tick(&tick, 60, 5).is_ok());
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let pipeline = pipeline();
        assert!(pipeline.start());
        assert!(!pipeline.start());
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let pipeline = pipeline();
        pipeline.start();
        assert!(pipeline.stop().await);
        assert!(pipeline.stop().await);
    }

    #[tokio::test]
    async fn ingest_updates_current_tick_and_candle() {
        let pipeline = pipeline();
        let tick = Tick { symbol: "EURUSD".into(), timestamp: Utc::now(), bid: 1.09, ask: 1.0901, volume: 5 };
        pipeline.ingest("EURUSD", tick.clone()).await;
        assert!(pipeline.current_tick("EURUSD").is_some());
        assert!(pipeline.current_candle("EURUSD").is_some());
    }

    #[tokio::test]
    async fn auto_disables_subscriber_after_repeated_panics() {
        let pipeline = pipeline();
        let calls = Arc::new(StdAtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);
        pipeline.register_callback("flaky", move |_, _, _| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            panic!("boom");
        });
        let limit = pipeline.config.max_consecutive_callback_failures;
        for _ in 0..(limit as usize + 5) {
            let tick = Tick { symbol: "EURUSD".into(), timestamp: Utc::now(), bid: 1.09, ask: 1.0901, volume: 1 };
            pipeline.ingest("EURUSD", tick).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), limit);
    }
}
