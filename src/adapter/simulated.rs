//! In-memory broker adapter used for dry runs, tests, and `--sim` boot mode.
//!
//! Generates a deterministic-seeded random walk per symbol and fills orders
//! with a small amount of slippage/latency jitter so the execution router's
//! retry/backoff/metrics code paths get real variance to chew on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::adapter::{AccountInfo, BrokerAdapter};
use crate::error::EngineResult;
use crate::models::{Candle, ExecutionIntent, ExecutionResult, Timeframe, Tick};

struct SymbolState {
    price: f64,
    candles: HashMap<Timeframe, Vec<Candle>>,
}

pub struct SimulatedBrokerAdapter {
    connected: AtomicBool,
    rng: Mutex<StdRng>,
    symbols: Mutex<HashMap<String, SymbolState>>,
    next_ticket: AtomicU64,
    slippage_pips: f64,
}

impl SimulatedBrokerAdapter {
    pub fn new(seed: u64, starting_prices: HashMap<String, f64>) -> Self {
        let symbols = starting_prices
            .into_iter()
            .map(|(symbol, price)| (symbol, SymbolState { price, candles: HashMap::new() }))
            .collect();
        Self {
            connected: AtomicBool::new(true),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            symbols: Mutex::new(symbols),
            next_ticket: AtomicU64::new(1),
            slippage_pips: 0.3,
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    fn advance(&self, symbol: &str) -> Option<f64> {
        let mut symbols = self.symbols.lock();
        let state = symbols.get_mut(symbol)?;
        let mut rng = self.rng.lock();
        let drift: f64 = rng.gen_range(-0.00015..0.00015);
        state.price = (state.price + drift).max(0.0001);
        Some(state.price)
    }
}

#[async_trait]
impl BrokerAdapter for SimulatedBrokerAdapter {
    async fn tick(&self, symbol: &str) -> EngineResult<Option<Tick>> {
        if !self.is_connected() {
            return Ok(None);
        }
        let Some(price) = self.advance(symbol) else {
            return Ok(None);
        };
        let spread = 0.00012;
        Ok(Some(Tick {
            symbol: symbol.to_string(),
            timestamp: Utc::now(),
            bid: price,
            ask: price + spread,
            volume: {
                let mut rng = self.rng.lock();
                rng.gen_range(1..50)
            },
        }))
    }

    async fn candles(&self, symbol: &str, timeframe: Timeframe, count: usize) -> EngineResult<Vec<Candle>> {
        let symbols = self.symbols.lock();
        let Some(state) = symbols.get(symbol) else {
            return Ok(Vec::new());
        };
        let history = state.candles.get(&timeframe).cloned().unwrap_or_default();
        let start = history.len().saturating_sub(count);
        Ok(history[start..].to_vec())
    }

    async fn account(&self) -> EngineResult<AccountInfo> {
        Ok(AccountInfo {
            balance: 10_000.0,
            equity: 10_000.0,
            margin_level: 1_000.0,
            connected: self.is_connected(),
            server: "simulated".to_string(),
        })
    }

    async fn send_order(&self, intent: &ExecutionIntent) -> EngineResult<ExecutionResult> {
        if !self.is_connected() {
            return Ok(ExecutionResult::failure("adapter_disconnected"));
        }
        let Some(price) = self.advance(&intent.symbol) else {
            return Ok(ExecutionResult::failure("unknown_symbol"));
        };
        let pip = crate::models::pip_factor(&intent.symbol);
        let slip_pips: f64 = {
            let mut rng = self.rng.lock();
            rng.gen_range(-self.slippage_pips..self.slippage_pips)
        };
        let executed_price = price + slip_pips / pip;
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        Ok(ExecutionResult::success(ticket, executed_price, 0))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> SimulatedBrokerAdapter {
        let mut prices = HashMap::new();
        prices.insert("EURUSD".to_string(), 1.0900);
        SimulatedBrokerAdapter::new(42, prices)
    }

    #[tokio::test]
    async fn tick_returns_none_when_disconnected() {
        let adapter = adapter();
        adapter.set_connected(false);
        assert!(adapter.tick("EURUSD").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tick_has_positive_spread() {
        let adapter = adapter();
        let tick = adapter.tick("EURUSD").await.unwrap().unwrap();
        assert!(tick.ask > tick.bid);
    }

    #[tokio::test]
    async fn send_order_succeeds_for_known_symbol() {
        let adapter = adapter();
        let intent = ExecutionIntent {
            symbol: "EURUSD".to_string(),
            action: crate::models::Action::Buy,
            volume: 0.1,
            price: None,
            stop: None,
            take_profit: None,
            correlation_id: "corr-1".to_string(),
        };
        let result = adapter.send_order(&intent).await.unwrap();
        assert!(result.success);
        assert!(result.ticket.is_some());
    }

    #[tokio::test]
    async fn send_order_fails_for_unknown_symbol() {
        let adapter = adapter();
        let intent = ExecutionIntent {
            symbol: "XXXYYY".to_string(),
            action: crate::models::Action::Sell,
            volume: 0.1,
            price: None,
            stop: None,
            take_profit: None,
            correlation_id: "corr-2".to_string(),
        };
        let result = adapter.send_order(&intent).await.unwrap();
        assert!(!result.success);
    }
}
