//! Broker adapter: the single seam between this engine and a live terminal.
//!
//! Every call is fail-safe — connection loss surfaces through
//! `is_connected()` and typed `Result`s, never panics or silent retries.

mod live;
mod simulated;

pub use live::LiveBrokerAdapter;
pub use simulated::SimulatedBrokerAdapter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::models::{Candle, ExecutionIntent, ExecutionResult, Timeframe, Tick};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountInfo {
    pub balance: f64,
    pub equity: f64,
    pub margin_level: f64,
    pub connected: bool,
    pub server: String,
}

#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    async fn tick(&self, symbol: &str) -> EngineResult<Option<Tick>>;
    async fn candles(&self, symbol: &str, timeframe: Timeframe, count: usize) -> EngineResult<Vec<Candle>>;
    async fn account(&self) -> EngineResult<AccountInfo>;
    async fn send_order(&self, intent: &ExecutionIntent) -> EngineResult<ExecutionResult>;
    fn is_connected(&self) -> bool;
}
