//! Core data model shared by the pipeline, detectors, memory store and
//! execution router.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub fn seconds(self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::H1 => 3_600,
            Timeframe::H4 => 14_400,
            Timeframe::D1 => 86_400,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Session {
    Sydney,
    Tokyo,
    London,
    NewYork,
    Transition,
}

impl Session {
    pub fn from_utc_hour(hour: u32) -> Self {
        match hour {
            0..=6 => Session::Sydney,
            7..=8 => Session::Tokyo,
            9..=11 => Session::London,
            12..=16 => Session::NewYork,
            _ => Session::Transition,
        }
    }

    /// London-NY overlap, the highest-liquidity "kill zone" window.
    pub fn is_kill_zone(hour: u32) -> bool {
        (12..=16).contains(&hour)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Up,
    Down,
    Sideways,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub bid: f64,
    pub ask: f64,
    pub volume: u64,
}

impl Tick {
    pub fn spread(&self) -> f64 {
        self.ask - self.bid
    }

    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bucket_start: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub tick_count: u64,
}

impl Candle {
    pub fn new(symbol: String, timeframe: Timeframe, bucket_start: DateTime<Utc>, price: f64) -> Self {
        Self {
            symbol,
            timeframe,
            bucket_start,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0,
            tick_count: 0,
        }
    }

    pub fn fold_tick(&mut self, tick: &Tick) {
        let price = tick.mid();
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += tick.volume;
        self.tick_count += 1;
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketState {
    pub symbol: String,
    pub last_tick: Option<Tick>,
    pub current_candle: Option<Candle>,
    pub trend: Trend,
    pub volatility: f64,
    pub session: Session,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FvgType {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FvgStatus {
    Unfilled,
    PartiallyFilled,
    Filled,
}

impl FvgStatus {
    fn rank(self) -> u8 {
        match self {
            FvgStatus::Unfilled => 0,
            FvgStatus::PartiallyFilled => 1,
            FvgStatus::Filled => 2,
        }
    }

    pub fn can_transition_to(self, next: FvgStatus) -> bool {
        next.rank() >= self.rank()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FairValueGap {
    pub id: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub fvg_type: FvgType,
    pub high: f64,
    pub low: f64,
    pub size_pips: f64,
    pub created_at: DateTime<Utc>,
    pub status: FvgStatus,
    pub fill_pct: f64,
    pub filled_at: Option<DateTime<Utc>>,
    pub fill_duration_sec: Option<i64>,
    pub session_at_creation: Session,
    pub confluences: Vec<String>,
    pub quality_score: f64,
    pub mitigation_probability: f64,
}

impl FairValueGap {
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderBlockType {
    Demand,
    Supply,
    Mitigation,
    Breaker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QualityTier {
    Premium,
    High,
    Medium,
    Low,
}

impl QualityTier {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            QualityTier::Premium
        } else if score >= 75.0 {
            QualityTier::High
        } else if score >= 60.0 {
            QualityTier::Medium
        } else {
            QualityTier::Low
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBlock {
    pub id: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub block_type: OrderBlockType,
    pub entry: f64,
    pub stop: f64,
    pub take_profit: f64,
    pub confidence: f64,
    pub distance_pips: f64,
    pub risk_reward: f64,
    pub quality_tier: QualityTier,
    pub created_at: DateTime<Utc>,
    pub health_score_at_creation: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmartMoneySignalType {
    Bos,
    Choch,
    LiquiditySweep,
    Manipulation,
    InstitutionalFlow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketStructure {
    Bullish,
    Bearish,
    Ranging,
    Transition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartMoneySignal {
    pub id: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub signal_type: SmartMoneySignalType,
    pub direction: Direction,
    pub confidence: f64,
    pub strength: f64,
    pub price_level: f64,
    pub entry: f64,
    pub stop: f64,
    pub take_profit: f64,
    pub structure: MarketStructure,
    pub order_block_confluence: bool,
    pub volume_confluence: bool,
    pub session_confluence: bool,
    pub quality_score: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DisplacementType {
    BullishDisplacement,
    BearishDisplacement,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplacementSignal {
    pub id: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub displacement_type: DisplacementType,
    pub start_price: f64,
    pub end_price: f64,
    pub pips: f64,
    pub momentum_score: f64,
    pub institutional_signature: bool,
    pub target_estimation: f64,
    pub historical_success_rate: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionIntent {
    pub symbol: String,
    pub action: Action,
    pub volume: f64,
    pub price: Option<f64>,
    pub stop: Option<f64>,
    pub take_profit: Option<f64>,
    pub correlation_id: String,
}

impl ExecutionIntent {
    pub fn validate(&self) -> Result<(), String> {
        if self.volume <= 0.0 {
            return Err("volume must be positive".to_string());
        }
        if self.symbol.trim().is_empty() {
            return Err("symbol must not be empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecutionResult {
    pub success: bool,
    pub ticket: Option<u64>,
    pub error: Option<String>,
    pub retries: u32,
    pub placed_at: Option<DateTime<Utc>>,
    pub executed_price: Option<f64>,
    pub extra: HashMap<String, serde_json::Value>,
}

impl ExecutionResult {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn success(ticket: u64, executed_price: f64, retries: u32) -> Self {
        Self {
            success: true,
            ticket: Some(ticket),
            executed_price: Some(executed_price),
            retries,
            placed_at: Some(Utc::now()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub pattern_type: String,
    pub status: FvgStatus,
    pub fill_pct: f64,
    pub quality_score: f64,
    pub created_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
    pub session_at_creation: Session,
    pub break_level: Option<f64>,
}

/// Pip-size conversion factor: 10000 for most FX pairs, 100 for JPY crosses.
pub fn pip_factor(symbol: &str) -> f64 {
    if symbol.to_uppercase().contains("JPY") {
        100.0
    } else {
        10_000.0
    }
}
