//! ICT pattern detectors. Each is a stateless function of a candle window,
//! the symbol/timeframe it's scanning, and the current adaptive config —
//! never of detector-internal state.

pub mod adaptive;
pub mod displacement;
pub mod fvg;
pub mod order_block;
pub mod smart_money;

pub use adaptive::{market_conditions, AdaptiveConfig, MarketConditions};
pub use displacement::DisplacementDetector;
pub use fvg::FvgDetector;
pub use order_block::OrderBlockDetector;
pub use smart_money::SmartMoneyDetector;
