//! ICT pattern detection and execution engine: a real-time market data
//! pipeline feeds Fair Value Gap / Order Block / Smart Money / Displacement
//! detectors, a persistent memory store biases confidence from historical
//! outcomes, and an execution router carries qualifying setups to a broker
//! adapter behind admission control, health gating, and a circuit breaker.

pub mod adapter;
pub mod alerts;
pub mod audit;
pub mod config;
pub mod detectors;
pub mod error;
pub mod health;
pub mod memory;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod risk;
pub mod router;
pub mod util;
