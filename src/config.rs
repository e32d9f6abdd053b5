//! Process configuration: CLI flags (`clap`) layered over `.env`/environment
//! variables, with paths anchored to the data directory rather than the
//! current working directory.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Parser, Debug, Clone)]
#[command(name = "ict-engine", about = "Real-time ICT pattern detection and execution engine")]
pub struct Cli {
    /// Root directory for memory/metrics/session/audit/alerts persistence.
    #[arg(long, env = "ICT_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Run against the simulated broker adapter instead of a live one.
    /// Explicit boot flag — never an implicit fallback on connect failure.
    #[arg(long, env = "ICT_SIM_MODE")]
    pub sim: bool,

    /// Comma-separated symbol list, e.g. "EURUSD,GBPUSD".
    #[arg(long, env = "ICT_SYMBOLS", value_delimiter = ',')]
    pub symbols: Vec<String>,

    /// Path to a JSON config file overriding the defaults below.
    #[arg(long, env = "ICT_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,
}

pub fn load_env() {
    if dotenv::dotenv().is_err() {
        let candidates = [
            PathBuf::from(".env"),
            PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(".env"),
        ];
        for candidate in candidates {
            if candidate.exists() {
                let _ = dotenv::from_path(&candidate);
                break;
            }
        }
    }
}

fn default_data_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data")
}

/// Anchor a possibly-relative path to the data directory rather than cwd.
pub fn resolve_data_path(data_dir: &Path, relative: &str) -> PathBuf {
    let p = Path::new(relative);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        data_dir.join(p)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub symbols: Vec<String>,
    pub timeframes: Vec<String>,
    pub tick_interval_sec: f64,
    pub max_tick_age_sec: i64,
    pub max_clock_skew_sec: i64,
    pub buffer_size: usize,
    pub shutdown_timeout_sec: f64,
    pub callback_budget_ms: u64,
    pub max_consecutive_callback_failures: u32,
    pub max_consecutive_fetch_failures: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["EURUSD".to_string()],
            timeframes: vec!["M1".to_string(), "M5".to_string(), "M15".to_string()],
            tick_interval_sec: 0.1,
            max_tick_age_sec: 60,
            max_clock_skew_sec: 5,
            buffer_size: 10_000,
            shutdown_timeout_sec: 2.0,
            callback_budget_ms: 50,
            max_consecutive_callback_failures: 5,
            max_consecutive_fetch_failures: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub min_gap_size_pips: f64,
    pub fill_tolerance_pips: f64,
    pub max_fvgs_per_symbol: usize,
    pub max_age_days: i64,
    pub lookback_period: usize,
    pub max_distance_pips: f64,
    pub min_confidence: f64,
    pub volume_threshold: f64,
    pub min_displacement_pips: f64,
    pub momentum_threshold: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_gap_size_pips: 2.0,
            fill_tolerance_pips: 0.5,
            max_fvgs_per_symbol: 200,
            max_age_days: 30,
            lookback_period: 25,
            max_distance_pips: 150.0,
            min_confidence: 0.55,
            volume_threshold: 1.0,
            min_displacement_pips: 50.0,
            momentum_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub risk_pct: f64,
    pub max_symbol_volume: f64,
    pub blacklist: Vec<String>,
    pub restricted_hours_utc: Vec<u32>,
    pub max_spread_points: f64,
    pub loss_cooldown_sec: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_pct: 0.01,
            max_symbol_volume: 5.0,
            blacklist: Vec::new(),
            restricted_hours_utc: Vec::new(),
            max_spread_points: 30.0,
            loss_cooldown_sec: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub global_rate: u32,
    pub per_symbol_rate: u32,
    pub window_sec: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            global_rate: 10,
            per_symbol_rate: 5,
            window_sec: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub max_retries: u32,
    pub retry_delay_seconds: f64,
    pub max_latency_ms: u64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_window_sec: u64,
    pub circuit_breaker_cooldown_sec: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay_seconds: 0.5,
            max_latency_ms: 500,
            circuit_breaker_threshold: 3,
            circuit_breaker_window_sec: 60,
            circuit_breaker_cooldown_sec: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub composite_health_enabled: bool,
    pub max_latency_ms: u64,
    pub max_market_data_age_sec: i64,
    pub max_heartbeat_age_sec: i64,
    pub cache_ttl_sec: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            composite_health_enabled: true,
            max_latency_ms: 1000,
            max_market_data_age_sec: 60,
            max_heartbeat_age_sec: 10,
            cache_ttl_sec: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub history_limit: usize,
    pub latency_samples_limit: usize,
    pub persist_interval_sec: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            history_limit: 100,
            latency_samples_limit: 500,
            persist_interval_sec: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub sim_mode: bool,
    pub pipeline: PipelineConfig,
    pub detectors: DetectorConfig,
    pub risk: RiskConfig,
    pub rate_limit: RateLimitConfig,
    pub router: RouterConfig,
    pub health: HealthConfig,
    pub metrics: MetricsConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_path(),
            sim_mode: true,
            pipeline: PipelineConfig::default(),
            detectors: DetectorConfig::default(),
            risk: RiskConfig::default(),
            rate_limit: RateLimitConfig::default(),
            router: RouterConfig::default(),
            health: HealthConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Merge CLI overrides on top of defaults (or a config file, if given).
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mut config = match &cli.config_file {
            Some(path) => {
                let bytes = std::fs::read(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                serde_json::from_slice(&bytes)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => EngineConfig::default(),
        };

        if let Some(dir) = &cli.data_dir {
            config.data_dir = dir.clone();
        }
        config.sim_mode = config.sim_mode || cli.sim;
        if !cli.symbols.is_empty() {
            config.pipeline.symbols = cli.symbols.clone();
        }
        Ok(config)
    }
}

pub fn env_flag(name: &str, default: bool) -> bool {
    env::var(name)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_defaults() {
        let config = EngineConfig::default();
        assert!(config.sim_mode);
        assert_eq!(config.router.circuit_breaker_threshold, 3);
        assert_eq!(config.rate_limit.global_rate, 10);
    }

    #[test]
    fn resolve_data_path_keeps_absolute_paths() {
        let data_dir = PathBuf::from("/var/data");
        let resolved = resolve_data_path(&data_dir, "/etc/passwd");
        assert_eq!(resolved, PathBuf::from("/etc/passwd"));
    }

    #[test]
    fn resolve_data_path_anchors_relative_paths() {
        let data_dir = PathBuf::from("/var/data");
        let resolved = resolve_data_path(&data_dir, "memory/fvg_memory.json");
        assert_eq!(resolved, PathBuf::from("/var/data/memory/fvg_memory.json"));
    }
}
