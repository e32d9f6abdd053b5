//! ICT pattern detection and execution engine entrypoint: wires the market
//! data pipeline, detectors, memory store, risk controls and execution
//! router together, then runs until interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ict_engine::adapter::{BrokerAdapter, LiveBrokerAdapter, SimulatedBrokerAdapter};
use ict_engine::alerts::AlertDispatcher;
use ict_engine::audit::AuditLog;
use ict_engine::config::{self, Cli, EngineConfig};
use ict_engine::detectors::{AdaptiveConfig, DisplacementDetector, FvgDetector, OrderBlockDetector, SmartMoneyDetector};
use ict_engine::health::{CompositeHealthMonitor, HeartbeatMonitor};
use ict_engine::memory::MemoryStore;
use ict_engine::metrics::MetricsAggregator;
use ict_engine::models::{FvgStatus, MemoryEntry, Timeframe};
use ict_engine::pipeline::MarketDataPipeline;
use ict_engine::risk::{ComplianceChecker, ExposureTracker, PositionSizer, RateLimiter};
use ict_engine::router::{ExecutionRouter, MarketDataValidator, SessionStateManager, SlippageTracker};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_adapter(config: &EngineConfig) -> Result<Arc<dyn BrokerAdapter>> {
    if config.sim_mode {
        let starting_prices = config
            .pipeline
            .symbols
            .iter()
            .map(|s| (s.clone(), 1.1000))
            .collect();
        return Ok(Arc::new(SimulatedBrokerAdapter::new(1, starting_prices)));
    }
    let base_url = std::env::var("ICT_BROKER_URL").context("ICT_BROKER_URL must be set outside --sim")?;
    let adapter = LiveBrokerAdapter::new(base_url, Duration::from_secs(5))?;
    Ok(Arc::new(adapter))
}

#[tokio::main]
async fn main() -> Result<()> {
    config::load_env();
    init_tracing();

    let cli = Cli::parse();
    let engine_config = EngineConfig::from_cli(&cli)?;
    std::fs::create_dir_all(&engine_config.data_dir)?;
    for sub in ["memory", "metrics", "risk", "session", "alerts", "audit"] {
        std::fs::create_dir_all(engine_config.data_dir.join(sub))?;
    }

    info!(sim_mode = engine_config.sim_mode, symbols = ?engine_config.pipeline.symbols, "starting ict-engine");

    let adapter = build_adapter(&engine_config)?;
    let pipeline = Arc::new(MarketDataPipeline::new(engine_config.pipeline.clone(), Arc::clone(&adapter)));

    let memory = Arc::new(MemoryStore::load(
        &engine_config.data_dir.join("memory").join("fvg_memory.json"),
        engine_config.detectors.max_fvgs_per_symbol,
        engine_config.detectors.max_age_days,
    )?);

    let exposure = Arc::new(ExposureTracker::load(&engine_config.data_dir.join("risk").join("exposure.json"))?);
    let compliance = Arc::new(ComplianceChecker::new(
        engine_config.risk.blacklist.clone(),
        engine_config.risk.restricted_hours_utc.clone(),
        engine_config.risk.max_spread_points,
        engine_config.risk.loss_cooldown_sec,
    ));
    let position_sizer = Arc::new(PositionSizer::new(engine_config.risk.risk_pct, engine_config.risk.max_symbol_volume));
    let rate_limiter = Arc::new(
        RateLimiter::new(
            engine_config.rate_limit.enabled,
            engine_config.rate_limit.global_rate,
            engine_config.rate_limit.per_symbol_rate,
            engine_config.rate_limit.window_sec,
        )
        .with_persist_path(ict_engine::risk::rate_limiter::default_persist_path(&engine_config.data_dir)),
    );

    let heartbeat = Arc::new(HeartbeatMonitor::new(engine_config.health.max_heartbeat_age_sec as f64));
    let health_monitor = Arc::new(CompositeHealthMonitor::new(engine_config.health.clone(), Arc::clone(&heartbeat)));

    let metrics = Arc::new(MetricsAggregator::load(
        &engine_config.data_dir.join("metrics"),
        engine_config.metrics.history_limit,
        engine_config.metrics.latency_samples_limit,
    )?);
    let alerts = Arc::new(AlertDispatcher::new(&engine_config.data_dir.join("alerts"), None));
    let audit = Arc::new(AuditLog::new(&engine_config.data_dir.join("audit")));

    let slippage = Arc::new(SlippageTracker::new(1000, Some(ict_engine::router::slippage::default_persist_path(&engine_config.data_dir))));
    let session_state = Arc::new(SessionStateManager::load(&engine_config.data_dir.join("session"), 500, 5.0)?);
    let market_data_validator = Arc::new(MarketDataValidator::new(Default::default()));

    let router = Arc::new(
        ExecutionRouter::new(engine_config.router.clone(), Arc::clone(&adapter), Arc::clone(&metrics), Arc::clone(&alerts), Arc::clone(&audit))
            .with_rate_limiter(Arc::clone(&rate_limiter))
            .with_health_monitor(Arc::clone(&health_monitor))
            .with_market_data_validator(Arc::clone(&market_data_validator))
            .with_position_sizer(Arc::clone(&position_sizer))
            .with_compliance_checker(Arc::clone(&compliance))
            .with_exposure_tracker(Arc::clone(&exposure))
            .with_slippage_tracker(Arc::clone(&slippage))
            .with_session_state(Arc::clone(&session_state)),
    );

    let fvg_detector = Arc::new(FvgDetector::new(true));
    let order_block_detector = Arc::new(OrderBlockDetector::new(
        engine_config.detectors.lookback_period,
        engine_config.detectors.max_distance_pips,
        engine_config.detectors.min_confidence,
    ));
    let smart_money_detector = Arc::new(SmartMoneyDetector::default());
    let displacement_detector = Arc::new(DisplacementDetector {
        window: engine_config.detectors.lookback_period.min(32).max(8),
        min_pips: engine_config.detectors.min_displacement_pips,
        momentum_threshold: engine_config.detectors.momentum_threshold,
    });

    {
        let memory = Arc::clone(&memory);
        let pipeline_for_scan = Arc::clone(&pipeline);
        let detector_config = engine_config.detectors.clone();
        let fvg_detector = Arc::clone(&fvg_detector);
        let order_block_detector = Arc::clone(&order_block_detector);
        let smart_money_detector = Arc::clone(&smart_money_detector);
        let displacement_detector = Arc::clone(&displacement_detector);
        let heartbeat_for_scan = Arc::clone(&heartbeat);

        pipeline.register_callback("scan", move |symbol, tick, state| {
            heartbeat_for_scan.beat("pipeline");
            let candles = pipeline_for_scan.recent_candles(symbol, Timeframe::M15, 200);
            if candles.len() < 3 {
                return;
            }

            let hour_utc: u32 = tick.timestamp.format("%H").to_string().parse().unwrap_or(0);
            let conditions = ict_engine::detectors::market_conditions(&pipeline_for_scan.recent_ticks(symbol, 20), hour_utc);
            let adaptive = AdaptiveConfig::derive(&detector_config, conditions);

            let gaps = fvg_detector.detect(&candles, 0.6, &adaptive, state.session);
            for gap in &gaps {
                memory.add(MemoryEntry {
                    id: String::new(),
                    symbol: gap.symbol.clone(),
                    timeframe: gap.timeframe,
                    pattern_type: "fvg".to_string(),
                    status: FvgStatus::Unfilled,
                    fill_pct: 0.0,
                    quality_score: gap.quality_score,
                    created_at: gap.created_at,
                    filled_at: None,
                    session_at_creation: gap.session_at_creation,
                    break_level: Some(gap.low),
                });
            }

            let health_score = (conditions.volatility * 100.0).clamp(0.0, 1.0).max(0.6);
            let blocks = order_block_detector.detect(&candles, tick.mid(), health_score);
            for block in &blocks {
                info!(symbol = %block.symbol, kind = ?block.block_type, entry = block.entry, confidence = block.confidence, "order block signal");
            }
            let block_levels: Vec<f64> = blocks.iter().map(|b| b.entry).collect();
            let smart_money = smart_money_detector.detect(&candles, &block_levels, false, conditions.kill_zone, Some(memory.as_ref()));
            for signal in &smart_money {
                info!(symbol = %signal.symbol, kind = ?signal.signal_type, quality = signal.quality_score, "smart money signal");
            }
            if let Some(displacement) = displacement_detector.detect(&candles, 0.5) {
                info!(symbol = %displacement.symbol, pips = displacement.pips, "displacement signal");
            }
        });
    }

    pipeline.start();

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    tokio::pin!(shutdown);
    let mut persist_tick = tokio::time::interval(Duration::from_secs_f64(engine_config.metrics.persist_interval_sec));

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = persist_tick.tick() => {
                if let Err(e) = metrics.maybe_persist(engine_config.metrics.persist_interval_sec) {
                    warn!(error = %e, "metrics persist failed");
                }
            }
        }
    }

    info!("shutdown requested, persisting state");
    pipeline.stop().await;
    session_state.flush().ok();
    session_state.persist_snapshot().ok();
    memory.persist().ok();
    exposure.persist().ok();
    rate_limiter.snapshot_state().ok();
    slippage.persist_snapshot().ok();
    if let Err(e) = metrics.force_persist() {
        error!(error = %e, "final metrics persist failed");
    }
    audit.log_event("SHUTDOWN", None, None, Some("clean"), None, std::collections::HashMap::new());

    let blocked = router.blocked_reasons();
    if !blocked.is_empty() {
        info!(?blocked, "pre-check block tally for this session");
    }

    Ok(())
}
