//! Execution router: the single path from a validated `ExecutionIntent` to
//! a placed (or rejected) order, wrapping every broker call with admission
//! control, health/latency gating, a circuit breaker, and retry-with-failover
//! across a primary and optional backup executor.

pub mod market_data_validator;
pub mod retry_policy;
pub mod session_state;
pub mod slippage;

pub use market_data_validator::{MarketDataValidator, MarketDataValidatorConfig};
pub use retry_policy::{ExecutionRetryPolicy, RetryConfig};
pub use session_state::SessionStateManager;
pub use slippage::{SlippageSample, SlippageTracker};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tracing::warn;

use crate::adapter::BrokerAdapter;
use crate::alerts::{AlertDispatcher, Category, Severity};
use crate::audit::AuditLog;
use crate::config::RouterConfig;
use crate::health::{CompositeHealthMonitor, HealthInputs};
use crate::metrics::MetricsAggregator;
use crate::models::{Candle, ExecutionIntent, ExecutionResult};
use crate::risk::{ComplianceChecker, ExposureTracker, PositionSizer, RateLimiter};

/// Context the router needs beyond the intent itself: the account state for
/// position sizing, and the freshest market data / latency readings for the
/// pre-check pipeline.
#[derive(Clone)]
pub struct PlaceOrderContext {
    pub balance: f64,
    pub pip_value: f64,
    pub spread_points: f64,
    pub hour_utc: u32,
    pub latency_ms: f64,
    pub market_data_age_sec: Option<i64>,
    pub candles: Vec<Candle>,
}

struct CircuitBreaker {
    threshold: u32,
    window: Duration,
    cooldown: Duration,
    failures: Mutex<VecDeque<Instant>>,
    open_until: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    fn new(threshold: u32, window_sec: u64, cooldown_sec: u64) -> Self {
        Self {
            threshold,
            window: Duration::from_secs(window_sec),
            cooldown: Duration::from_secs(cooldown_sec),
            failures: Mutex::new(VecDeque::new()),
            open_until: Mutex::new(None),
        }
    }

    fn record_failure(&self) {
        let now = Instant::now();
        let mut failures = self.failures.lock();
        failures.push_back(now);
        while failures.front().map(|t| now.duration_since(*t) > self.window).unwrap_or(false) {
            failures.pop_front();
        }
        if failures.len() as u32 >= self.threshold {
            let mut open_until = self.open_until.lock();
            if open_until.is_none() {
                *open_until = Some(now + self.cooldown);
            }
        }
    }

    /// Resets the breaker once the cooldown has elapsed from the point the
    /// threshold was reached.
    fn allow(&self) -> bool {
        let mut open_until = self.open_until.lock();
        match *open_until {
            Some(until) if Instant::now() < until => false,
            Some(_) => {
                *open_until = None;
                self.failures.lock().clear();
                true
            }
            None => true,
        }
    }
}

type RiskValidatorHook = Box<dyn Fn(&ExecutionIntent) -> Result<(), String> + Send + Sync>;
type PreOrderHook = Box<dyn Fn(&ExecutionIntent) -> Result<(), String> + Send + Sync>;

pub struct ExecutionRouter {
    config: RouterConfig,
    primary: Arc<dyn BrokerAdapter>,
    backup: Option<Arc<dyn BrokerAdapter>>,
    metrics: Arc<MetricsAggregator>,
    alerts: Arc<AlertDispatcher>,
    audit: Arc<AuditLog>,
    circuit_breaker: CircuitBreaker,
    rate_limiter: Option<Arc<RateLimiter>>,
    health_monitor: Option<Arc<CompositeHealthMonitor>>,
    risk_validator: Option<RiskValidatorHook>,
    pre_order_hooks: Vec<PreOrderHook>,
    market_data_validator: Option<Arc<MarketDataValidator>>,
    md_validator_ttl_sec: f64,
    md_cache: Mutex<Option<(Instant, Vec<String>)>>,
    position_sizer: Option<Arc<PositionSizer>>,
    compliance_checker: Option<Arc<ComplianceChecker>>,
    exposure_tracker: Option<Arc<ExposureTracker>>,
    retry_policy: Option<ExecutionRetryPolicy>,
    slippage_tracker: Option<Arc<SlippageTracker>>,
    session_state: Option<Arc<SessionStateManager>>,
    blocked_reasons: Mutex<HashMap<String, u64>>,
}

impl ExecutionRouter {
    pub fn new(
        config: RouterConfig,
        primary: Arc<dyn BrokerAdapter>,
        metrics: Arc<MetricsAggregator>,
        alerts: Arc<AlertDispatcher>,
        audit: Arc<AuditLog>,
    ) -> Self {
        let circuit_breaker = CircuitBreaker::new(
            config.circuit_breaker_threshold,
            config.circuit_breaker_window_sec,
            config.circuit_breaker_cooldown_sec,
        );
        Self {
            config,
            primary,
            backup: None,
            metrics,
            alerts,
            audit,
            circuit_breaker,
            rate_limiter: None,
            health_monitor: None,
            risk_validator: None,
            pre_order_hooks: Vec::new(),
            market_data_validator: None,
            md_validator_ttl_sec: 5.0,
            md_cache: Mutex::new(None),
            position_sizer: None,
            compliance_checker: None,
            exposure_tracker: None,
            retry_policy: None,
            slippage_tracker: None,
            session_state: None,
            blocked_reasons: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_backup(mut self, backup: Arc<dyn BrokerAdapter>) -> Self {
        self.backup = Some(backup);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_health_monitor(mut self, monitor: Arc<CompositeHealthMonitor>) -> Self {
        self.health_monitor = Some(monitor);
        self
    }

    pub fn with_risk_validator(mut self, hook: RiskValidatorHook) -> Self {
        self.risk_validator = Some(hook);
        self
    }

    pub fn with_pre_order_hook(mut self, hook: PreOrderHook) -> Self {
        self.pre_order_hooks.push(hook);
        self
    }

    pub fn with_market_data_validator(mut self, validator: Arc<MarketDataValidator>) -> Self {
        self.market_data_validator = Some(validator);
        self
    }

    pub fn with_position_sizer(mut self, sizer: Arc<PositionSizer>) -> Self {
        self.position_sizer = Some(sizer);
        self
    }

    pub fn with_compliance_checker(mut self, checker: Arc<ComplianceChecker>) -> Self {
        self.compliance_checker = Some(checker);
        self
    }

    pub fn with_exposure_tracker(mut self, tracker: Arc<ExposureTracker>) -> Self {
        self.exposure_tracker = Some(tracker);
        self
    }

    pub fn with_retry_policy(mut self, policy: ExecutionRetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_slippage_tracker(mut self, tracker: Arc<SlippageTracker>) -> Self {
        self.slippage_tracker = Some(tracker);
        self
    }

    pub fn with_session_state(mut self, manager: Arc<SessionStateManager>) -> Self {
        self.session_state = Some(manager);
        self
    }

    pub fn blocked_reasons(&self) -> HashMap<String, u64> {
        self.blocked_reasons.lock().clone()
    }

    pub async fn place_order(&self, mut intent: ExecutionIntent, ctx: PlaceOrderContext) -> ExecutionResult {
        if let Err(msg) = intent.validate() {
            return ExecutionResult::failure(format!("validation:{msg}"));
        }

        if let (Some(sizer), Some(stop), Some(price)) = (&self.position_sizer, intent.stop, intent.price) {
            let stop_distance = (price - stop).abs();
            if let Some(volume) = sizer.fixed_risk(ctx.balance, stop_distance, ctx.pip_value) {
                intent.volume = volume;
            }
        }

        if let Some(checker) = &self.compliance_checker {
            let violations = checker.check(&intent.symbol, ctx.hour_utc, ctx.spread_points);
            if let Some(violation) = violations.first() {
                let reason = violation.code().to_string();
                self.record_block(&reason);
                self.audit.log_event("ORDER_FINAL_FAIL", None, Some(&intent.symbol), Some(&reason), None, HashMap::new());
                return ExecutionResult::failure(reason);
            }
        }

        if let Err(reason) = self.pre_checks(&intent, &ctx) {
            self.handle_block(&reason, &intent);
            return ExecutionResult::failure(reason);
        }

        self.run_executors(intent).await
    }

    fn pre_checks(&self, intent: &ExecutionIntent, ctx: &PlaceOrderContext) -> Result<(), String> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.try_consume(&intent.symbol)?;
        }

        if let Some(health) = &self.health_monitor {
            let inputs = HealthInputs {
                latency_ms: Some(ctx.latency_ms),
                market_data_age_sec: ctx.market_data_age_sec,
                heartbeat_alive: Some(true),
            };
            if !health.is_system_healthy(inputs) {
                return Err("system_unhealthy".to_string());
            }
        }

        if ctx.latency_ms > self.config.max_latency_ms as f64 {
            return Err(format!("latency_too_high:{}ms", ctx.latency_ms as u64));
        }

        if let Some(validator) = &self.risk_validator {
            if let Err(reason) = validator(intent) {
                return Err(format!("risk_validation_failed:{reason}"));
            }
        }

        if !self.circuit_breaker.allow() {
            return Err("circuit_open".to_string());
        }

        for hook in &self.pre_order_hooks {
            if let Err(reason) = hook(intent) {
                warn!(reason = %reason, "pre-order hook blocked intent");
                return Err(format!("custom_hook_blocked:{reason}"));
            }
        }

        if let Some(validator) = &self.market_data_validator {
            let issues = self.cached_market_data_issues(validator, &ctx.candles);
            if !issues.is_empty() {
                return Err(format!("market_data_invalid:{}", issues.join(",")));
            }
        }

        Ok(())
    }

    fn cached_market_data_issues(&self, validator: &MarketDataValidator, candles: &[Candle]) -> Vec<String> {
        {
            let cache = self.md_cache.lock();
            if let Some((at, issues)) = cache.as_ref() {
                if at.elapsed().as_secs_f64() < self.md_validator_ttl_sec {
                    return issues.clone();
                }
            }
        }
        let issues = validator.validate_candles(candles, Utc::now());
        *self.md_cache.lock() = Some((Instant::now(), issues.clone()));
        issues
    }

    fn record_block(&self, reason: &str) {
        let key = reason.split(':').next().unwrap_or(reason).to_string();
        *self.blocked_reasons.lock().entry(key).or_insert(0) += 1;
    }

    fn handle_block(&self, reason: &str, intent: &ExecutionIntent) {
        self.record_block(reason);
        let category = if reason.starts_with("circuit_open") {
            Some(Category::Execution)
        } else if reason.starts_with("system_unhealthy") {
            Some(Category::System)
        } else if reason.starts_with("latency_too_high") {
            Some(Category::Latency)
        } else if reason.starts_with("market_data_invalid") {
            Some(Category::System)
        } else if reason.starts_with("risk_validation_failed") {
            Some(Category::Risk)
        } else {
            None
        };
        if let Some(category) = category {
            let _ = self.alerts.dispatch(Severity::Warning, category, &format!("order blocked: {reason}"), HashMap::new());
        }
        self.audit.log_event("ORDER_FAIL", None, Some(&intent.symbol), Some(reason), None, HashMap::new());
    }

    async fn run_executors(&self, intent: ExecutionIntent) -> ExecutionResult {
        let executors: Vec<&Arc<dyn BrokerAdapter>> = std::iter::once(&self.primary).chain(self.backup.iter()).collect();
        let mut last_error = "no_executor_available".to_string();

        for attempt in 0..=self.config.max_retries {
            for executor in &executors {
                let start = Instant::now();
                let outcome = match &self.retry_policy {
                    Some(policy) => policy.run(|| async { executor.send_order(&intent).await }).await,
                    None => executor.send_order(&intent).await,
                };
                let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

                match outcome {
                    Ok(result) if result.success => {
                        self.metrics.record_order(true, latency_ms);
                        if let Some(tracker) = &self.slippage_tracker {
                            if let (Some(expected), Some(executed)) = (intent.price, result.executed_price) {
                                tracker.record(&intent.symbol, expected, executed, crate::models::pip_factor(&intent.symbol).recip());
                            }
                        }
                        if let Some(session) = &self.session_state {
                            let _ = session.record_success(
                                result.ticket.unwrap_or(0),
                                &intent.symbol,
                                intent.action,
                                intent.volume,
                                HashMap::new(),
                            );
                        }
                        if let Some(exposure) = &self.exposure_tracker {
                            exposure.apply_execution(&intent.symbol, intent.volume, intent.action);
                        }
                        self.audit.log_event(
                            "ORDER_OK",
                            result.ticket.map(|t| t.to_string()).as_deref(),
                            Some(&intent.symbol),
                            Some("filled"),
                            Some(latency_ms),
                            HashMap::new(),
                        );
                        return result;
                    }
                    Ok(result) => {
                        self.metrics.record_order(false, latency_ms);
                        last_error = result.error.clone().unwrap_or_else(|| "order_rejected".to_string());
                        self.audit.log_event("ORDER_FAIL", None, Some(&intent.symbol), Some(&last_error), Some(latency_ms), HashMap::new());
                    }
                    Err(e) => {
                        self.metrics.record_order(false, latency_ms);
                        self.circuit_breaker.record_failure();
                        last_error = e.reason_code();
                        let _ = self.alerts.dispatch(
                            Severity::Warning,
                            Category::Execution,
                            &format!("order exception: {last_error}"),
                            HashMap::new(),
                        );
                        self.audit.log_event("ORDER_EXCEPTION", None, Some(&intent.symbol), Some(&last_error), Some(latency_ms), HashMap::new());
                    }
                }
            }
            if attempt < self.config.max_retries {
                tokio::time::sleep(Duration::from_secs_f64(self.config.retry_delay_seconds)).await;
            }
        }

        self.circuit_breaker.record_failure();
        let _ = self.alerts.dispatch(Severity::Critical, Category::Execution, &format!("order failure: {last_error}"), HashMap::new());
        self.audit.log_event("ORDER_FINAL_FAIL", None, Some(&intent.symbol), Some(&last_error), None, HashMap::new());
        if let Some(session) = &self.session_state {
            let _ = session.record_failure(&intent.symbol, intent.action, intent.volume, &last_error);
        }
        ExecutionResult::failure(last_error)
    }
}
