//! Risk management: pre-trade gates and loss-based trading halts.
//!
//! Halts are hard blocks with no override. Loss checks use realized P&L
//! from closed trades only, scoped by account, and the verdict is cached
//! for five minutes between recomputations. Any failure inside the halt
//! evaluation fails closed: trading halts until the history is readable
//! again.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::config::RiskLimitsConfig;
use crate::models::{ActiveOrder, PlannedOrder, PositionStrategy};
use crate::persistence::TradingStore;
use crate::sizing::PositionSizingService;

/// Verdict from the pre-trade gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RiskDecision {
    /// Order may be submitted.
    Allowed,
    /// Trading is halted system-wide.
    Halted(String),
    /// This order violates exposure limits.
    Rejected(String),
}

impl RiskDecision {
    /// Whether the order may proceed.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Snapshot of the current risk posture for monitoring.
#[derive(Debug, Clone)]
pub struct RiskStatus {
    /// Whether new submissions are blocked.
    pub trading_halted: bool,
    /// Why, when halted.
    pub halt_reason: String,
    /// Realized P&L over the last day.
    pub daily_pnl: Decimal,
    /// Realized P&L over the last week.
    pub weekly_pnl: Decimal,
    /// Realized P&L over the last month.
    pub monthly_pnl: Decimal,
}

#[derive(Debug)]
struct HaltCache {
    checked_at: Option<Instant>,
    halted: bool,
    reason: String,
}

/// Pre-trade risk gatekeeper.
pub struct RiskManagementService {
    store: Arc<TradingStore>,
    sizing: PositionSizingService,
    limits: RiskLimitsConfig,
    account_number: Option<String>,
    cache: Mutex<HaltCache>,
}

impl RiskManagementService {
    /// Create the service for one account scope.
    #[must_use]
    pub fn new(
        store: Arc<TradingStore>,
        limits: RiskLimitsConfig,
        account_number: Option<String>,
    ) -> Self {
        Self {
            store,
            sizing: PositionSizingService::new(),
            limits,
            account_number,
            cache: Mutex::new(HaltCache {
                checked_at: None,
                halted: false,
                reason: String::new(),
            }),
        }
    }

    /// Hard gate invoked just before submission.
    ///
    /// Caps `order.risk_per_trade` to the configured maximum (silent
    /// mutation), then checks the trading halt and the CORE/HYBRID
    /// exposure limits.
    pub async fn can_place_order(
        &self,
        order: &mut PlannedOrder,
        active_orders: &[ActiveOrder],
        equity: Decimal,
    ) -> RiskDecision {
        if order.risk_per_trade > self.limits.max_risk_per_trade {
            debug!(
                symbol = %order.symbol,
                requested = %order.risk_per_trade,
                capped = %self.limits.max_risk_per_trade,
                "Risk per trade capped"
            );
            order.risk_per_trade = self.limits.max_risk_per_trade;
        }

        if let Some(reason) = self.trading_halt_reason(equity).await {
            return RiskDecision::Halted(reason);
        }

        if let Some(reason) = self.exposure_violation(order, active_orders, equity) {
            return RiskDecision::Rejected(reason);
        }

        RiskDecision::Allowed
    }

    /// Cached halt evaluation; recomputes at most once per interval.
    async fn trading_halt_reason(&self, equity: Decimal) -> Option<String> {
        {
            let cache = self.cache.lock().ok()?;
            if let Some(checked_at) = cache.checked_at
                && checked_at.elapsed().as_secs() < self.limits.halt_check_interval_secs
            {
                return cache.halted.then(|| cache.reason.clone());
            }
        }

        let (halted, reason) = self.evaluate_halt(equity).await;
        if let Ok(mut cache) = self.cache.lock() {
            cache.checked_at = Some(Instant::now());
            cache.halted = halted;
            cache.reason.clone_from(&reason);
        }
        halted.then_some(reason)
    }

    async fn evaluate_halt(&self, equity: Decimal) -> (bool, String) {
        if equity <= Decimal::ZERO {
            return (true, "Zero or negative equity".to_string());
        }

        let account = self.account_number.as_deref();
        let windows = [
            (1i64, self.limits.daily_loss_pct, "Daily"),
            (7, self.limits.weekly_loss_pct, "Weekly"),
            (30, self.limits.monthly_loss_pct, "Monthly"),
        ];

        for (days, limit, label) in windows {
            let pnl = match self.store.realized_pnl_window(days, account).await {
                Ok(pnl) => pnl,
                Err(e) => {
                    // Fail closed: an unreadable P&L history halts trading
                    error!(error = %e, "Risk system error during halt check");
                    return (true, format!("Risk system error: {e}"));
                }
            };

            let loss = pnl.min(Decimal::ZERO).abs();
            let loss_pct = loss / equity;
            if loss_pct >= limit {
                let reason = format!("{label} loss limit exceeded: {loss_pct} >= {limit}");
                warn!(%loss_pct, %limit, window_days = days, "Trading halted");
                return (true, reason);
            }
        }

        (false, String::new())
    }

    /// CORE/HYBRID exposure caps: single trade and aggregate working
    /// commitment. DAY and other strategies are exempt.
    fn exposure_violation(
        &self,
        order: &PlannedOrder,
        active_orders: &[ActiveOrder],
        equity: Decimal,
    ) -> Option<String> {
        if !matches!(
            order.position_strategy,
            PositionStrategy::Core | PositionStrategy::Hybrid
        ) {
            return None;
        }

        let Ok(position_value) = self.sizing.capital_commitment(order, equity) else {
            return Some("Position sizing failed for exposure check".to_string());
        };

        let single_limit = equity * self.limits.single_trade_pct;
        if position_value > single_limit {
            return Some(format!(
                "Single-trade capital {position_value} exceeds limit {single_limit}"
            ));
        }

        let current_exposure: Decimal = active_orders
            .iter()
            .filter(|active| {
                active.is_working()
                    && matches!(
                        active.planned_order.position_strategy,
                        PositionStrategy::Core | PositionStrategy::Hybrid
                    )
            })
            .map(|active| active.capital_commitment)
            .sum();

        let total_limit = equity * self.limits.total_exposure_pct;
        if current_exposure + position_value > total_limit {
            return Some(format!(
                "Aggregate exposure {} exceeds limit {total_limit}",
                current_exposure + position_value
            ));
        }

        None
    }

    /// Record a closed trade's realized P&L for future halt computations.
    pub async fn record_trade_close(&self, order_id: i64, symbol: &str, pnl: Decimal) {
        if let Err(e) = self
            .store
            .record_realized_pnl(order_id, symbol, pnl, Utc::now(), self.account_number.as_deref())
            .await
        {
            warn!(symbol, error = %e, "Failed to record realized P&L");
        } else {
            info!(symbol, %pnl, "Trade close recorded");
        }
    }

    /// Force the next gate call to re-evaluate the halt.
    pub fn force_risk_check(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.checked_at = None;
        }
    }

    /// Current risk posture for monitoring.
    pub async fn risk_status(&self, equity: Decimal) -> RiskStatus {
        let account = self.account_number.as_deref();
        let pnl = |days| self.store.realized_pnl_window(days, account);
        let (halted, reason) = self.evaluate_halt(equity).await;

        RiskStatus {
            trading_halted: halted,
            halt_reason: reason,
            daily_pnl: pnl(1).await.unwrap_or_default(),
            weekly_pnl: pnl(7).await.unwrap_or_default(),
            monthly_pnl: pnl(30).await.unwrap_or_default(),
        }
    }
}
