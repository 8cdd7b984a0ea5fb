//! End-of-day service.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::market_hours::{MarketHours, OperationalWindow};
use crate::config::EndOfDayConfig;
use crate::feed::MarketDataFeed;
use crate::models::{ExecutedOrder, OrderState, PositionStrategy};
use crate::persistence::TradingStore;
use crate::risk::RiskManagementService;
use crate::state::StateService;

/// Outcome status of one EOD run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EodStatus {
    /// Outside the closing window, or disabled.
    Skipped,
    /// Ran to completion (possibly with per-position errors).
    Completed,
    /// Aborted by an unexpected failure.
    Failed,
}

/// Report of one EOD run.
#[derive(Debug, Clone)]
pub struct EodReport {
    /// Run status.
    pub status: EodStatus,
    /// Why the run was skipped, when it was.
    pub skip_reason: Option<String>,
    /// DAY positions closed.
    pub day_positions_closed: usize,
    /// Expired HYBRID positions closed.
    pub hybrid_positions_closed: usize,
    /// Planned orders transitioned to EXPIRED.
    pub orders_expired: usize,
    /// Per-position errors.
    pub errors: Vec<String>,
}

impl EodReport {
    fn skipped(reason: &str) -> Self {
        Self {
            status: EodStatus::Skipped,
            skip_reason: Some(reason.to_string()),
            day_positions_closed: 0,
            hybrid_positions_closed: 0,
            orders_expired: 0,
            errors: vec![],
        }
    }
}

/// Closes DAY and expired-HYBRID positions during the closing window and
/// expires the planned orders behind them. CORE positions are never touched.
pub struct EndOfDayService {
    store: Arc<TradingStore>,
    state: Arc<StateService>,
    risk: Arc<RiskManagementService>,
    feed: Arc<dyn MarketDataFeed>,
    market_hours: MarketHours,
    config: EndOfDayConfig,
    /// Close attempts per execution id, reset daily.
    close_attempts: Mutex<HashMap<i64, u32>>,
}

impl EndOfDayService {
    /// Create the service.
    #[must_use]
    pub fn new(
        store: Arc<TradingStore>,
        state: Arc<StateService>,
        risk: Arc<RiskManagementService>,
        feed: Arc<dyn MarketDataFeed>,
        config: EndOfDayConfig,
    ) -> Self {
        Self {
            store,
            state,
            risk,
            feed,
            market_hours: MarketHours::new(),
            config,
            close_attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Reset per-day counters. Call at session start.
    pub fn reset_daily_state(&self) {
        if let Ok(mut attempts) = self.close_attempts.lock() {
            attempts.clear();
        }
        info!("End-of-day daily state reset");
    }

    /// Run the EOD process against the wall clock.
    pub async fn run_eod_process(&self) -> EodReport {
        self.run_eod_process_at(Utc::now()).await
    }

    /// Run the EOD process as of a given instant (deterministic entry).
    pub async fn run_eod_process_at(&self, now: DateTime<Utc>) -> EodReport {
        if !self.config.enabled {
            return EodReport::skipped("EOD service disabled");
        }

        let window = self.market_hours.window_at(
            now,
            self.config.close_buffer_minutes,
            self.config.pre_market_start_minutes,
            self.config.post_market_end_minutes,
        );
        if window != OperationalWindow::ClosingWindow {
            debug!(?window, "Not in EOD closing window");
            return EodReport::skipped("Not in EOD window");
        }

        info!(
            close_buffer_minutes = self.config.close_buffer_minutes,
            "Starting EOD process"
        );

        let mut report = EodReport {
            status: EodStatus::Completed,
            skip_reason: None,
            day_positions_closed: 0,
            hybrid_positions_closed: 0,
            orders_expired: 0,
            errors: vec![],
        };

        let open_positions = self.state.get_open_positions(None).await;

        for position in &open_positions {
            let Some(strategy) = self.position_strategy(position).await else {
                report
                    .errors
                    .push(format!("No planned order for execution {}", position.id));
                continue;
            };

            match strategy {
                PositionStrategy::Day if self.config.close_day_positions => {
                    if self.close_position(position, &mut report).await {
                        report.day_positions_closed += 1;
                    }
                }
                PositionStrategy::Hybrid
                    if self.config.close_expired_hybrid && is_expired(position, now) =>
                {
                    if self.close_position(position, &mut report).await {
                        report.hybrid_positions_closed += 1;
                    }
                }
                // CORE and unexpired HYBRID stay armed
                _ => {}
            }
        }

        if self.config.expire_planned_orders {
            report.orders_expired = self.expire_planned_orders(now).await;
        }

        info!(
            day_closed = report.day_positions_closed,
            hybrid_closed = report.hybrid_positions_closed,
            orders_expired = report.orders_expired,
            errors = report.errors.len(),
            "EOD process completed"
        );
        report
    }

    async fn position_strategy(&self, position: &ExecutedOrder) -> Option<PositionStrategy> {
        self.store
            .get_planned_order(position.planned_order_id)
            .await
            .ok()
            .flatten()
            .map(|row| row.order.position_strategy)
    }

    /// Close a single position at the current market price. Attempts are
    /// capped per position to avoid infinite retry.
    async fn close_position(&self, position: &ExecutedOrder, report: &mut EodReport) -> bool {
        let attempts = {
            let Ok(mut attempts) = self.close_attempts.lock() else {
                return false;
            };
            let count = attempts.entry(position.id).or_insert(0);
            *count += 1;
            *count
        };
        if attempts > self.config.max_close_attempts {
            report.errors.push(format!(
                "Close attempts exhausted for execution {}",
                position.id
            ));
            return false;
        }

        let symbol = match self
            .store
            .get_planned_order(position.planned_order_id)
            .await
        {
            Ok(Some(row)) => row.order.symbol,
            _ => {
                report
                    .errors
                    .push(format!("No planned order for execution {}", position.id));
                return false;
            }
        };

        let price = match self.feed.get_current_price(&symbol).await {
            Ok(Some(snapshot)) => snapshot.price,
            Ok(None) => {
                report
                    .errors
                    .push(format!("No market data to close {symbol}"));
                return false;
            }
            Err(e) => {
                report.errors.push(format!("Feed error closing {symbol}: {e}"));
                return false;
            }
        };

        match self
            .state
            .close_position(position.id, price, Decimal::ZERO)
            .await
        {
            Some(pnl) => {
                self.risk
                    .record_trade_close(position.planned_order_id, &symbol, pnl)
                    .await;
                info!(symbol, execution_id = position.id, %price, %pnl, "Position closed for EOD");
                true
            }
            None => {
                warn!(symbol, execution_id = position.id, attempts, "EOD close failed");
                report
                    .errors
                    .push(format!("Close failed for execution {}", position.id));
                false
            }
        }
    }

    /// Expire working planned orders whose strategy has lapsed: DAY orders
    /// created before today, HYBRID orders past their ten-day window.
    async fn expire_planned_orders(&self, now: DateTime<Utc>) -> usize {
        let rows = match self
            .store
            .load_orders_by_states(&[
                OrderState::Pending,
                OrderState::Live,
                OrderState::LiveWorking,
            ])
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "Failed to load orders for expiry");
                return 0;
            }
        };

        let today = now.date_naive();
        let mut expired = 0usize;
        for row in rows {
            let lapsed = match row.order.position_strategy {
                PositionStrategy::Day => row.created_at.date_naive() <= today,
                PositionStrategy::Hybrid => {
                    (today - row.created_at.date_naive()).num_days() > 10
                }
                PositionStrategy::Core => false,
            };
            if !lapsed {
                continue;
            }

            let mut details = BTreeMap::new();
            details.insert(
                "reason".to_string(),
                format!("{} strategy lapsed", row.order.position_strategy.as_str()),
            );
            if self
                .state
                .update_planned_order_state(row.id, OrderState::Expired, "end_of_day", Some(details))
                .await
            {
                expired += 1;
            }
        }
        expired
    }
}

fn is_expired(position: &ExecutedOrder, now: DateTime<Utc>) -> bool {
    position
        .expiration_date
        .is_some_and(|expiration| expiration <= now)
}
