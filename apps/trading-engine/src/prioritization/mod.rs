//! Two-layer prioritization and capital allocation.
//!
//! Layer 1 treats every syntactically valid order as viable; probability
//! never blocks here, it only sequences. Layer 2 ranks viable orders by a
//! weighted quality score and awards capital and order slots greedily. The
//! two-layer path runs under a watchdog; on timeout or error the legacy
//! single-composite-score path takes over.

mod performance;
mod quality;

pub use performance::{HistoricalPerformanceService, SetupPerformance};
pub use quality::{
    MarketContext, QualityComponents, StaticMarketContext, efficiency, priority_norm,
    risk_reward_score, timeframe_match_score,
};

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use tracing::{debug, info, warn};

use crate::config::{PrioritizationConfig, RiskLimitsConfig};
use crate::models::{ActiveOrder, PlannedOrder};
use crate::sizing::PositionSizingService;

/// Allocation reason for orders that missed the slot budget.
pub const REASON_MAX_OPEN: &str = "Max open orders reached";

/// Allocation reason for orders that missed the capital budget.
pub const REASON_CAPITAL: &str = "Insufficient capital";

/// Allocation reason for awarded orders.
pub const REASON_ALLOCATED: &str = "Allocated";

/// Input to prioritization: an order plus its evaluated probability.
#[derive(Debug, Clone)]
pub struct OrderCandidate {
    /// The order under consideration.
    pub order: PlannedOrder,
    /// Database row id, when persisted.
    pub db_id: Option<i64>,
    /// Fill probability from the probability engine.
    pub fill_probability: f64,
}

/// Output of prioritization for one candidate.
#[derive(Debug, Clone)]
pub struct ScoredOrder {
    /// The candidate as submitted.
    pub candidate: OrderCandidate,
    /// Quality score (two-layer) or composite score (legacy).
    pub score: f64,
    /// Score components for audit.
    pub components: QualityComponents,
    /// Sized quantity at current equity.
    pub quantity: Decimal,
    /// Notional this order would commit.
    pub capital_commitment: Decimal,
    /// Whether every order passed layer-1 viability (always true today).
    pub viable: bool,
    /// Whether the allocator awarded this order.
    pub allocated: bool,
    /// Why the allocator did or did not award it.
    pub allocation_reason: String,
}

/// Deterministic scoring and capital allocation.
pub struct PrioritizationService {
    sizing: PositionSizingService,
    config: PrioritizationConfig,
    risk_limits: RiskLimitsConfig,
    market_context: Option<Arc<dyn MarketContext>>,
    performance: Option<Arc<HistoricalPerformanceService>>,
}

impl PrioritizationService {
    /// Create the service.
    #[must_use]
    pub fn new(
        sizing: PositionSizingService,
        config: PrioritizationConfig,
        risk_limits: RiskLimitsConfig,
        market_context: Option<Arc<dyn MarketContext>>,
        performance: Option<Arc<HistoricalPerformanceService>>,
    ) -> Self {
        Self {
            sizing,
            config,
            risk_limits,
            market_context,
            performance,
        }
    }

    /// Rank candidates and award capital/slots.
    ///
    /// Returns every candidate, allocated or not, with its reason. The
    /// two-layer path is wrapped in a watchdog; timeout or failure falls
    /// back to the legacy composite path.
    pub async fn prioritize_orders(
        &self,
        candidates: Vec<OrderCandidate>,
        equity: Decimal,
        working_orders: &[ActiveOrder],
    ) -> Vec<ScoredOrder> {
        if candidates.is_empty() {
            return vec![];
        }

        if !self.config.two_layer_enabled {
            debug!("Two-layer prioritization disabled, using legacy path");
            return self.prioritize_legacy(&candidates, equity, working_orders);
        }

        let watchdog = Duration::from_secs(self.config.watchdog_seconds);
        match tokio::time::timeout(
            watchdog,
            self.prioritize_two_layer(&candidates, equity, working_orders),
        )
        .await
        {
            Ok(scored) => scored,
            Err(_) => {
                warn!(
                    watchdog_secs = self.config.watchdog_seconds,
                    "Prioritization watchdog fired, falling back to legacy path"
                );
                self.prioritize_legacy(&candidates, equity, working_orders)
            }
        }
    }

    /// Two-layer pipeline: quality-score everything, then allocate.
    async fn prioritize_two_layer(
        &self,
        candidates: &[OrderCandidate],
        equity: Decimal,
        working_orders: &[ActiveOrder],
    ) -> Vec<ScoredOrder> {
        let weights = &self.config.quality_weights;
        let mut scored: Vec<ScoredOrder> = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let order = &candidate.order;

            let (quantity, capital_commitment) = match self.position_details(order, equity) {
                Some(details) => details,
                None => {
                    debug!(symbol = %order.symbol, "Skipping candidate without position details");
                    continue;
                }
            };

            let components = QualityComponents {
                priority_norm: priority_norm(order.priority),
                efficiency: efficiency(order, &self.sizing, equity),
                risk_reward_score: risk_reward_score(order.risk_reward_ratio),
                timeframe_match: timeframe_match_score(
                    order,
                    &self.config,
                    self.market_context.as_deref(),
                ),
                setup_bias: self.setup_bias(order).await,
            };

            let score = weights.manual_priority * components.priority_norm
                + weights.efficiency * components.efficiency
                + weights.risk_reward * components.risk_reward_score
                + weights.timeframe_match * components.timeframe_match
                + weights.setup_bias * components.setup_bias;

            debug!(
                symbol = %order.symbol,
                score,
                priority_norm = components.priority_norm,
                efficiency = components.efficiency,
                risk_reward = components.risk_reward_score,
                "Quality score computed"
            );

            scored.push(ScoredOrder {
                candidate: candidate.clone(),
                score,
                components,
                quantity,
                capital_commitment,
                viable: true,
                allocated: false,
                allocation_reason: "Viable - awaiting allocation".to_string(),
            });
        }

        self.allocate(scored, equity, working_orders)
    }

    /// Legacy single-layer composite: probability folded directly into one
    /// deterministic score, same greedy allocation.
    fn prioritize_legacy(
        &self,
        candidates: &[OrderCandidate],
        equity: Decimal,
        working_orders: &[ActiveOrder],
    ) -> Vec<ScoredOrder> {
        // Batch min/max efficiency normalization
        let efficiencies: Vec<f64> = candidates
            .iter()
            .map(|c| efficiency(&c.order, &self.sizing, equity))
            .collect();
        let max_eff = efficiencies.iter().copied().fold(f64::MIN, f64::max);
        let min_eff = efficiencies.iter().copied().fold(f64::MAX, f64::min);

        let mut scored: Vec<ScoredOrder> = Vec::with_capacity(candidates.len());
        for (candidate, raw_efficiency) in candidates.iter().zip(efficiencies) {
            let order = &candidate.order;
            let (quantity, capital_commitment) = match self.position_details(order, equity) {
                Some(details) => details,
                None => continue,
            };

            let efficiency_norm = if max_eff > min_eff {
                (raw_efficiency - min_eff) / (max_eff - min_eff)
            } else {
                raw_efficiency
            };

            let size_pref = 1.0
                - (capital_commitment / equity.max(Decimal::ONE))
                    .to_f64()
                    .unwrap_or(1.0)
                    .min(1.0);

            let components = QualityComponents {
                priority_norm: priority_norm(order.priority),
                efficiency: raw_efficiency,
                risk_reward_score: risk_reward_score(order.risk_reward_ratio),
                timeframe_match: timeframe_match_score(
                    order,
                    &self.config,
                    self.market_context.as_deref(),
                ),
                setup_bias: 0.5,
            };

            let score = 0.35 * candidate.fill_probability
                + 0.20 * components.priority_norm
                + 0.15 * efficiency_norm
                + 0.15 * components.timeframe_match
                + 0.10 * components.setup_bias
                + 0.05 * size_pref;

            scored.push(ScoredOrder {
                candidate: candidate.clone(),
                score,
                components,
                quantity,
                capital_commitment,
                viable: true,
                allocated: false,
                allocation_reason: "Pending allocation".to_string(),
            });
        }

        self.allocate(scored, equity, working_orders)
    }

    /// Greedy allocation under the slot and capital budgets.
    ///
    /// Sorted by score descending; ties break on higher priority_norm and
    /// then symbol lexicographically so runs are deterministic.
    fn allocate(
        &self,
        mut scored: Vec<ScoredOrder>,
        equity: Decimal,
        working_orders: &[ActiveOrder],
    ) -> Vec<ScoredOrder> {
        let committed: Decimal = working_orders
            .iter()
            .filter(|o| o.is_working())
            .map(|o| o.capital_commitment)
            .sum();
        let working_count = working_orders.iter().filter(|o| o.is_working()).count();

        let utilization =
            Decimal::from_f64(self.config.max_capital_utilization).unwrap_or(Decimal::ONE);
        let available_capital = (equity * utilization - committed).max(Decimal::ZERO);
        let available_slots = self
            .risk_limits
            .max_open_orders
            .saturating_sub(working_count);

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| {
                    b.components
                        .priority_norm
                        .total_cmp(&a.components.priority_norm)
                })
                .then_with(|| a.candidate.order.symbol.cmp(&b.candidate.order.symbol))
        });

        let mut allocated_capital = Decimal::ZERO;
        let mut allocated_count = 0usize;

        for entry in &mut scored {
            if allocated_count >= available_slots {
                entry.allocation_reason = REASON_MAX_OPEN.to_string();
                continue;
            }
            if allocated_capital + entry.capital_commitment > available_capital {
                entry.allocation_reason = REASON_CAPITAL.to_string();
                continue;
            }
            entry.allocated = true;
            entry.allocation_reason = REASON_ALLOCATED.to_string();
            allocated_capital += entry.capital_commitment;
            allocated_count += 1;
        }

        info!(
            candidates = scored.len(),
            allocated = allocated_count,
            allocated_capital = %allocated_capital,
            available_capital = %available_capital,
            available_slots,
            "Allocation completed"
        );
        scored
    }

    async fn setup_bias(&self, order: &PlannedOrder) -> f64 {
        if !self.config.enable_advanced_features {
            return 0.5;
        }
        let Some(performance) = &self.performance else {
            return 0.5;
        };
        let Some(setup) = &order.trading_setup else {
            return 0.5;
        };
        performance
            .setup_bias_score(setup, &self.config.setup_bias_thresholds)
            .await
    }

    fn position_details(&self, order: &PlannedOrder, equity: Decimal) -> Option<(Decimal, Decimal)> {
        let entry = order.entry_price?;
        let quantity = self.sizing.calculate_order_quantity(order, equity).ok()?;
        Some((quantity, entry * quantity))
    }
}
