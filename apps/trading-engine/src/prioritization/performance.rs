//! Historical setup-performance analysis for the setup-bias score.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tracing::debug;

use crate::config::SetupBiasThresholds;
use crate::persistence::TradingStore;

/// How long computed setup metrics stay cached.
const CACHE_TTL: Duration = Duration::from_secs(30 * 60);

/// Aggregate performance of a named trading setup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetupPerformance {
    /// Closed trades in the window.
    pub total_trades: u32,
    /// Fraction of winning trades.
    pub win_rate: f64,
    /// Gross profit over gross loss.
    pub profit_factor: f64,
}

/// Computes and caches per-setup performance from closed executions.
pub struct HistoricalPerformanceService {
    store: Arc<TradingStore>,
    cache: RwLock<HashMap<String, (Instant, Option<SetupPerformance>)>>,
}

impl HistoricalPerformanceService {
    /// Create the service.
    #[must_use]
    pub fn new(store: Arc<TradingStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Performance metrics for a setup over the lookback window, or `None`
    /// when no closed trades exist.
    pub async fn get_setup_performance(
        &self,
        setup_name: &str,
        days_back: i64,
    ) -> Option<SetupPerformance> {
        let cache_key = format!("{setup_name}:{days_back}");
        if let Ok(cache) = self.cache.read()
            && let Some((at, value)) = cache.get(&cache_key)
            && at.elapsed() < CACHE_TTL
        {
            return *value;
        }

        let pnls = self
            .store
            .setup_trade_pnls(setup_name, days_back)
            .await
            .ok()?;
        let performance = compute_performance(&pnls);

        if let Ok(mut cache) = self.cache.write() {
            cache.insert(cache_key, (Instant::now(), performance));
        }
        if let Some(perf) = performance {
            debug!(
                setup = setup_name,
                trades = perf.total_trades,
                win_rate = perf.win_rate,
                profit_factor = perf.profit_factor,
                "Setup performance computed"
            );
        }
        performance
    }

    /// Bias score in [0.1, 1.0] for a setup: 0.5 when no data, 0.3 below
    /// the evidence thresholds, else `0.6*win_rate + 0.4*min(pf,5)/5`.
    pub async fn setup_bias_score(
        &self,
        setup_name: &str,
        thresholds: &SetupBiasThresholds,
    ) -> f64 {
        let Some(performance) = self
            .get_setup_performance(setup_name, i64::from(thresholds.recent_period_days))
            .await
        else {
            return 0.5;
        };

        if performance.total_trades < thresholds.min_trades
            || performance.win_rate < thresholds.min_win_rate
            || performance.profit_factor < thresholds.min_profit_factor
        {
            return 0.3;
        }

        let profit_factor = performance.profit_factor.min(5.0);
        let score = performance.win_rate * 0.6 + (profit_factor * 0.4) / 5.0;
        score.clamp(0.1, 1.0)
    }

    /// Drop all cached metrics (tests, after bulk imports).
    pub fn invalidate_cache(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }
}

fn compute_performance(pnls: &[Decimal]) -> Option<SetupPerformance> {
    if pnls.is_empty() {
        return None;
    }

    let total = pnls.len();
    let wins = pnls.iter().filter(|p| **p > Decimal::ZERO).count();
    let gross_profit: Decimal = pnls.iter().filter(|p| **p > Decimal::ZERO).copied().sum();
    let gross_loss: Decimal = pnls
        .iter()
        .filter(|p| **p < Decimal::ZERO)
        .map(|p| p.abs())
        .sum();

    let profit_factor = if gross_loss.is_zero() {
        // All winners: cap rather than divide by zero
        5.0
    } else {
        (gross_profit / gross_loss).to_f64().unwrap_or(0.0)
    };

    Some(SetupPerformance {
        total_trades: u32::try_from(total).unwrap_or(u32::MAX),
        win_rate: wins as f64 / total as f64,
        profit_factor,
    })
}
