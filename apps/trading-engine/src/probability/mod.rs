//! Fill-probability engine.
//!
//! Consumes the current market snapshot per order and emits a probability
//! in [0, 1] plus the feature map it was derived from. Probability never
//! gates viability on the two-layer path; it sequences and weights, and it
//! drives the execution threshold for the legacy single-layer path only.
//! Every evaluation is persisted with its features.

mod features;

pub use features::{FeatureVector, realized_volatility};

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use tracing::{debug, warn};

use crate::feed::{MarketDataFeed, MarketSnapshot};
use crate::models::{Action, OrderType, PlannedOrder, ProbabilityScore};
use crate::persistence::TradingStore;

/// Probability assigned to a favorably-priced limit order.
const PROB_FAVORABLE: f64 = 0.95;

/// Probability assigned to an unfavorably-priced limit order.
const PROB_UNFAVORABLE: f64 = 0.1;

/// Probability assigned to order types the reference scorer has no model for.
const PROB_DEFAULT: f64 = 0.5;

/// Pluggable scorer: any replacement accepts the feature map and returns a
/// value in [0, 1].
pub trait ProbabilityScorer: Send + Sync {
    /// Score an order against extracted features.
    fn score(&self, order: &PlannedOrder, features: &FeatureVector) -> f64;
}

/// Reference scoring policy.
///
/// LMT BUY scores high when the market is at or below entry, low otherwise;
/// symmetric for SELL. MKT is always high.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceScorer;

impl ProbabilityScorer for ReferenceScorer {
    fn score(&self, order: &PlannedOrder, features: &FeatureVector) -> f64 {
        let Some(current) = features.get_f64("current_price") else {
            return 0.0;
        };
        let Some(entry) = order.entry_price.and_then(|e| e.to_f64()) else {
            return PROB_DEFAULT;
        };

        match order.order_type {
            OrderType::Limit => match order.action {
                Action::Buy => {
                    if current <= entry {
                        PROB_FAVORABLE
                    } else {
                        PROB_UNFAVORABLE
                    }
                }
                Action::Sell | Action::ShortSell => {
                    if current >= entry {
                        PROB_FAVORABLE
                    } else {
                        PROB_UNFAVORABLE
                    }
                }
            },
            OrderType::Market => PROB_FAVORABLE,
            _ => PROB_DEFAULT,
        }
    }
}

/// One evaluation result.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Fill probability in [0, 1].
    pub fill_probability: f64,
    /// Features the score was derived from.
    pub features: FeatureVector,
    /// Snapshot used for the evaluation.
    pub snapshot: MarketSnapshot,
}

/// Fill-probability engine bound to a data feed and a scorer.
pub struct FillProbabilityEngine {
    feed: Arc<dyn MarketDataFeed>,
    scorer: Box<dyn ProbabilityScorer>,
    /// Threshold for the legacy execute/skip decision.
    pub execution_threshold: f64,
}

impl FillProbabilityEngine {
    /// Create an engine with the reference scorer.
    #[must_use]
    pub fn new(feed: Arc<dyn MarketDataFeed>) -> Self {
        Self {
            feed,
            scorer: Box::new(ReferenceScorer),
            execution_threshold: 0.7,
        }
    }

    /// Replace the scorer.
    #[must_use]
    pub fn with_scorer(mut self, scorer: Box<dyn ProbabilityScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Evaluate an order against the current snapshot.
    ///
    /// Returns `None` when no market data is available for the symbol.
    pub async fn evaluate(&self, order: &PlannedOrder) -> Option<Evaluation> {
        let snapshot = match self.feed.get_current_price(&order.symbol).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!(symbol = %order.symbol, "No market data for evaluation");
                return None;
            }
            Err(e) => {
                warn!(symbol = %order.symbol, error = %e, "Feed error during evaluation");
                return None;
            }
        };

        let features = FeatureVector::extract(order, &snapshot);
        let fill_probability = self.scorer.score(order, &features).clamp(0.0, 1.0);

        debug!(
            symbol = %order.symbol,
            fill_probability,
            price = %snapshot.price,
            entry = ?order.entry_price,
            "Order evaluated"
        );

        Some(Evaluation {
            fill_probability,
            features,
            snapshot,
        })
    }

    /// Legacy single-layer decision: whether the order clears the
    /// execution threshold, plus the probability either way.
    pub async fn should_execute_order(&self, order: &PlannedOrder) -> (bool, f64) {
        match self.evaluate(order).await {
            Some(evaluation) => (
                evaluation.fill_probability >= self.execution_threshold,
                evaluation.fill_probability,
            ),
            None => (false, 0.0),
        }
    }

    /// Persist an evaluation (score row + attempt audit row).
    pub async fn persist_evaluation(
        &self,
        store: &TradingStore,
        planned_order_id: i64,
        evaluation: &Evaluation,
        account_number: Option<&str>,
    ) {
        let score = ProbabilityScore {
            planned_order_id,
            timestamp: Utc::now(),
            fill_probability: evaluation.fill_probability,
            features: evaluation.features.clone().into_map(),
        };
        if let Err(e) = store.record_probability_score(&score).await {
            warn!(planned_order_id, error = %e, "Failed to persist probability score");
        }
        if let Err(e) = store
            .record_attempt(
                planned_order_id,
                "EVALUATION",
                Some(evaluation.fill_probability),
                account_number,
            )
            .await
        {
            warn!(planned_order_id, error = %e, "Failed to persist order attempt");
        }
    }
}
