//! Planned order types: enums, validation rules, and derived values.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum allowed risk per trade as a fraction of equity (2%).
pub const MAX_RISK_PER_TRADE: Decimal = Decimal::from_parts(2, 0, 0, false, 2);

/// Number of days a HYBRID order stays armed before it expires.
pub const HYBRID_EXPIRATION_DAYS: i64 = 10;

/// Supported security types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecurityType {
    /// Stock.
    Stk,
    /// Option.
    Opt,
    /// Future.
    Fut,
    /// Index.
    Ind,
    /// Future option.
    Fop,
    /// Forex pair.
    Cash,
    /// Combo.
    Bag,
    /// Warrant.
    War,
    /// Bond.
    Bond,
    /// Commodity.
    Cmdty,
    /// News.
    News,
    /// Mutual fund.
    Fund,
}

impl SecurityType {
    /// Parse a plan-sheet cell into a security type.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        match value.trim().to_uppercase().as_str() {
            "STK" => Ok(Self::Stk),
            "OPT" => Ok(Self::Opt),
            "FUT" => Ok(Self::Fut),
            "IND" => Ok(Self::Ind),
            "FOP" => Ok(Self::Fop),
            "CASH" => Ok(Self::Cash),
            "BAG" => Ok(Self::Bag),
            "WAR" => Ok(Self::War),
            "BOND" => Ok(Self::Bond),
            "CMDTY" => Ok(Self::Cmdty),
            "NEWS" => Ok(Self::News),
            "FUND" => Ok(Self::Fund),
            other => Err(ValidationError::UnknownEnumValue {
                field: "security_type",
                value: other.to_string(),
            }),
        }
    }

    /// Wire representation used by the broker and the database.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Stk => "STK",
            Self::Opt => "OPT",
            Self::Fut => "FUT",
            Self::Ind => "IND",
            Self::Fop => "FOP",
            Self::Cash => "CASH",
            Self::Bag => "BAG",
            Self::War => "WAR",
            Self::Bond => "BOND",
            Self::Cmdty => "CMDTY",
            Self::News => "NEWS",
            Self::Fund => "FUND",
        }
    }
}

/// Trade action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// Buy to open a long position.
    Buy,
    /// Sell to open or close.
    Sell,
    /// Short sell.
    ShortSell,
}

impl Action {
    /// Parse a plan-sheet cell into an action.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        match value.trim().to_uppercase().as_str() {
            "BUY" => Ok(Self::Buy),
            "SELL" => Ok(Self::Sell),
            "SSHORT" => Ok(Self::ShortSell),
            other => Err(ValidationError::UnknownEnumValue {
                field: "action",
                value: other.to_string(),
            }),
        }
    }

    /// Wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::ShortSell => "SSHORT",
        }
    }

    /// True for the long side of the book.
    #[must_use]
    pub const fn is_buy(&self) -> bool {
        matches!(self, Self::Buy)
    }
}

/// Supported order types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    /// Limit order.
    Limit,
    /// Market order.
    Market,
    /// Stop order.
    Stop,
    /// Stop-limit order.
    StopLimit,
    /// Trailing stop order.
    Trailing,
}

impl OrderType {
    /// Parse a plan-sheet cell into an order type.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        match value.trim().to_uppercase().as_str() {
            "LMT" => Ok(Self::Limit),
            "MKT" => Ok(Self::Market),
            "STP" => Ok(Self::Stop),
            "STP LMT" | "STP_LMT" => Ok(Self::StopLimit),
            "TRAIL" => Ok(Self::Trailing),
            other => Err(ValidationError::UnknownEnumValue {
                field: "order_type",
                value: other.to_string(),
            }),
        }
    }

    /// Wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Limit => "LMT",
            Self::Market => "MKT",
            Self::Stop => "STP",
            Self::StopLimit => "STP LMT",
            Self::Trailing => "TRAIL",
        }
    }
}

/// Holding-horizon strategy for a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStrategy {
    /// Close before market close.
    Day,
    /// Good till cancel.
    Core,
    /// Armed for ten days, then expires.
    Hybrid,
}

impl PositionStrategy {
    /// Parse a plan-sheet cell into a strategy. Matching is case-insensitive
    /// and tolerates trailing annotations ("HYBRID (swing)").
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        let normalized = value.trim().to_uppercase();
        for (name, strategy) in [
            ("DAY", Self::Day),
            ("CORE", Self::Core),
            ("HYBRID", Self::Hybrid),
        ] {
            if normalized == name || normalized.starts_with(name) {
                return Ok(strategy);
            }
        }
        Err(ValidationError::UnknownEnumValue {
            field: "position_strategy",
            value: value.to_string(),
        })
    }

    /// Wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "DAY",
            Self::Core => "CORE",
            Self::Hybrid => "HYBRID",
        }
    }

    /// Days until an order of this strategy expires. `None` means never.
    #[must_use]
    pub const fn expiration_days(&self) -> Option<i64> {
        match self {
            Self::Day => Some(0),
            Self::Hybrid => Some(HYBRID_EXPIRATION_DAYS),
            Self::Core => None,
        }
    }

    /// Whether positions under this strategy must be closed at market close.
    #[must_use]
    pub const fn requires_market_close_action(&self) -> bool {
        matches!(self, Self::Day | Self::Hybrid)
    }
}

/// Lifecycle state of a planned order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    /// Loaded, not yet submitted.
    Pending,
    /// Chosen for submission; bracket being placed.
    Executing,
    /// Accepted by the broker.
    Live,
    /// Working at the broker (partially triggered bracket).
    LiveWorking,
    /// Entry filled.
    Filled,
    /// Cancelled (by us or the broker).
    Cancelled,
    /// Expired by strategy policy.
    Expired,
    /// Rejected before reaching the broker book.
    Rejected,
    /// Position liquidated by the engine.
    Liquidated,
    /// Position liquidated outside the engine.
    LiquidatedExternally,
}

impl OrderState {
    /// States that can never be left.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Expired | Self::Liquidated | Self::LiquidatedExternally
        )
    }

    /// States considered working for slot accounting and reconciliation.
    #[must_use]
    pub const fn is_working(&self) -> bool {
        matches!(self, Self::Pending | Self::Live | Self::LiveWorking)
    }

    /// Wire representation stored in the database.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Executing => "EXECUTING",
            Self::Live => "LIVE",
            Self::LiveWorking => "LIVE_WORKING",
            Self::Filled => "FILLED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
            Self::Rejected => "REJECTED",
            Self::Liquidated => "LIQUIDATED",
            Self::LiquidatedExternally => "LIQUIDATED_EXTERNALLY",
        }
    }

    /// Parse the database representation.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        match value {
            "PENDING" => Ok(Self::Pending),
            "EXECUTING" => Ok(Self::Executing),
            "LIVE" => Ok(Self::Live),
            "LIVE_WORKING" => Ok(Self::LiveWorking),
            "FILLED" => Ok(Self::Filled),
            "CANCELLED" => Ok(Self::Cancelled),
            "EXPIRED" => Ok(Self::Expired),
            "REJECTED" => Ok(Self::Rejected),
            "LIQUIDATED" => Ok(Self::Liquidated),
            "LIQUIDATED_EXTERNALLY" => Ok(Self::LiquidatedExternally),
            other => Err(ValidationError::UnknownEnumValue {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation failures for planned orders.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Enum cell did not match any known value.
    #[error("Unknown {field} value: '{value}'")]
    UnknownEnumValue {
        /// Field name.
        field: &'static str,
        /// Offending cell content.
        value: String,
    },

    /// Risk per trade outside (0, 2%].
    #[error("Risk per trade must be in (0, {MAX_RISK_PER_TRADE}], got {0}")]
    RiskPerTradeOutOfRange(Decimal),

    /// Priority outside 1..=5.
    #[error("Priority must be between 1 and 5, got {0}")]
    PriorityOutOfRange(u8),

    /// Risk/reward ratio below 1.0.
    #[error("Risk reward ratio must be at least 1.0, got {0}")]
    RiskRewardTooLow(Decimal),

    /// Stop loss on the wrong side of the entry for a protective order.
    #[error("Stop loss must be on the protective side of the entry price")]
    StopOnWrongSide,

    /// Entry price equals the stop loss.
    #[error("Entry price and stop loss cannot be equal")]
    ZeroRiskDistance,

    /// Required price missing.
    #[error("Missing {0} price")]
    MissingPrice(&'static str),

    /// Free-text field exceeds its column limit.
    #[error("{field} exceeds {limit} characters")]
    FieldTooLong {
        /// Field name.
        field: &'static str,
        /// Maximum length.
        limit: usize,
    },
}

/// Natural duplicate key of a planned order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderKey {
    /// Instrument symbol.
    pub symbol: String,
    /// Trade action.
    pub action: Action,
    /// Entry price, normalized.
    pub entry_price: Decimal,
    /// Stop loss, normalized.
    pub stop_loss: Decimal,
}

impl std::fmt::Display for OrderKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}|{}|{}|{}",
            self.symbol,
            self.action.as_str(),
            self.entry_price,
            self.stop_loss
        )
    }
}

/// A trading order planned from the plan sheet and prepared for execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedOrder {
    /// Security type.
    pub security_type: SecurityType,
    /// Exchange to route to.
    pub exchange: String,
    /// Quote currency.
    pub currency: String,
    /// Trade action.
    pub action: Action,
    /// Instrument symbol.
    pub symbol: String,
    /// Order type for the entry leg.
    pub order_type: OrderType,
    /// Fraction of equity risked on this trade.
    pub risk_per_trade: Decimal,
    /// Entry price.
    pub entry_price: Option<Decimal>,
    /// Protective stop price.
    pub stop_loss: Option<Decimal>,
    /// Reward-to-risk multiple for the profit target.
    pub risk_reward_ratio: Decimal,
    /// Holding-horizon strategy.
    pub position_strategy: PositionStrategy,
    /// Manual priority, 1 (highest) to 5 (lowest).
    pub priority: u8,
    /// Named trading setup, if any.
    pub trading_setup: Option<String>,
    /// Core trading timeframe, if any.
    pub core_timeframe: Option<String>,
    /// Overall trend annotation from the plan.
    pub overall_trend: Option<String>,
    /// Free-form analysis note from the plan.
    pub brief_analysis: Option<String>,
    /// Expiration derived from the strategy, if any.
    pub expiration_date: Option<DateTime<Utc>>,
}

impl PlannedOrder {
    /// Enforce the business rules on order parameters.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.risk_per_trade <= Decimal::ZERO || self.risk_per_trade > MAX_RISK_PER_TRADE {
            return Err(ValidationError::RiskPerTradeOutOfRange(self.risk_per_trade));
        }
        if !(1..=5).contains(&self.priority) {
            return Err(ValidationError::PriorityOutOfRange(self.priority));
        }
        if self.risk_reward_ratio < Decimal::ONE {
            return Err(ValidationError::RiskRewardTooLow(self.risk_reward_ratio));
        }
        if let Some(setup) = &self.trading_setup
            && setup.len() > 100
        {
            return Err(ValidationError::FieldTooLong {
                field: "trading_setup",
                limit: 100,
            });
        }
        if let Some(timeframe) = &self.core_timeframe
            && timeframe.len() > 50
        {
            return Err(ValidationError::FieldTooLong {
                field: "core_timeframe",
                limit: 50,
            });
        }
        if let (Some(entry), Some(stop)) = (self.entry_price, self.stop_loss) {
            if entry == stop {
                return Err(ValidationError::ZeroRiskDistance);
            }
            let wrong_side = match self.action {
                Action::Buy => stop > entry,
                Action::Sell | Action::ShortSell => stop < entry,
            };
            if wrong_side {
                return Err(ValidationError::StopOnWrongSide);
            }
        }
        Ok(())
    }

    /// Natural duplicate key: (symbol, action, entry, stop).
    pub fn key(&self) -> Result<OrderKey, ValidationError> {
        let entry = self
            .entry_price
            .ok_or(ValidationError::MissingPrice("entry"))?;
        let stop = self
            .stop_loss
            .ok_or(ValidationError::MissingPrice("stop loss"))?;
        Ok(OrderKey {
            symbol: self.symbol.clone(),
            action: self.action,
            entry_price: entry.normalize(),
            stop_loss: stop.normalize(),
        })
    }

    /// Profit target derived from the stop distance and the reward multiple.
    pub fn profit_target(&self) -> Result<Decimal, ValidationError> {
        let entry = self
            .entry_price
            .ok_or(ValidationError::MissingPrice("entry"))?;
        let stop = self
            .stop_loss
            .ok_or(ValidationError::MissingPrice("stop loss"))?;
        let risk = (entry - stop).abs();
        let reward = risk * self.risk_reward_ratio;
        Ok(match self.action {
            Action::Buy => entry + reward,
            Action::Sell | Action::ShortSell => entry - reward,
        })
    }

    /// Expiration for an order created at `created_at` under this strategy.
    ///
    /// DAY expires at the end of the creation day; HYBRID ten days out;
    /// CORE never.
    #[must_use]
    pub fn expiration_after(&self, created_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.position_strategy
            .expiration_days()
            .map(|days| match self.position_strategy {
                PositionStrategy::Day => created_at
                    .date_naive()
                    .and_hms_opt(23, 59, 59)
                    .map_or(created_at, |end| end.and_utc()),
                _ => created_at + Duration::days(days),
            })
    }

    /// Time-in-force for the broker: DAY strategy submits DAY orders,
    /// everything else good-till-cancel.
    #[must_use]
    pub const fn time_in_force(&self) -> &'static str {
        match self.position_strategy {
            PositionStrategy::Day => "DAY",
            _ => "GTC",
        }
    }
}
