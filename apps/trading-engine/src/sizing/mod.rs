//! Risk-based position sizing.
//!
//! A pure function of (security type, entry, stop, equity, risk fraction).
//! Rounding and minimums vary by security type: forex trades in 10,000-unit
//! lots, options risk 100 shares per contract, everything else rounds to
//! whole units with a minimum of one.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{PlannedOrder, SecurityType};

/// Minimum forex position in units.
const MIN_CASH_UNITS: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

/// Shares represented by one option contract.
const OPTION_MULTIPLIER: Decimal = Decimal::from_parts(100, 0, 0, false, 0);

/// Sizing failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SizingError {
    /// Entry or stop price missing.
    #[error("Entry price and stop loss are required for quantity calculation")]
    MissingPrices,

    /// Entry equals stop, so per-unit risk is zero.
    #[error("Entry price and stop loss cannot be the same")]
    ZeroRiskPerUnit,
}

/// Position sizing service.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionSizingService;

impl PositionSizingService {
    /// Create the service.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Quantity for a planned order given total equity.
    pub fn calculate_order_quantity(
        &self,
        order: &PlannedOrder,
        equity: Decimal,
    ) -> Result<Decimal, SizingError> {
        let entry = order.entry_price.ok_or(SizingError::MissingPrices)?;
        let stop = order.stop_loss.ok_or(SizingError::MissingPrices)?;
        calculate_quantity(order.security_type, entry, stop, equity, order.risk_per_trade)
    }

    /// Notional committed by the entry leg.
    pub fn capital_commitment(
        &self,
        order: &PlannedOrder,
        equity: Decimal,
    ) -> Result<Decimal, SizingError> {
        let entry = order.entry_price.ok_or(SizingError::MissingPrices)?;
        let quantity = self.calculate_order_quantity(order, equity)?;
        Ok(entry * quantity)
    }
}

/// Core sizing logic.
pub fn calculate_quantity(
    security_type: SecurityType,
    entry_price: Decimal,
    stop_loss: Decimal,
    equity: Decimal,
    risk_per_trade: Decimal,
) -> Result<Decimal, SizingError> {
    let price_distance = (entry_price - stop_loss).abs();

    // Options risk the premium difference per contract of 100 shares.
    let risk_per_unit = match security_type {
        SecurityType::Opt => price_distance * OPTION_MULTIPLIER,
        _ => price_distance,
    };

    if risk_per_unit.is_zero() {
        return Err(SizingError::ZeroRiskPerUnit);
    }

    let risk_amount = equity * risk_per_trade;
    let base_quantity = risk_amount / risk_per_unit;

    let quantity = match security_type {
        SecurityType::Cash => {
            // Forex rounds to the nearest mini lot.
            let lots = (base_quantity / MIN_CASH_UNITS).round();
            (lots * MIN_CASH_UNITS).max(MIN_CASH_UNITS)
        }
        _ => base_quantity.round().max(Decimal::ONE),
    };

    Ok(quantity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    // 100k * 0.5% = 500 risk; risk/share = 5 -> 100 shares
    #[test_case(SecurityType::Stk, dec!(100) ; "stock rounds to whole shares")]
    #[test_case(SecurityType::Fut, dec!(100) ; "futures round to whole contracts")]
    #[test_case(SecurityType::Ind, dec!(100) ; "other types default to whole units")]
    fn test_whole_unit_sizing(security_type: SecurityType, expected: Decimal) {
        let qty = calculate_quantity(
            security_type,
            dec!(150),
            dec!(145),
            dec!(100000),
            dec!(0.005),
        )
        .unwrap();
        assert_eq!(qty, expected);
    }

    #[test]
    fn test_stock_minimum_one_share() {
        let qty = calculate_quantity(
            SecurityType::Stk,
            dec!(3000),
            dec!(2000),
            dec!(10000),
            dec!(0.001),
        )
        .unwrap();
        assert_eq!(qty, dec!(1));
    }

    #[test]
    fn test_cash_rounds_to_mini_lots() {
        // 100k * 1% = 1000 risk; risk/unit = 0.0050 -> 200,000 units
        let qty = calculate_quantity(
            SecurityType::Cash,
            dec!(1.1000),
            dec!(1.0950),
            dec!(100000),
            dec!(0.01),
        )
        .unwrap();
        assert_eq!(qty, dec!(200000));
        assert!(qty % dec!(10000) == Decimal::ZERO);
    }

    #[test]
    fn test_cash_minimum_lot() {
        let qty = calculate_quantity(
            SecurityType::Cash,
            dec!(1.1000),
            dec!(0.9000),
            dec!(1000),
            dec!(0.001),
        )
        .unwrap();
        assert_eq!(qty, dec!(10000));
    }

    #[test]
    fn test_option_contract_multiplier() {
        // 100k * 1% = 1000 risk; risk/contract = 2 * 100 = 200 -> 5 contracts
        let qty = calculate_quantity(
            SecurityType::Opt,
            dec!(5.00),
            dec!(3.00),
            dec!(100000),
            dec!(0.01),
        )
        .unwrap();
        assert_eq!(qty, dec!(5));
    }

    #[test]
    fn test_zero_risk_distance_rejected() {
        let result = calculate_quantity(
            SecurityType::Stk,
            dec!(150),
            dec!(150),
            dec!(100000),
            dec!(0.005),
        );
        assert_eq!(result, Err(SizingError::ZeroRiskPerUnit));
    }

    proptest! {
        // quantity * |entry - stop| never risks more than equity * risk + one
        // rounding unit of slack.
        #[test]
        fn prop_risk_bounded(
            entry_cents in 500i64..100_000,
            distance_cents in 1i64..5_000,
            equity_units in 10_000i64..1_000_000,
            risk_bps in 1i64..200,
        ) {
            let entry = Decimal::new(entry_cents, 2);
            let stop = Decimal::new(entry_cents - distance_cents, 2);
            let equity = Decimal::new(equity_units, 0);
            let risk = Decimal::new(risk_bps, 4);

            let qty = calculate_quantity(SecurityType::Stk, entry, stop, equity, risk).unwrap();
            let distance = (entry - stop).abs();
            let risked = qty * distance;
            // One share of rounding slack, except when the one-share
            // minimum itself exceeds the risk budget.
            let budget = equity * risk + distance;
            prop_assert!(qty >= Decimal::ONE);
            prop_assert!(risked <= budget.max(distance));
        }
    }
}
