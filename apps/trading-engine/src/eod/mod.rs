//! End-of-day policy: timed closure of DAY and expired-HYBRID positions,
//! and expiry of the planned orders behind them.

mod market_hours;
mod service;

pub use market_hours::{MARKET_CLOSE, MARKET_OPEN, MarketHours, OperationalWindow};
pub use service::{EndOfDayService, EodReport, EodStatus};
