//! Market-hours arithmetic in US Eastern time.

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::America::New_York;
use chrono_tz::Tz;

/// Regular session open, Eastern time.
pub const MARKET_OPEN: NaiveTime = match NaiveTime::from_hms_opt(9, 30, 0) {
    Some(time) => time,
    None => panic!("valid constant"),
};

/// Regular session close, Eastern time.
pub const MARKET_CLOSE: NaiveTime = match NaiveTime::from_hms_opt(16, 0, 0) {
    Some(time) => time,
    None => panic!("valid constant"),
};

/// Which operational window the clock is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationalWindow {
    /// Configured minutes before the open.
    PreMarket,
    /// Regular session, before the closing buffer.
    MarketHours,
    /// Final minutes of the session in which positions get closed.
    ClosingWindow,
    /// Configured minutes after the close.
    PostMarket,
    /// Weekend or outside every window.
    Closed,
}

/// Tracks market hours and closing times.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketHours;

impl MarketHours {
    /// Create the service.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn to_eastern(now: DateTime<Utc>) -> DateTime<Tz> {
        now.with_timezone(&New_York)
    }

    /// Whether the regular session is open at `now`.
    #[must_use]
    pub fn is_market_open_at(&self, now: DateTime<Utc>) -> bool {
        let eastern = Self::to_eastern(now);
        let time = eastern.time();
        eastern.weekday().num_days_from_monday() < 5 && time >= MARKET_OPEN && time <= MARKET_CLOSE
    }

    /// Whether the regular session is open now.
    #[must_use]
    pub fn is_market_open(&self) -> bool {
        self.is_market_open_at(Utc::now())
    }

    /// Time until the close, `None` when the market is closed.
    #[must_use]
    pub fn time_until_close_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        if !self.is_market_open_at(now) {
            return None;
        }
        let eastern = Self::to_eastern(now);
        let close = New_York
            .from_local_datetime(&eastern.date_naive().and_time(MARKET_CLOSE))
            .single()?;
        Some(close.with_timezone(&Utc) - now)
    }

    /// Whether the closing buffer has started.
    #[must_use]
    pub fn should_close_positions_at(&self, now: DateTime<Utc>, buffer_minutes: i64) -> bool {
        self.time_until_close_at(now)
            .is_some_and(|remaining| remaining <= Duration::minutes(buffer_minutes))
    }

    /// Whether the closing buffer has started now.
    #[must_use]
    pub fn should_close_positions(&self, buffer_minutes: i64) -> bool {
        self.should_close_positions_at(Utc::now(), buffer_minutes)
    }

    /// Classify `now` into an operational window.
    #[must_use]
    pub fn window_at(
        &self,
        now: DateTime<Utc>,
        close_buffer_minutes: i64,
        pre_market_start_minutes: i64,
        post_market_end_minutes: i64,
    ) -> OperationalWindow {
        let eastern = Self::to_eastern(now);
        if eastern.weekday().num_days_from_monday() >= 5 {
            return OperationalWindow::Closed;
        }

        let time = eastern.time();
        let pre_market_start = MARKET_OPEN
            .overflowing_sub_signed(Duration::minutes(pre_market_start_minutes))
            .0;
        let post_market_end = MARKET_CLOSE
            .overflowing_add_signed(Duration::minutes(post_market_end_minutes))
            .0;

        if time >= pre_market_start && time < MARKET_OPEN {
            OperationalWindow::PreMarket
        } else if time >= MARKET_OPEN && time <= MARKET_CLOSE {
            if self.should_close_positions_at(now, close_buffer_minutes) {
                OperationalWindow::ClosingWindow
            } else {
                OperationalWindow::MarketHours
            }
        } else if time > MARKET_CLOSE && time <= post_market_end {
            OperationalWindow::PostMarket
        } else {
            OperationalWindow::Closed
        }
    }

    /// Human-readable market status.
    #[must_use]
    pub fn status_at(&self, now: DateTime<Utc>) -> String {
        match self.time_until_close_at(now) {
            Some(remaining) => format!("OPEN ({} minutes until close)", remaining.num_minutes()),
            None => "CLOSED".to_string(),
        }
    }
}
