use super::timeframe::Timeframe;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use std::collections::HashSet;

/// Exchange calendar seam. The loader validates every candle against this
/// trait so session rules and holidays never leak into other modules, and
/// tests can substitute an always-open calendar with a pinned clock.
pub trait TradingCalendar: Send + Sync {
    /// Session open for `date`, or `None` on a non-trading day.
    fn session_open(&self, date: NaiveDate) -> Option<DateTime<Utc>>;

    /// Session close for `date`, or `None` on a non-trading day.
    fn session_close(&self, date: NaiveDate) -> Option<DateTime<Utc>>;

    /// Local trading date an instant belongs to.
    fn trading_date(&self, ts: DateTime<Utc>) -> NaiveDate;

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// Whether a candle opening at `ts` lies inside a session.
    fn in_session(&self, ts: DateTime<Utc>) -> bool {
        let date = self.trading_date(ts);
        match (self.session_open(date), self.session_close(date)) {
            (Some(open), Some(close)) => ts >= open && ts < close,
            _ => false,
        }
    }

    /// Whether `ts` is a valid open instant for a `timeframe` candle.
    fn is_aligned(&self, timeframe: Timeframe, ts: DateTime<Utc>) -> bool {
        match self.session_open(self.trading_date(ts)) {
            Some(open) => timeframe.is_aligned(ts, open),
            None => false,
        }
    }

    /// Most recent session open at or before `ts`, skipping closed days.
    fn last_session_open(&self, ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut date = self.trading_date(ts);
        for _ in 0..30 {
            if let Some(open) = self.session_open(date)
                && open <= ts
            {
                return Some(open);
            }
            date = date.pred_opt()?;
        }
        None
    }
}

/// Indian equity session: Mon-Fri 09:15-15:30 IST plus an exchange holiday
/// list. IST has no daylight saving, so a fixed +05:30 offset is exact.
pub struct IstEquityCalendar {
    tz: FixedOffset,
    open: NaiveTime,
    close: NaiveTime,
    holidays: HashSet<NaiveDate>,
}

impl IstEquityCalendar {
    pub fn new(holidays: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            tz: FixedOffset::east_opt(5 * 3600 + 1800).expect("IST offset is valid"),
            open: NaiveTime::from_hms_opt(9, 15, 0).expect("09:15 is valid"),
            close: NaiveTime::from_hms_opt(15, 30, 0).expect("15:30 is valid"),
            holidays: holidays.into_iter().collect(),
        }
    }

    fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    fn local_instant(&self, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
        self.tz
            .from_local_datetime(&date.and_time(time))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

impl TradingCalendar for IstEquityCalendar {
    fn session_open(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        if !self.is_trading_day(date) {
            return None;
        }
        self.local_instant(date, self.open)
    }

    fn session_close(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        if !self.is_trading_day(date) {
            return None;
        }
        self.local_instant(date, self.close)
    }

    fn trading_date(&self, ts: DateTime<Utc>) -> NaiveDate {
        ts.with_timezone(&self.tz).date_naive()
    }
}
