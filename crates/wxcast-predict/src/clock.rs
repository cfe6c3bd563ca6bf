//! Time sources and the day-of-year convention.
//!
//! Day of year follows the proleptic Gregorian calendar: 1 January is 1 and
//! leap years run to 366. "Tomorrow" is taken from the local civil calendar
//! while archive windows are computed in UTC.

use chrono::{DateTime, Datelike, Local, NaiveDate, Utc};

/// Source of "now" for staleness checks and "today" for predictions.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Today's date in the local civil calendar.
    fn today_local(&self) -> NaiveDate;

    /// Today's date in UTC, used for archive windows.
    fn today_utc(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall clock of the running process
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today_local(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Clock pinned to a fixed instant and local date.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    pub now: DateTime<Utc>,
    pub today_local: NaiveDate,
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }

    fn today_local(&self) -> NaiveDate {
        self.today_local
    }
}

pub fn day_of_year(date: NaiveDate) -> u32 {
    date.ordinal()
}

/// Day of year of the day after `today`.
pub fn tomorrow_day_of_year(today: NaiveDate) -> u32 {
    today.succ_opt().unwrap_or(today).ordinal()
}
