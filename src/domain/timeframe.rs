//! Bar timeframes and their period buckets.

use chrono::{Datelike, Days, NaiveDate};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Timeframe {
    Daily,
    Weekly,
    Monthly,
}

impl Timeframe {
    pub const ALL: [Timeframe; 3] = [Timeframe::Daily, Timeframe::Weekly, Timeframe::Monthly];

    /// First day of the bucket containing `date`.
    ///
    /// Weeks start on Monday, months on the 1st. Daily bars are their own bucket.
    pub fn period_start(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Timeframe::Daily => date,
            Timeframe::Weekly => {
                let offset = u64::from(date.weekday().num_days_from_monday());
                date.checked_sub_days(Days::new(offset)).unwrap_or(date)
            }
            Timeframe::Monthly => date.with_day(1).unwrap_or(date),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Daily => "daily",
            Timeframe::Weekly => "weekly",
            Timeframe::Monthly => "monthly",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
