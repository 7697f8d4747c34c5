//! Bar and split-event representations.

use chrono::NaiveDate;

/// A raw OHLCV record as delivered upstream. One row per ticker per period.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub ticker: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub transactions: i64,
}

/// A bar after split adjustment. For weekly and monthly timeframes `date`
/// is the first day of the period bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct AdjustedBar {
    pub ticker: String,
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub transactions: i64,
}

impl AdjustedBar {
    /// max(high - low, |high - prev_close|, |low - prev_close|)
    pub fn true_range(&self, prev_close: f64) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }
}

/// A share split: prices before `execution_date` are scaled by
/// `split_from / split_to`.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitEvent {
    pub ticker: String,
    pub execution_date: NaiveDate,
    pub split_from: f64,
    pub split_to: f64,
}

impl SplitEvent {
    pub fn ratio(&self) -> f64 {
        self.split_from / self.split_to
    }
}
