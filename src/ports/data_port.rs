//! Read-only upstream inputs: raw bars and split events.

use crate::domain::bar::{Bar, SplitEvent};
use crate::domain::error::StagewiseError;
use chrono::NaiveDate;

/// Raw bars keyed by (ticker, date).
pub trait BarSource {
    /// Every ticker with at least one bar.
    fn list_tickers(&self) -> Result<Vec<String>, StagewiseError>;

    /// Bars for `tickers` (all tickers when `None`) with `date > after`
    /// (all dates when `None`). Row order is unspecified.
    fn fetch_bars(
        &self,
        tickers: Option<&[String]>,
        after: Option<NaiveDate>,
    ) -> Result<Vec<Bar>, StagewiseError>;
}

/// The complete, current list of split events. Replaced wholesale upstream.
pub trait SplitSource {
    fn fetch_splits(&self) -> Result<Vec<SplitEvent>, StagewiseError>;
}
