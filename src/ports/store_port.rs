//! Derived-table storage and the run watermark.

use crate::domain::bar::AdjustedBar;
use crate::domain::error::StagewiseError;
use crate::domain::indicator::IndicatorRow;
use crate::domain::stage::StageRecord;
use crate::domain::timeframe::Timeframe;
use chrono::NaiveDate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Replace the whole table with the given rows.
    Overwrite,
    /// Insert the given rows, replacing any existing row with the same
    /// (ticker, date) key.
    Append,
}

/// Tables owned by the pipeline, all keyed by (ticker, date) per timeframe.
pub trait DerivedStore {
    fn adjusted_row_count(&self, timeframe: Timeframe) -> Result<usize, StagewiseError>;

    /// Stored adjusted rows for `tickers`, sorted by (ticker, date).
    fn read_adjusted(
        &self,
        timeframe: Timeframe,
        tickers: &[String],
    ) -> Result<Vec<AdjustedBar>, StagewiseError>;

    fn write_adjusted(
        &self,
        timeframe: Timeframe,
        rows: &[AdjustedBar],
        mode: WriteMode,
    ) -> Result<(), StagewiseError>;

    fn write_indicators(
        &self,
        timeframe: Timeframe,
        rows: &[IndicatorRow],
        mode: WriteMode,
    ) -> Result<(), StagewiseError>;

    /// Weekly stage records.
    fn write_stages(&self, rows: &[StageRecord], mode: WriteMode) -> Result<(), StagewiseError>;
}

/// Run state: the last-processed-date scalar and the rebuild-pending marker,
/// last writer wins.
pub trait WatermarkStore {
    fn read_watermark(&self) -> Result<Option<NaiveDate>, StagewiseError>;
    fn write_watermark(&self, date: NaiveDate) -> Result<(), StagewiseError>;

    /// Set before a run first replaces derived rows wholesale, cleared after
    /// it has advanced the watermark. A set marker means the last such run
    /// did not finish. Absent state reads as `false`.
    fn read_rebuild_pending(&self) -> Result<bool, StagewiseError>;
    fn write_rebuild_pending(&self, pending: bool) -> Result<(), StagewiseError>;
}
