//! Incremental controller: decides between a full rebuild and an append,
//! runs the chosen path batch by batch and advances the watermark.
//!
//! The watermark is read once at the start of a run and written once, after
//! every derived-table write for the run has succeeded. A failed run leaves
//! it untouched, so re-running retries the same window. Writes that replace
//! rows wholesale are bracketed by the rebuild-pending marker, so a run that
//! fails part way through them is retried as a full rebuild.

pub mod derive;
pub mod plan;

pub use derive::{full_rebuild, incremental_append, DerivedTables, PerTimeframe};
pub use plan::{plan_run, should_full_rebuild, RebuildReason, RunPlan};

use crate::domain::bar::{AdjustedBar, Bar};
use crate::domain::config::PipelineConfig;
use crate::domain::error::StagewiseError;
use crate::domain::split::SplitTable;
use crate::domain::timeframe::Timeframe;
use crate::ports::data_port::{BarSource, SplitSource};
use crate::ports::store_port::{DerivedStore, WatermarkStore, WriteMode};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    FullRebuild,
    Incremental,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::FullRebuild => write!(f, "full rebuild"),
            RunMode::Incremental => write!(f, "incremental"),
        }
    }
}

/// Rows written per derived table during one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowCounts {
    pub adjusted: PerTimeframe<usize>,
    pub indicators: PerTimeframe<usize>,
    pub stages: usize,
}

impl RowCounts {
    fn add(&mut self, tables: &DerivedTables) {
        for tf in Timeframe::ALL {
            *self.adjusted.get_mut(tf) += tables.adjusted.get(tf).len();
            *self.indicators.get_mut(tf) += tables.indicators.get(tf).len();
        }
        self.stages += tables.stages.len();
    }

    pub fn total(&self) -> usize {
        Timeframe::ALL
            .iter()
            .map(|tf| self.adjusted.get(*tf) + self.indicators.get(*tf))
            .sum::<usize>()
            + self.stages
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub mode: RunMode,
    /// Set for full rebuilds.
    pub reason: Option<RebuildReason>,
    pub previous_watermark: Option<NaiveDate>,
    /// The advanced watermark; `None` when the run had nothing to do.
    pub watermark: Option<NaiveDate>,
    pub tickers: usize,
    pub rows: RowCounts,
}

impl RunSummary {
    pub fn is_noop(&self) -> bool {
        self.watermark.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub watermark: Option<NaiveDate>,
    pub adjusted_rows: PerTimeframe<usize>,
    pub split_events: usize,
    pub next_run: RunPlan,
}

struct PathOutcome {
    tickers: usize,
    rows: RowCounts,
    max_date: Option<NaiveDate>,
    marked_pending: bool,
}

impl PathOutcome {
    fn empty() -> Self {
        Self {
            tickers: 0,
            rows: RowCounts::default(),
            max_date: None,
            marked_pending: false,
        }
    }

    fn record(&mut self, tables: &DerivedTables) {
        self.rows.add(tables);
        self.max_date = self.max_date.max(tables.max_date());
    }
}

pub struct IncrementalController<'a> {
    bars: &'a dyn BarSource,
    splits: &'a dyn SplitSource,
    store: &'a dyn DerivedStore,
    watermarks: &'a dyn WatermarkStore,
    config: PipelineConfig,
}

impl<'a> IncrementalController<'a> {
    pub fn new(
        bars: &'a dyn BarSource,
        splits: &'a dyn SplitSource,
        store: &'a dyn DerivedStore,
        watermarks: &'a dyn WatermarkStore,
        config: PipelineConfig,
    ) -> Self {
        Self {
            bars,
            splits,
            store,
            watermarks,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn status(&self) -> Result<StatusReport, StagewiseError> {
        let watermark = self.watermarks.read_watermark()?;
        let pending = self.watermarks.read_rebuild_pending()?;
        let events = self.splits.fetch_splits()?;

        let mut adjusted_rows = PerTimeframe::default();
        for tf in Timeframe::ALL {
            *adjusted_rows.get_mut(tf) = self.store.adjusted_row_count(tf)?;
        }

        Ok(StatusReport {
            watermark,
            next_run: plan_run(watermark, adjusted_rows.daily, pending, &events),
            adjusted_rows,
            split_events: events.len(),
        })
    }

    pub fn run(&self) -> Result<RunSummary, StagewiseError> {
        let previous_watermark = self.watermarks.read_watermark()?;
        let pending = self.watermarks.read_rebuild_pending()?;
        let events = self.splits.fetch_splits()?;
        let splits = SplitTable::new(&events)?;
        let adjusted_rows = self.store.adjusted_row_count(Timeframe::Daily)?;

        let plan = plan_run(previous_watermark, adjusted_rows, pending, &events);
        let (mode, reason, outcome) = match plan {
            RunPlan::FullRebuild(reason) => {
                match &reason {
                    RebuildReason::NewSplits { .. } | RebuildReason::InterruptedRebuild => {
                        warn!(%reason, "full rebuild required")
                    }
                    _ => info!(%reason, "full rebuild"),
                }
                let outcome = self.rebuild(&splits)?;
                (RunMode::FullRebuild, Some(reason), outcome)
            }
            RunPlan::Incremental { watermark } => {
                info!(%watermark, "incremental append");
                let outcome = self.append(watermark, &splits)?;
                (RunMode::Incremental, None, outcome)
            }
        };

        if let Some(date) = outcome.max_date {
            self.watermarks.write_watermark(date)?;
            if outcome.marked_pending {
                self.watermarks.write_rebuild_pending(false)?;
            }
            info!(
                %mode,
                tickers = outcome.tickers,
                rows = outcome.rows.total(),
                watermark = %date,
                "run complete"
            );
        }

        Ok(RunSummary {
            mode,
            reason,
            previous_watermark,
            watermark: outcome.max_date,
            tickers: outcome.tickers,
            rows: outcome.rows,
        })
    }

    fn rebuild(&self, splits: &SplitTable) -> Result<PathOutcome, StagewiseError> {
        let tickers = self.bars.list_tickers()?;
        let batches = tickers.len().div_ceil(self.config.batch_size);
        let mut outcome = PathOutcome::empty();
        let mut mode = WriteMode::Overwrite;

        for (i, batch) in tickers.chunks(self.config.batch_size).enumerate() {
            let bars = self.bars.fetch_bars(Some(batch), None)?;
            if bars.is_empty() {
                debug!(batch = i + 1, "batch has no bars");
                continue;
            }

            let tables = full_rebuild(&bars, splits, &self.config)?;
            if !outcome.marked_pending {
                self.watermarks.write_rebuild_pending(true)?;
                outcome.marked_pending = true;
            }
            self.write(&tables, mode)?;
            mode = WriteMode::Append;

            outcome.tickers += batch.len();
            outcome.record(&tables);
            info!(batch = i + 1, batches, rows = tables.row_count(), "batch rebuilt");
        }

        if outcome.max_date.is_none() {
            info!("no bars to process; watermark not set");
        }
        Ok(outcome)
    }

    fn append(&self, watermark: NaiveDate, splits: &SplitTable) -> Result<PathOutcome, StagewiseError> {
        let new_bars = self.bars.fetch_bars(None, Some(watermark))?;
        if new_bars.is_empty() {
            info!(%watermark, "no new bars; nothing to do");
            return Ok(PathOutcome::empty());
        }

        let mut by_ticker: BTreeMap<String, Vec<Bar>> = BTreeMap::new();
        for bar in new_bars {
            by_ticker.entry(bar.ticker.clone()).or_default().push(bar);
        }
        let tickers: Vec<String> = by_ticker.keys().cloned().collect();
        let batches = tickers.len().div_ceil(self.config.batch_size);
        let mut outcome = PathOutcome::empty();

        for (i, batch) in tickers.chunks(self.config.batch_size).enumerate() {
            let mut batch_bars: Vec<Bar> = batch
                .iter()
                .flat_map(|t| by_ticker.remove(t).unwrap_or_default())
                .collect();
            let mut history = self.store.read_adjusted(Timeframe::Daily, batch)?;

            let backfill = self.unprocessed_history(batch, &history, watermark)?;
            if !backfill.is_empty() {
                let rebuilt: BTreeSet<String> = backfill.iter().map(|b| b.ticker.clone()).collect();
                warn!(tickers = ?rebuilt, "rebuilding tickers with unprocessed history");

                let tables = full_rebuild(&backfill, splits, &self.config)?;
                if !outcome.marked_pending {
                    self.watermarks.write_rebuild_pending(true)?;
                    outcome.marked_pending = true;
                }
                self.write(&tables, WriteMode::Append)?;
                outcome.record(&tables);

                batch_bars.retain(|b| !rebuilt.contains(&b.ticker));
                history.retain(|b| !rebuilt.contains(&b.ticker));
            }

            if !batch_bars.is_empty() {
                debug!(batch = i + 1, history = history.len(), new = batch_bars.len(), "appending");
                let tables = incremental_append(&batch_bars, history, splits, watermark, &self.config)?;
                self.write(&tables, WriteMode::Append)?;
                outcome.record(&tables);
            }

            outcome.tickers += batch.len();
            info!(batch = i + 1, batches, rows = outcome.rows.total(), "batch appended");
        }

        Ok(outcome)
    }

    /// Raw bars of the tickers in `batch` whose stored daily history is
    /// shorter than the history buffer while the source holds more bars
    /// dated on or before `watermark`. Such tickers were listed with back
    /// history after the last run and need every row derived, not just the
    /// increment.
    fn unprocessed_history(
        &self,
        batch: &[String],
        history: &[AdjustedBar],
        watermark: NaiveDate,
    ) -> Result<Vec<Bar>, StagewiseError> {
        let mut stored: HashMap<&str, usize> = HashMap::new();
        for bar in history.iter().filter(|b| b.date <= watermark) {
            *stored.entry(bar.ticker.as_str()).or_default() += 1;
        }
        let stored_count = |ticker: &str| stored.get(ticker).copied().unwrap_or(0);

        let short: Vec<String> = batch
            .iter()
            .filter(|t| stored_count(t.as_str()) < self.config.history_buffer)
            .cloned()
            .collect();
        if short.is_empty() {
            return Ok(Vec::new());
        }

        let raw = self.bars.fetch_bars(Some(short.as_slice()), None)?;
        let mut source: HashMap<&str, usize> = HashMap::new();
        for bar in raw.iter().filter(|b| b.date <= watermark) {
            *source.entry(bar.ticker.as_str()).or_default() += 1;
        }
        let missing: BTreeSet<String> = short
            .into_iter()
            .filter(|t| source.get(t.as_str()).copied().unwrap_or(0) > stored_count(t.as_str()))
            .collect();

        Ok(raw.into_iter().filter(|b| missing.contains(&b.ticker)).collect())
    }

    fn write(&self, tables: &DerivedTables, mode: WriteMode) -> Result<(), StagewiseError> {
        for tf in Timeframe::ALL {
            self.store.write_adjusted(tf, tables.adjusted.get(tf), mode)?;
            self.store.write_indicators(tf, tables.indicators.get(tf), mode)?;
        }
        self.store.write_stages(&tables.stages, mode)
    }
}
