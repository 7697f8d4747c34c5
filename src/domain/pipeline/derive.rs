//! The two derivation paths, as pure functions over in-memory rows.
//!
//! Both share the same primitives: split adjustment, aggregation, indicators
//! and stage classification. Neither touches storage.

use crate::domain::aggregate::aggregate;
use crate::domain::bar::{AdjustedBar, Bar};
use crate::domain::config::PipelineConfig;
use crate::domain::error::StagewiseError;
use crate::domain::indicator::{compute_indicators, IndicatorRow};
use crate::domain::series::{partition_by_ticker, TickerSeries};
use crate::domain::split::{apply_splits, SplitTable};
use crate::domain::stage::{compute_stage_records, StageRecord};
use crate::domain::timeframe::Timeframe;
use chrono::NaiveDate;
use rayon::prelude::*;
use std::collections::HashMap;

/// One value per timeframe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerTimeframe<T> {
    pub daily: T,
    pub weekly: T,
    pub monthly: T,
}

impl<T> PerTimeframe<T> {
    pub fn get(&self, timeframe: Timeframe) -> &T {
        match timeframe {
            Timeframe::Daily => &self.daily,
            Timeframe::Weekly => &self.weekly,
            Timeframe::Monthly => &self.monthly,
        }
    }

    pub fn get_mut(&mut self, timeframe: Timeframe) -> &mut T {
        match timeframe {
            Timeframe::Daily => &mut self.daily,
            Timeframe::Weekly => &mut self.weekly,
            Timeframe::Monthly => &mut self.monthly,
        }
    }
}

/// Rows destined for the derived tables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivedTables {
    pub adjusted: PerTimeframe<Vec<AdjustedBar>>,
    pub indicators: PerTimeframe<Vec<IndicatorRow>>,
    pub stages: Vec<StageRecord>,
}

impl DerivedTables {
    fn extend(&mut self, other: DerivedTables) {
        for tf in Timeframe::ALL {
            self.adjusted.get_mut(tf).extend(other.adjusted.get(tf).iter().cloned());
            self.indicators.get_mut(tf).extend(other.indicators.get(tf).iter().cloned());
        }
        self.stages.extend(other.stages);
    }

    /// Latest daily date present, the candidate watermark.
    pub fn max_date(&self) -> Option<NaiveDate> {
        self.adjusted.daily.iter().map(|b| b.date).max()
    }

    pub fn row_count(&self) -> usize {
        Timeframe::ALL
            .iter()
            .map(|tf| self.adjusted.get(*tf).len() + self.indicators.get(*tf).len())
            .sum::<usize>()
            + self.stages.len()
    }
}

/// Derives every table from one ticker's complete adjusted daily history.
fn derive_ticker(daily: TickerSeries, config: &PipelineConfig) -> Result<DerivedTables, StagewiseError> {
    let mut out = derive_periods(&daily, config)?;
    out.indicators.daily = compute_indicators(&daily, Timeframe::Daily, &config.indicators);
    out.adjusted.daily = daily.bars;
    Ok(out)
}

/// Weekly and monthly rows with their indicators, and the stage records.
fn derive_periods(daily: &TickerSeries, config: &PipelineConfig) -> Result<DerivedTables, StagewiseError> {
    let mut out = DerivedTables::default();
    for tf in [Timeframe::Weekly, Timeframe::Monthly] {
        let series = aggregate(daily, tf)?;
        *out.indicators.get_mut(tf) = compute_indicators(&series, tf, &config.indicators);
        if tf == Timeframe::Weekly {
            out.stages = compute_stage_records(&series, &config.stage);
        }
        *out.adjusted.get_mut(tf) = series.bars;
    }
    Ok(out)
}

fn map_tickers<T, F>(units: Vec<T>, parallel: bool, f: F) -> Result<DerivedTables, StagewiseError>
where
    T: Send,
    F: Fn(T) -> Result<DerivedTables, StagewiseError> + Sync + Send,
{
    let per_ticker: Vec<DerivedTables> = if parallel {
        units.into_par_iter().map(f).collect::<Result<Vec<_>, _>>()?
    } else {
        units.into_iter().map(f).collect::<Result<Vec<_>, _>>()?
    };

    let mut merged = DerivedTables::default();
    for tables in per_ticker {
        merged.extend(tables);
    }
    Ok(merged)
}

/// Full rebuild: every table is derived from the complete raw history of
/// the tickers present in `bars`.
pub fn full_rebuild(
    bars: &[Bar],
    splits: &SplitTable,
    config: &PipelineConfig,
) -> Result<DerivedTables, StagewiseError> {
    let series = partition_by_ticker(apply_splits(bars, splits))?;
    map_tickers(series, config.parallel, |daily| derive_ticker(daily, config))
}

/// Incremental append for the tickers present in `new_bars`.
///
/// `history` is the stored adjusted daily history of those tickers. Rows
/// after `watermark` in it are leftovers of an interrupted run and are
/// replaced by `new_bars`. Daily output holds only rows after `watermark`;
/// daily indicators are computed over the trailing `history_buffer` rows
/// plus the new rows. Weekly and monthly rows, their indicators and the
/// stage records are recomputed over the ticker's whole history.
pub fn incremental_append(
    new_bars: &[Bar],
    history: Vec<AdjustedBar>,
    splits: &SplitTable,
    watermark: NaiveDate,
    config: &PipelineConfig,
) -> Result<DerivedTables, StagewiseError> {
    let new_series = partition_by_ticker(apply_splits(new_bars, splits))?;

    let mut history_by_ticker: HashMap<String, Vec<AdjustedBar>> = HashMap::new();
    let retained = history.into_iter().filter(|b| b.date <= watermark).collect();
    for series in partition_by_ticker(retained)? {
        history_by_ticker.insert(series.ticker, series.bars);
    }

    let units: Vec<(Vec<AdjustedBar>, TickerSeries)> = new_series
        .into_iter()
        .map(|new| (history_by_ticker.remove(&new.ticker).unwrap_or_default(), new))
        .collect();

    map_tickers(units, config.parallel, |(history, new)| {
        append_ticker(history, new, watermark, config)
    })
}

fn append_ticker(
    history: Vec<AdjustedBar>,
    new: TickerSeries,
    watermark: NaiveDate,
    config: &PipelineConfig,
) -> Result<DerivedTables, StagewiseError> {
    let buffer_start = history.len().saturating_sub(config.history_buffer);

    let mut bars = history;
    bars.extend(new.bars);
    let mut daily = TickerSeries::new(new.ticker, bars)?;

    let mut out = derive_periods(&daily, config)?;

    // every new row lies past buffer_start
    let window = TickerSeries {
        ticker: daily.ticker.clone(),
        bars: daily.bars.split_off(buffer_start),
    };
    out.indicators.daily = compute_indicators(&window, Timeframe::Daily, &config.indicators)
        .into_iter()
        .filter(|row| row.date > watermark)
        .collect();
    out.adjusted.daily = window.bars.into_iter().filter(|b| b.date > watermark).collect();

    Ok(out)
}
