#![allow(dead_code)]

use chrono::{Datelike, Days, NaiveDate, Weekday};
use stagewise::domain::bar::{AdjustedBar, Bar, SplitEvent};
use stagewise::domain::config::PipelineConfig;
use stagewise::domain::error::StagewiseError;
use stagewise::domain::indicator::{IndicatorConfig, IndicatorRow};
use stagewise::domain::stage::{StageConfig, StageRecord};
use stagewise::domain::timeframe::Timeframe;
use stagewise::ports::data_port::{BarSource, SplitSource};
use stagewise::ports::store_port::{DerivedStore, WatermarkStore, WriteMode};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap};

type Key = (String, NaiveDate);

/// Every port backed by in-memory maps keyed by (ticker, date).
#[derive(Default)]
pub struct MemoryStore {
    raw: RefCell<Vec<Bar>>,
    splits: RefCell<Vec<SplitEvent>>,
    adjusted: RefCell<HashMap<Timeframe, BTreeMap<Key, AdjustedBar>>>,
    indicators: RefCell<HashMap<Timeframe, BTreeMap<Key, IndicatorRow>>>,
    stages: RefCell<BTreeMap<Key, StageRecord>>,
    watermark: RefCell<Option<NaiveDate>>,
    rebuild_pending: Cell<bool>,
    fail_stage_writes: Cell<bool>,
    pub bar_fetches: RefCell<Vec<(Option<Vec<String>>, Option<NaiveDate>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bars(self, bars: Vec<Bar>) -> Self {
        self.push_bars(bars);
        self
    }

    pub fn with_splits(self, splits: Vec<SplitEvent>) -> Self {
        self.set_splits(splits);
        self
    }

    pub fn push_bars(&self, bars: Vec<Bar>) {
        self.raw.borrow_mut().extend(bars);
    }

    pub fn set_splits(&self, splits: Vec<SplitEvent>) {
        *self.splits.borrow_mut() = splits;
    }

    pub fn fail_stage_writes(&self, fail: bool) {
        self.fail_stage_writes.set(fail);
    }

    pub fn watermark(&self) -> Option<NaiveDate> {
        *self.watermark.borrow()
    }

    pub fn rebuild_pending(&self) -> bool {
        self.rebuild_pending.get()
    }

    /// Drops every derived row, keeping the watermark.
    pub fn clear_derived(&self) {
        self.adjusted.borrow_mut().clear();
        self.indicators.borrow_mut().clear();
        self.stages.borrow_mut().clear();
    }

    pub fn adjusted(&self, timeframe: Timeframe) -> Vec<AdjustedBar> {
        self.adjusted
            .borrow()
            .get(&timeframe)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn indicators(&self, timeframe: Timeframe) -> Vec<IndicatorRow> {
        self.indicators
            .borrow()
            .get(&timeframe)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn stages(&self) -> Vec<StageRecord> {
        self.stages.borrow().values().cloned().collect()
    }

    pub fn stages_for(&self, ticker: &str) -> Vec<StageRecord> {
        self.stages().into_iter().filter(|s| s.ticker == ticker).collect()
    }
}

fn upsert<T: Clone>(
    table: &mut BTreeMap<Key, T>,
    rows: &[T],
    mode: WriteMode,
    key: impl Fn(&T) -> Key,
) {
    if mode == WriteMode::Overwrite {
        table.clear();
    }
    for row in rows {
        table.insert(key(row), row.clone());
    }
}

impl BarSource for MemoryStore {
    fn list_tickers(&self) -> Result<Vec<String>, StagewiseError> {
        let tickers: BTreeSet<String> = self.raw.borrow().iter().map(|b| b.ticker.clone()).collect();
        Ok(tickers.into_iter().collect())
    }

    fn fetch_bars(
        &self,
        tickers: Option<&[String]>,
        after: Option<NaiveDate>,
    ) -> Result<Vec<Bar>, StagewiseError> {
        self.bar_fetches
            .borrow_mut()
            .push((tickers.map(|t| t.to_vec()), after));
        Ok(self
            .raw
            .borrow()
            .iter()
            .filter(|b| tickers.is_none_or(|t| t.contains(&b.ticker)))
            .filter(|b| after.is_none_or(|a| b.date > a))
            .cloned()
            .collect())
    }
}

impl SplitSource for MemoryStore {
    fn fetch_splits(&self) -> Result<Vec<SplitEvent>, StagewiseError> {
        Ok(self.splits.borrow().clone())
    }
}

impl DerivedStore for MemoryStore {
    fn adjusted_row_count(&self, timeframe: Timeframe) -> Result<usize, StagewiseError> {
        Ok(self.adjusted(timeframe).len())
    }

    fn read_adjusted(
        &self,
        timeframe: Timeframe,
        tickers: &[String],
    ) -> Result<Vec<AdjustedBar>, StagewiseError> {
        Ok(self
            .adjusted(timeframe)
            .into_iter()
            .filter(|b| tickers.contains(&b.ticker))
            .collect())
    }

    fn write_adjusted(
        &self,
        timeframe: Timeframe,
        rows: &[AdjustedBar],
        mode: WriteMode,
    ) -> Result<(), StagewiseError> {
        let mut tables = self.adjusted.borrow_mut();
        upsert(tables.entry(timeframe).or_default(), rows, mode, |b| {
            (b.ticker.clone(), b.date)
        });
        Ok(())
    }

    fn write_indicators(
        &self,
        timeframe: Timeframe,
        rows: &[IndicatorRow],
        mode: WriteMode,
    ) -> Result<(), StagewiseError> {
        let mut tables = self.indicators.borrow_mut();
        upsert(tables.entry(timeframe).or_default(), rows, mode, |r| {
            (r.ticker.clone(), r.date)
        });
        Ok(())
    }

    fn write_stages(&self, rows: &[StageRecord], mode: WriteMode) -> Result<(), StagewiseError> {
        if self.fail_stage_writes.get() {
            return Err(StagewiseError::Database {
                reason: "stage table unavailable".into(),
            });
        }
        upsert(&mut self.stages.borrow_mut(), rows, mode, |r| {
            (r.ticker.clone(), r.date)
        });
        Ok(())
    }
}

impl WatermarkStore for MemoryStore {
    fn read_watermark(&self) -> Result<Option<NaiveDate>, StagewiseError> {
        Ok(*self.watermark.borrow())
    }

    fn write_watermark(&self, date: NaiveDate) -> Result<(), StagewiseError> {
        *self.watermark.borrow_mut() = Some(date);
        Ok(())
    }

    fn read_rebuild_pending(&self) -> Result<bool, StagewiseError> {
        Ok(self.rebuild_pending.get())
    }

    fn write_rebuild_pending(&self, pending: bool) -> Result<(), StagewiseError> {
        self.rebuild_pending.set(pending);
        Ok(())
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn make_bar(ticker: &str, date_str: &str, close: f64) -> Bar {
    Bar {
        ticker: ticker.to_string(),
        date: NaiveDate::parse_from_str(date_str, "%Y-%m-%d").unwrap(),
        open: close,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: 1_000,
        transactions: 10,
    }
}

pub fn split(ticker: &str, execution_date: NaiveDate, split_from: f64, split_to: f64) -> SplitEvent {
    SplitEvent {
        ticker: ticker.to_string(),
        execution_date,
        split_from,
        split_to,
    }
}

/// `count` weekday bars from `start` with a trending, oscillating close.
pub fn generate_bars(ticker: &str, start: NaiveDate, count: usize, start_price: f64) -> Vec<Bar> {
    let mut bars = Vec::with_capacity(count);
    let mut day = start;
    while bars.len() < count {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            let i = bars.len() as f64;
            let close = start_price + i * 0.15 + (i / 9.0).sin() * start_price * 0.08;
            bars.push(Bar {
                ticker: ticker.to_string(),
                date: day,
                open: close - 0.4,
                high: close + 1.2,
                low: close - 1.3,
                close,
                volume: 50_000 + ((i as i64 * 7919) % 40_000),
                transactions: 300 + (i as i64 % 50),
            });
        }
        day = day + Days::new(1);
    }
    bars
}

/// Windows small enough that every indicator and stage is defined within a
/// few months of bars.
pub fn small_config() -> PipelineConfig {
    let indicators = IndicatorConfig {
        sma_short: 5,
        sma_medium: 10,
        sma_long: 20,
        atr_period: 5,
        volume_period: 5,
        high_volume_threshold: 1.5,
    };
    PipelineConfig {
        history_buffer: indicators.required_history(),
        indicators,
        stage: StageConfig {
            ma_period: 4,
            slope_lookback: 2,
            confirmation_periods: 2,
            price_band_pct: 1.0,
            slope_band_pct: 0.25,
        },
        batch_size: 250,
        parallel: false,
    }
}
