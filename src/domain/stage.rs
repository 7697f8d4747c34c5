//! Weekly stage classification with anti-whipsaw confirmation.
//!
//! Each weekly row first gets a raw stage from its position relative to the
//! regime moving average and that average's slope:
//!
//! 1. price > +band and slope > +slope_band → Stage 2 (Advancing)
//! 2. price < -band and slope < -slope_band → Stage 4 (Declining)
//! 3. price < 0 → Stage 1 (Basing)
//! 4. otherwise → Stage 3 (Topping)
//!
//! The confirmed stage is then produced by a sequential fold over a ticker's
//! rows, oldest first. A raw stage must repeat for `confirmation_periods`
//! consecutive rows before it replaces the confirmed stage, so a one-week
//! flip never shows up in the output.

use crate::domain::indicator::sma;
use crate::domain::series::TickerSeries;
use chrono::NaiveDate;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    Basing,
    Advancing,
    Topping,
    Declining,
}

impl Stage {
    pub fn number(self) -> u8 {
        match self {
            Stage::Basing => 1,
            Stage::Advancing => 2,
            Stage::Topping => 3,
            Stage::Declining => 4,
        }
    }

    pub fn from_number(n: u8) -> Option<Stage> {
        match n {
            1 => Some(Stage::Basing),
            2 => Some(Stage::Advancing),
            3 => Some(Stage::Topping),
            4 => Some(Stage::Declining),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Basing => "Basing",
            Stage::Advancing => "Advancing",
            Stage::Topping => "Topping",
            Stage::Declining => "Declining",
        };
        write!(f, "Stage {} ({})", self.number(), name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageConfig {
    pub ma_period: usize,
    pub slope_lookback: usize,
    pub confirmation_periods: usize,
    pub price_band_pct: f64,
    pub slope_band_pct: f64,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            ma_period: 30,
            slope_lookback: 4,
            confirmation_periods: 2,
            price_band_pct: 2.0,
            slope_band_pct: 0.5,
        }
    }
}

/// One weekly stage row.
#[derive(Debug, Clone, PartialEq)]
pub struct StageRecord {
    pub ticker: String,
    pub date: NaiveDate,
    pub ma: Option<f64>,
    pub price_vs_ma_pct: Option<f64>,
    pub ma_slope_pct: Option<f64>,
    pub raw_stage: Option<Stage>,
    pub stage: Stage,
    pub stage_changed: bool,
    pub weeks_in_stage: u32,
}

pub fn classify_raw(price_vs_ma_pct: f64, ma_slope_pct: f64, config: &StageConfig) -> Stage {
    if price_vs_ma_pct > config.price_band_pct && ma_slope_pct > config.slope_band_pct {
        Stage::Advancing
    } else if price_vs_ma_pct < -config.price_band_pct && ma_slope_pct < -config.slope_band_pct {
        Stage::Declining
    } else if price_vs_ma_pct < 0.0 {
        Stage::Basing
    } else {
        Stage::Topping
    }
}

/// Output of one fold step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    pub stage: Stage,
    pub changed: bool,
    pub periods_in_stage: u32,
}

/// State carried from one row to the next within a single ticker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HysteresisState {
    last_confirmed: Option<Stage>,
    run_value: Option<Option<Stage>>,
    run_length: usize,
    previous_output: Option<Stage>,
    output_run: u32,
}

impl HysteresisState {
    pub fn step(self, raw: Option<Stage>, confirmation_periods: usize) -> (Self, Confirmation) {
        let mut next = self;

        if next.run_value == Some(raw) {
            next.run_length += 1;
        } else {
            next.run_value = Some(raw);
            next.run_length = 1;
        }

        let stage = match raw {
            None => next.last_confirmed.unwrap_or(Stage::Basing),
            Some(s) if next.run_length >= confirmation_periods => {
                next.last_confirmed = Some(s);
                s
            }
            // unconfirmed: hold the last confirmed stage, or pass raw through
            Some(s) => next.last_confirmed.unwrap_or(s),
        };

        let changed = next.previous_output != Some(stage);
        next.output_run = if changed { 1 } else { next.output_run + 1 };
        next.previous_output = Some(stage);

        (
            next,
            Confirmation {
                stage,
                changed,
                periods_in_stage: next.output_run,
            },
        )
    }
}

/// Folds a ticker's raw stages, oldest first, into confirmed stages.
pub fn confirm_stages(raw: &[Option<Stage>], confirmation_periods: usize) -> Vec<Confirmation> {
    raw.iter()
        .scan(HysteresisState::default(), |state, &value| {
            let (next, out) = state.step(value, confirmation_periods);
            *state = next;
            Some(out)
        })
        .collect()
}

/// Computes stage records for one ticker's weekly series.
pub fn compute_stage_records(weekly: &TickerSeries, config: &StageConfig) -> Vec<StageRecord> {
    let bars = &weekly.bars;
    let ma = sma::calc_sma(bars, config.ma_period);

    let price_vs_ma: Vec<Option<f64>> = bars
        .iter()
        .zip(&ma)
        .map(|(bar, m)| m.filter(|m| *m != 0.0).map(|m| (bar.close - m) / m * 100.0))
        .collect();

    let slope: Vec<Option<f64>> = (0..bars.len())
        .map(|i| {
            let prior = ma[i.checked_sub(config.slope_lookback)?]?;
            let current = ma[i]?;
            (prior != 0.0).then(|| (current - prior) / prior * 100.0)
        })
        .collect();

    let raw: Vec<Option<Stage>> = price_vs_ma
        .iter()
        .zip(&slope)
        .map(|(p, s)| Some(classify_raw((*p)?, (*s)?, config)))
        .collect();

    let confirmed = confirm_stages(&raw, config.confirmation_periods);

    bars.iter()
        .enumerate()
        .map(|(i, bar)| StageRecord {
            ticker: weekly.ticker.clone(),
            date: bar.date,
            ma: ma[i],
            price_vs_ma_pct: price_vs_ma[i],
            ma_slope_pct: slope[i],
            raw_stage: raw[i],
            stage: confirmed[i].stage,
            stage_changed: confirmed[i].changed,
            weeks_in_stage: confirmed[i].periods_in_stage,
        })
        .collect()
}
