//! Simple Moving Average.
//!
//! SMA(n)[i] = sum(C[i-j] for j in 0..n) / n
//! Warmup: first (n-1) bars are null.
//!
//! Each window is summed afresh, left to right, so a value depends only on
//! the n inputs it covers. An incremental run that starts from a trailing
//! buffer therefore reproduces the full-history value bit for bit.

use crate::domain::bar::AdjustedBar;

pub fn calc_sma(bars: &[AdjustedBar], period: usize) -> Vec<Option<f64>> {
    let closes: Vec<Option<f64>> = bars.iter().map(|b| Some(b.close)).collect();
    rolling_mean(&closes, period)
}

/// Trailing mean over `period` values, including the current one. Null when
/// the window is not yet full or covers a null input.
pub fn rolling_mean(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; values.len()];
    }

    (0..values.len())
        .map(|i| {
            if i + 1 < period {
                return None;
            }
            let window = &values[i + 1 - period..=i];
            let mut sum = 0.0;
            for value in window {
                sum += (*value)?;
            }
            Some(sum / period as f64)
        })
        .collect()
}
