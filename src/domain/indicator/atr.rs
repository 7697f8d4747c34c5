//! Average True Range.
//!
//! TR[i] = max(H[i] - L[i], |H[i] - C[i-1]|, |L[i] - C[i-1]|), undefined for
//! the first bar of a ticker (no previous close).
//! ATR(n)[i] = arithmetic mean of TR over the trailing n bars; null until n
//! defined true ranges exist.

use crate::domain::bar::AdjustedBar;
use crate::domain::indicator::sma::rolling_mean;

pub fn true_ranges(bars: &[AdjustedBar]) -> Vec<Option<f64>> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| (i > 0).then(|| bar.true_range(bars[i - 1].close)))
        .collect()
}

pub fn calc_atr(bars: &[AdjustedBar], period: usize) -> Vec<Option<f64>> {
    rolling_mean(&true_ranges(bars), period)
}
