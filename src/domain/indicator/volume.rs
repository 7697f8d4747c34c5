//! Volume surge: trailing volume average (current bar included), the ratio
//! of current volume to that average, and a high-volume flag.

use crate::domain::bar::AdjustedBar;
use crate::domain::indicator::sma::rolling_mean;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeSurge {
    pub average: Option<f64>,
    pub ratio: Option<f64>,
    pub high_volume: bool,
}

pub fn calc_volume_surge(bars: &[AdjustedBar], period: usize, threshold: f64) -> Vec<VolumeSurge> {
    let volumes: Vec<Option<f64>> = bars.iter().map(|b| Some(b.volume as f64)).collect();
    let averages = rolling_mean(&volumes, period);

    bars.iter()
        .zip(averages)
        .map(|(bar, average)| {
            let ratio = average
                .filter(|avg| *avg > 0.0)
                .map(|avg| bar.volume as f64 / avg);
            VolumeSurge {
                average,
                ratio,
                high_volume: ratio.is_some_and(|r| r >= threshold),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn make_bars(volumes: &[i64]) -> Vec<AdjustedBar> {
        volumes
            .iter()
            .enumerate()
            .map(|(i, &volume)| AdjustedBar {
                ticker: "TEST".into(),
                date: NaiveDate::from_ymd_opt(2024, 3, (i + 1) as u32).unwrap(),
                open: 10.0,
                high: 10.0,
                low: 10.0,
                close: 10.0,
                volume,
                transactions: 1,
            })
            .collect()
    }

    #[test]
    fn ratio_null_during_warmup_and_flag_false() {
        let surge = calc_volume_surge(&make_bars(&[100, 100, 900]), 4, 3.0);
        for point in &surge {
            assert_eq!(point.average, None);
            assert_eq!(point.ratio, None);
            assert!(!point.high_volume);
        }
    }

    #[test]
    fn average_includes_current_bar() {
        let surge = calc_volume_surge(&make_bars(&[100, 100, 100, 700]), 4, 3.0);
        let last = surge[3];
        assert_relative_eq!(last.average.unwrap(), 250.0);
        assert_relative_eq!(last.ratio.unwrap(), 2.8);
        assert!(!last.high_volume);
    }

    #[test]
    fn flag_set_at_threshold() {
        // avg = (100 + 100 + 400) / 3 = 200, ratio = 2.0
        let surge = calc_volume_surge(&make_bars(&[100, 100, 400]), 3, 2.0);
        assert_relative_eq!(surge[2].ratio.unwrap(), 2.0);
        assert!(surge[2].high_volume);
    }

    #[test]
    fn zero_average_yields_null_ratio() {
        let surge = calc_volume_surge(&make_bars(&[0, 0]), 2, 3.0);
        assert_eq!(surge[1].average, Some(0.0));
        assert_eq!(surge[1].ratio, None);
        assert!(!surge[1].high_volume);
    }
}
