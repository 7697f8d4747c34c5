//! Rebuild-vs-append decision. Pure: takes the facts read at the start of a
//! run and returns what the run should do.

use crate::domain::bar::SplitEvent;
use chrono::NaiveDate;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebuildReason {
    NoWatermark,
    /// A previous full rebuild started replacing derived rows and failed.
    InterruptedRebuild,
    NoDerivedData,
    NewSplits { count: usize, since: NaiveDate },
}

impl fmt::Display for RebuildReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebuildReason::NoWatermark => write!(f, "no watermark (first run)"),
            RebuildReason::InterruptedRebuild => write!(f, "previous rebuild did not finish"),
            RebuildReason::NoDerivedData => write!(f, "no derived adjusted data"),
            RebuildReason::NewSplits { count, since } => {
                write!(f, "{count} split(s) executed after {since}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunPlan {
    FullRebuild(RebuildReason),
    Incremental { watermark: NaiveDate },
}

pub fn plan_run(
    watermark: Option<NaiveDate>,
    adjusted_rows: usize,
    rebuild_pending: bool,
    splits: &[SplitEvent],
) -> RunPlan {
    let Some(watermark) = watermark else {
        return RunPlan::FullRebuild(RebuildReason::NoWatermark);
    };
    if rebuild_pending {
        return RunPlan::FullRebuild(RebuildReason::InterruptedRebuild);
    }
    if adjusted_rows == 0 {
        return RunPlan::FullRebuild(RebuildReason::NoDerivedData);
    }

    let count = splits
        .iter()
        .filter(|s| s.execution_date > watermark)
        .count();
    if count > 0 {
        return RunPlan::FullRebuild(RebuildReason::NewSplits {
            count,
            since: watermark,
        });
    }

    RunPlan::Incremental { watermark }
}

pub fn should_full_rebuild(
    watermark: Option<NaiveDate>,
    adjusted_rows: usize,
    rebuild_pending: bool,
    splits: &[SplitEvent],
) -> bool {
    matches!(
        plan_run(watermark, adjusted_rows, rebuild_pending, splits),
        RunPlan::FullRebuild(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn split(day: NaiveDate) -> SplitEvent {
        SplitEvent {
            ticker: "AAPL".into(),
            execution_date: day,
            split_from: 1.0,
            split_to: 2.0,
        }
    }

    #[test]
    fn first_run_rebuilds() {
        assert_eq!(
            plan_run(None, 500, false, &[]),
            RunPlan::FullRebuild(RebuildReason::NoWatermark)
        );
    }

    #[test]
    fn empty_derived_table_rebuilds() {
        assert_eq!(
            plan_run(Some(date(2024, 6, 28)), 0, false, &[]),
            RunPlan::FullRebuild(RebuildReason::NoDerivedData)
        );
    }

    #[test]
    fn pending_marker_rebuilds_even_with_data() {
        assert_eq!(
            plan_run(Some(date(2024, 6, 28)), 500, true, &[]),
            RunPlan::FullRebuild(RebuildReason::InterruptedRebuild)
        );
        assert!(!should_full_rebuild(Some(date(2024, 6, 28)), 500, false, &[]));
    }

    #[test]
    fn split_after_watermark_rebuilds() {
        let splits = [split(date(2024, 1, 10)), split(date(2024, 7, 1))];
        assert_eq!(
            plan_run(Some(date(2024, 6, 28)), 500, false, &splits),
            RunPlan::FullRebuild(RebuildReason::NewSplits {
                count: 1,
                since: date(2024, 6, 28)
            })
        );
        assert!(should_full_rebuild(Some(date(2024, 6, 28)), 500, false, &splits));
    }

    #[test]
    fn split_on_watermark_does_not_rebuild() {
        let splits = [split(date(2024, 6, 28))];
        assert_eq!(
            plan_run(Some(date(2024, 6, 28)), 500, false, &splits),
            RunPlan::Incremental {
                watermark: date(2024, 6, 28)
            }
        );
        assert!(!should_full_rebuild(Some(date(2024, 6, 28)), 500, false, &splits));
    }

    #[test]
    fn reason_display() {
        let reason = RebuildReason::NewSplits {
            count: 2,
            since: date(2024, 6, 28),
        };
        assert_eq!(reason.to_string(), "2 split(s) executed after 2024-06-28");
    }
}
