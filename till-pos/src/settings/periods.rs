//! Business period math: wage weeks and sales periods.

use common::time_info::TimeInfo;
use serde::{Deserialize, Serialize};

use super::Settings;

/// Sales reporting period granularities.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum PeriodKind {
    Day,
    Week,
    TwoWeeks,
    HalfMonth,
    Month,
}

/// A half-open `[start, end)` interval of civil time.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PeriodBounds {
    pub start: TimeInfo,
    pub end: TimeInfo,
}

impl PeriodBounds {
    pub fn contains(&self, time: TimeInfo) -> bool {
        self.start <= time && time < self.end
    }
}

/// Day-of-month boundaries for the Canadian half-month pay period.
const HALF_MONTH_FIRST: u32 = 11;
const HALF_MONTH_SECOND: u32 = 26;

impl Settings {
    /// The wage week containing `reference`.
    ///
    /// `wage_week_start` is minutes from Sunday 00:00. The week starts at
    /// the most recent boundary at or before `reference` and runs exactly
    /// seven days, so `start <= reference < end` holds for every input.
    /// The boundary is taken at the configured weekday and time-of-day;
    /// a mid-day `wage_week_start` shifts the boundary within that day
    /// rather than snapping to midnight.
    pub fn overtime_week(&self, reference: TimeInfo) -> PeriodBounds {
        let boundary_weekday = (self.wage_week_start / 1440) % 7;
        let boundary_minute = self.wage_week_start % 1440;

        // Candidate boundary in the reference's week.
        let day_delta =
            i64::from(reference.week_day()) - i64::from(boundary_weekday);
        let mut start = reference
            .floor_day()
            .add_days(-day_delta)
            .add_minutes(i64::from(boundary_minute));
        if start > reference {
            start = start.add_days(-7);
        }
        let end = start.add_days(7);

        debug_assert!(start <= reference && reference < end);
        PeriodBounds { start, end }
    }

    /// The sales period of `kind` containing `reference`. Periods other
    /// than half-month anchor on the wage week / calendar the obvious
    /// way; half-month uses the 11th/26th convention.
    pub fn sales_period(
        &self,
        kind: PeriodKind,
        reference: TimeInfo,
    ) -> PeriodBounds {
        match kind {
            PeriodKind::Day => {
                let start = reference.floor_day();
                PeriodBounds {
                    start,
                    end: start.add_days(1),
                }
            }
            PeriodKind::Week => self.overtime_week(reference),
            PeriodKind::TwoWeeks => {
                let week = self.overtime_week(reference);
                PeriodBounds {
                    start: week.start,
                    end: week.start.add_days(14),
                }
            }
            PeriodKind::HalfMonth => {
                let start = reference.floor_day().half_month_jump(
                    0,
                    HALF_MONTH_FIRST,
                    HALF_MONTH_SECOND,
                );
                let end = start.half_month_jump(
                    1,
                    HALF_MONTH_FIRST,
                    HALF_MONTH_SECOND,
                );
                PeriodBounds { start, end }
            }
            PeriodKind::Month => {
                let start = TimeInfo::from_ymd_hms(
                    reference.year(),
                    reference.month(),
                    1,
                    0,
                    0,
                    0,
                )
                .expect("first of month");
                let end = if reference.month() == 12 {
                    TimeInfo::from_ymd_hms(reference.year() + 1, 1, 1, 0, 0, 0)
                } else {
                    TimeInfo::from_ymd_hms(
                        reference.year(),
                        reference.month() + 1,
                        1,
                        0,
                        0,
                        0,
                    )
                }
                .expect("first of next month");
                PeriodBounds { start, end }
            }
        }
    }
}
