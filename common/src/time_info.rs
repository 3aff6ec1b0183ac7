//! Civil local date-time for business logic.
//!
//! Business rules (meal periods, labor weeks, coupon windows) work at
//! minute resolution; persistence timestamps keep seconds. [`TimeInfo`]
//! wraps a [`NaiveDateTime`] because the business day is defined by the
//! store's wall clock, never by UTC.

use std::fmt::{self, Display};
use std::ops::{Add, Sub};
use std::time::Duration;

use chrono::{
    Datelike, Days, Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike,
};
use serde::{Deserialize, Serialize};

/// A civil local date-time.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Hash,
    Ord,
    PartialOrd,
    Serialize,
    Deserialize,
)]
pub struct TimeInfo(NaiveDateTime);

impl TimeInfo {
    /// The current wall-clock time, to the second.
    pub fn now() -> Self {
        Self(Local::now().naive_local().with_nanosecond(0).expect("0 < 1s"))
    }

    pub fn from_ymd_hms(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        min: u32,
        sec: u32,
    ) -> Option<Self> {
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let time = NaiveTime::from_hms_opt(hour, min, sec)?;
        Some(Self(NaiveDateTime::new(date, time)))
    }

    // --- Accessors --- //

    pub fn year(self) -> i32 {
        self.0.year()
    }

    pub fn month(self) -> u32 {
        self.0.month()
    }

    pub fn day(self) -> u32 {
        self.0.day()
    }

    pub fn hour(self) -> u32 {
        self.0.hour()
    }

    pub fn minute(self) -> u32 {
        self.0.minute()
    }

    /// Day of week, Sunday == 0.
    pub fn week_day(self) -> u32 {
        self.0.weekday().num_days_from_sunday()
    }

    /// Minutes past midnight.
    pub fn minutes_into_day(self) -> u32 {
        self.0.hour() * 60 + self.0.minute()
    }

    // --- Arithmetic --- //

    /// Truncates seconds.
    pub fn floor_minute(self) -> Self {
        Self(self.0.with_second(0).expect("0 < 60"))
    }

    /// Truncates to midnight.
    pub fn floor_day(self) -> Self {
        Self(NaiveDateTime::new(
            self.0.date(),
            NaiveTime::from_hms_opt(0, 0, 0).expect("midnight"),
        ))
    }

    pub fn add_minutes(self, minutes: i64) -> Self {
        Self(self.0 + chrono::Duration::minutes(minutes))
    }

    pub fn add_days(self, days: i64) -> Self {
        if days >= 0 {
            Self(
                self.0
                    .checked_add_days(Days::new(days as u64))
                    .expect("in range"),
            )
        } else {
            Self(
                self.0
                    .checked_sub_days(Days::new((-days) as u64))
                    .expect("in range"),
            )
        }
    }

    /// Jumps `n` half-month periods forward (or backward for negative `n`).
    /// Periods begin on day `day_a` and day `day_b` of each month
    /// (`day_a < day_b`), the convention used for Canadian half-month pay
    /// periods. The result lands on the nearest period boundary at or
    /// before `self`, then jumps whole periods from there.
    pub fn half_month_jump(self, n: i32, day_a: u32, day_b: u32) -> Self {
        debug_assert!(day_a < day_b);
        let date = self.0.date();
        // Index periods as (year * 24 + month0 * 2 + half).
        let half = if date.day() >= day_b {
            1
        } else if date.day() >= day_a {
            0
        } else {
            // Before day_a: the period started at day_b of last month.
            return Self(NaiveDateTime::new(
                prev_month(date).with_day(day_b).expect("valid boundary"),
                self.0.time(),
            ))
            .half_month_jump(n, day_a, day_b);
        };
        let mut index =
            i64::from(date.year()) * 24 + i64::from(date.month0()) * 2
                + half
                + i64::from(n);
        let target_half = index.rem_euclid(2);
        index -= target_half;
        let months = index / 2;
        let year = (months / 12) as i32;
        let month0 = (months % 12) as u32;
        let day = if target_half == 0 { day_a } else { day_b };
        let date = NaiveDate::from_ymd_opt(year, month0 + 1, day)
            .expect("valid boundary");
        Self(NaiveDateTime::new(date, self.0.time()))
    }

    /// Elapsed time since `earlier`, zero if `earlier` is in the future.
    pub fn since(self, earlier: Self) -> Duration {
        (self.0 - earlier.0).to_std().unwrap_or(Duration::ZERO)
    }

    /// A filesystem-safe stamp used to name archive directories,
    /// e.g. `2026-03-14T02-30-00`.
    pub fn dir_stamp(self) -> String {
        self.0.format("%Y-%m-%dT%H-%M-%S").to_string()
    }

    pub fn parse_dir_stamp(s: &str) -> Option<Self> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H-%M-%S")
            .ok()
            .map(Self)
    }
}

/// The first day of the month before `date`'s month.
fn prev_month(date: NaiveDate) -> NaiveDate {
    if date.month0() == 0 {
        NaiveDate::from_ymd_opt(date.year() - 1, 12, 1).expect("valid")
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month0(), 1).expect("valid")
    }
}

impl Add<Duration> for TimeInfo {
    type Output = Self;
    fn add(self, rhs: Duration) -> Self {
        Self(self.0 + chrono::Duration::from_std(rhs).expect("in range"))
    }
}

impl Sub<Duration> for TimeInfo {
    type Output = Self;
    fn sub(self, rhs: Duration) -> Self {
        Self(self.0 - chrono::Duration::from_std(rhs).expect("in range"))
    }
}

impl Display for TimeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ti(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> TimeInfo {
        TimeInfo::from_ymd_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn floor_and_weekday() {
        let t = TimeInfo::from_ymd_hms(2026, 3, 14, 2, 30, 45).unwrap();
        assert_eq!(t.floor_minute().minute(), 30);
        assert_eq!(t.floor_day().minutes_into_day(), 0);
        // 2026-03-14 is a Saturday.
        assert_eq!(t.week_day(), 6);
        assert_eq!(t.floor_day().add_days(1).week_day(), 0);
    }

    #[test]
    fn half_month_boundaries() {
        // Periods start on the 11th and the 26th.
        let t = ti(2026, 3, 14, 0, 0);
        assert_eq!(t.half_month_jump(0, 11, 26), ti(2026, 3, 11, 0, 0));
        assert_eq!(t.half_month_jump(1, 11, 26), ti(2026, 3, 26, 0, 0));
        assert_eq!(t.half_month_jump(2, 11, 26), ti(2026, 4, 11, 0, 0));
        assert_eq!(t.half_month_jump(-1, 11, 26), ti(2026, 2, 26, 0, 0));

        // A date before the first boundary belongs to last month's
        // second period.
        let early = ti(2026, 3, 5, 0, 0);
        assert_eq!(early.half_month_jump(0, 11, 26), ti(2026, 2, 26, 0, 0));
        assert_eq!(early.half_month_jump(1, 11, 26), ti(2026, 3, 11, 0, 0));

        // Year wrap.
        let dec = ti(2025, 12, 28, 0, 0);
        assert_eq!(dec.half_month_jump(1, 11, 26), ti(2026, 1, 11, 0, 0));
    }

    #[test]
    fn dir_stamp_roundtrip() {
        let t = TimeInfo::from_ymd_hms(2026, 3, 14, 2, 30, 0).unwrap();
        let stamp = t.dir_stamp();
        assert_eq!(stamp, "2026-03-14T02-30-00");
        assert_eq!(TimeInfo::parse_dir_stamp(&stamp), Some(t));
    }
}
