//! A percentage newtype scaled by ×10 000, so 8.25% is stored as `82_500`.
//!
//! All business arithmetic stays in integers; [`Percent::as_f64`] and
//! [`Percent::from_f64`] are the only float boundary and exist for the
//! settings editor and report rendering.

use std::fmt::{self, Display};

#[cfg(test)]
use proptest_derive::Arbitrary;
use serde::{Deserialize, Serialize};

/// A signed percentage, scaled by [`Percent::SCALE`].
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    Eq,
    PartialEq,
    Hash,
    Ord,
    PartialOrd,
    Serialize,
    Deserialize,
)]
#[cfg_attr(test, derive(Arbitrary))]
pub struct Percent(i32);

impl Percent {
    /// `SCALE` scaled units == 1%. A full 100% is `100 * SCALE`.
    pub const SCALE: i32 = 10_000;

    pub const ZERO: Self = Self(0);
    pub const ONE_HUNDRED: Self = Self(100 * Self::SCALE);

    #[inline]
    pub const fn from_scaled(scaled: i32) -> Self {
        Self(scaled)
    }

    /// Full scale including the ×100 percent factor, i.e. the divisor
    /// that turns `cents * scaled` back into cents.
    pub const fn full_scale() -> i64 {
        Self::SCALE as i64 * 100
    }

    #[inline]
    pub const fn scaled(self) -> i32 {
        self.0
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Float boundary for display and editor input only.
    pub fn as_f64(self) -> f64 {
        f64::from(self.0) / f64::from(Self::SCALE)
    }

    /// Float boundary for display and editor input only. Rounds to the
    /// nearest scaled unit.
    pub fn from_f64(pct: f64) -> Self {
        Self((pct * f64::from(Self::SCALE)).round() as i32)
    }
}

impl Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let whole = abs / Self::SCALE as u32;
        let frac = abs % Self::SCALE as u32;
        if frac == 0 {
            write!(f, "{sign}{whole}%")
        } else {
            let frac = format!("{frac:04}");
            write!(f, "{sign}{whole}.{}%", frac.trim_end_matches('0'))
        }
    }
}
