//! A currency amount newtype, internally an integer count of cents.
//!
//! Every total, tax component, and tender in the system is a [`Money`].
//! Values are signed: refunds and corrections are negative. Float never
//! enters the arithmetic; the only rounding points are [`Money::tax_on`]
//! (tax buckets, half-away-from-zero) and [`Money::round_to`] (price
//! rounding of a grand total, mode chosen by settings).

use std::fmt::{self, Display};
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

#[cfg(test)]
use proptest_derive::Arbitrary;
use serde::{Deserialize, Serialize};

use crate::percent::Percent;

/// How a grand total is rounded to a price quantum.
#[derive(
    Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize,
)]
#[cfg_attr(test, derive(Arbitrary))]
pub enum RoundMode {
    /// No rounding.
    #[default]
    None,
    /// Round half away from zero.
    Nearest,
    /// Round away from zero.
    Up,
    /// Round toward zero.
    Down,
    /// Round half to even ("banker's rounding").
    Banker,
}

impl RoundMode {
    /// The numeric code this mode is stored under on disk.
    pub fn to_code(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Nearest => 1,
            Self::Up => 2,
            Self::Down => 3,
            Self::Banker => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::Nearest),
            2 => Some(Self::Up),
            3 => Some(Self::Down),
            4 => Some(Self::Banker),
            _ => None,
        }
    }
}

/// A signed amount of currency in units of 1/100 of the base currency.
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
pub struct Money(i64);

impl Money {
    pub const ZERO: Self = Self(0);

    /// Construct a [`Money`] from a cent count.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Returns the contained cent count.
    #[inline]
    pub const fn cents(self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    // --- Checked arithmetic --- //

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    pub fn checked_mul(self, count: i64) -> Option<Self> {
        self.0.checked_mul(count).map(Self)
    }

    // --- Rounding boundaries --- //

    /// Computes the tax owed on this amount at `rate`, rounding half away
    /// from zero. This is the only rounding rule applied to tax buckets.
    pub fn tax_on(self, rate: Percent) -> Self {
        // cents * scaled_rate / (SCALE * 100), rounded half away from zero.
        let numer = i128::from(self.0) * i128::from(rate.scaled());
        let denom = i128::from(Percent::full_scale());
        Self(div_round_half_away(numer, denom) as i64)
    }

    /// Rounds to a multiple of `quantum` cents using `mode`. A `quantum`
    /// of 0 or 1 leaves the value unchanged (as does [`RoundMode::None`]).
    pub fn round_to(self, quantum: i64, mode: RoundMode) -> Self {
        if quantum <= 1 || matches!(mode, RoundMode::None) {
            return self;
        }
        let q = i128::from(quantum);
        let v = i128::from(self.0);
        let rounded = match mode {
            RoundMode::None => v,
            RoundMode::Nearest => div_round_half_away(v, q) * q,
            RoundMode::Up => {
                let (div, rem) = (v / q, v % q);
                if rem == 0 {
                    v
                } else if v > 0 {
                    (div + 1) * q
                } else {
                    (div - 1) * q
                }
            }
            RoundMode::Down => (v / q) * q,
            RoundMode::Banker => {
                let div = div_round_half_away(v, q);
                let twice_rem = (v % q).abs() * 2;
                if twice_rem == q && div % 2 != 0 {
                    // Exactly halfway and half-away landed on odd: step
                    // back toward zero to reach the even multiple.
                    (div - v.signum()) * q
                } else {
                    div * q
                }
            }
        };
        Self(rounded as i64)
    }
}

/// Integer division rounding half away from zero. `denom` must be > 0.
fn div_round_half_away(numer: i128, denom: i128) -> i128 {
    debug_assert!(denom > 0);
    if numer >= 0 {
        (numer + denom / 2) / denom
    } else {
        -((-numer + denom / 2) / denom)
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Neg for Money {
    type Output = Self;
    fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        Self(iter.map(|m| m.0).sum())
    }
}

impl Display for Money {
    /// Displays as `whole.fraction` in base currency units, e.g. `12.99`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

#[cfg(test)]
mod test {
    use proptest::{prop_assert, prop_assert_eq, proptest};

    use super::*;

    proptest! {
        /// A [`Money`] serializes as a bare cent integer (receipts,
        /// check files, and the integrity report all rely on this wire
        /// form) and survives the trip back.
        #[test]
        fn serializes_as_bare_cents(money: Money) {
            let json = serde_json::to_value(money).unwrap();
            prop_assert_eq!(json.as_i64(), Some(money.cents()));
            prop_assert_eq!(
                serde_json::from_value::<Money>(json).unwrap(),
                money,
            );
        }
    }

    #[test]
    fn tax_rounds_half_away_from_zero() {
        let rate = Percent::from_scaled(82_500); // 8.25%
        assert_eq!(Money::from_cents(1299).tax_on(rate).cents(), 107);
        assert_eq!(Money::from_cents(-1299).tax_on(rate).cents(), -107);
        // 200 * 8.25% = 16.5 -> 17
        assert_eq!(Money::from_cents(200).tax_on(rate).cents(), 17);
        assert_eq!(Money::from_cents(-200).tax_on(rate).cents(), -17);
        // Zero rate
        assert_eq!(
            Money::from_cents(1299).tax_on(Percent::ZERO),
            Money::ZERO
        );
    }

    #[test]
    fn round_to_modes() {
        let m = Money::from_cents(1003);
        assert_eq!(m.round_to(5, RoundMode::None).cents(), 1003);
        assert_eq!(m.round_to(5, RoundMode::Nearest).cents(), 1005);
        assert_eq!(m.round_to(5, RoundMode::Up).cents(), 1005);
        assert_eq!(m.round_to(5, RoundMode::Down).cents(), 1000);
        // Halfway cases
        let half = Money::from_cents(1015);
        assert_eq!(half.round_to(10, RoundMode::Nearest).cents(), 1020);
        assert_eq!(half.round_to(10, RoundMode::Banker).cents(), 1020);
        let half_odd = Money::from_cents(1025);
        assert_eq!(half_odd.round_to(10, RoundMode::Nearest).cents(), 1030);
        assert_eq!(half_odd.round_to(10, RoundMode::Banker).cents(), 1020);
        // Negative values round symmetrically
        let neg = Money::from_cents(-1003);
        assert_eq!(neg.round_to(5, RoundMode::Nearest).cents(), -1005);
        assert_eq!(neg.round_to(5, RoundMode::Up).cents(), -1005);
        assert_eq!(neg.round_to(5, RoundMode::Down).cents(), -1000);
    }

    #[test]
    fn display_formats_cents() {
        assert_eq!(Money::from_cents(1406).to_string(), "14.06");
        assert_eq!(Money::from_cents(-5).to_string(), "-0.05");
        assert_eq!(Money::ZERO.to_string(), "0.00");
    }

    proptest! {
        #[test]
        fn round_to_is_multiple(cents in -1_000_000i64..1_000_000, quantum in 2i64..100) {
            for mode in [RoundMode::Nearest, RoundMode::Up, RoundMode::Down, RoundMode::Banker] {
                let rounded = Money::from_cents(cents).round_to(quantum, mode);
                prop_assert_eq!(rounded.cents() % quantum, 0);
                prop_assert!((rounded.cents() - cents).abs() < quantum);
            }
        }
    }
}
