//! Media catalogues: discounts, coupons, credit cards, comps, and
//! employee meals.
//!
//! Every record carries an id unique within its scope. Local records use
//! ids below [`GLOBAL_MEDIA_ID`]; records shared across stores use ids at
//! or above it and persist in `media.dat` rather than `settings.dat`.
//! Duplicate ids found on load are reassigned to the next free id.

use common::constants::GLOBAL_MEDIA_ID;
use common::datafile::{DataFileError, InputDataFile, OutputDataFile};
use common::money::Money;
use common::percent::Percent;
use common::time_info::TimeInfo;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{PosError, PosResult};

/// Whether a media record is shared across stores.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum MediaScope {
    Local,
    Global,
}

/// How a discount or coupon computes its value.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaAmount {
    Flat(Money),
    PercentOf(Percent),
}

impl MediaAmount {
    /// The value this rule yields against `base`.
    pub fn value_against(self, base: Money) -> Money {
        match self {
            Self::Flat(amount) => amount,
            Self::PercentOf(rate) => base.tax_on(rate),
        }
    }

    fn write(self, out: &mut OutputDataFile) -> Result<(), DataFileError> {
        match self {
            Self::Flat(amount) => {
                out.put_u8(0)?;
                out.put_i64(amount.cents())
            }
            Self::PercentOf(rate) => {
                out.put_u8(1)?;
                out.put_i64(i64::from(rate.scaled()))
            }
        }
    }

    fn read(input: &mut InputDataFile) -> PosResult<Self> {
        match input.get_u8()? {
            0 => Ok(Self::Flat(Money::from_cents(input.get_i64()?))),
            1 => Ok(Self::PercentOf(Percent::from_scaled(
                input.get_i64()? as i32,
            ))),
            code => Err(PosError::protocol(format!(
                "unknown media amount code {code}"
            ))),
        }
    }
}

/// Behavior common to all five catalogue record types.
pub trait MediaRecord: Sized {
    fn id(&self) -> i32;
    fn set_id(&mut self, id: i32);
    fn active(&self) -> bool;
    fn write(&self, out: &mut OutputDataFile) -> Result<(), DataFileError>;
    fn read(input: &mut InputDataFile) -> PosResult<Self>;
}

macro_rules! media_record_common {
    ($ty:ty) => {
        impl MediaRecord for $ty {
            fn id(&self) -> i32 {
                self.id
            }
            fn set_id(&mut self, id: i32) {
                self.id = id;
            }
            fn active(&self) -> bool {
                self.active
            }
            fn write(
                &self,
                out: &mut OutputDataFile,
            ) -> Result<(), DataFileError> {
                self.write_fields(out)
            }
            fn read(input: &mut InputDataFile) -> PosResult<Self> {
                Self::read_fields(input)
            }
        }
    };
}

// --- DiscountInfo --- //

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiscountInfo {
    pub id: i32,
    pub name: String,
    pub active: bool,
    pub amount: MediaAmount,
    /// Pre-tax discounts reduce the taxable subtotals; post-tax ones act
    /// as payments.
    pub pre_tax: bool,
}

impl DiscountInfo {
    fn write_fields(
        &self,
        out: &mut OutputDataFile,
    ) -> Result<(), DataFileError> {
        out.put_i32(self.id)?;
        out.put_str(&self.name)?;
        out.put_bool(self.active)?;
        self.amount.write(out)?;
        out.put_bool(self.pre_tax)
    }

    fn read_fields(input: &mut InputDataFile) -> PosResult<Self> {
        Ok(Self {
            id: input.get_i32()?,
            name: input.get_str()?,
            active: input.get_bool()?,
            amount: MediaAmount::read(input)?,
            pre_tax: input.get_bool()?,
        })
    }
}

media_record_common!(DiscountInfo);

// --- CouponInfo --- //

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CouponInfo {
    pub id: i32,
    pub name: String,
    pub active: bool,
    pub amount: MediaAmount,
    /// Valid window in minutes past midnight; `start..end`, end
    /// exclusive. `None` means valid all day.
    pub window: Option<(u32, u32)>,
    /// Bit per weekday, Sunday == bit 0. Zero means every day.
    pub weekday_mask: u8,
}

impl CouponInfo {
    /// Whether the coupon applies at `time`. Both the reference time and
    /// the window bounds work at minute resolution; the end bound is
    /// exclusive so back-to-back windows never double-apply.
    pub fn applies_at(&self, time: TimeInfo) -> bool {
        if !self.active {
            return false;
        }
        if self.weekday_mask != 0 {
            let bit = 1u8 << time.week_day();
            if self.weekday_mask & bit == 0 {
                return false;
            }
        }
        match self.window {
            None => true,
            Some((start, end)) => {
                let minute = time.floor_minute().minutes_into_day();
                start <= minute && minute < end
            }
        }
    }

    fn write_fields(
        &self,
        out: &mut OutputDataFile,
    ) -> Result<(), DataFileError> {
        out.put_i32(self.id)?;
        out.put_str(&self.name)?;
        out.put_bool(self.active)?;
        self.amount.write(out)?;
        out.put_bool(self.window.is_some())?;
        let (start, end) = self.window.unwrap_or((0, 0));
        out.put_u32(start)?;
        out.put_u32(end)?;
        out.put_u8(self.weekday_mask)
    }

    fn read_fields(input: &mut InputDataFile) -> PosResult<Self> {
        let id = input.get_i32()?;
        let name = input.get_str()?;
        let active = input.get_bool()?;
        let amount = MediaAmount::read(input)?;
        let has_window = input.get_bool()?;
        let start = input.get_u32()?;
        let end = input.get_u32()?;
        Ok(Self {
            id,
            name,
            active,
            amount,
            window: has_window.then_some((start, end)),
            weekday_mask: input.get_u8()?,
        })
    }
}

media_record_common!(CouponInfo);

// --- CreditCardInfo --- //

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreditCardInfo {
    pub id: i32,
    pub name: String,
    pub active: bool,
    /// Leading PAN digits that identify this card brand.
    pub prefixes: Vec<String>,
}

impl CreditCardInfo {
    pub fn matches_pan(&self, pan: &str) -> bool {
        self.prefixes.iter().any(|p| pan.starts_with(p.as_str()))
    }

    fn write_fields(
        &self,
        out: &mut OutputDataFile,
    ) -> Result<(), DataFileError> {
        out.put_i32(self.id)?;
        out.put_str(&self.name)?;
        out.put_bool(self.active)?;
        out.put_u32(self.prefixes.len() as u32)?;
        for prefix in &self.prefixes {
            out.put_str(prefix)?;
        }
        Ok(())
    }

    fn read_fields(input: &mut InputDataFile) -> PosResult<Self> {
        let id = input.get_i32()?;
        let name = input.get_str()?;
        let active = input.get_bool()?;
        let count = input.get_u32()?;
        let mut prefixes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            prefixes.push(input.get_str()?);
        }
        Ok(Self {
            id,
            name,
            active,
            prefixes,
        })
    }
}

media_record_common!(CreditCardInfo);

// --- CompInfo --- //

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompInfo {
    pub id: i32,
    pub name: String,
    pub active: bool,
    pub manager_only: bool,
}

impl CompInfo {
    fn write_fields(
        &self,
        out: &mut OutputDataFile,
    ) -> Result<(), DataFileError> {
        out.put_i32(self.id)?;
        out.put_str(&self.name)?;
        out.put_bool(self.active)?;
        out.put_bool(self.manager_only)
    }

    fn read_fields(input: &mut InputDataFile) -> PosResult<Self> {
        Ok(Self {
            id: input.get_i32()?,
            name: input.get_str()?,
            active: input.get_bool()?,
            manager_only: input.get_bool()?,
        })
    }
}

media_record_common!(CompInfo);

// --- MealInfo --- //

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MealInfo {
    pub id: i32,
    pub name: String,
    pub active: bool,
    /// Employee meal credit applied per use.
    pub credit: Money,
}

impl MealInfo {
    fn write_fields(
        &self,
        out: &mut OutputDataFile,
    ) -> Result<(), DataFileError> {
        out.put_i32(self.id)?;
        out.put_str(&self.name)?;
        out.put_bool(self.active)?;
        out.put_i64(self.credit.cents())
    }

    fn read_fields(input: &mut InputDataFile) -> PosResult<Self> {
        Ok(Self {
            id: input.get_i32()?,
            name: input.get_str()?,
            active: input.get_bool()?,
            credit: Money::from_cents(input.get_i64()?),
        })
    }
}

media_record_common!(MealInfo);

// --- MediaList --- //

/// An id-ordered list of one catalogue's records.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MediaList<T> {
    items: Vec<T>,
}

impl<T> Default for MediaList<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: MediaRecord> MediaList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// The smallest id ≥ `base` not present in the list.
    pub fn first_id(&self, base: i32) -> i32 {
        let mut candidate = base;
        for item in &self.items {
            if candidate < item.id() {
                break;
            } else if candidate == item.id() {
                candidate += 1;
            }
        }
        candidate
    }

    /// Inserts in id order. A record arriving with a duplicate id is
    /// reassigned to the next free id in its scope.
    pub fn insert(&mut self, mut item: T) -> i32 {
        if self.find(item.id()).is_some() {
            let base = if item.id() >= GLOBAL_MEDIA_ID {
                GLOBAL_MEDIA_ID
            } else {
                1
            };
            let fresh = self.first_id(base);
            warn!(
                "media id {} already in use, reassigning to {fresh}",
                item.id(),
            );
            item.set_id(fresh);
        }
        let at = self
            .items
            .partition_point(|existing| existing.id() < item.id());
        let id = item.id();
        self.items.insert(at, item);
        id
    }

    pub fn find(&self, id: i32) -> Option<&T> {
        self.items.iter().find(|item| item.id() == id)
    }

    pub fn remove(&mut self, id: i32) -> Option<T> {
        let at = self.items.iter().position(|item| item.id() == id)?;
        Some(self.items.remove(at))
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn iter_active(&self) -> impl Iterator<Item = &T> {
        self.items.iter().filter(|item| item.active())
    }

    /// Records in the given scope.
    pub fn iter_scope(&self, scope: MediaScope) -> impl Iterator<Item = &T> {
        self.items.iter().filter(move |item| {
            let global = item.id() >= GLOBAL_MEDIA_ID;
            match scope {
                MediaScope::Global => global,
                MediaScope::Local => !global,
            }
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Writes the records in `scope`. With `prune_inactive`, inactive
    /// records are dropped from the saved form.
    pub fn write_scope(
        &self,
        out: &mut OutputDataFile,
        scope: MediaScope,
        prune_inactive: bool,
    ) -> Result<(), DataFileError> {
        let records: Vec<&T> = self
            .iter_scope(scope)
            .filter(|item| !prune_inactive || item.active())
            .collect();
        out.put_u32(records.len() as u32)?;
        for record in records {
            record.write(out)?;
        }
        Ok(())
    }

    /// Reads a scope's records, merging them in and reassigning any
    /// duplicate ids.
    pub fn read_scope(&mut self, input: &mut InputDataFile) -> PosResult<()> {
        let count = input.get_u32()?;
        for _ in 0..count {
            self.insert(T::read(input)?);
        }
        Ok(())
    }
}
