//! Cash drawer lifecycle: new → open → pulled → balanced.

use common::datafile::{DataFileError, InputDataFile, OutputDataFile};
use common::money::Money;
use common::serial::SerialNumber;
use common::time_info::TimeInfo;
use serde::{Deserialize, Serialize};

use crate::error::{PosError, PosResult};

pub const DRAWER_VERSION: u32 = 1;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DrawerStatus {
    New,
    Open,
    Pulled,
    Balanced,
}

impl DrawerStatus {
    fn to_code(self) -> u8 {
        match self {
            Self::New => 0,
            Self::Open => 1,
            Self::Pulled => 2,
            Self::Balanced => 3,
        }
    }

    fn from_code(code: u8) -> PosResult<Self> {
        match code {
            0 => Ok(Self::New),
            1 => Ok(Self::Open),
            2 => Ok(Self::Pulled),
            3 => Ok(Self::Balanced),
            _ => Err(PosError::protocol(format!(
                "unknown drawer status code {code}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Drawer {
    pub serial: SerialNumber,
    pub status: DrawerStatus,
    /// Employee the drawer is assigned to.
    pub owner_id: Option<u32>,
    /// Starting float.
    pub float: Money,
    /// Cash tendered into the drawer over its life.
    pub cash_applied: Money,
    /// Counted at balance time.
    pub counted: Option<Money>,
    pub time_opened: TimeInfo,
    pub time_pulled: Option<TimeInfo>,
}

impl Drawer {
    pub fn new(serial: SerialNumber, float: Money, now: TimeInfo) -> Self {
        Self {
            serial,
            status: DrawerStatus::New,
            owner_id: None,
            float,
            cash_applied: Money::ZERO,
            counted: None,
            time_opened: now,
            time_pulled: None,
        }
    }

    pub fn assign(&mut self, employee_id: u32) -> PosResult<()> {
        if !matches!(self.status, DrawerStatus::New | DrawerStatus::Open) {
            return Err(PosError::State("drawer already pulled"));
        }
        self.owner_id = Some(employee_id);
        self.status = DrawerStatus::Open;
        Ok(())
    }

    pub fn apply_cash(&mut self, amount: Money) -> PosResult<()> {
        if !matches!(self.status, DrawerStatus::Open) {
            return Err(PosError::State("drawer is not open"));
        }
        self.cash_applied += amount;
        Ok(())
    }

    /// Removes the drawer from service pending a count.
    pub fn pull(&mut self, now: TimeInfo) -> PosResult<()> {
        if !matches!(self.status, DrawerStatus::Open) {
            return Err(PosError::State("drawer is not open"));
        }
        self.status = DrawerStatus::Pulled;
        self.time_pulled = Some(now);
        Ok(())
    }

    /// Records the counted cash and closes the lifecycle.
    pub fn balance(&mut self, counted: Money) -> PosResult<()> {
        if !matches!(self.status, DrawerStatus::Pulled) {
            return Err(PosError::State("drawer must be pulled first"));
        }
        self.counted = Some(counted);
        self.status = DrawerStatus::Balanced;
        Ok(())
    }

    pub fn expected(&self) -> Money {
        self.float + self.cash_applied
    }

    /// Counted minus expected; negative means short.
    pub fn over_short(&self) -> Option<Money> {
        self.counted.map(|counted| counted - self.expected())
    }

    /// Whether end-of-day may proceed with this drawer.
    pub fn settled_for_endday(&self) -> bool {
        matches!(self.status, DrawerStatus::Pulled | DrawerStatus::Balanced)
            || (matches!(self.status, DrawerStatus::New)
                && self.cash_applied.is_zero())
    }

    // --- File I/O --- //

    pub fn write(&self, out: &mut OutputDataFile) -> Result<(), DataFileError> {
        out.put_i32(self.serial.value())?;
        out.put_u8(self.status.to_code())?;
        out.put_i32(self.owner_id.map_or(-1, |id| id as i32))?;
        out.put_i64(self.float.cents())?;
        out.put_i64(self.cash_applied.cents())?;
        out.put_bool(self.counted.is_some())?;
        out.put_i64(self.counted.unwrap_or(Money::ZERO).cents())?;
        out.put_str(&self.time_opened.dir_stamp())?;
        out.put_str(
            &self
                .time_pulled
                .map(|t| t.dir_stamp())
                .unwrap_or_default(),
        )
    }

    pub fn read(input: &mut InputDataFile) -> PosResult<Self> {
        let serial = SerialNumber::new(input.get_i32()?)
            .ok_or(PosError::State("drawer serial must be positive"))?;
        let status = DrawerStatus::from_code(input.get_u8()?)?;
        let owner = input.get_i32()?;
        let float = Money::from_cents(input.get_i64()?);
        let cash_applied = Money::from_cents(input.get_i64()?);
        let has_counted = input.get_bool()?;
        let counted_cents = input.get_i64()?;
        let time_opened = TimeInfo::parse_dir_stamp(&input.get_str()?)
            .ok_or_else(|| PosError::protocol("bad drawer open stamp"))?;
        let pulled_stamp = input.get_str()?;
        let time_pulled = if pulled_stamp.is_empty() {
            None
        } else {
            Some(TimeInfo::parse_dir_stamp(&pulled_stamp).ok_or_else(
                || PosError::protocol("bad drawer pull stamp"),
            )?)
        };
        Ok(Self {
            serial,
            status,
            owner_id: (owner >= 0).then_some(owner as u32),
            float,
            cash_applied,
            counted: has_counted.then_some(Money::from_cents(counted_cents)),
            time_opened,
            time_pulled,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn now() -> TimeInfo {
        TimeInfo::from_ymd_hms(2026, 3, 14, 9, 0, 0).unwrap()
    }

    fn drawer() -> Drawer {
        let serial = SerialNumber::new(12).unwrap();
        Drawer::new(serial, Money::from_cents(10_000), now())
    }

    #[test]
    fn lifecycle() {
        let mut d = drawer();
        d.assign(101).unwrap();
        d.apply_cash(Money::from_cents(4_350)).unwrap();
        assert_eq!(d.expected().cents(), 14_350);

        assert!(d.balance(Money::ZERO).is_err());
        d.pull(now()).unwrap();
        assert!(d.apply_cash(Money::from_cents(1)).is_err());
        d.balance(Money::from_cents(14_300)).unwrap();
        assert_eq!(d.over_short().unwrap().cents(), -50);
        assert!(d.settled_for_endday());
    }

    #[test]
    fn file_roundtrip() {
        let mut d = drawer();
        d.assign(101).unwrap();
        d.apply_cash(Money::from_cents(999)).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drawer_12.dat");
        let mut out =
            OutputDataFile::create(&path, DRAWER_VERSION).unwrap();
        d.write(&mut out).unwrap();
        out.commit().unwrap();

        let mut input =
            InputDataFile::open(&path, DRAWER_VERSION, DRAWER_VERSION)
                .unwrap();
        assert_eq!(Drawer::read(&mut input).unwrap(), d);
    }
}
