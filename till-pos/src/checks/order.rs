//! One menu-item instance on a subcheck, with its modifier chain.

use common::datafile::{DataFileError, InputDataFile, OutputDataFile};
use common::money::Money;
use serde::{Deserialize, Serialize};

use crate::error::{PosError, PosResult};
use crate::menu::ItemFamily;
use crate::printer::PrinterTargetCode;
use crate::settings::Settings;

/// Order status bits.
pub mod flags {
    /// Sent to its kitchen printer / video target. Only a void clears it.
    pub const SENT: u32 = 1 << 0;
    pub const VOIDED: u32 = 1 << 1;
    pub const COMPED: u32 = 1 << 2;
    pub const REDUCED: u32 = 1 << 3;
    pub const EMPLOYEE_MEAL: u32 = 1 << 4;
}

/// Qualifier bits carried on kitchen output ("no onions", "extra", …).
pub mod qualifier {
    pub const NONE: u32 = 0;
    /// Doubles the item; price scales by `settings.double_mult`.
    pub const DOUBLE: u32 = 1 << 0;
    pub const NO: u32 = 1 << 1;
    pub const EXTRA: u32 = 1 << 2;
    pub const LITE: u32 = 1 << 3;
    pub const SIDE: u32 = 1 << 4;
    pub const TOGO: u32 = 1 << 5;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ItemType {
    Normal,
    /// Attached to a parent order; never stands alone.
    Modifier,
    /// Sold by weight; `count` stays the integer unit count and the
    /// weight lives in `weight_hundredths`.
    Weighted,
    Combo,
}

impl ItemType {
    fn to_code(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Modifier => 1,
            Self::Weighted => 2,
            Self::Combo => 3,
        }
    }

    fn from_code(code: u8) -> PosResult<Self> {
        match code {
            0 => Ok(Self::Normal),
            1 => Ok(Self::Modifier),
            2 => Ok(Self::Weighted),
            3 => Ok(Self::Combo),
            _ => Err(PosError::protocol(format!(
                "unknown item type code {code}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub item_name: String,
    pub item_type: ItemType,
    pub family: ItemFamily,
    pub count: u32,
    /// Pre-discount unit price.
    pub item_cost: Money,
    /// Hundredths of the sale unit, for weighted items.
    pub weight_hundredths: Option<u32>,
    pub seat: u32,
    pub qualifiers: u32,
    /// `DEFAULT` resolves through the family target table at send time.
    pub printer_target: PrinterTargetCode,
    pub flags: u32,
    /// Amount knocked off when `REDUCED` is set.
    pub reduction: Money,
    /// Modifier chain; every modifier lives on exactly one parent.
    pub modifiers: Vec<Order>,
}

impl Order {
    pub fn new(
        item_name: impl Into<String>,
        family: ItemFamily,
        item_cost: Money,
    ) -> Self {
        Self {
            item_name: item_name.into(),
            item_type: ItemType::Normal,
            family,
            count: 1,
            item_cost,
            weight_hundredths: None,
            seat: 0,
            qualifiers: qualifier::NONE,
            printer_target: PrinterTargetCode::DEFAULT,
            flags: 0,
            reduction: Money::ZERO,
            modifiers: Vec::new(),
        }
    }

    pub fn modifier(
        item_name: impl Into<String>,
        family: ItemFamily,
        item_cost: Money,
    ) -> Self {
        Self {
            item_type: ItemType::Modifier,
            ..Self::new(item_name, family, item_cost)
        }
    }

    /// Attaches a modifier. Modifiers cannot carry modifiers of their
    /// own, and only modifier-typed orders may be attached.
    pub fn add_modifier(&mut self, modifier: Order) -> PosResult<()> {
        if self.item_type == ItemType::Modifier {
            return Err(PosError::State("modifiers cannot nest"));
        }
        if modifier.item_type != ItemType::Modifier {
            return Err(PosError::State("only modifiers attach to orders"));
        }
        self.modifiers.push(modifier);
        Ok(())
    }

    // --- Status bits --- //

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    pub fn is_sent(&self) -> bool {
        self.has_flag(flags::SENT)
    }

    pub fn is_voided(&self) -> bool {
        self.has_flag(flags::VOIDED)
    }

    pub fn mark_sent(&mut self) {
        self.flags |= flags::SENT;
        for modifier in &mut self.modifiers {
            modifier.flags |= flags::SENT;
        }
    }

    /// Voiding is the only way to clear the sent bit.
    pub fn void(&mut self) {
        self.flags |= flags::VOIDED;
        self.flags &= !flags::SENT;
        for modifier in &mut self.modifiers {
            modifier.void();
        }
    }

    pub fn comp(&mut self) {
        self.flags |= flags::COMPED;
    }

    pub fn reduce(&mut self, amount: Money) {
        self.flags |= flags::REDUCED;
        self.reduction = amount;
    }

    // --- Costing --- //

    /// Gross line price before per-order adjustments: unit price times
    /// count (or weight), scaled for the double qualifier, plus the
    /// modifier chain.
    pub fn gross(&self, settings: &Settings) -> Money {
        let mut base = match self.weight_hundredths {
            Some(weight) => Money::from_cents(
                (i128::from(self.item_cost.cents()) * i128::from(weight)
                    / 100) as i64,
            ),
            None => self
                .item_cost
                .checked_mul(i64::from(self.count))
                .unwrap_or(Money::ZERO),
        };
        if self.qualifiers & qualifier::DOUBLE != 0 {
            // The only float in costing; the multiplier comes from the
            // settings editor.
            base = Money::from_cents(
                (base.cents() as f64 * settings.double_mult).round() as i64,
            );
        }
        let modifiers: Money = self
            .modifiers
            .iter()
            .map(|modifier| modifier.gross(settings))
            .sum();
        base + modifiers
    }

    /// What this line contributes to the subtotal after per-order comps,
    /// voids, and reductions.
    pub fn sale_value(&self, settings: &Settings) -> Money {
        if self.is_voided() || self.has_flag(flags::COMPED) {
            return Money::ZERO;
        }
        let value = self.gross(settings) - self.reduction;
        if value.is_negative() {
            Money::ZERO
        } else {
            value
        }
    }

    // --- File I/O --- //

    pub fn write(&self, out: &mut OutputDataFile) -> Result<(), DataFileError> {
        out.put_str(&self.item_name)?;
        out.put_u8(self.item_type.to_code())?;
        out.put_u8(self.family.to_code())?;
        out.put_u32(self.count)?;
        out.put_i64(self.item_cost.cents())?;
        out.put_bool(self.weight_hundredths.is_some())?;
        out.put_u32(self.weight_hundredths.unwrap_or(0))?;
        out.put_u32(self.seat)?;
        out.put_u32(self.qualifiers)?;
        out.put_u8(self.printer_target.0)?;
        out.put_u32(self.flags)?;
        out.put_i64(self.reduction.cents())?;
        out.put_u32(self.modifiers.len() as u32)?;
        for modifier in &self.modifiers {
            modifier.write(out)?;
        }
        Ok(())
    }

    pub fn read(input: &mut InputDataFile) -> PosResult<Self> {
        let item_name = input.get_str()?;
        let item_type = ItemType::from_code(input.get_u8()?)?;
        let family = ItemFamily::from_code(input.get_u8()?)?;
        let count = input.get_u32()?;
        let item_cost = Money::from_cents(input.get_i64()?);
        let has_weight = input.get_bool()?;
        let weight = input.get_u32()?;
        let seat = input.get_u32()?;
        let qualifiers = input.get_u32()?;
        let printer_target = PrinterTargetCode(input.get_u8()?);
        let flags = input.get_u32()?;
        let reduction = Money::from_cents(input.get_i64()?);
        let modifier_count = input.get_u32()?;
        let mut modifiers = Vec::with_capacity(modifier_count as usize);
        for _ in 0..modifier_count {
            let modifier = Order::read(input)?;
            if modifier.item_type != ItemType::Modifier {
                return Err(PosError::protocol(
                    "non-modifier nested under an order",
                ));
            }
            modifiers.push(modifier);
        }
        Ok(Self {
            item_name,
            item_type,
            family,
            count,
            item_cost,
            weight_hundredths: has_weight.then_some(weight),
            seat,
            qualifiers,
            printer_target,
            flags,
            reduction,
            modifiers,
        })
    }
}
