//! One applied tender on a subcheck.

use common::datafile::{DataFileError, InputDataFile, OutputDataFile};
use common::money::Money;
use serde::{Deserialize, Serialize};

use crate::credit::Credit;
use crate::error::{PosError, PosResult};

/// Tender kinds, with their on-disk codes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TenderType {
    Cash,
    Check,
    CreditCard,
    DebitCard,
    GiftCertificate,
    Coupon,
    Comp,
    Discount,
    EmployeeMeal,
    RoomCharge,
    /// A cash tip declared at settle time.
    Tip,
    /// A tip charged to a card; increases the balance due rather than
    /// paying it down.
    ChargedTip,
    Expense,
}

impl TenderType {
    pub const ALL: [Self; 13] = [
        Self::Cash,
        Self::Check,
        Self::CreditCard,
        Self::DebitCard,
        Self::GiftCertificate,
        Self::Coupon,
        Self::Comp,
        Self::Discount,
        Self::EmployeeMeal,
        Self::RoomCharge,
        Self::Tip,
        Self::ChargedTip,
        Self::Expense,
    ];

    pub fn to_code(self) -> u8 {
        match self {
            Self::Cash => 1,
            Self::Check => 2,
            Self::CreditCard => 3,
            Self::DebitCard => 4,
            Self::GiftCertificate => 5,
            Self::Coupon => 6,
            Self::Comp => 7,
            Self::Discount => 8,
            Self::EmployeeMeal => 9,
            Self::RoomCharge => 10,
            Self::Tip => 11,
            Self::ChargedTip => 12,
            Self::Expense => 13,
        }
    }

    pub fn from_code(code: u8) -> PosResult<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.to_code() == code)
            .ok_or_else(|| {
                PosError::protocol(format!("unknown tender code {code}"))
            })
    }

    /// Tenders whose value is recomputed from a media catalogue rule
    /// whenever the subcheck changes.
    pub fn is_media(self) -> bool {
        matches!(
            self,
            Self::Coupon | Self::Comp | Self::Discount | Self::EmployeeMeal
        )
    }

    pub fn is_tip(self) -> bool {
        matches!(self, Self::Tip | Self::ChargedTip)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Valid,
    Voided,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub tender: TenderType,
    /// Media catalogue row this tender draws its rule from, when any.
    pub tender_id: Option<i32>,
    /// Nominal amount (what the customer handed over or was charged).
    pub amount: Money,
    /// Effective amount applied against the balance. Signed: refunds are
    /// negative, and a charged tip carries a negative value because it
    /// increases what is owed.
    pub value: Money,
    pub status: PaymentStatus,
    pub credit: Option<Credit>,
    /// Serial of the drawer that took this tender, when cash-handling.
    pub drawer_serial: Option<i32>,
}

impl Payment {
    pub fn new(tender: TenderType, amount: Money) -> Self {
        let value = match tender {
            // The tip increases the balance due; see the module docs on
            // totals for how this keeps the balance identity literal.
            TenderType::ChargedTip => -amount,
            _ => amount,
        };
        Self {
            tender,
            tender_id: None,
            amount,
            value,
            status: PaymentStatus::Valid,
            credit: None,
            drawer_serial: None,
        }
    }

    pub fn with_media_id(mut self, id: i32) -> Self {
        self.tender_id = Some(id);
        self
    }

    pub fn with_credit(mut self, credit: Credit) -> Self {
        self.credit = Some(credit);
        self
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.status, PaymentStatus::Valid)
    }

    pub fn void(&mut self) {
        self.status = PaymentStatus::Voided;
    }

    // --- File I/O --- //

    pub fn write(&self, out: &mut OutputDataFile) -> Result<(), DataFileError> {
        out.put_u8(self.tender.to_code())?;
        out.put_i32(self.tender_id.unwrap_or(-1))?;
        out.put_i64(self.amount.cents())?;
        out.put_i64(self.value.cents())?;
        out.put_bool(self.is_valid())?;
        out.put_i32(self.drawer_serial.unwrap_or(-1))?;
        out.put_bool(self.credit.is_some())?;
        if let Some(credit) = &self.credit {
            credit.write(out)?;
        }
        Ok(())
    }

    pub fn read(input: &mut InputDataFile) -> PosResult<Self> {
        let tender = TenderType::from_code(input.get_u8()?)?;
        let tender_id = input.get_i32()?;
        let amount = Money::from_cents(input.get_i64()?);
        let value = Money::from_cents(input.get_i64()?);
        let valid = input.get_bool()?;
        let drawer_serial = input.get_i32()?;
        let credit = if input.get_bool()? {
            Some(Credit::read(input)?)
        } else {
            None
        };
        Ok(Self {
            tender,
            tender_id: (tender_id >= 0).then_some(tender_id),
            amount,
            value,
            status: if valid {
                PaymentStatus::Valid
            } else {
                PaymentStatus::Voided
            },
            credit,
            drawer_serial: (drawer_serial >= 0).then_some(drawer_serial),
        })
    }
}
