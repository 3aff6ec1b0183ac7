//! Logical printers and order routing.
//!
//! An order carries a [`PrinterTargetCode`]; `DEFAULT` defers to the
//! family target table at send time, `NONE` suppresses output, and the
//! kitchen-notify codes fan out to the primary kitchen plus a notify
//! copy on its alternate.

use serde::{Deserialize, Serialize};

use crate::checks::order::Order;
use crate::error::{PosError, PosResult};
use crate::settings::Settings;

/// The framed subprocess channel.
pub mod channel;
/// Print job composition.
pub mod job;

/// On-disk / on-wire printer target code.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize,
)]
pub struct PrinterTargetCode(pub u8);

impl PrinterTargetCode {
    /// Resolve through the family target table at send time.
    pub const DEFAULT: Self = Self(0);
    pub const KITCHEN1: Self = Self(1);
    pub const KITCHEN2: Self = Self(2);
    pub const BAR1: Self = Self(3);
    pub const BAR2: Self = Self(4);
    pub const EXPEDITER: Self = Self(5);
    pub const RECEIPT: Self = Self(6);
    pub const REPORT: Self = Self(7);
    pub const CREDIT_RECEIPT: Self = Self(8);
    pub const REMOTE_ORDER: Self = Self(9);
    pub const KITCHEN1_NOTIFY: Self = Self(10);
    pub const KITCHEN2_NOTIFY: Self = Self(11);
    pub const KITCHEN3: Self = Self(12);
    pub const KITCHEN4: Self = Self(13);
    pub const KITCHEN3_NOTIFY: Self = Self(14);
    pub const KITCHEN4_NOTIFY: Self = Self(15);
    /// Suppress output entirely.
    pub const NONE: Self = Self(99);

    pub fn is_suppressed(self) -> bool {
        self == Self::NONE
    }

    /// For the notify codes, the `(primary, notify-copy)` pair.
    pub fn notify_pair(self) -> Option<(Self, Self)> {
        match self {
            Self::KITCHEN1_NOTIFY => Some((Self::KITCHEN1, Self::KITCHEN2)),
            Self::KITCHEN2_NOTIFY => Some((Self::KITCHEN2, Self::KITCHEN1)),
            Self::KITCHEN3_NOTIFY => Some((Self::KITCHEN3, Self::KITCHEN4)),
            Self::KITCHEN4_NOTIFY => Some((Self::KITCHEN4, Self::KITCHEN3)),
            _ => None,
        }
    }
}

/// Hardware dialects a job can be composed for.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum PrinterModel {
    Epson,
    Star,
    Hp,
}

impl PrinterModel {
    pub fn to_code(self) -> u8 {
        match self {
            Self::Epson => 0,
            Self::Star => 1,
            Self::Hp => 2,
        }
    }

    pub fn from_code(code: u8) -> PosResult<Self> {
        match code {
            0 => Ok(Self::Epson),
            1 => Ok(Self::Star),
            2 => Ok(Self::Hp),
            _ => Err(PosError::protocol(format!(
                "unknown printer model code {code}"
            ))),
        }
    }
}

/// One configured physical printer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrinterEntry {
    /// Target code this device serves.
    pub target: PrinterTargetCode,
    pub host: String,
    pub port: u16,
    pub model: PrinterModel,
    /// Channel number; names the unix socket and the subprocess.
    pub number: u8,
}

/// Resolves where an order's kitchen output goes. `DEFAULT` consults
/// the family table; notify codes fan out to two targets.
pub fn resolve_order_targets(
    order: &Order,
    settings: &Settings,
) -> Vec<PrinterTargetCode> {
    let code = if order.printer_target == PrinterTargetCode::DEFAULT {
        settings.family_printer[order.family.index()]
    } else {
        order.printer_target
    };
    if code.is_suppressed() || code == PrinterTargetCode::DEFAULT {
        return Vec::new();
    }
    match code.notify_pair() {
        Some((primary, notify)) => vec![primary, notify],
        None => vec![code],
    }
}

#[cfg(test)]
mod test {
    use common::money::Money;

    use super::*;
    use crate::menu::ItemFamily;

    #[test]
    fn default_routes_through_family_table() {
        let mut settings = Settings::default();
        settings.family_printer[ItemFamily::Entree.index()] =
            PrinterTargetCode::KITCHEN1;
        let order =
            Order::new("Steak", ItemFamily::Entree, Money::from_cents(2100));
        assert_eq!(
            resolve_order_targets(&order, &settings),
            vec![PrinterTargetCode::KITCHEN1],
        );
    }

    #[test]
    fn explicit_override_wins() {
        let mut settings = Settings::default();
        settings.family_printer[ItemFamily::Entree.index()] =
            PrinterTargetCode::KITCHEN1;
        let mut order =
            Order::new("Steak", ItemFamily::Entree, Money::from_cents(2100));
        order.printer_target = PrinterTargetCode::BAR1;
        assert_eq!(
            resolve_order_targets(&order, &settings),
            vec![PrinterTargetCode::BAR1],
        );
    }

    #[test]
    fn none_suppresses() {
        let mut settings = Settings::default();
        settings.family_printer[ItemFamily::Beer.index()] =
            PrinterTargetCode::NONE;
        let order =
            Order::new("Pint", ItemFamily::Beer, Money::from_cents(600));
        assert!(resolve_order_targets(&order, &settings).is_empty());
    }

    #[test]
    fn notify_codes_fan_out() {
        let mut settings = Settings::default();
        settings.family_printer[ItemFamily::Entree.index()] =
            PrinterTargetCode::KITCHEN1_NOTIFY;
        let order =
            Order::new("Steak", ItemFamily::Entree, Money::from_cents(2100));
        assert_eq!(
            resolve_order_targets(&order, &settings),
            vec![PrinterTargetCode::KITCHEN1, PrinterTargetCode::KITCHEN2],
        );
    }
}
