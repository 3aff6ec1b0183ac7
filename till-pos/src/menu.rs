//! Menu reference data consumed by checks.
//!
//! The full menu editor lives outside the kernel; what the kernel needs
//! is the item → family → tax-bucket mapping and per-item printer
//! overrides used at send time.

use common::money::Money;
use serde::{Deserialize, Serialize};

use crate::error::{PosError, PosResult};

/// Sales families group items for routing and reporting. The on-disk
/// codes are stable.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ItemFamily {
    Appetizer,
    Entree,
    Dessert,
    Beverage,
    Beer,
    Wine,
    Liquor,
    Room,
    Merchandise,
    Specialty,
}

impl ItemFamily {
    pub const ALL: [Self; 10] = [
        Self::Appetizer,
        Self::Entree,
        Self::Dessert,
        Self::Beverage,
        Self::Beer,
        Self::Wine,
        Self::Liquor,
        Self::Room,
        Self::Merchandise,
        Self::Specialty,
    ];

    pub fn to_code(self) -> u8 {
        match self {
            Self::Appetizer => 0,
            Self::Entree => 1,
            Self::Dessert => 2,
            Self::Beverage => 3,
            Self::Beer => 4,
            Self::Wine => 5,
            Self::Liquor => 6,
            Self::Room => 7,
            Self::Merchandise => 8,
            Self::Specialty => 9,
        }
    }

    pub fn from_code(code: u8) -> PosResult<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.to_code() == code)
            .ok_or_else(|| {
                PosError::protocol(format!("unknown item family code {code}"))
            })
    }

    /// Index into the family → printer/video target arrays.
    pub fn index(self) -> usize {
        usize::from(self.to_code())
    }

    /// Which tax bucket sales in this family accrue to.
    pub fn tax_bucket(self) -> TaxBucket {
        match self {
            Self::Appetizer
            | Self::Entree
            | Self::Dessert
            | Self::Beverage
            | Self::Specialty => TaxBucket::Food,
            Self::Beer | Self::Wine | Self::Liquor => TaxBucket::Alcohol,
            Self::Room => TaxBucket::Room,
            Self::Merchandise => TaxBucket::Merchandise,
        }
    }
}

/// The four taxable subtotals tracked per subcheck.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum TaxBucket {
    Food,
    Alcohol,
    Room,
    Merchandise,
}

/// One orderable menu item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SalesItem {
    pub name: String,
    pub family: ItemFamily,
    pub price: Money,
    /// `None` routes through the family target table at send time.
    pub printer_override: Option<u8>,
}

/// The in-memory menu, keyed by item name.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Menu {
    items: Vec<SalesItem>,
}

impl Menu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, item: SalesItem) {
        self.items.push(item);
    }

    pub fn find(&self, name: &str) -> Option<&SalesItem> {
        self.items.iter().find(|item| item.name == name)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn family_codes_roundtrip() {
        for family in ItemFamily::ALL {
            assert_eq!(
                ItemFamily::from_code(family.to_code()).unwrap(),
                family
            );
        }
        assert!(ItemFamily::from_code(200).is_err());
    }

    #[test]
    fn buckets() {
        assert_eq!(ItemFamily::Entree.tax_bucket(), TaxBucket::Food);
        assert_eq!(ItemFamily::Wine.tax_bucket(), TaxBucket::Alcohol);
        assert_eq!(ItemFamily::Room.tax_bucket(), TaxBucket::Room);
        assert_eq!(
            ItemFamily::Merchandise.tax_bucket(),
            TaxBucket::Merchandise
        );
    }
}
