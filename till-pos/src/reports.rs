//! Report data flow.
//!
//! Reports are rows of attributed text built by generators over the
//! live system or an archive. Formatting beyond column math stays with
//! the rendering layer; what the kernel owns is the accumulator and the
//! data-flow from the check model into it.

use std::collections::BTreeMap;

use common::money::Money;
use serde::{Deserialize, Serialize};

use crate::checks::payment::TenderType;
use crate::checks::Check;
use crate::drawer::Drawer;
use crate::printer::job::attr;

/// One attributed report row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRow {
    pub text: String,
    pub attrs: u8,
}

/// The accumulator generators write into.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    pub title: String,
    pub rows: Vec<ReportRow>,
}

/// Column width reports are laid out to.
const REPORT_WIDTH: usize = 40;

impl Report {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            rows: Vec::new(),
        }
    }

    pub fn text(&mut self, text: impl Into<String>) -> &mut Self {
        self.rows.push(ReportRow {
            text: text.into(),
            attrs: 0,
        });
        self
    }

    pub fn header(&mut self, text: impl Into<String>) -> &mut Self {
        self.rows.push(ReportRow {
            text: text.into(),
            attrs: attr::BOLD,
        });
        self
    }

    /// `label ......... amount`, right-aligned.
    pub fn amount(&mut self, label: &str, amount: Money) -> &mut Self {
        let amount = amount.to_string();
        let pad = REPORT_WIDTH
            .saturating_sub(label.chars().count() + amount.len())
            .max(1);
        self.text(format!("{label}{}{amount}", " ".repeat(pad)))
    }

    pub fn divider(&mut self) -> &mut Self {
        self.text("-".repeat(REPORT_WIDTH))
    }
}

/// Sales summary over a set of checks: gross, tax, tender mix.
pub fn sales_summary<'a>(
    title: &str,
    checks: impl Iterator<Item = &'a Check>,
) -> Report {
    let mut report = Report::new(title);
    let mut gross = Money::ZERO;
    let mut tax = Money::ZERO;
    let mut guests = 0u32;
    let mut count = 0usize;
    let mut tenders: BTreeMap<&'static str, Money> = BTreeMap::new();

    for check in checks.filter(|c| !c.is_training()) {
        count += 1;
        guests += check.guests;
        for sub in check.subs() {
            gross += sub.totals.subtotal;
            tax += sub.totals.total_tax();
            for payment in sub.payments.iter().filter(|p| p.is_valid()) {
                *tenders
                    .entry(tender_label(payment.tender))
                    .or_insert(Money::ZERO) += payment.value;
            }
        }
    }

    report.header(format!("{count} checks / {guests} guests"));
    report.amount("Gross sales", gross);
    report.amount("Tax collected", tax);
    report.divider();
    for (label, total) in tenders {
        report.amount(label, total);
    }
    report
}

/// Drawer balance report: expected vs counted per drawer.
pub fn drawer_balance<'a>(
    drawers: impl Iterator<Item = &'a Drawer>,
) -> Report {
    let mut report = Report::new("Drawer Balance");
    for drawer in drawers {
        report.header(format!("Drawer {}", drawer.serial));
        report.amount("Expected", drawer.expected());
        match drawer.counted {
            Some(counted) => {
                report.amount("Counted", counted);
                report.amount(
                    "Over/short",
                    drawer.over_short().unwrap_or(Money::ZERO),
                );
            }
            None => {
                report.text("Not yet counted");
            }
        }
        report.divider();
    }
    report
}

fn tender_label(tender: TenderType) -> &'static str {
    match tender {
        TenderType::Cash => "Cash",
        TenderType::Check => "Check",
        TenderType::CreditCard => "Credit card",
        TenderType::DebitCard => "Debit card",
        TenderType::GiftCertificate => "Gift certificate",
        TenderType::Coupon => "Coupon",
        TenderType::Comp => "Comp",
        TenderType::Discount => "Discount",
        TenderType::EmployeeMeal => "Employee meal",
        TenderType::RoomCharge => "Room charge",
        TenderType::Tip => "Tip",
        TenderType::ChargedTip => "Charged tip",
        TenderType::Expense => "Expense",
    }
}
