//! Print job composition.
//!
//! A job is built into a temporary file under `/tmp/vt_<host>`: a
//! model-specific init sequence, attributed text lines, then trailing
//! linefeeds and a cut (or a formfeed for page printers). The file path
//! is handed to the subprocess via the `FILE` frame; the subprocess
//! reports back when it can be deleted.

use std::io::Write;
use std::path::{Path, PathBuf};

use common::money::Money;

use super::PrinterModel;
use crate::checks::{Check, SubCheck};
use crate::error::PosResult;
use crate::settings::Settings;

/// Per-character text attributes.
pub mod attr {
    pub const BOLD: u8 = 1 << 0;
    pub const UNDERLINE: u8 = 1 << 1;
    pub const RED: u8 = 1 << 2;
    pub const LARGE: u8 = 1 << 3;
    pub const NARROW: u8 = 1 << 4;
}

/// Line width used for receipt layout.
const RECEIPT_WIDTH: usize = 40;

/// One composed job, ready to serialize for a printer model.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PrintJob {
    lines: Vec<(String, u8)>,
    trailing_feed: Option<u32>,
}

impl PrintJob {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, text: impl Into<String>) -> &mut Self {
        self.lines.push((text.into(), 0));
        self
    }

    pub fn line_with(
        &mut self,
        text: impl Into<String>,
        attrs: u8,
    ) -> &mut Self {
        self.lines.push((text.into(), attrs));
        self
    }

    /// A `label ........ amount` line, right-aligned to receipt width.
    pub fn money_line(
        &mut self,
        label: &str,
        amount: Money,
        attrs: u8,
    ) -> &mut Self {
        let amount = amount.to_string();
        let pad = RECEIPT_WIDTH
            .saturating_sub(label.chars().count() + amount.len())
            .max(1);
        self.line_with(format!("{label}{}{amount}", " ".repeat(pad)), attrs)
    }

    pub fn feed(&mut self, lines: u32) -> &mut Self {
        self.trailing_feed = Some(lines);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Serializes for `model`: init sequence, escape-coded lines, then
    /// the model's trailing feed and cut (or formfeed).
    pub fn render(&self, model: PrinterModel) -> Vec<u8> {
        let mut bytes = Vec::new();
        match model {
            // Reset the print head.
            PrinterModel::Epson => bytes.extend_from_slice(&[0x1b, 0x3c]),
            PrinterModel::Star => bytes.extend_from_slice(b"\n\n"),
            PrinterModel::Hp => {}
        }
        for (text, attrs) in &self.lines {
            push_attrs(&mut bytes, model, *attrs, true);
            bytes.extend_from_slice(text.as_bytes());
            push_attrs(&mut bytes, model, *attrs, false);
            bytes.push(b'\n');
        }
        for _ in 0..self.trailing_feed.unwrap_or(0) {
            bytes.push(b'\n');
        }
        match model {
            PrinterModel::Epson => {
                bytes.extend_from_slice(&[b'\n'; 13]);
                bytes.extend_from_slice(&[0x1d, 0x56, 0x00]); // cut
            }
            PrinterModel::Star => {
                bytes.extend_from_slice(&[b'\n'; 9]);
                bytes.extend_from_slice(&[0x1b, 0x64, 0x02]); // cut
            }
            PrinterModel::Hp => bytes.push(0x0c), // formfeed
        }
        bytes
    }

    /// Writes the rendered job to `/tmp/vt_<host>` (or under `tmp_root`
    /// when given, for tests) and returns the path for a `FILE` frame.
    pub fn write_to_temp(
        &self,
        host: &str,
        model: PrinterModel,
        tmp_root: Option<&Path>,
    ) -> PosResult<PathBuf> {
        let dir = tmp_root
            .map(Path::to_path_buf)
            .unwrap_or_else(std::env::temp_dir);
        let path = dir.join(format!("vt_{host}"));
        let mut file = std::fs::File::create(&path)?;
        file.write_all(&self.render(model))?;
        file.sync_all()?;
        Ok(path)
    }
}

fn push_attrs(bytes: &mut Vec<u8>, model: PrinterModel, attrs: u8, on: bool) {
    if attrs == 0 || model == PrinterModel::Hp {
        return;
    }
    let flag = u8::from(on);
    if attrs & attr::BOLD != 0 {
        bytes.extend_from_slice(&[0x1b, 0x45, flag]);
    }
    if attrs & attr::UNDERLINE != 0 {
        bytes.extend_from_slice(&[0x1b, 0x2d, flag]);
    }
    if attrs & attr::RED != 0 {
        bytes.extend_from_slice(&[0x1b, 0x72, flag]);
    }
    if attrs & attr::LARGE != 0 {
        bytes.extend_from_slice(&[0x1d, 0x21, if on { 0x11 } else { 0x00 }]);
    }
    if attrs & attr::NARROW != 0 {
        bytes.extend_from_slice(&[0x1b, 0x0f, flag]);
    }
}

/// Composes the customer receipt for one subcheck.
pub fn receipt_for_subcheck(
    check: &Check,
    sub: &SubCheck,
    settings: &Settings,
) -> PrintJob {
    let mut job = PrintJob::new();
    for line in &settings.receipt_header {
        job.line_with(line.clone(), attr::BOLD);
    }
    if !settings.store_name.is_empty() {
        job.line_with(settings.store_name.clone(), attr::BOLD);
    }
    job.line(format!("Check {} - {}", check.serial(), check.label));
    job.line(String::new());

    for order in sub.orders.iter().filter(|o| !o.is_voided()) {
        job.money_line(
            &format!("{} x{}", order.item_name, order.count),
            order.sale_value(settings),
            0,
        );
        for modifier in &order.modifiers {
            job.line(format!("  + {}", modifier.item_name));
        }
    }

    job.line(String::new());
    job.money_line("Subtotal", sub.totals.subtotal, 0);
    let tax = sub.totals.total_tax();
    if !tax.is_zero() {
        job.money_line("Tax", tax, 0);
    }
    if !sub.totals.total_tip.is_zero() {
        job.money_line("Tip", sub.totals.total_tip, 0);
    }
    job.money_line("Total", sub.totals.total_cost, attr::BOLD);
    job.feed(1);
    job
}
