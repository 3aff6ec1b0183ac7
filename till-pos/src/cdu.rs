//! Customer display units.
//!
//! A CDU is a 2×20 character pole display driven over the printer-style
//! channel. The kernel composes the two lines (item / total while
//! ordering, change due at settle) and the attribute commands the
//! hardware understands.

use common::money::Money;

/// Display geometry.
pub const CDU_WIDTH: usize = 20;
pub const CDU_LINES: usize = 2;

/// CDU command bytes.
pub mod command {
    /// Clear the display and home the cursor.
    pub const CLEAR: u8 = 0x0c;
    /// Home without clearing.
    pub const HOME: u8 = 0x0b;
    /// Advance to the second line.
    pub const NEWLINE: u8 = 0x0a;
}

/// One full display refresh: clear, line one, newline, line two.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CduFrame {
    pub top: String,
    pub bottom: String,
}

impl CduFrame {
    /// Builds a frame, clipping / padding both lines to the display
    /// width.
    pub fn new(top: &str, bottom: &str) -> Self {
        Self {
            top: fit(top),
            bottom: fit(bottom),
        }
    }

    /// `item ......... price` on top, running total below.
    pub fn item_total(item: &str, price: Money, total: Money) -> Self {
        Self::new(
            &split_line(item, &price.to_string()),
            &split_line("Total", &total.to_string()),
        )
    }

    /// Settle display: amount tendered and change due.
    pub fn change_due(tendered: Money, change: Money) -> Self {
        Self::new(
            &split_line("Tendered", &tendered.to_string()),
            &split_line("Change", &change.to_string()),
        )
    }

    pub fn blank() -> Self {
        Self::new("", "")
    }

    /// Encodes the frame for the wire.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = vec![command::CLEAR];
        bytes.extend_from_slice(self.top.as_bytes());
        bytes.push(command::NEWLINE);
        bytes.extend_from_slice(self.bottom.as_bytes());
        bytes
    }
}

/// Left text, right text, single spaced gap, clipped to width.
fn split_line(left: &str, right: &str) -> String {
    if left.len() + right.len() + 1 > CDU_WIDTH {
        let keep = CDU_WIDTH.saturating_sub(right.len() + 1);
        let left: String = left.chars().take(keep).collect();
        return format!("{left} {right}");
    }
    let pad = CDU_WIDTH - left.len() - right.len();
    format!("{left}{}{right}", " ".repeat(pad))
}

fn fit(s: &str) -> String {
    let mut line: String = s.chars().take(CDU_WIDTH).collect();
    while line.len() < CDU_WIDTH {
        line.push(' ');
    }
    line
}
