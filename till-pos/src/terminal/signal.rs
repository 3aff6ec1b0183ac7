//! The textual signal surface.
//!
//! A signal is a short lowercase command, optionally followed by
//! numeric arguments (`"jump 14"`, `"tender 3 1200"`). Signals come
//! from zone definitions users edit, so the string surface is stable;
//! dispatch behind it goes through a handler per zone kind rather than
//! string comparisons scattered around the codebase.

use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signal {
    pub command: String,
    pub args: Vec<i64>,
}

impl Signal {
    /// Parses `command arg arg …`; the command is lowercased, trailing
    /// non-numeric words are ignored.
    pub fn parse(raw: &str) -> Self {
        let mut words = raw.split_whitespace();
        let command = words
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        let args = words.filter_map(|w| w.parse().ok()).collect();
        Self { command, args }
    }

    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(command: impl Into<String>, args: Vec<i64>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    pub fn arg(&self, index: usize) -> Option<i64> {
        self.args.get(index).copied()
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.command)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// What a dialog or zone did with a signal.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SignalResult {
    /// Consumed.
    Okay,
    /// Not interested; keep routing.
    Ignored,
    /// Consumed, and the terminal should stop routing entirely.
    End,
    /// Consumed but failed; an error banner is up.
    Error,
}

impl SignalResult {
    pub fn consumed(self) -> bool {
        !matches!(self, Self::Ignored)
    }
}

/// Cross-terminal update notice: which state changed, plus one value
/// (table id, check serial) for targeted redraws.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Update {
    pub flags: u32,
    pub value: i64,
}

/// Update flag bits.
pub mod update {
    pub const MINUTE: u32 = 1 << 0;
    pub const HOUR: u32 = 1 << 1;
    pub const TIMEOUT: u32 = 1 << 2;
    pub const BLINK: u32 = 1 << 3;
    pub const MEAL_PERIOD: u32 = 1 << 4;
    pub const USERS: u32 = 1 << 5;
    pub const CHECKS: u32 = 1 << 6;
    pub const ORDERS: u32 = 1 << 7;
    pub const ORDER_SELECT: u32 = 1 << 8;
    pub const PAYMENTS: u32 = 1 << 9;
    pub const TABLE: u32 = 1 << 10;
    pub const ALL_TABLES: u32 = 1 << 11;
    pub const MENU: u32 = 1 << 12;
    pub const SETTINGS: u32 = 1 << 13;
    pub const TERMINALS: u32 = 1 << 14;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_command_and_args() {
        let signal = Signal::parse("Tender 3 1200");
        assert_eq!(signal.command, "tender");
        assert_eq!(signal.args, vec![3, 1200]);
        assert_eq!(signal.arg(0), Some(3));
        assert_eq!(signal.arg(2), None);
    }

    #[test]
    fn parse_ignores_word_arguments() {
        let signal = Signal::parse("jump next 14");
        assert_eq!(signal.command, "jump");
        assert_eq!(signal.args, vec![14]);
        assert_eq!(Signal::parse(""), Signal::new(""));
    }

    #[test]
    fn display_roundtrips() {
        let signal = Signal::with_args("tender", vec![3, 1200]);
        assert_eq!(Signal::parse(&signal.to_string()), signal);
    }
}
