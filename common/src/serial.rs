//! Monotone 31-bit serial numbers.
//!
//! Every check and drawer gets one at creation. Serials are assigned by a
//! single counter persisted with the system state and are never reused
//! within a data directory, including across end-of-day resets.

use std::fmt::{self, Display};

#[cfg(test)]
use proptest::arbitrary::Arbitrary;
#[cfg(test)]
use proptest::strategy::{BoxedStrategy, Strategy};
use serde::{Deserialize, Serialize};

/// A positive, monotone entity id. The contained value is always > 0.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Hash,
    Ord,
    PartialOrd,
    Serialize,
    Deserialize,
)]
pub struct SerialNumber(i32);

impl SerialNumber {
    pub fn new(value: i32) -> Option<Self> {
        (value > 0).then_some(Self(value))
    }

    pub fn value(self) -> i32 {
        self.0
    }
}

impl Display for SerialNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Hands out serials. The next value is persisted so restarts and
/// end-of-day resets continue the sequence instead of restarting it.
#[derive(Debug, Serialize, Deserialize)]
pub struct SerialCounter {
    next: i32,
}

impl SerialCounter {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Resumes from a persisted counter value.
    pub fn resume_from(next: i32) -> Self {
        Self { next: next.max(1) }
    }

    pub fn next_serial(&mut self) -> SerialNumber {
        let serial = SerialNumber(self.next);
        // 31-bit wrap guard: a store would need centuries of checks to get
        // here, but a poisoned data file could.
        self.next = self.next.checked_add(1).unwrap_or(1).max(1);
        serial
    }

    /// The value to persist so the sequence continues after a restart.
    pub fn peek_next(&self) -> i32 {
        self.next
    }
}

impl Default for SerialCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl Arbitrary for SerialNumber {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;
    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        (1..i32::MAX).prop_map(SerialNumber).boxed()
    }
}
