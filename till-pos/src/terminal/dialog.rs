//! The per-terminal dialog queue.
//!
//! At most one dialog is current; opening another while one is active
//! queues it (bounded) rather than stacking windows on screen. Idle
//! timeout cancels the current dialog exactly as if the operator had
//! pressed Cancel.

use crate::error::{PosError, PosResult};
use crate::terminal::page::PageId;

/// Queued dialogs tolerated behind the current one.
pub const DIALOG_QUEUE_LIMIT: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DialogKind {
    /// Interstitial password entry; success re-enters the jump as
    /// stealth to `target`.
    Password { target: PageId },
    /// Free-text entry with a prompt.
    GetText { prompt: String },
    /// The card workflow dialog; refuses input while a transaction is
    /// on the wire.
    CreditCard,
    /// Banner with a message and a dismiss button.
    Error { message: String },
}

impl DialogKind {
    /// The cancel signal this dialog understands, used by the idle
    /// timeout to dismiss it as if the operator pressed Cancel.
    pub fn cancel_signal(&self) -> &'static str {
        match self {
            Self::Password { .. } => "passwordcancel",
            Self::GetText { .. } => "gettextcancel",
            Self::CreditCard => "cccancel",
            Self::Error { .. } => "errorcancel",
        }
    }
}

#[derive(Debug, Default)]
pub struct DialogQueue {
    current: Option<DialogKind>,
    next: Vec<DialogKind>,
}

impl DialogQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&DialogKind> {
        self.current.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.current.is_some()
    }

    /// Shows `dialog`, or queues it while another is current.
    pub fn open(&mut self, dialog: DialogKind) -> PosResult<()> {
        if self.current.is_none() {
            self.current = Some(dialog);
            return Ok(());
        }
        if self.next.len() == DIALOG_QUEUE_LIMIT {
            return Err(PosError::State("dialog queue full"));
        }
        self.next.push(dialog);
        Ok(())
    }

    /// Dismisses the current dialog and promotes the next queued one.
    /// Returns what was dismissed.
    pub fn kill(&mut self) -> Option<DialogKind> {
        let killed = self.current.take();
        if !self.next.is_empty() {
            self.current = Some(self.next.remove(0));
        }
        killed
    }

    /// Drops everything, current included.
    pub fn clear(&mut self) {
        self.current = None;
        self.next.clear();
    }
}
