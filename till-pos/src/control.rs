//! `Control`: the registry of attached terminals and printer channels.
//!
//! The control loop owns every [`Terminal`] and routes cross-terminal
//! updates between them. Delivery is best-effort; a terminal that has
//! disconnected simply isn't in the list any more.

use tracing::{info, warn};

use crate::error::{PosError, PosResult};
use crate::printer::channel::{PrinterCommand, PrinterHandle};
use crate::printer::PrinterEntry;
use crate::terminal::signal::Update;
use crate::terminal::{Intent, Terminal, EDIT_OFF};

pub struct Control {
    terminals: Vec<Terminal>,
    printers: Vec<(PrinterEntry, PrinterHandle)>,
}

impl Control {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            terminals: Vec::new(),
            printers: Vec::new(),
        }
    }

    // --- Terminals --- //

    pub fn add_terminal(&mut self, terminal: Terminal) -> PosResult<()> {
        if self.find_terminal(&terminal.name).is_some() {
            return Err(PosError::State("terminal name already in use"));
        }
        info!("terminal '{}' attached", terminal.name);
        self.terminals.push(terminal);
        Ok(())
    }

    /// Detaches a terminal (display went away).
    pub fn remove_terminal(&mut self, name: &str) -> Option<Terminal> {
        let at = self.terminals.iter().position(|t| t.name == name)?;
        info!("terminal '{name}' detached");
        Some(self.terminals.remove(at))
    }

    pub fn find_terminal(&self, name: &str) -> Option<&Terminal> {
        self.terminals.iter().find(|t| t.name == name)
    }

    pub fn find_terminal_mut(&mut self, name: &str) -> Option<&mut Terminal> {
        self.terminals.iter_mut().find(|t| t.name == name)
    }

    pub fn terminals(&self) -> &[Terminal] {
        &self.terminals
    }

    pub fn terminals_mut(&mut self) -> &mut [Terminal] {
        &mut self.terminals
    }

    /// Whether `employee_id` is signed in on a terminal other than
    /// `except`.
    pub fn employee_online_elsewhere(
        &self,
        employee_id: u32,
        except: &str,
    ) -> bool {
        self.terminals.iter().any(|t| {
            t.name != except && t.employee_id == Some(employee_id)
        })
    }

    /// Any terminal sitting in an edit mode blocks auto-save.
    pub fn any_terminal_in_edit(&self) -> bool {
        self.terminals.iter().any(|t| t.edit > EDIT_OFF)
    }

    /// Forces every terminal out of edit mode, keeping changes. Used on
    /// shutdown. Returns the page-persist intents to run.
    pub fn force_exit_edit_modes(&mut self) -> Vec<Intent> {
        let mut intents = Vec::new();
        for terminal in &mut self.terminals {
            if terminal.edit > EDIT_OFF {
                info!(
                    "forcing terminal '{}' out of edit mode",
                    terminal.name,
                );
                intents.extend(terminal.leave_edit(true));
            }
        }
        intents
    }

    /// Routes an update from `origin` to every peer; returns the names
    /// of terminals whose current page listens for it.
    pub fn broadcast_update(
        &mut self,
        update: Update,
        origin: &str,
    ) -> Vec<String> {
        self.terminals
            .iter()
            .filter(|t| t.name != origin && t.needs_redraw(update))
            .map(|t| t.name.clone())
            .collect()
    }

    // --- Printers --- //

    pub fn add_printer(
        &mut self,
        entry: PrinterEntry,
        handle: PrinterHandle,
    ) {
        info!(
            "printer {} attached (target {:?})",
            entry.number, entry.target,
        );
        self.printers.push((entry, handle));
    }

    pub fn printer_for_target(
        &self,
        target: crate::printer::PrinterTargetCode,
    ) -> Option<&PrinterHandle> {
        self.printers
            .iter()
            .find(|(entry, _)| entry.target == target)
            .map(|(_, handle)| handle)
    }

    pub fn printer_count(&self) -> usize {
        self.printers.len()
    }

    /// Kills a dead printer channel: best-effort `Die`, then drop the
    /// entry. The persistence supervisor is told via its health flag by
    /// the caller.
    pub fn kill_printer(&mut self, number: u8) -> Option<PrinterEntry> {
        let at = self
            .printers
            .iter()
            .position(|(entry, _)| entry.number == number)?;
        let (entry, handle) = self.printers.remove(at);
        warn!("killing printer channel {number}");
        let _ = handle.try_send(PrinterCommand::Die);
        Some(entry)
    }
}
