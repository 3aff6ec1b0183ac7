//! The per-terminal state machine.
//!
//! A [`Terminal`] owns everything one display needs between input
//! events: the current page and jump stack, the dialog queue, the login
//! machine, the selected check, the card workflow, and edit state. It
//! holds no references into other terminals or into the check list;
//! model mutations leave here as [`Intent`]s the control loop executes
//! against the [`CheckManager`](crate::checks::manager::CheckManager).

use std::io::Write;
use std::path::Path;

use common::money::Money;
use common::serial::SerialNumber;
use common::time_info::TimeInfo;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::credit::workflow::CardWorkflow;
use crate::employee::{Employee, EmployeeDb};
use crate::error::{PosError, PosResult};
use crate::settings::Settings;

/// Dialog queue.
pub mod dialog;
/// Login sub-machine.
pub mod login;
/// Pages and jumps.
pub mod page;
/// Signals and updates.
pub mod signal;

use dialog::{DialogKind, DialogQueue};
use login::{LoginContext, LoginMachine, LoginState};
use page::{
    resolve_target, JumpKind, Page, PageId, PageSource, PageStack,
    ZoneKind, PAGE_LOGIN,
};
use signal::{Signal, SignalResult, Update};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TerminalKind {
    Normal,
    /// Order entry only; no settle functions.
    OrderOnly,
    Bar,
    /// No table view; order and settle in one flow.
    FastFood,
    KitchenVideo,
    /// Secondary kitchen display (e.g. one for pizza, one for the rest).
    KitchenVideo2,
}

/// Edit levels. 1 puts zones into design mode; 2 is system edit,
/// superuser only.
pub const EDIT_OFF: u8 = 0;
pub const EDIT_ZONES: u8 = 1;
pub const EDIT_SYSTEM: u8 = 2;

/// Model mutations a signal decided on; executed by the control loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Intent {
    NewCheck,
    /// Tender `amount` cents of tender code `code` on the selected
    /// subcheck.
    Tender { code: u8, amount: Money },
    SettleSelected,
    /// Broadcast an update to peer terminals.
    Broadcast(Update),
    /// Persist the zone database after leaving edit mode.
    PersistPages,
}

pub struct Terminal {
    pub name: String,
    pub kind: TerminalKind,
    pub edit: u8,
    pub translate: bool,
    pub page: Page,
    stack: PageStack,
    pub dialogs: DialogQueue,
    pub login: LoginMachine,
    /// Signed-in employee.
    pub employee_id: Option<u32>,
    pub check_serial: Option<SerialNumber>,
    pub selected_subcheck: Option<u32>,
    pub workflow: CardWorkflow,
    /// Last input of any kind; drives the idle timeout.
    pub last_input: TimeInfo,
    macro_record: Option<std::fs::File>,
}

impl Terminal {
    pub fn new(
        name: impl Into<String>,
        kind: TerminalKind,
        pages: &dyn PageSource,
        now: TimeInfo,
    ) -> Self {
        let page = pages
            .page(PAGE_LOGIN)
            .unwrap_or_else(|| Page::bare(PAGE_LOGIN));
        Self {
            name: name.into(),
            kind,
            edit: EDIT_OFF,
            translate: false,
            page,
            stack: PageStack::default(),
            dialogs: DialogQueue::new(),
            login: LoginMachine::new(),
            employee_id: None,
            check_serial: None,
            selected_subcheck: None,
            workflow: CardWorkflow::default(),
            last_input: now,
            macro_record: None,
        }
    }

    pub fn touch(&mut self, now: TimeInfo) {
        self.last_input = now;
    }

    pub fn signed_in(&self) -> bool {
        self.employee_id.is_some()
    }

    // --- Jumps --- //

    pub fn jump(
        &mut self,
        kind: JumpKind,
        target: Option<PageId>,
        pages: &dyn PageSource,
    ) -> PosResult<()> {
        match kind {
            JumpKind::None => Ok(()),
            JumpKind::Normal => {
                let target =
                    target.ok_or(PosError::State("jump needs a target"))?;
                let next = resolve_target(pages, target)?;
                self.stack.push(self.page.id);
                self.page = next;
                Ok(())
            }
            JumpKind::Stealth => {
                let target =
                    target.ok_or(PosError::State("jump needs a target"))?;
                self.page = resolve_target(pages, target)?;
                Ok(())
            }
            JumpKind::Return => {
                let back = self
                    .stack
                    .pop()
                    .unwrap_or_else(|| pages.home_page(self.employee_id));
                self.page = resolve_target(pages, back)?;
                Ok(())
            }
            JumpKind::Home => {
                self.stack.clear();
                let home = pages.home_page(self.employee_id);
                self.page = resolve_target(pages, home)?;
                Ok(())
            }
            JumpKind::Script => match self.page.script_next {
                Some(next) => {
                    self.page = resolve_target(pages, next)?;
                    Ok(())
                }
                None => Err(PosError::State("page has no script")),
            },
            JumpKind::Index => match self.page.index_page {
                Some(index) => {
                    self.page = resolve_target(pages, index)?;
                    Ok(())
                }
                None => Err(PosError::State("page has no index")),
            },
            JumpKind::Password => {
                let target =
                    target.ok_or(PosError::State("jump needs a target"))?;
                resolve_target(pages, target)?;
                self.dialogs.open(DialogKind::Password { target })
            }
        }
    }

    /// The password dialog succeeded; re-enter the deferred jump as
    /// stealth.
    pub fn password_jump_approved(
        &mut self,
        pages: &dyn PageSource,
    ) -> PosResult<()> {
        let Some(DialogKind::Password { target }) =
            self.dialogs.kill()
        else {
            return Err(PosError::State("no password jump pending"));
        };
        self.jump(JumpKind::Stealth, Some(target), pages)
    }

    pub fn page_stack_depth(&self) -> usize {
        self.stack.depth()
    }

    // --- Idle timeout --- //

    /// Whether this terminal has idled past the screen-blank window.
    pub fn is_idle(&self, now: TimeInfo, settings: &Settings) -> bool {
        now.since(self.last_input).as_secs() >= settings.screen_blank_time
    }

    /// Forces an idle terminal back to login: the active dialog is
    /// cancelled as if the operator pressed Cancel, the user signed out,
    /// and the page reset.
    pub fn force_idle_logout(
        &mut self,
        pages: &dyn PageSource,
        now: TimeInfo,
    ) {
        if let Some(dialog) = self.dialogs.current() {
            let cancel = Signal::new(dialog.cancel_signal());
            debug!("{}: idle cancel via '{cancel}'", self.name);
            self.dialogs.clear();
        }
        self.employee_id = None;
        self.check_serial = None;
        self.selected_subcheck = None;
        self.login.clear();
        self.last_input = now;
        if let Some(login) = pages.page(PAGE_LOGIN) {
            self.page = login;
            self.stack.clear();
        }
        info!("{}: idle, forced to login page", self.name);
    }

    // --- Edit mode --- //

    /// Enters edit mode. Level 2 (system edit) demands a superuser;
    /// level 1 any manager.
    pub fn start_edit(
        &mut self,
        level: u8,
        employee: &Employee,
    ) -> PosResult<()> {
        match level {
            EDIT_ZONES if employee.is_manager() => {}
            EDIT_ZONES => {
                return Err(PosError::Permission { role: "manager" })
            }
            EDIT_SYSTEM if employee.is_superuser() => {}
            EDIT_SYSTEM => {
                return Err(PosError::Permission { role: "superuser" })
            }
            _ => return Err(PosError::State("bad edit level")),
        }
        self.edit = level;
        Ok(())
    }

    /// Leaves edit mode. Returns the [`Intent::PersistPages`] the
    /// control loop must run when changes are kept.
    pub fn leave_edit(&mut self, save: bool) -> Option<Intent> {
        if self.edit == EDIT_OFF {
            return None;
        }
        self.edit = EDIT_OFF;
        save.then_some(Intent::PersistPages)
    }

    // --- Redraw --- //

    /// Whether any zone on the current page listens for `update`.
    pub fn needs_redraw(&self, update: Update) -> bool {
        self.page
            .zones
            .iter()
            .any(|zone| zone.update_mask & update.flags != 0)
    }

    // --- Macro record --- //

    pub fn macro_start(&mut self, path: &Path) -> PosResult<()> {
        self.macro_record = Some(std::fs::File::create(path)?);
        Ok(())
    }

    pub fn macro_stop(&mut self) {
        self.macro_record = None;
    }

    pub fn macro_active(&self) -> bool {
        self.macro_record.is_some()
    }

    // --- Signal dispatch --- //

    /// Routes a signal: active dialog first, then the page's zones in
    /// z-order. Returns the routing result and any model mutations for
    /// the control loop.
    pub fn signal(
        &mut self,
        signal: &Signal,
        employees: &mut EmployeeDb,
        settings: &Settings,
        pages: &dyn PageSource,
        ctx: LoginContext,
        now: TimeInfo,
    ) -> (SignalResult, Vec<Intent>) {
        self.touch(now);
        if let Some(file) = self.macro_record.as_mut() {
            let _ = writeln!(file, "{signal}");
        }

        // Kitchen displays never take sign-ins, whatever the control
        // layer says.
        let ctx = LoginContext {
            sign_in_blocked: ctx.sign_in_blocked
                || matches!(
                    self.kind,
                    TerminalKind::KitchenVideo | TerminalKind::KitchenVideo2
                ),
            ..ctx
        };

        let mut intents = Vec::new();
        let dialog_result = self.dialog_signal(signal);
        if dialog_result.consumed() {
            return (dialog_result, intents);
        }

        let zone_kinds: Vec<ZoneKind> =
            self.page.zones.iter().map(|z| z.kind).collect();
        for kind in zone_kinds {
            let result = self.zone_signal(
                kind, signal, employees, settings, pages, ctx, now,
                &mut intents,
            );
            if result.consumed() {
                return (result, intents);
            }
        }
        (SignalResult::Ignored, intents)
    }

    fn dialog_signal(&mut self, signal: &Signal) -> SignalResult {
        let Some(dialog) = self.dialogs.current() else {
            return SignalResult::Ignored;
        };
        match dialog {
            DialogKind::CreditCard if self.workflow.in_progress => {
                // The card dialog refuses input while a transaction is
                // on the wire; only its own cancel is honoured.
                SignalResult::End
            }
            _ if signal.command == dialog.cancel_signal() => {
                if matches!(dialog, DialogKind::Password { .. }) {
                    self.login.password_cancelled();
                }
                self.dialogs.kill();
                SignalResult::Okay
            }
            _ => SignalResult::Ignored,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn zone_signal(
        &mut self,
        kind: ZoneKind,
        signal: &Signal,
        employees: &mut EmployeeDb,
        settings: &Settings,
        pages: &dyn PageSource,
        ctx: LoginContext,
        now: TimeInfo,
        intents: &mut Vec<Intent>,
    ) -> SignalResult {
        match kind {
            ZoneKind::Login => self.login_zone_signal(
                signal, employees, settings, pages, ctx, now, intents,
            ),
            ZoneKind::OrderEntry => match signal.command.as_str() {
                "neworder" if self.signed_in() => {
                    intents.push(Intent::NewCheck);
                    SignalResult::Okay
                }
                _ => SignalResult::Ignored,
            },
            ZoneKind::Settle => match signal.command.as_str() {
                "tender" if self.signed_in() => {
                    let (Some(code), Some(amount)) =
                        (signal.arg(0), signal.arg(1))
                    else {
                        return SignalResult::Error;
                    };
                    intents.push(Intent::Tender {
                        code: code as u8,
                        amount: Money::from_cents(amount),
                    });
                    SignalResult::Okay
                }
                "settle" if self.signed_in() => {
                    intents.push(Intent::SettleSelected);
                    SignalResult::Okay
                }
                _ => SignalResult::Ignored,
            },
            ZoneKind::SplitCheck | ZoneKind::Manager
            | ZoneKind::Display => SignalResult::Ignored,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn login_zone_signal(
        &mut self,
        signal: &Signal,
        employees: &mut EmployeeDb,
        settings: &Settings,
        pages: &dyn PageSource,
        ctx: LoginContext,
        now: TimeInfo,
        intents: &mut Vec<Intent>,
    ) -> SignalResult {
        match signal.command.as_str() {
            digit if digit.len() == 1
                && digit.chars().all(|c| c.is_ascii_digit()) =>
            {
                self.login.digit(digit.chars().next().expect("len 1"));
                SignalResult::Okay
            }
            "clear" => {
                self.login.clear();
                SignalResult::Okay
            }
            "start" => {
                match self.login.start(employees, settings, ctx, now) {
                    LoginState::UserOnline => {
                        self.complete_sign_in(pages, intents);
                        SignalResult::Okay
                    }
                    LoginState::PasswordPending => {
                        let target = pages.home_page(self.login.entered_id());
                        let _ = self
                            .dialogs
                            .open(DialogKind::Password { target });
                        SignalResult::Okay
                    }
                    state => {
                        debug!("{}: login blocked: {state:?}", self.name);
                        SignalResult::Error
                    }
                }
            }
            "password" => {
                // `password` arrives with the digest as a get-text
                // payload routed out of band; here the dialog already
                // validated, so promote the pending state.
                SignalResult::Ignored
            }
            "clockin" => {
                self.login.clock_in(employees, ctx);
                intents.push(Intent::Broadcast(Update {
                    flags: signal::update::USERS,
                    value: 0,
                }));
                SignalResult::Okay
            }
            "clockout" => {
                self.login.clock_out(employees, ctx);
                intents.push(Intent::Broadcast(Update {
                    flags: signal::update::USERS,
                    value: 0,
                }));
                SignalResult::Okay
            }
            "break" => {
                self.login.take_break(employees);
                SignalResult::Okay
            }
            _ => SignalResult::Ignored,
        }
    }

    /// Password verified (or not needed): sign the employee in and go
    /// to their home page.
    pub fn complete_sign_in(
        &mut self,
        pages: &dyn PageSource,
        intents: &mut Vec<Intent>,
    ) {
        self.employee_id = self.login.entered_id();
        let _ = self.jump(JumpKind::Home, None, pages);
        intents.push(Intent::Broadcast(Update {
            flags: signal::update::USERS,
            value: i64::from(self.employee_id.unwrap_or(0)),
        }));
        info!(
            "{}: employee {:?} signed in",
            self.name, self.employee_id,
        );
    }

    pub fn sign_out(&mut self, pages: &dyn PageSource) {
        self.employee_id = None;
        self.check_serial = None;
        self.selected_subcheck = None;
        self.login.clear();
        let _ = self.jump(JumpKind::Stealth, Some(PAGE_LOGIN), pages);
        self.stack.clear();
    }
}

#[cfg(test)]
mod test {
    use super::page::{StaticPages, Zone};
    use super::signal::update;
    use super::*;
    use crate::employee::ClockState;

    fn now() -> TimeInfo {
        TimeInfo::from_ymd_hms(2026, 3, 14, 9, 0, 0).unwrap()
    }

    fn pages() -> StaticPages {
        let login = Page {
            id: PAGE_LOGIN,
            index_page: None,
            script_next: None,
            zones: vec![Zone {
                id: 1,
                kind: ZoneKind::Login,
                update_mask: update::USERS,
            }],
        };
        let floor = Page {
            id: PageId(10),
            index_page: Some(PAGE_LOGIN),
            script_next: None,
            zones: vec![
                Zone {
                    id: 2,
                    kind: ZoneKind::OrderEntry,
                    update_mask: update::CHECKS | update::ORDERS,
                },
                Zone {
                    id: 3,
                    kind: ZoneKind::Settle,
                    update_mask: update::PAYMENTS,
                },
            ],
        };
        let manager = Page::bare(PageId(20));
        StaticPages::new()
            .with_page(login)
            .with_page(floor)
            .with_page(manager)
            .with_home(PageId(10))
    }

    fn employees() -> EmployeeDb {
        let mut db = EmployeeDb::new();
        let mut dana = Employee::new(101, "Dana");
        dana.clock = ClockState::OnClock;
        db.add(dana).unwrap();
        db
    }

    fn ctx() -> LoginContext {
        LoginContext {
            clock_in_use: true,
            ..LoginContext::default()
        }
    }

    fn sign_in(terminal: &mut Terminal, db: &mut EmployeeDb) {
        let pages = pages();
        let settings = Settings::default();
        for digit in ["1", "0", "1"] {
            terminal.signal(
                &Signal::new(digit),
                db,
                &settings,
                &pages,
                ctx(),
                now(),
            );
        }
        terminal.signal(
            &Signal::new("start"),
            db,
            &settings,
            &pages,
            ctx(),
            now(),
        );
    }

    #[test]
    fn digits_then_start_signs_in_and_jumps_home() {
        let pages = pages();
        let mut terminal =
            Terminal::new("term1", TerminalKind::Normal, &pages, now());
        let mut db = employees();
        sign_in(&mut terminal, &mut db);
        assert_eq!(terminal.employee_id, Some(101));
        assert_eq!(terminal.page.id, PageId(10));
    }

    #[test]
    fn jump_stack_and_return() {
        let pages = pages();
        let mut terminal =
            Terminal::new("term1", TerminalKind::Normal, &pages, now());
        terminal
            .jump(JumpKind::Normal, Some(PageId(10)), &pages)
            .unwrap();
        terminal
            .jump(JumpKind::Normal, Some(PageId(20)), &pages)
            .unwrap();
        assert_eq!(terminal.page_stack_depth(), 2);
        terminal.jump(JumpKind::Return, None, &pages).unwrap();
        assert_eq!(terminal.page.id, PageId(10));
        // Unknown target is a protocol error and moves nothing.
        assert!(terminal
            .jump(JumpKind::Normal, Some(PageId(404)), &pages)
            .is_err());
        assert_eq!(terminal.page.id, PageId(10));
    }

    #[test]
    fn password_jump_holds_until_approved() {
        let pages = pages();
        let mut terminal =
            Terminal::new("term1", TerminalKind::Normal, &pages, now());
        terminal
            .jump(JumpKind::Password, Some(PageId(20)), &pages)
            .unwrap();
        // Still on login until the dialog approves.
        assert_eq!(terminal.page.id, PAGE_LOGIN);
        assert!(terminal.dialogs.is_active());
        terminal.password_jump_approved(&pages).unwrap();
        assert_eq!(terminal.page.id, PageId(20));
        assert!(!terminal.dialogs.is_active());
    }

    #[test]
    fn signals_route_to_zones_in_order() {
        let pages = pages();
        let settings = Settings::default();
        let mut terminal =
            Terminal::new("term1", TerminalKind::Normal, &pages, now());
        let mut db = employees();
        sign_in(&mut terminal, &mut db);

        let (result, intents) = terminal.signal(
            &Signal::new("neworder"),
            &mut db,
            &settings,
            &pages,
            ctx(),
            now(),
        );
        assert_eq!(result, SignalResult::Okay);
        assert_eq!(intents, vec![Intent::NewCheck]);

        let (result, intents) = terminal.signal(
            &Signal::parse("tender 1 1406"),
            &mut db,
            &settings,
            &pages,
            ctx(),
            now(),
        );
        assert_eq!(result, SignalResult::Okay);
        assert_eq!(
            intents,
            vec![Intent::Tender {
                code: 1,
                amount: Money::from_cents(1406),
            }],
        );
    }

    #[test]
    fn unconsumed_signal_is_a_noop_twice() {
        let pages = pages();
        let settings = Settings::default();
        let mut terminal =
            Terminal::new("term1", TerminalKind::Normal, &pages, now());
        let mut db = employees();

        let (first, _) = terminal.signal(
            &Signal::new("nosuchthing"),
            &mut db,
            &settings,
            &pages,
            ctx(),
            now(),
        );
        let (second, intents) = terminal.signal(
            &Signal::new("nosuchthing"),
            &mut db,
            &settings,
            &pages,
            ctx(),
            now(),
        );
        assert_eq!(first, SignalResult::Ignored);
        assert_eq!(second, SignalResult::Ignored);
        assert!(intents.is_empty());
    }

    #[test]
    fn idle_timeout_cancels_dialog_and_logs_out() {
        let pages = pages();
        let mut settings = Settings::default();
        settings.screen_blank_time = 60;
        let mut terminal =
            Terminal::new("term1", TerminalKind::Normal, &pages, now());
        let mut db = employees();
        sign_in(&mut terminal, &mut db);
        terminal
            .dialogs
            .open(DialogKind::GetText {
                prompt: "table?".into(),
            })
            .unwrap();

        let later = now() + std::time::Duration::from_secs(61);
        assert!(terminal.is_idle(later, &settings));
        terminal.force_idle_logout(&pages, later);
        assert!(!terminal.dialogs.is_active());
        assert!(!terminal.signed_in());
        assert_eq!(terminal.page.id, PAGE_LOGIN);
    }

    #[test]
    fn edit_mode_gating() {
        let pages = pages();
        let mut terminal =
            Terminal::new("term1", TerminalKind::Normal, &pages, now());
        let server = Employee::new(1, "S");
        let mut manager = Employee::new(2, "M");
        manager.roles.push(crate::employee::JobRole::Manager);
        let mut root = Employee::new(3, "R");
        root.roles.push(crate::employee::JobRole::Superuser);

        assert!(terminal.start_edit(EDIT_ZONES, &server).is_err());
        terminal.start_edit(EDIT_ZONES, &manager).unwrap();
        assert_eq!(terminal.edit, EDIT_ZONES);
        assert!(terminal.start_edit(EDIT_SYSTEM, &manager).is_err());
        terminal.start_edit(EDIT_SYSTEM, &root).unwrap();

        // Leaving with save requests page persistence.
        assert_eq!(terminal.leave_edit(true), Some(Intent::PersistPages));
        assert_eq!(terminal.edit, EDIT_OFF);
        assert_eq!(terminal.leave_edit(true), None);
    }

    #[test]
    fn needs_redraw_matches_zone_masks() {
        let pages = pages();
        let mut terminal =
            Terminal::new("term1", TerminalKind::Normal, &pages, now());
        let mut db = employees();
        sign_in(&mut terminal, &mut db);

        assert!(terminal.needs_redraw(Update {
            flags: update::ORDERS,
            value: 0,
        }));
        assert!(!terminal.needs_redraw(Update {
            flags: update::MENU,
            value: 0,
        }));
    }
}
