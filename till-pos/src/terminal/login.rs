//! The login sub-machine.
//!
//! Digit keys accumulate an employee id; `start` runs the gauntlet of
//! checks (known, active, on the clock, not online elsewhere, password,
//! balanced drawer) and lands in exactly one [`LoginState`]. A validated
//! password stays good for five minutes, then must be re-entered.

use std::time::Duration;

use common::time_info::TimeInfo;

use crate::employee::{ClockState, Employee, EmployeeDb};
use crate::settings::{PasswordMode, Settings};

/// How long a validated password keeps working without re-entry.
pub const PASSWORD_WINDOW: Duration = Duration::from_secs(5 * 60);

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LoginState {
    /// Collecting id digits.
    GetUserId,
    /// Signed in.
    UserOnline,
    /// Waiting on the password dialog.
    PasswordPending,
    PasswordFailed,
    UnknownUser,
    OnAnotherTerm,
    AlreadyOnClock,
    NotOnClock,
    ClockNotUsed,
    /// Clock-out blocked by an open check.
    OpenCheck,
    /// Clock-out blocked by an assigned drawer.
    AssignedDrawer,
    UserInactive,
    /// Sign-in blocked by an unbalanced drawer.
    NeedBalance,
    NotAllowedIn,
}

/// Facts about the world the login machine can't see on its own,
/// supplied by the control layer.
#[derive(Copy, Clone, Debug, Default)]
pub struct LoginContext {
    /// Signed in on some other terminal right now.
    pub online_elsewhere: bool,
    /// Has a pulled-but-unbalanced drawer.
    pub unbalanced_drawer: bool,
    /// This store runs a time clock at all.
    pub clock_in_use: bool,
    /// The employee still owns open checks (blocks clock-out).
    pub open_checks: bool,
    /// This terminal refuses sign-ins entirely (kitchen displays).
    pub sign_in_blocked: bool,
}

#[derive(Debug)]
pub struct LoginMachine {
    pub state: LoginState,
    digits: String,
    password_given: bool,
    password_time: Option<TimeInfo>,
}

impl Default for LoginMachine {
    fn default() -> Self {
        Self {
            state: LoginState::GetUserId,
            digits: String::new(),
            password_given: false,
            password_time: None,
        }
    }
}

impl LoginMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entered_id(&self) -> Option<u32> {
        self.digits.parse().ok()
    }

    pub fn digit(&mut self, d: char) {
        if d.is_ascii_digit() && self.digits.len() < 9 {
            self.digits.push(d);
        }
    }

    pub fn clear(&mut self) {
        self.digits.clear();
        self.state = LoginState::GetUserId;
    }

    /// Expires the password window.
    pub fn tick(&mut self, now: TimeInfo) {
        if let Some(given) = self.password_time {
            if now.since(given) > PASSWORD_WINDOW {
                self.password_given = false;
                self.password_time = None;
            }
        }
    }

    fn password_required(
        &self,
        employee: &Employee,
        settings: &Settings,
    ) -> bool {
        if employee.is_manager() {
            // Managers are always challenged.
            return true;
        }
        match settings.password_mode {
            PasswordMode::Required => true,
            PasswordMode::Optional => employee.uses_password(),
            PasswordMode::None => false,
        }
    }

    /// The `start` key: attempt sign-in with the collected digits.
    pub fn start(
        &mut self,
        employees: &EmployeeDb,
        settings: &Settings,
        ctx: LoginContext,
        now: TimeInfo,
    ) -> LoginState {
        self.tick(now);
        let state = self.evaluate_start(employees, settings, ctx);
        self.state = state.clone();
        state
    }

    fn evaluate_start(
        &self,
        employees: &EmployeeDb,
        settings: &Settings,
        ctx: LoginContext,
    ) -> LoginState {
        if ctx.sign_in_blocked {
            return LoginState::NotAllowedIn;
        }
        let Some(id) = self.entered_id() else {
            return LoginState::GetUserId;
        };
        let Some(employee) = employees.find(id) else {
            return LoginState::UnknownUser;
        };
        if !employee.active {
            return LoginState::UserInactive;
        }
        if ctx.online_elsewhere {
            return LoginState::OnAnotherTerm;
        }
        if ctx.clock_in_use && !employee.on_clock() {
            return LoginState::NotOnClock;
        }
        if ctx.unbalanced_drawer {
            return LoginState::NeedBalance;
        }
        if self.password_required(employee, settings) && !self.password_given
        {
            return LoginState::PasswordPending;
        }
        LoginState::UserOnline
    }

    /// Result of the password dialog.
    pub fn password_entered(
        &mut self,
        employee: &Employee,
        digest: &str,
        now: TimeInfo,
    ) -> LoginState {
        let ok = if employee.uses_password() {
            employee.check_password(digest)
        } else {
            // Challenged but no password on file: anything passes.
            true
        };
        self.state = if ok {
            self.password_given = true;
            self.password_time = Some(now);
            LoginState::UserOnline
        } else {
            self.password_given = false;
            LoginState::PasswordFailed
        };
        self.state.clone()
    }

    pub fn password_cancelled(&mut self) {
        self.password_given = false;
        self.state = LoginState::GetUserId;
        self.digits.clear();
    }

    /// The clock-in key.
    pub fn clock_in(
        &mut self,
        employees: &mut EmployeeDb,
        ctx: LoginContext,
    ) -> LoginState {
        let state = (|| {
            if !ctx.clock_in_use {
                return LoginState::ClockNotUsed;
            }
            let Some(id) = self.entered_id() else {
                return LoginState::GetUserId;
            };
            let Some(employee) = employees.find_mut(id) else {
                return LoginState::UnknownUser;
            };
            if employee.on_clock() {
                return LoginState::AlreadyOnClock;
            }
            employee.clock = ClockState::OnClock;
            LoginState::GetUserId
        })();
        self.state = state.clone();
        state
    }

    /// The clock-out key; refuses while the employee still owns open
    /// checks or an assigned drawer.
    pub fn clock_out(
        &mut self,
        employees: &mut EmployeeDb,
        ctx: LoginContext,
    ) -> LoginState {
        let state = (|| {
            if !ctx.clock_in_use {
                return LoginState::ClockNotUsed;
            }
            let Some(id) = self.entered_id() else {
                return LoginState::GetUserId;
            };
            let Some(employee) = employees.find_mut(id) else {
                return LoginState::UnknownUser;
            };
            if !employee.on_clock() {
                return LoginState::NotOnClock;
            }
            if ctx.open_checks {
                return LoginState::OpenCheck;
            }
            if employee.drawer_serial.is_some() {
                return LoginState::AssignedDrawer;
            }
            employee.clock = ClockState::Off;
            LoginState::GetUserId
        })();
        self.state = state.clone();
        state
    }

    /// The break key: on-clock employees toggle to break and back.
    pub fn take_break(&mut self, employees: &mut EmployeeDb) -> LoginState {
        let state = (|| {
            let Some(id) = self.entered_id() else {
                return LoginState::GetUserId;
            };
            let Some(employee) = employees.find_mut(id) else {
                return LoginState::UnknownUser;
            };
            match employee.clock {
                ClockState::Off => LoginState::NotOnClock,
                ClockState::OnClock => {
                    employee.clock = ClockState::OnBreak;
                    LoginState::GetUserId
                }
                ClockState::OnBreak => {
                    employee.clock = ClockState::OnClock;
                    LoginState::GetUserId
                }
            }
        })();
        self.state = state.clone();
        state
    }
}

#[cfg(test)]
mod test {
    use crate::employee::JobRole;

    use super::*;

    fn now() -> TimeInfo {
        TimeInfo::from_ymd_hms(2026, 3, 14, 8, 0, 0).unwrap()
    }

    fn db() -> EmployeeDb {
        let mut db = EmployeeDb::new();
        let mut server = Employee::new(101, "Dana");
        server.clock = ClockState::OnClock;
        db.add(server).unwrap();

        let mut manager = Employee::new(200, "Alex");
        manager.roles.push(JobRole::Manager);
        manager.password_digest = "digest200".into();
        manager.clock = ClockState::OnClock;
        db.add(manager).unwrap();
        db
    }

    fn ctx() -> LoginContext {
        LoginContext {
            clock_in_use: true,
            ..LoginContext::default()
        }
    }

    fn keyed(machine: &mut LoginMachine, id: &str) {
        machine.clear();
        for d in id.chars() {
            machine.digit(d);
        }
    }

    #[test]
    fn unknown_and_inactive_users() {
        let mut db = db();
        let settings = Settings::default();
        let mut machine = LoginMachine::new();

        keyed(&mut machine, "999");
        assert_eq!(
            machine.start(&db, &settings, ctx(), now()),
            LoginState::UnknownUser,
        );

        db.find_mut(101).unwrap().active = false;
        keyed(&mut machine, "101");
        assert_eq!(
            machine.start(&db, &settings, ctx(), now()),
            LoginState::UserInactive,
        );
    }

    #[test]
    fn plain_server_signs_straight_in() {
        let db = db();
        let settings = Settings::default();
        let mut machine = LoginMachine::new();
        keyed(&mut machine, "101");
        assert_eq!(
            machine.start(&db, &settings, ctx(), now()),
            LoginState::UserOnline,
        );
    }

    #[test]
    fn manager_always_challenged() {
        let db = db();
        let settings = Settings::default();
        let mut machine = LoginMachine::new();
        keyed(&mut machine, "200");
        assert_eq!(
            machine.start(&db, &settings, ctx(), now()),
            LoginState::PasswordPending,
        );

        let manager = db.find(200).unwrap();
        assert_eq!(
            machine.password_entered(manager, "wrong", now()),
            LoginState::PasswordFailed,
        );
        assert_eq!(
            machine.password_entered(manager, "digest200", now()),
            LoginState::UserOnline,
        );
    }

    #[test]
    fn password_window_expires_after_five_minutes() {
        let db = db();
        let settings = Settings::default();
        let mut machine = LoginMachine::new();
        keyed(&mut machine, "200");
        machine.start(&db, &settings, ctx(), now());
        let manager = db.find(200).unwrap();
        machine.password_entered(manager, "digest200", now());

        // Within the window, no new challenge.
        keyed(&mut machine, "200");
        let soon = now() + Duration::from_secs(4 * 60);
        assert_eq!(
            machine.start(&db, &settings, ctx(), soon),
            LoginState::UserOnline,
        );

        // Past the window, challenged again.
        keyed(&mut machine, "200");
        let late = now() + Duration::from_secs(6 * 60);
        assert_eq!(
            machine.start(&db, &settings, ctx(), late),
            LoginState::PasswordPending,
        );
    }

    #[test]
    fn blocked_by_world_state() {
        let db = db();
        let settings = Settings::default();
        let mut machine = LoginMachine::new();

        keyed(&mut machine, "101");
        let elsewhere = LoginContext {
            online_elsewhere: true,
            ..ctx()
        };
        assert_eq!(
            machine.start(&db, &settings, elsewhere, now()),
            LoginState::OnAnotherTerm,
        );

        let drawer = LoginContext {
            unbalanced_drawer: true,
            ..ctx()
        };
        keyed(&mut machine, "101");
        assert_eq!(
            machine.start(&db, &settings, drawer, now()),
            LoginState::NeedBalance,
        );

        // Kitchen displays refuse sign-ins outright.
        let blocked = LoginContext {
            sign_in_blocked: true,
            ..ctx()
        };
        keyed(&mut machine, "101");
        assert_eq!(
            machine.start(&db, &settings, blocked, now()),
            LoginState::NotAllowedIn,
        );
    }

    #[test]
    fn clock_cycle() {
        let mut db = db();
        let settings = Settings::default();
        let mut machine = LoginMachine::new();

        // Not on the clock yet.
        let mut off = Employee::new(300, "Sam");
        off.clock = ClockState::Off;
        db.add(off).unwrap();

        keyed(&mut machine, "300");
        assert_eq!(
            machine.start(&db, &settings, ctx(), now()),
            LoginState::NotOnClock,
        );
        machine.clock_in(&mut db, ctx());
        assert!(db.find(300).unwrap().on_clock());

        keyed(&mut machine, "300");
        assert_eq!(
            machine.clock_in(&mut db, ctx()),
            LoginState::AlreadyOnClock,
        );

        // Break toggles.
        machine.take_break(&mut db);
        assert_eq!(db.find(300).unwrap().clock, ClockState::OnBreak);
        machine.take_break(&mut db);
        assert_eq!(db.find(300).unwrap().clock, ClockState::OnClock);

        // Clock-out blocked by an open check, then by a drawer.
        keyed(&mut machine, "300");
        let busy = LoginContext {
            open_checks: true,
            ..ctx()
        };
        assert_eq!(
            machine.clock_out(&mut db, busy),
            LoginState::OpenCheck,
        );
        db.find_mut(300).unwrap().drawer_serial = Some(7);
        assert_eq!(
            machine.clock_out(&mut db, ctx()),
            LoginState::AssignedDrawer,
        );
        db.find_mut(300).unwrap().drawer_serial = None;
        machine.clock_out(&mut db, ctx());
        assert!(!db.find(300).unwrap().on_clock());
    }
}
