//! Employee reference data: identity, roles, and clock state.
//!
//! Password storage is a salted hash supplied by the user database tool;
//! the kernel only compares digests. Training employees produce training
//! checks which stay out of the financial books.

use serde::{Deserialize, Serialize};

use crate::error::{PosError, PosResult};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum JobRole {
    Server,
    Cashier,
    Cook,
    Manager,
    Superuser,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ClockState {
    Off,
    OnClock,
    OnBreak,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    pub id: u32,
    pub name: String,
    /// Digest of the login password; empty means no password set.
    pub password_digest: String,
    pub roles: Vec<JobRole>,
    pub training: bool,
    /// Inactive employees stay in the database but cannot sign in.
    pub active: bool,
    pub clock: ClockState,
    /// Serial of the drawer currently assigned, if any.
    pub drawer_serial: Option<i32>,
}

impl Employee {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            password_digest: String::new(),
            roles: vec![JobRole::Server],
            training: false,
            active: true,
            clock: ClockState::Off,
            drawer_serial: None,
        }
    }

    pub fn is_manager(&self) -> bool {
        self.roles
            .iter()
            .any(|r| matches!(r, JobRole::Manager | JobRole::Superuser))
    }

    pub fn is_superuser(&self) -> bool {
        self.roles.contains(&JobRole::Superuser)
    }

    pub fn on_clock(&self) -> bool {
        matches!(self.clock, ClockState::OnClock | ClockState::OnBreak)
    }

    pub fn uses_password(&self) -> bool {
        !self.password_digest.is_empty()
    }

    pub fn check_password(&self, digest: &str) -> bool {
        !self.password_digest.is_empty() && self.password_digest == digest
    }
}

/// The in-memory employee database.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EmployeeDb {
    employees: Vec<Employee>,
}

impl EmployeeDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, employee: Employee) -> PosResult<()> {
        if self.find(employee.id).is_some() {
            return Err(PosError::State("employee id already in use"));
        }
        self.employees.push(employee);
        Ok(())
    }

    pub fn find(&self, id: u32) -> Option<&Employee> {
        self.employees.iter().find(|e| e.id == id)
    }

    pub fn find_mut(&mut self, id: u32) -> Option<&mut Employee> {
        self.employees.iter_mut().find(|e| e.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Employee> {
        self.employees.iter()
    }

    pub fn len(&self) -> usize {
        self.employees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.employees.is_empty()
    }
}
