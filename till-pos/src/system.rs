//! `System`: the process-wide authoritative state.
//!
//! One [`System`] exists per control process, built at startup and
//! shared as `Arc<tokio::sync::Mutex<System>>`. It owns the serial
//! counter, the live check and drawer lists, the settings, reference
//! data, and the day's credit-card batches. Mutation is serialized
//! through the lock; no component holds pointers into another's list.

use std::fs;
use std::path::{Path, PathBuf};

use common::datafile::{
    write_with_backup, InputDataFile, DataFileError,
};
use common::money::Money;
use common::serial::{SerialCounter, SerialNumber};
use common::time_info::TimeInfo;
use tracing::{info, warn};

use crate::checks::Check;
use crate::credit::batch::DayBatches;
use crate::drawer::Drawer;
use crate::employee::EmployeeDb;
use crate::error::PosResult;
use crate::menu::Menu;
use crate::settings::Settings;

pub const SYSTEM_VERSION: u32 = 1;

pub struct System {
    pub data_path: PathBuf,
    pub archive_path: PathBuf,
    serials: SerialCounter,
    pub settings: Settings,
    pub employees: EmployeeDb,
    pub menu: Menu,
    pub checks: Vec<Check>,
    pub drawers: Vec<Drawer>,
    /// Operational exceptions (voids over threshold, failed saves, …)
    /// collected for the day's archive.
    pub exceptions: Vec<String>,
    pub batches: DayBatches,
    /// Serials of checks with unsaved mutations.
    pub dirty_checks: Vec<SerialNumber>,
    /// Stamp of the most recent archive, for `last_archive_id`.
    pub last_archive_stamp: Option<TimeInfo>,
}

impl System {
    pub fn new(
        data_path: PathBuf,
        archive_path: PathBuf,
        settings: Settings,
        employees: EmployeeDb,
        menu: Menu,
    ) -> Self {
        Self {
            data_path,
            archive_path,
            serials: SerialCounter::new(),
            settings,
            employees,
            menu,
            checks: Vec::new(),
            drawers: Vec::new(),
            exceptions: Vec::new(),
            batches: DayBatches::new(),
            dirty_checks: Vec::new(),
            last_archive_stamp: None,
        }
    }

    /// Directory holding the live check files.
    pub fn current_dir(&self) -> PathBuf {
        self.data_path.join("current")
    }

    fn system_state_path(&self) -> PathBuf {
        self.data_path.join("system.dat")
    }

    pub fn next_serial(&mut self) -> SerialNumber {
        self.serials.next_serial()
    }

    pub fn find_check(&self, serial: SerialNumber) -> Option<&Check> {
        self.checks.iter().find(|c| c.serial() == serial)
    }

    pub fn find_check_mut(
        &mut self,
        serial: SerialNumber,
    ) -> Option<&mut Check> {
        self.checks.iter_mut().find(|c| c.serial() == serial)
    }

    pub fn find_drawer_mut(
        &mut self,
        serial: SerialNumber,
    ) -> Option<&mut Drawer> {
        self.drawers.iter_mut().find(|d| d.serial == serial)
    }

    pub fn mark_check_dirty(&mut self, serial: SerialNumber) {
        if !self.dirty_checks.contains(&serial) {
            self.dirty_checks.push(serial);
        }
    }

    pub fn mark_check_clean(&mut self, serial: SerialNumber) {
        self.dirty_checks.retain(|&s| s != serial);
    }

    pub fn is_check_dirty(&self, serial: SerialNumber) -> bool {
        self.dirty_checks.contains(&serial)
    }

    /// Live checks that count toward the books.
    pub fn non_training_checks(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| !c.is_training())
    }

    /// Outstanding balance across all live, non-training checks.
    pub fn open_balance(&self) -> Money {
        self.non_training_checks().map(|c| c.balance()).sum()
    }

    pub fn log_exception(&mut self, entry: impl Into<String>) {
        let entry = entry.into();
        warn!("exception: {entry}");
        self.exceptions.push(entry);
    }

    // --- Persistence --- //

    /// Persists the serial counter and archive stamp so serials stay
    /// monotone across restarts and end-of-day resets.
    pub fn save_state(&self) -> PosResult<()> {
        fs::create_dir_all(&self.data_path)?;
        write_with_backup(self.system_state_path(), SYSTEM_VERSION, |out| {
            out.put_i32(self.serials.peek_next())?;
            out.put_str(
                &self
                    .last_archive_stamp
                    .map(|t| t.dir_stamp())
                    .unwrap_or_default(),
            )
        })?;
        Ok(())
    }

    /// Restores the serial counter; missing file means first boot.
    pub fn load_state(&mut self) -> PosResult<()> {
        let mut input = match InputDataFile::open(
            self.system_state_path(),
            SYSTEM_VERSION,
            SYSTEM_VERSION,
        ) {
            Ok(input) => input,
            Err(DataFileError::Io(e))
                if e.kind() == std::io::ErrorKind::NotFound =>
            {
                return Ok(())
            }
            Err(e) => return Err(e.into()),
        };
        self.serials = SerialCounter::resume_from(input.get_i32()?);
        let stamp = input.get_str()?;
        self.last_archive_stamp = TimeInfo::parse_dir_stamp(&stamp);
        Ok(())
    }

    /// Reloads every live check from `<data_path>/current/`. Unreadable
    /// files are logged and skipped rather than blocking startup.
    pub fn load_current_checks(&mut self, now: TimeInfo) -> PosResult<()> {
        let dir = self.current_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(())
            }
            Err(e) => return Err(e.into()),
        };
        let mut loaded = 0usize;
        for entry in entries {
            let path = entry?.path();
            let name = path.file_name().and_then(|n| n.to_str());
            let is_check = name
                .map(|n| n.starts_with("check_") && n.ends_with(".dat"))
                .unwrap_or(false);
            if !is_check {
                continue;
            }
            match Check::load_from_file(&path, &self.settings, now) {
                Ok(check) => {
                    self.checks.push(check);
                    loaded += 1;
                }
                Err(e) => {
                    self.log_exception(format!(
                        "unreadable check file {}: {e}",
                        path.display(),
                    ));
                }
            }
        }
        info!("loaded {loaded} live checks from {}", dir.display());
        Ok(())
    }

    /// Empties the live collections after an archive. The serial counter
    /// survives; `keep_labor` preserves clock state (employees are kept
    /// either way, only their clock state resets without it).
    pub fn clear_system(&mut self, keep_labor: bool) -> PosResult<()> {
        self.checks.clear();
        self.drawers.clear();
        self.exceptions.clear();
        self.batches = DayBatches::new();
        self.dirty_checks.clear();
        if !keep_labor {
            for id in
                self.employees.iter().map(|e| e.id).collect::<Vec<_>>()
            {
                if let Some(emp) = self.employees.find_mut(id) {
                    emp.clock = crate::employee::ClockState::Off;
                    emp.drawer_serial = None;
                }
            }
        }
        // Clear the on-disk current set; its content now lives in the
        // archive.
        let dir = self.current_dir();
        if dir.exists() {
            for entry in fs::read_dir(&dir)? {
                let path = entry?.path();
                if path.is_file() {
                    fs::remove_file(&path)?;
                }
            }
        }
        self.save_state()
    }

    /// Writes every dirty check, clearing flags on success. Returns
    /// `(attempted, failed)`.
    pub fn save_dirty_checks(&mut self) -> (usize, usize) {
        let dir = self.current_dir();
        let dirty = std::mem::take(&mut self.dirty_checks);
        let attempted = dirty.len();
        let mut failed = 0usize;
        for serial in dirty {
            let Some(check) = self.find_check(serial) else {
                continue;
            };
            if let Err(e) = check.save_to_dir(&dir) {
                warn!("failed to save check {serial}: {e:#}");
                self.dirty_checks.push(serial);
                failed += 1;
            }
        }
        (attempted, failed)
    }
}

/// Conventional location helpers usable before a [`System`] exists.
pub fn settings_path(data_path: &Path) -> PathBuf {
    Settings::settings_path(data_path)
}

#[cfg(test)]
mod test {
    use crate::checks::CustomerType;

    use super::*;

    fn now() -> TimeInfo {
        TimeInfo::from_ymd_hms(2026, 3, 14, 11, 0, 0).unwrap()
    }

    fn make_system(dir: &Path) -> System {
        System::new(
            dir.join("data"),
            dir.join("archive"),
            Settings::default(),
            EmployeeDb::new(),
            Menu::new(),
        )
    }

    #[test]
    fn serials_survive_clear_and_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mut system = make_system(dir.path());
        let first = system.next_serial();
        let second = system.next_serial();
        assert!(second > first);

        system.clear_system(true).unwrap();
        let third = system.next_serial();
        assert!(third > second);

        // A fresh System over the same data dir resumes the sequence.
        system.save_state().unwrap();
        let mut restarted = make_system(dir.path());
        restarted.load_state().unwrap();
        let fourth = restarted.next_serial();
        assert!(fourth > third);
    }

    #[test]
    fn dirty_tracking_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut system = make_system(dir.path());
        let serial = system.next_serial();
        system.checks.push(Check::new(
            serial,
            CustomerType::DineIn,
            "T1",
            2,
            now(),
        ));

        system.mark_check_dirty(serial);
        system.mark_check_dirty(serial);
        assert!(system.is_check_dirty(serial));
        assert_eq!(system.dirty_checks.len(), 1);

        let (attempted, failed) = system.save_dirty_checks();
        assert_eq!((attempted, failed), (1, 0));
        assert!(!system.is_check_dirty(serial));
        assert!(system
            .current_dir()
            .join(format!("check_{serial}.dat"))
            .exists());

        system.mark_check_dirty(serial);
        system.mark_check_clean(serial);
        assert!(!system.is_check_dirty(serial));
    }

    #[test]
    fn load_current_checks_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let mut system = make_system(dir.path());
        let serial = system.next_serial();
        let check =
            Check::new(serial, CustomerType::DineIn, "T1", 2, now());
        check.save_to_dir(&system.current_dir()).unwrap();
        std::fs::write(system.current_dir().join("check_junk.dat"), b"xx")
            .unwrap();

        let mut reloaded = make_system(dir.path());
        reloaded.load_current_checks(now()).unwrap();
        assert_eq!(reloaded.checks.len(), 1);
        assert_eq!(reloaded.checks[0].serial(), serial);
        // The bad file landed in the exception log.
        assert_eq!(reloaded.exceptions.len(), 1);
    }
}
