//! The end-of-day pipeline.
//!
//! Drives card batch settlement, archive creation, and the live-state
//! reset, phase by phase. Serial numbers stay monotone across the
//! reset: a check opened after end of day continues the sequence.

use std::path::PathBuf;
use std::sync::Arc;

use common::time_info::TimeInfo;
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::archive::Archive;
use crate::credit::backend::AuthBackend;
use crate::credit::batch::SettleResult;
use crate::error::{PosError, PosResult};
use crate::system::System;
use crate::test_event::{TestEvent, TestEventSender};

/// Pipeline phases, surfaced to the driving terminal's display.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EndDayPhase {
    Begin,
    /// Clearing the store-and-forward queue.
    Saf,
    /// Settling recorded batches.
    Settle,
    /// Archiving and resetting.
    Final,
    Done,
}

pub struct EndDayReport {
    pub archive_dir: PathBuf,
    pub checks_archived: usize,
    pub drawers_archived: usize,
    pub settle_results: Vec<SettleResult>,
}

/// Preconditions the driving terminal verifies before starting: no
/// outstanding balances, every drawer pulled or balanced, and CUPS
/// healthy enough to print the closing tape.
pub fn check_end_day(system: &System, cups_healthy: bool) -> PosResult<()> {
    let open: Vec<String> = system
        .non_training_checks()
        .filter(|c| !c.is_settled() || !c.balance().is_zero())
        .map(|c| c.label.clone())
        .collect();
    if !open.is_empty() {
        return Err(PosError::State("open checks with outstanding balance"));
    }
    if !system.drawers.iter().all(|d| d.settled_for_endday()) {
        return Err(PosError::State("drawers not pulled or balanced"));
    }
    if !cups_healthy {
        return Err(PosError::State("printing is down"));
    }
    Ok(())
}

/// Runs the full pipeline. The system lock is taken per phase, never
/// across the backend's settlement wire calls.
#[instrument(skip_all, name = "(end-day)")]
pub async fn run_end_day(
    system: &Arc<Mutex<System>>,
    backend: &dyn AuthBackend,
    cups_healthy: bool,
    now: TimeInfo,
    test_event_tx: &TestEventSender,
) -> PosResult<EndDayReport> {
    let mut phase = EndDayPhase::Begin;
    info!("end of day starting ({phase:?})");

    // Begin: verify preconditions and pull the day's batches out.
    let mut batches = {
        let guard = system.lock().await;
        check_end_day(&guard, cups_healthy)?;
        guard.batches.clone()
    };

    // SAF + settlement run against the backend without the lock held.
    phase = EndDayPhase::Saf;
    info!("end of day: {phase:?}");
    phase = EndDayPhase::Settle;
    batches.settle_day(backend).await?;
    info!(
        "end of day: {phase:?} complete, {} batches",
        batches.settle_results.len(),
    );
    test_event_tx.send(TestEvent::BatchSettled);

    // Final: archive the day and reset live state.
    phase = EndDayPhase::Final;
    info!("end of day: {phase:?}");
    let report = {
        let mut guard = system.lock().await;
        guard.batches = batches;

        let stamp = guard.last_archive_stamp.map_or(now, |prev| {
            // Guard against clock rollback: stamps must stay unique.
            if prev >= now {
                prev.add_minutes(1)
            } else {
                now
            }
        });
        let archive = Archive {
            stamp,
            // Training checks die with the day; they never archive.
            checks: guard
                .checks
                .drain(..)
                .filter(|c| !c.is_training())
                .collect(),
            drawers: guard.drawers.drain(..).collect(),
            exceptions: std::mem::take(&mut guard.exceptions),
            batches: std::mem::take(&mut guard.batches),
        };
        let archive_dir =
            archive.save(&guard.archive_path, &guard.settings)?;
        guard.last_archive_stamp = Some(stamp);
        guard.clear_system(true)?;
        test_event_tx.send(TestEvent::ArchiveWritten);
        EndDayReport {
            archive_dir,
            checks_archived: archive.checks.len(),
            drawers_archived: archive.drawers.len(),
            settle_results: archive.batches.settle_results.clone(),
        }
    };

    phase = EndDayPhase::Done;
    info!(
        "end of day: {phase:?}; archived {} checks to {}",
        report.checks_archived,
        report.archive_dir.display(),
    );
    Ok(report)
}

#[cfg(test)]
mod test {
    use common::money::Money;
    use common::serial::SerialNumber;

    use super::*;
    use crate::checks::order::Order;
    use crate::checks::payment::{Payment, TenderType};
    use crate::checks::{Check, CustomerType};
    use crate::credit::backend::testing::ScriptedBackend;
    use crate::drawer::Drawer;
    use crate::employee::EmployeeDb;
    use crate::menu::{ItemFamily, Menu};
    use crate::settings::Settings;

    fn now() -> TimeInfo {
        TimeInfo::from_ymd_hms(2026, 3, 14, 23, 59, 0).unwrap()
    }

    fn closed_check(system: &mut System, cents: i64) -> SerialNumber {
        let serial = system.next_serial();
        let mut check = Check::new(
            serial,
            CustomerType::DineIn,
            format!("T{serial}"),
            1,
            now(),
        );
        check
            .sub_mut(1)
            .unwrap()
            .add_order(Order::new(
                "Plate",
                ItemFamily::Entree,
                Money::from_cents(cents),
            ))
            .unwrap();
        check.figure_totals_all(&system.settings, now());
        let total = check.sub(1).unwrap().totals.total_cost;
        check
            .sub_mut(1)
            .unwrap()
            .add_payment(Payment::new(TenderType::Cash, total))
            .unwrap();
        check.figure_totals_all(&system.settings, now());
        check.sub_mut(1).unwrap().settle().unwrap();
        check.close(now()).unwrap();
        system.checks.push(check);
        serial
    }

    fn fresh_system(dir: &std::path::Path) -> System {
        System::new(
            dir.join("data"),
            dir.join("archive"),
            Settings::default(),
            EmployeeDb::new(),
            Menu::new(),
        )
    }

    #[tokio::test]
    async fn end_day_archives_and_resets() {
        let dir = tempfile::tempdir().unwrap();
        let mut system = fresh_system(dir.path());

        let serials = [
            closed_check(&mut system, 1500),
            closed_check(&mut system, 2750),
            closed_check(&mut system, 900),
        ];
        let totals: Vec<Money> = system
            .checks
            .iter()
            .map(|c| c.total_cost())
            .collect();

        let drawer_serial = system.next_serial();
        let mut drawer =
            Drawer::new(drawer_serial, Money::from_cents(10_000), now());
        drawer.assign(1).unwrap();
        drawer.pull(now()).unwrap();
        drawer.balance(Money::from_cents(10_000)).unwrap();
        system.drawers.push(drawer);

        let next_before = {
            system.save_state().unwrap();
            let probe = system.next_serial();
            probe
        };

        let system = Arc::new(Mutex::new(system));
        let backend = ScriptedBackend::approving("SETTLED");
        let report = run_end_day(
            &system,
            &backend,
            true,
            now(),
            &TestEventSender::noop(),
        )
        .await
        .unwrap();

        assert_eq!(report.checks_archived, 3);
        assert_eq!(report.drawers_archived, 1);

        // Live state is reset...
        let mut guard = system.lock().await;
        assert!(guard.checks.is_empty());
        assert!(guard.drawers.is_empty());
        // ...and serials continue the sequence rather than restarting.
        let next_after = guard.next_serial();
        assert!(next_after > next_before);
        assert_eq!(guard.last_archive_stamp, Some(now()));
        drop(guard);

        // The archive reloads with identical serials and totals.
        let loaded = Archive::load(
            &report.archive_dir,
            &Settings::default(),
            now(),
        )
        .unwrap();
        assert_eq!(
            loaded.checks.iter().map(|c| c.serial()).collect::<Vec<_>>(),
            serials.to_vec(),
        );
        assert_eq!(
            loaded
                .checks
                .iter()
                .map(|c| c.total_cost())
                .collect::<Vec<_>>(),
            totals,
        );
    }

    #[tokio::test]
    async fn preconditions_block_open_checks() {
        let dir = tempfile::tempdir().unwrap();
        let mut system = fresh_system(dir.path());
        let serial = system.next_serial();
        let mut check =
            Check::new(serial, CustomerType::DineIn, "T1", 1, now());
        check
            .sub_mut(1)
            .unwrap()
            .add_order(Order::new(
                "Plate",
                ItemFamily::Entree,
                Money::from_cents(1000),
            ))
            .unwrap();
        check.figure_totals_all(&system.settings, now());
        system.checks.push(check);

        assert!(matches!(
            check_end_day(&system, true),
            Err(PosError::State(_))
        ));

        // Training checks don't block.
        system.checks[0].customer_type = CustomerType::Training;
        check_end_day(&system, true).unwrap();

        // CUPS down blocks.
        assert!(check_end_day(&system, false).is_err());
    }

    #[tokio::test]
    async fn training_checks_are_not_archived() {
        let dir = tempfile::tempdir().unwrap();
        let mut system = fresh_system(dir.path());
        closed_check(&mut system, 1200);
        let training_serial = system.next_serial();
        let mut training = Check::new(
            training_serial,
            CustomerType::Training,
            "TRAIN",
            1,
            now(),
        );
        training.sub_mut(1).unwrap().void(true).unwrap();
        system.checks.push(training);

        let system = Arc::new(Mutex::new(system));
        let backend = ScriptedBackend::approving("OK");
        let report = run_end_day(
            &system,
            &backend,
            true,
            now(),
            &TestEventSender::noop(),
        )
        .await
        .unwrap();
        assert_eq!(report.checks_archived, 1);
    }
}
