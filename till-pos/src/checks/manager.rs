//! The cloneable actor coordinating check mutation and persistence.
//!
//! Every mutation runs in three stages under one lock: validate-and-
//! apply (the model methods are transactional in memory), refresh the
//! cached totals, persist. A persistence failure keeps the in-memory
//! mutation so the operator loses no work: the check is marked dirty
//! for the supervisor's next auto-save tick and the caller sees the
//! `Io` error.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use common::serial::SerialNumber;
use common::time_info::TimeInfo;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use super::order::Order;
use super::payment::Payment;
use super::{Check, CustomerType};
use crate::error::{PosError, PosResult};
use crate::kitchen::KitchenBroadcast;
use crate::system::System;
use crate::test_event::{TestEvent, TestEventSender};

/// Where checks persist. The file store is the production impl; tests
/// inject failing stores to exercise the dirty path.
#[async_trait]
pub trait CheckStore: Send + Sync + 'static {
    async fn persist(&self, check: &Check) -> PosResult<()>;
}

pub struct FileCheckStore {
    pub dir: PathBuf,
}

#[async_trait]
impl CheckStore for FileCheckStore {
    async fn persist(&self, check: &Check) -> PosResult<()> {
        check.save_to_dir(&self.dir)
    }
}

/// Cloneable entry point for all check mutations.
pub struct CheckManager<S> {
    system: Arc<Mutex<System>>,
    store: Arc<S>,
    kitchen: KitchenBroadcast,
    test_event_tx: TestEventSender,
}

impl<S> Clone for CheckManager<S> {
    fn clone(&self) -> Self {
        Self {
            system: self.system.clone(),
            store: self.store.clone(),
            kitchen: self.kitchen.clone(),
            test_event_tx: self.test_event_tx.clone(),
        }
    }
}

impl<S: CheckStore> CheckManager<S> {
    pub fn new(
        system: Arc<Mutex<System>>,
        store: S,
        kitchen: KitchenBroadcast,
        test_event_tx: TestEventSender,
    ) -> Self {
        Self {
            system,
            store: Arc::new(store),
            kitchen,
            test_event_tx,
        }
    }

    pub fn system(&self) -> &Arc<Mutex<System>> {
        &self.system
    }

    /// Opens a new check with a fresh serial and one empty subcheck.
    #[instrument(skip_all, name = "(new-check)")]
    pub async fn new_check(
        &self,
        kind: CustomerType,
        label: impl Into<String>,
        guests: u32,
        now: TimeInfo,
    ) -> PosResult<SerialNumber> {
        let mut system = self.system.lock().await;
        let serial = system.next_serial();
        let check = Check::new(serial, kind, label, guests, now);
        info!("opened check {serial} ({kind:?})");
        system.checks.push(check);
        let check = system.find_check(serial).expect("just inserted");
        if let Err(e) = self.store.persist(check).await {
            warn!("could not persist new check {serial}: {e:#}");
            system.mark_check_dirty(serial);
            return Err(e);
        }
        self.test_event_tx.send(TestEvent::CheckPersisted);
        Ok(serial)
    }

    /// Runs one transactional mutation against a check. `mutate` either
    /// completes (the check is then re-totaled and persisted) or leaves
    /// the model untouched and returns its typed error.
    pub async fn mutate<T>(
        &self,
        serial: SerialNumber,
        now: TimeInfo,
        mutate: impl FnOnce(&mut Check, &crate::settings::Settings) -> PosResult<T>,
    ) -> PosResult<T> {
        let mut guard = self.system.lock().await;
        let system = &mut *guard;
        let check = system
            .checks
            .iter_mut()
            .find(|c| c.serial() == serial)
            .ok_or(PosError::State("no such check"))?;

        let value = mutate(check, &system.settings)?;
        check.figure_totals_all(&system.settings, now);

        let check = guard.find_check(serial).expect("still present");
        if let Err(e) = self.store.persist(check).await {
            warn!("could not persist check {serial}: {e:#}");
            // Keep the mutation; the supervisor retries on its tick.
            guard.mark_check_dirty(serial);
            return Err(e);
        }
        guard.mark_check_clean(serial);
        self.test_event_tx.send(TestEvent::CheckPersisted);
        Ok(value)
    }

    /// Appends an order to a subcheck.
    pub async fn add_order(
        &self,
        serial: SerialNumber,
        sub: u32,
        order: Order,
        now: TimeInfo,
    ) -> PosResult<()> {
        self.mutate(serial, now, |check, _settings| {
            check.sub_mut(sub)?.add_order(order)
        })
        .await
    }

    /// Applies a tender to a subcheck.
    pub async fn add_payment(
        &self,
        serial: SerialNumber,
        sub: u32,
        payment: Payment,
        now: TimeInfo,
    ) -> PosResult<()> {
        self.mutate(serial, now, |check, _settings| {
            check.sub_mut(sub)?.add_payment(payment)
        })
        .await
    }

    /// Settles a paid-up subcheck and dispatches newly sent orders to
    /// the kitchen displays.
    #[instrument(skip_all, name = "(settle)")]
    pub async fn settle(
        &self,
        serial: SerialNumber,
        sub: u32,
        now: TimeInfo,
    ) -> PosResult<()> {
        let kitchen = self.kitchen.clone();
        self.mutate(serial, now, move |check, settings| {
            let newly_sent = check.sub_mut(sub)?.settle()?;
            if check.is_settled() {
                check.close(now)?;
            }
            kitchen.publish_sent(
                check.serial(),
                &check.label,
                sub,
                &newly_sent,
                settings,
            );
            Ok(())
        })
        .await
    }

    /// Splits the check's open orders into per-seat subchecks.
    pub async fn split_by_seat(
        &self,
        serial: SerialNumber,
        now: TimeInfo,
    ) -> PosResult<()> {
        self.mutate(serial, now, |check, settings| {
            check.split_by_seat(settings, now)
        })
        .await
    }

    /// Merges all open subchecks back into the lowest-numbered one.
    pub async fn merge_open(
        &self,
        serial: SerialNumber,
        now: TimeInfo,
    ) -> PosResult<()> {
        self.mutate(serial, now, |check, settings| {
            check.merge_open(settings, now)
        })
        .await
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicBool, Ordering};

    use common::money::Money;

    use super::*;
    use crate::checks::payment::TenderType;
    use crate::employee::EmployeeDb;
    use crate::menu::{ItemFamily, Menu};
    use crate::settings::Settings;

    fn now() -> TimeInfo {
        TimeInfo::from_ymd_hms(2026, 3, 14, 18, 30, 0).unwrap()
    }

    /// A store that fails on demand.
    struct FlakyStore {
        dir: PathBuf,
        fail: AtomicBool,
    }

    #[async_trait]
    impl CheckStore for FlakyStore {
        async fn persist(&self, check: &Check) -> PosResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(PosError::Io(std::io::Error::other(
                    "disk on fire",
                )));
            }
            check.save_to_dir(&self.dir)
        }
    }

    fn manager(
        dir: &std::path::Path,
        fail: bool,
    ) -> (CheckManager<FlakyStore>, Arc<Mutex<System>>) {
        let system = Arc::new(Mutex::new(System::new(
            dir.join("data"),
            dir.join("archive"),
            Settings::default(),
            EmployeeDb::new(),
            Menu::new(),
        )));
        let store = FlakyStore {
            dir: dir.join("data").join("current"),
            fail: AtomicBool::new(fail),
        };
        let manager = CheckManager::new(
            system.clone(),
            store,
            KitchenBroadcast::new(),
            TestEventSender::noop(),
        );
        (manager, system)
    }

    #[tokio::test]
    async fn order_then_pay_then_settle() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, system) = manager(dir.path(), false);

        let serial = manager
            .new_check(CustomerType::DineIn, "T1", 2, now())
            .await
            .unwrap();
        manager
            .add_order(
                serial,
                1,
                Order::new(
                    "Burger",
                    ItemFamily::Entree,
                    Money::from_cents(1000),
                ),
                now(),
            )
            .await
            .unwrap();
        manager
            .add_payment(
                serial,
                1,
                Payment::new(TenderType::Cash, Money::from_cents(1000)),
                now(),
            )
            .await
            .unwrap();
        manager.settle(serial, 1, now()).await.unwrap();

        let system = system.lock().await;
        let check = system.find_check(serial).unwrap();
        assert!(check.is_settled());
        assert!(check.time_closed.is_some());
        assert!(!system.is_check_dirty(serial));
        assert!(dir
            .path()
            .join("data/current")
            .join(format!("check_{serial}.dat"))
            .exists());
    }

    #[tokio::test]
    async fn failed_mutation_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, system) = manager(dir.path(), false);
        let serial = manager
            .new_check(CustomerType::DineIn, "T1", 2, now())
            .await
            .unwrap();

        // Settling an empty subcheck is a state error.
        let err = manager.settle(serial, 1, now()).await;
        assert!(matches!(err, Err(PosError::State(_))));

        let system = system.lock().await;
        let check = system.find_check(serial).unwrap();
        assert!(check.sub(1).unwrap().is_open());
        assert!(!system.is_check_dirty(serial));
    }

    #[tokio::test]
    async fn persist_failure_keeps_mutation_and_marks_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, system) = manager(dir.path(), false);
        let serial = manager
            .new_check(CustomerType::DineIn, "T1", 2, now())
            .await
            .unwrap();

        manager.store.fail.store(true, Ordering::SeqCst);
        let err = manager
            .add_order(
                serial,
                1,
                Order::new(
                    "Burger",
                    ItemFamily::Entree,
                    Money::from_cents(1000),
                ),
                now(),
            )
            .await;
        assert!(matches!(err, Err(PosError::Io(_))));

        let guard = system.lock().await;
        let check = guard.find_check(serial).unwrap();
        // The order survived in memory and the check awaits auto-save.
        assert_eq!(check.sub(1).unwrap().orders.len(), 1);
        assert!(guard.is_check_dirty(serial));
        drop(guard);

        // Recovery: the supervisor's save path clears the dirty flag.
        manager.store.fail.store(false, Ordering::SeqCst);
        let (attempted, failed) =
            system.lock().await.save_dirty_checks();
        assert_eq!((attempted, failed), (1, 0));
    }
}
