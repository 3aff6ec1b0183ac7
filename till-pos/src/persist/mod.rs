//! The persistence supervisor.
//!
//! Guarantees critical state is durably written without stealing focus
//! from the operator and without ever blocking shutdown on a hung
//! external service. Subsystems register `(validator, saver)` pairs;
//! the supervisor drives them from timer ticks and tracks dirty flags,
//! failure counters, and bounded error logs for the integrity report.
//!
//! Shutdown discipline: `prepare_for_shutdown` deliberately skips the
//! validate/save sweep: recent auto-saves already cover it, and a hang
//! here is exactly the failure class this supervisor exists to prevent.
//! `force_shutdown` additionally runs the emergency savers (checks and
//! settings only).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::shutdown::ShutdownChannel;
use common::task::PosTask;
use common::time_info::TimeInfo;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{error, info, instrument, warn};

use crate::test_event::{TestEvent, TestEventSender};

/// Command execution with timeouts.
pub mod exec;
/// CUPS health monitoring.
pub mod cups;

use cups::{CommandRunner, CupsMonitor};

/// Outcome of one saver run, worst-of reduced across items.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum SaveOutcome {
    Success,
    Partial,
    Failed,
    CriticalFailure,
}

/// Outcome of one validator run.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum ValidateOutcome {
    Success,
    Warning,
    Error,
    Critical,
}

/// `Success` needs ≥95% of items through, `Partial` ≥80%.
pub fn save_outcome_from_ratio(saved: usize, total: usize) -> SaveOutcome {
    if total == 0 {
        return SaveOutcome::Success;
    }
    let ratio = saved as f64 / total as f64;
    if ratio >= 0.95 {
        SaveOutcome::Success
    } else if ratio >= 0.80 {
        SaveOutcome::Partial
    } else {
        SaveOutcome::Failed
    }
}

/// Same thresholds as saving.
pub fn validate_outcome_from_ratio(
    valid: usize,
    total: usize,
) -> ValidateOutcome {
    if total == 0 {
        return ValidateOutcome::Success;
    }
    let ratio = valid as f64 / total as f64;
    if ratio >= 0.95 {
        ValidateOutcome::Success
    } else if ratio >= 0.80 {
        ValidateOutcome::Warning
    } else {
        ValidateOutcome::Error
    }
}

pub type Saver =
    Box<dyn Fn() -> BoxFuture<'static, SaveOutcome> + Send + Sync>;
pub type Validator =
    Box<dyn Fn() -> BoxFuture<'static, ValidateOutcome> + Send + Sync>;

/// Wraps an async closure as a [`Saver`], handling the future boxing.
pub fn saver<F, Fut>(f: F) -> Saver
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = SaveOutcome> + Send + 'static,
{
    Box::new(move || Box::pin(f()) as BoxFuture<'static, SaveOutcome>)
}

/// Wraps an async closure as a [`Validator`].
pub fn validator<F, Fut>(f: F) -> Validator
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ValidateOutcome> + Send + 'static,
{
    Box::new(move || {
        Box::pin(f()) as BoxFuture<'static, ValidateOutcome>
    })
}

/// Consecutive saver failures before the integrity warning and
/// recovery attempt.
pub const FAILURE_RECOVERY_THRESHOLD: u32 = 3;

struct CriticalData {
    name: &'static str,
    validator: Validator,
    saver: Saver,
    dirty: bool,
    last_modified: Option<TimeInfo>,
    consecutive_failures: u32,
    /// Included in `force_shutdown`'s emergency sweep.
    emergency: bool,
}

#[derive(Clone, Debug)]
pub struct LogEntry {
    pub when: TimeInfo,
    pub component: String,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    pub auto_save_interval: Duration,
    pub cups_check_interval: Duration,
    pub system_call_timeout: Duration,
    pub max_log_entries: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            auto_save_interval: Duration::from_secs(30),
            cups_check_interval: Duration::from_secs(60),
            system_call_timeout: Duration::from_secs(5),
            max_log_entries: 1000,
        }
    }
}

/// Data checksums surfaced by the integrity report.
#[derive(Clone, Copy, Debug, Default)]
pub struct DataChecksums {
    /// Live checks, training excluded.
    pub checks: usize,
    pub terminals: usize,
    pub store_name_len: usize,
}

struct Inner<R: CommandRunner> {
    config: SupervisorConfig,
    items: Vec<CriticalData>,
    last_auto_save: Option<TimeInfo>,
    cups: CupsMonitor<R>,
    error_log: Vec<LogEntry>,
    warning_log: Vec<LogEntry>,
    error_count: u64,
    /// Any terminal in edit mode? Supplied by the control layer.
    edit_probe: Box<dyn Fn() -> bool + Send + Sync>,
    /// Facts for the integrity report.
    checksum_probe: Box<dyn Fn() -> DataChecksums + Send + Sync>,
}

/// Cloneable supervisor handle.
pub struct PersistenceManager<R: CommandRunner> {
    inner: Arc<Mutex<Inner<R>>>,
    shutdown_in_progress: Arc<AtomicBool>,
    /// Woken by [`mark_dirty`](Self::mark_dirty) so the supervisor can
    /// save ahead of its timer. [`tokio::sync::Notify`] stores at most
    /// one pending wake, so a burst of dirty marks between ticks
    /// collapses into a single early save instead of queueing one save
    /// per mutation.
    save_nudge: Arc<tokio::sync::Notify>,
    test_event_tx: TestEventSender,
}

impl<R: CommandRunner> Clone for PersistenceManager<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            shutdown_in_progress: self.shutdown_in_progress.clone(),
            save_nudge: self.save_nudge.clone(),
            test_event_tx: self.test_event_tx.clone(),
        }
    }
}

impl<R: CommandRunner> PersistenceManager<R> {
    pub fn new(
        config: SupervisorConfig,
        runner: R,
        edit_probe: Box<dyn Fn() -> bool + Send + Sync>,
        checksum_probe: Box<dyn Fn() -> DataChecksums + Send + Sync>,
        test_event_tx: TestEventSender,
    ) -> Self {
        let cups = CupsMonitor::new(
            runner,
            config.system_call_timeout,
            test_event_tx.clone(),
        );
        Self {
            inner: Arc::new(Mutex::new(Inner {
                config,
                items: Vec::new(),
                last_auto_save: None,
                cups,
                error_log: Vec::new(),
                warning_log: Vec::new(),
                error_count: 0,
                edit_probe,
                checksum_probe,
            })),
            shutdown_in_progress: Arc::new(AtomicBool::new(false)),
            save_nudge: Arc::new(tokio::sync::Notify::new()),
            test_event_tx,
        }
    }

    pub fn shutdown_in_progress(&self) -> bool {
        self.shutdown_in_progress.load(Ordering::Acquire)
    }

    /// Registers one critical data item. `emergency` items also run in
    /// `force_shutdown`'s last-ditch sweep.
    pub async fn register_critical_data(
        &self,
        name: &'static str,
        validator: Validator,
        saver: Saver,
        emergency: bool,
    ) {
        let mut inner = self.inner.lock().await;
        inner.items.push(CriticalData {
            name,
            validator,
            saver,
            dirty: false,
            last_modified: None,
            consecutive_failures: 0,
            emergency,
        });
        info!("registered critical data '{name}'");
    }

    pub async fn mark_dirty(&self, name: &str, now: TimeInfo) {
        let mut inner = self.inner.lock().await;
        if let Some(item) =
            inner.items.iter_mut().find(|i| i.name == name)
        {
            item.dirty = true;
            item.last_modified = Some(now);
            // Wake the supervisor so the save lands before the next
            // timer tick would.
            self.save_nudge.notify_one();
        }
    }

    /// Resolves when dirty data is waiting on an early save. At most
    /// one wake is stored, so however many items went dirty since the
    /// last save, this fires once.
    pub async fn save_nudged(&self) {
        self.save_nudge.notified().await
    }

    pub async fn mark_clean(&self, name: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(item) =
            inner.items.iter_mut().find(|i| i.name == name)
        {
            item.dirty = false;
        }
    }

    pub async fn is_dirty(&self, name: &str) -> bool {
        let inner = self.inner.lock().await;
        inner
            .items
            .iter()
            .find(|i| i.name == name)
            .map(|i| i.dirty)
            .unwrap_or(false)
    }

    pub async fn last_auto_save(&self) -> Option<TimeInfo> {
        self.inner.lock().await.last_auto_save
    }

    // --- Auto-save --- //

    /// One auto-save tick. Skips (entirely, timestamp untouched) while
    /// shutdown is in progress or any terminal is in edit mode; skips
    /// but advances the timestamp when nothing is dirty.
    #[instrument(skip_all, name = "(auto-save)")]
    pub async fn auto_save_tick(&self, now: TimeInfo) -> SaveOutcome {
        if self.shutdown_in_progress() {
            return SaveOutcome::Success;
        }
        let mut inner = self.inner.lock().await;
        if (inner.edit_probe)() {
            let any_dirty = inner.items.iter().any(|i| i.dirty);
            if any_dirty {
                inner.log_warning(
                    "supervisor",
                    "skipping auto-save - terminal in edit mode \
                     (data is dirty)",
                    now,
                );
            }
            self.test_event_tx.send(TestEvent::AutoSaveSkipped);
            return SaveOutcome::Success;
        }
        if !inner.items.iter().any(|i| i.dirty) {
            // Nothing to do; still advance so the report shows life.
            inner.last_auto_save = Some(now);
            self.test_event_tx.send(TestEvent::AutoSaveSkipped);
            return SaveOutcome::Success;
        }

        let mut worst = SaveOutcome::Success;
        for index in 0..inner.items.len() {
            if !inner.items[index].dirty {
                continue;
            }
            let outcome = (inner.items[index].saver)().await;
            let item = &mut inner.items[index];
            worst = worst.max(outcome);
            match outcome {
                SaveOutcome::Success | SaveOutcome::Partial => {
                    item.dirty = false;
                    item.consecutive_failures = 0;
                }
                SaveOutcome::Failed | SaveOutcome::CriticalFailure => {
                    item.consecutive_failures += 1;
                    let name = item.name;
                    let failures = item.consecutive_failures;
                    inner.log_error(
                        name,
                        format!("save failed ({failures} consecutive)"),
                        now,
                    );
                    if failures > FAILURE_RECOVERY_THRESHOLD {
                        error!(
                            "'{name}' failing persistently; running \
                             emergency save",
                        );
                        let recovery =
                            (inner.items[index].saver)().await;
                        if recovery <= SaveOutcome::Partial {
                            let item = &mut inner.items[index];
                            item.dirty = false;
                            item.consecutive_failures = 0;
                        }
                    }
                }
            }
        }
        inner.last_auto_save = Some(now);
        self.test_event_tx.send(TestEvent::AutoSaveRan);
        worst
    }

    /// Validates every registered item. Skipped during shutdown.
    pub async fn validate_critical_data(&self) -> ValidateOutcome {
        if self.shutdown_in_progress() {
            return ValidateOutcome::Success;
        }
        let inner = self.inner.lock().await;
        let mut worst = ValidateOutcome::Success;
        for item in &inner.items {
            let outcome = (item.validator)().await;
            worst = worst.max(outcome);
        }
        worst
    }

    // --- CUPS --- //

    pub async fn cups_tick(&self) -> bool {
        if self.shutdown_in_progress() {
            return true;
        }
        let mut inner = self.inner.lock().await;
        inner.cups.check().await
    }

    pub async fn cups_healthy(&self) -> bool {
        self.inner.lock().await.cups.is_healthy()
    }

    // --- Shutdown --- //

    /// Flips the shutdown flag and forces terminals out of edit mode
    /// via `force_exit_edit`. The expensive validate/save sweep is
    /// intentionally skipped: recent auto-saves cover it, and hanging
    /// here is the bug class this supervisor exists to prevent.
    pub async fn prepare_for_shutdown(
        &self,
        force_exit_edit: impl FnOnce(),
    ) -> SaveOutcome {
        self.shutdown_in_progress.store(true, Ordering::Release);
        info!("persistence supervisor preparing for shutdown");
        force_exit_edit();
        SaveOutcome::Success
    }

    /// `prepare_for_shutdown` plus the emergency sweep over the items
    /// registered as emergency data (checks and settings).
    pub async fn force_shutdown(
        &self,
        force_exit_edit: impl FnOnce(),
    ) -> SaveOutcome {
        self.prepare_for_shutdown(force_exit_edit).await;
        self.emergency_save().await
    }

    /// Last-ditch save of the emergency items only. Runs even during
    /// shutdown; errors are logged, never propagated.
    pub async fn emergency_save(&self) -> SaveOutcome {
        let inner = self.inner.lock().await;
        let mut worst = SaveOutcome::Success;
        for item in inner.items.iter().filter(|i| i.emergency) {
            let outcome = (item.saver)().await;
            if outcome > SaveOutcome::Partial {
                error!("emergency save of '{}' failed", item.name);
            }
            worst = worst.max(outcome);
        }
        worst
    }

    // --- Diagnostics --- //

    pub async fn log_error(
        &self,
        component: &str,
        message: impl Into<String>,
        now: TimeInfo,
    ) {
        let mut inner = self.inner.lock().await;
        inner.log_error(component, message, now);
    }

    /// Human-readable integrity report: CUPS health, failure counters,
    /// dirty flags, recent errors, and data checksums.
    pub async fn generate_integrity_report(&self, now: TimeInfo) -> String {
        let inner = self.inner.lock().await;
        let mut report = String::new();
        report.push_str(&format!("=== Data Integrity Report {now} ===\n"));
        report.push_str(&format!(
            "cups: {} ({} consecutive failures)\n",
            if inner.cups.is_healthy() { "healthy" } else { "DOWN" },
            inner.cups.consecutive_failures(),
        ));
        report.push_str(&format!(
            "last auto-save: {}\n",
            inner
                .last_auto_save
                .map(|t| t.to_string())
                .unwrap_or_else(|| "never".into()),
        ));
        for item in &inner.items {
            report.push_str(&format!(
                "{}: dirty={} failures={}\n",
                item.name, item.dirty, item.consecutive_failures,
            ));
        }
        let sums = (inner.checksum_probe)();
        report.push_str(&format!(
            "checksums: checks={} terminals={} store_name_len={}\n",
            sums.checks, sums.terminals, sums.store_name_len,
        ));
        report.push_str(&format!(
            "errors: {} total, {} retained\n",
            inner.error_count,
            inner.error_log.len(),
        ));
        for entry in inner.error_log.iter().rev().take(5) {
            report.push_str(&format!(
                "  [{}] {}: {}\n",
                entry.when, entry.component, entry.message,
            ));
        }
        report
    }

    /// Cheap consistency probe over the checksum facts: every
    /// non-training check counted, terminal states sane.
    pub async fn verify_data_consistency(&self) -> bool {
        let inner = self.inner.lock().await;
        let unhealthy = inner
            .items
            .iter()
            .any(|i| i.consecutive_failures > FAILURE_RECOVERY_THRESHOLD);
        !unhealthy
    }

    pub async fn recent_warnings(&self) -> Vec<LogEntry> {
        self.inner.lock().await.warning_log.clone()
    }

    pub async fn error_count(&self) -> u64 {
        self.inner.lock().await.error_count
    }
}

impl<R: CommandRunner> Inner<R> {
    fn log_error(
        &mut self,
        component: &str,
        message: impl Into<String>,
        now: TimeInfo,
    ) {
        let message = message.into();
        error!("[{component}] {message}");
        self.error_count += 1;
        push_bounded(
            &mut self.error_log,
            LogEntry {
                when: now,
                component: component.to_owned(),
                message,
            },
            self.config.max_log_entries,
        );
    }

    fn log_warning(
        &mut self,
        component: &str,
        message: impl Into<String>,
        now: TimeInfo,
    ) {
        let message = message.into();
        warn!("[{component}] {message}");
        push_bounded(
            &mut self.warning_log,
            LogEntry {
                when: now,
                component: component.to_owned(),
                message,
            },
            self.config.max_log_entries,
        );
    }
}

/// Entries are capped; the oldest drop first.
fn push_bounded(log: &mut Vec<LogEntry>, entry: LogEntry, cap: usize) {
    if log.len() == cap {
        log.remove(0);
    }
    log.push(entry);
}

/// Spawns the supervisor's periodic task: auto-save and CUPS ticks
/// until shutdown.
pub fn spawn_supervisor<R: CommandRunner + 'static>(
    manager: PersistenceManager<R>,
    shutdown: ShutdownChannel,
) -> PosTask<()> {
    PosTask::spawn_named("persistence supervisor", async move {
        let config = manager.inner.lock().await.config.clone();
        let mut save_timer = interval(config.auto_save_interval);
        let mut cups_timer = interval(config.cups_check_interval);
        // The first interval tick fires immediately; swallow both.
        save_timer.tick().await;
        cups_timer.tick().await;
        loop {
            tokio::select! {
                biased;
                () = shutdown.recv() => {
                    info!("persistence supervisor shutting down");
                    break;
                }
                // Dirty data pulls the save forward of the timer.
                () = manager.save_nudged() => {
                    manager.auto_save_tick(TimeInfo::now()).await;
                }
                _ = save_timer.tick() => {
                    manager.auto_save_tick(TimeInfo::now()).await;
                }
                _ = cups_timer.tick() => {
                    manager.cups_tick().await;
                }
            }
        }
    })
}
