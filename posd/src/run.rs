//! Runtime construction and the control process's task set.
//!
//! Construction order matters: logging first, then settings (with
//! overlays), reference data, the system (serial counter + live check
//! reload), the control registry and printer channels, and finally the
//! persistence supervisor, which observes everything else. The
//! display transport attaches to [`Runtime::control`] and drives model
//! mutations through [`Runtime::checks`].

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use common::constants::{SHUTDOWN_TIMEOUT, SMALL_CHANNEL_SIZE};
use common::shutdown::ShutdownChannel;
use common::task::{join_tasks_and_shutdown, PosTask};
use common::time_info::TimeInfo;
use till_pos::checks::manager::{CheckManager, FileCheckStore};
use till_pos::control::Control;
use till_pos::employee::EmployeeDb;
use till_pos::kitchen::KitchenBroadcast;
use till_pos::menu::Menu;
use till_pos::persist::cups::HostRunner;
use till_pos::persist::{
    save_outcome_from_ratio, saver, spawn_supervisor,
    validate_outcome_from_ratio, validator, DataChecksums,
    PersistenceManager, SaveOutcome, ValidateOutcome,
};
use till_pos::printer::channel::{
    spawn_channel, spawn_printer_process, PrinterEvent,
};
use till_pos::settings::Settings;
use till_pos::system::System;
use till_pos::terminal::page::{Page, StaticPages, PAGE_LOGIN};
use till_pos::terminal::Terminal;
use till_pos::test_event::TestEventSender;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use till_pos::credit::backend::{
    AuthBackend, CreditCheqClient, MainStreetClient,
};

use crate::cli::Args;
use crate::config::{BackendConfig, Config};

pub struct Runtime {
    pub system: Arc<Mutex<System>>,
    pub control: Arc<std::sync::Mutex<Control>>,
    pub checks: CheckManager<FileCheckStore>,
    pub kitchen: KitchenBroadcast,
    pub persist: PersistenceManager<HostRunner>,
    pub pages: Arc<StaticPages>,
    /// The card authorization backend, when one is configured. End of
    /// day and the terminal card workflows route through this.
    pub backend: Option<Arc<dyn AuthBackend>>,
    pub shutdown: ShutdownChannel,
    config: Config,
    static_tasks: Vec<PosTask<()>>,
}

/// Loads reference data exported by the back-office tools; both files
/// are optional on a fresh install.
fn load_reference_data(
    data_path: &std::path::Path,
) -> anyhow::Result<(EmployeeDb, Menu)> {
    let employees = match std::fs::read(data_path.join("employees.json")) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .context("parsing employees.json")?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            EmployeeDb::new()
        }
        Err(e) => return Err(e).context("reading employees.json"),
    };
    let menu = match std::fs::read(data_path.join("menu.json")) {
        Ok(bytes) => {
            serde_json::from_slice(&bytes).context("parsing menu.json")?
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Menu::new(),
        Err(e) => return Err(e).context("reading menu.json"),
    };
    Ok((employees, menu))
}

pub async fn build(args: &Args, config: Config) -> anyhow::Result<Runtime> {
    let data_path = args.data_path.clone();
    let archive_path = args.archive_path();
    let now = TimeInfo::now();

    // Settings: binary file + ini overlays + the global media slice.
    let mut settings = Settings::load(
        &Settings::settings_path(&data_path),
        &Settings::conf_dir(&data_path),
    )
    .context("loading settings")?;
    settings
        .load_global_media(&Settings::media_path(&data_path))
        .context("loading global media")?;

    let (employees, menu) = load_reference_data(&data_path)?;
    info!(
        "loaded {} employees, {} menu items",
        employees.len(),
        menu.len(),
    );

    // The system: serial counter and live checks.
    let mut system =
        System::new(data_path, archive_path, settings, employees, menu);
    system.load_state().context("loading system state")?;
    system
        .load_current_checks(now)
        .context("reloading live checks")?;
    let current_dir = system.current_dir();
    let system = Arc::new(Mutex::new(system));

    // Terminals. The zone database adapter goes here; until a display
    // service provides one, every terminal boots on the login page.
    let pages = Arc::new(
        StaticPages::new().with_page(Page::bare(PAGE_LOGIN)),
    );
    let mut control = Control::new();
    for terminal in &config.terminals {
        control.add_terminal(Terminal::new(
            terminal.name.clone(),
            terminal.kind,
            pages.as_ref(),
            now,
        ))?;
    }
    let control = Arc::new(std::sync::Mutex::new(control));

    let kitchen = KitchenBroadcast::new();
    let checks = CheckManager::new(
        system.clone(),
        FileCheckStore { dir: current_dir },
        kitchen.clone(),
        TestEventSender::noop(),
    );

    // The supervisor observes edit state and data checksums through
    // closures so it never holds a reference into the registries.
    let edit_control = control.clone();
    let sum_system = system.clone();
    let sum_control = control.clone();
    let persist = PersistenceManager::new(
        config.supervisor.clone(),
        HostRunner,
        Box::new(move || {
            edit_control.lock().expect("not poisoned").any_terminal_in_edit()
        }),
        Box::new(move || {
            let terminals =
                sum_control.lock().expect("not poisoned").terminals().len();
            match sum_system.try_lock() {
                Ok(system) => DataChecksums {
                    checks: system.non_training_checks().count(),
                    terminals,
                    store_name_len: system.settings.store_name.len(),
                },
                Err(_) => DataChecksums {
                    terminals,
                    ..DataChecksums::default()
                },
            }
        }),
        TestEventSender::noop(),
    );
    register_critical_data(&persist, &system).await;

    let backend: Option<Arc<dyn AuthBackend>> = match &config.backend {
        BackendConfig::None => None,
        BackendConfig::MainStreet { addr } => Some(Arc::new(
            MainStreetClient { addr: addr.clone() },
        )),
        BackendConfig::CreditCheq { addr } => Some(Arc::new(
            CreditCheqClient { addr: addr.clone() },
        )),
    };

    let shutdown = ShutdownChannel::new();
    Ok(Runtime {
        system,
        control,
        checks,
        kitchen,
        persist,
        pages,
        backend,
        shutdown,
        config,
        static_tasks: Vec::new(),
    })
}

/// Registers the default critical-data set: checks and settings (both
/// emergency), archives and terminals (sweep only).
async fn register_critical_data(
    persist: &PersistenceManager<HostRunner>,
    system: &Arc<Mutex<System>>,
) {
    let save_system = system.clone();
    let checks_saver = saver(move || {
        let system = save_system.clone();
        async move {
            let (attempted, failed) =
                system.lock().await.save_dirty_checks();
            save_outcome_from_ratio(attempted - failed, attempted)
        }
    });
    let validate_system = system.clone();
    let checks_validator = validator(move || {
        let system = validate_system.clone();
        async move {
            let system = system.lock().await;
            let total = system.non_training_checks().count();
            let valid = system
                .non_training_checks()
                .filter(|c| {
                    c.serial().value() > 0 && !c.filename.is_empty()
                })
                .count();
            validate_outcome_from_ratio(valid, total)
        }
    });
    persist
        .register_critical_data(
            "checks",
            checks_validator,
            checks_saver,
            true,
        )
        .await;

    let settings_system = system.clone();
    let settings_saver = saver(move || {
        let system = settings_system.clone();
        async move {
            let system = system.lock().await;
            let path = Settings::settings_path(&system.data_path);
            let conf = Settings::conf_dir(&system.data_path);
            match system.settings.save(&path, &conf) {
                Ok(()) => SaveOutcome::Success,
                Err(e) => {
                    warn!("settings save failed: {e:#}");
                    SaveOutcome::Failed
                }
            }
        }
    });
    persist
        .register_critical_data(
            "settings",
            validator(|| async { ValidateOutcome::Success }),
            settings_saver,
            true,
        )
        .await;

    // Archives are immutable once written; the entry exists so failure
    // counters and dirty flags have somewhere to live.
    persist
        .register_critical_data(
            "archives",
            validator(|| async { ValidateOutcome::Success }),
            saver(|| async { SaveOutcome::Success }),
            false,
        )
        .await;
    persist
        .register_critical_data(
            "terminals",
            validator(|| async { ValidateOutcome::Success }),
            saver(|| async { SaveOutcome::Success }),
            false,
        )
        .await;
}

impl Runtime {
    /// Spawns the static task set: printer channels and their event
    /// pump, the persistence supervisor, the idle sweep, and the OS
    /// signal handler.
    pub async fn spawn_tasks(&mut self) {
        let (printer_event_tx, mut printer_event_rx) =
            mpsc::channel(SMALL_CHANNEL_SIZE);

        for entry in &self.config.printers {
            match spawn_printer_process(
                entry,
                std::path::Path::new(&self.config.printer_helper),
            )
            .await
            {
                Ok(stream) => {
                    let (handle, task) = spawn_channel(
                        entry.number,
                        stream,
                        printer_event_tx.clone(),
                        TestEventSender::noop(),
                        self.shutdown.clone(),
                    );
                    self.control
                        .lock()
                        .expect("not poisoned")
                        .add_printer(entry.clone(), handle);
                    self.static_tasks.push(task);
                }
                Err(e) => {
                    warn!(
                        "printer {} did not come up: {e:#}",
                        entry.number,
                    );
                }
            }
        }

        // Printer event pump: dead channels get their entry killed and
        // the supervisor told. The pump holds a sender so the channel
        // stays open even with no printers configured.
        let control = self.control.clone();
        let persist = self.persist.clone();
        let shutdown = self.shutdown.clone();
        self.static_tasks.push(PosTask::spawn_named(
            "printer events",
            async move {
                let _keepalive = printer_event_tx;
                loop {
                    tokio::select! {
                        biased;
                        () = shutdown.recv() => break,
                        event = printer_event_rx.recv() => {
                            let Some(event) = event else { break };
                            if let PrinterEvent::Dead { printer } = event {
                                control
                                    .lock()
                                    .expect("not poisoned")
                                    .kill_printer(printer);
                                persist
                                    .log_error(
                                        "printers",
                                        format!(
                                            "printer {printer} went away",
                                        ),
                                        TimeInfo::now(),
                                    )
                                    .await;
                            }
                        }
                    }
                }
            },
        ));

        self.static_tasks
            .push(spawn_supervisor(self.persist.clone(), self.shutdown.clone()));

        // Idle sweep: blank terminals that outran the screen-blank
        // window back to the login page.
        let control = self.control.clone();
        let system = self.system.clone();
        let pages = self.pages.clone();
        let shutdown = self.shutdown.clone();
        self.static_tasks.push(PosTask::spawn_named(
            "idle sweep",
            async move {
                let mut timer =
                    tokio::time::interval(Duration::from_secs(15));
                loop {
                    tokio::select! {
                        biased;
                        () = shutdown.recv() => break,
                        _ = timer.tick() => {
                            let now = TimeInfo::now();
                            let settings_snapshot =
                                system.lock().await.settings.clone();
                            let mut control =
                                control.lock().expect("not poisoned");
                            for terminal in control.terminals_mut() {
                                if terminal.signed_in()
                                    && terminal
                                        .is_idle(now, &settings_snapshot)
                                {
                                    terminal.force_idle_logout(
                                        pages.as_ref(),
                                        now,
                                    );
                                }
                            }
                        }
                    }
                }
            },
        ));

        // OS signals start the orderly shutdown.
        let persist = self.persist.clone();
        let control = self.control.clone();
        let shutdown = self.shutdown.clone();
        self.static_tasks.push(PosTask::spawn_named(
            "signal handler",
            async move {
                let ctrl_c = tokio::signal::ctrl_c();
                tokio::pin!(ctrl_c);
                tokio::select! {
                    () = shutdown.recv() => return,
                    result = &mut ctrl_c
                        => {
                        if let Err(e) = result {
                            warn!("signal handler failed: {e}");
                        }
                    }
                }
                info!("shutdown signal received");
                persist
                    .prepare_for_shutdown(|| {
                        control
                            .lock()
                            .expect("not poisoned")
                            .force_exit_edit_modes();
                    })
                    .await;
                shutdown.send();
            },
        ));
    }

    /// Runs until shutdown, joining every task.
    pub async fn serve(mut self) -> anyhow::Result<()> {
        self.spawn_tasks().await;
        let (_eph_tx, eph_rx) = mpsc::channel(SMALL_CHANNEL_SIZE);
        join_tasks_and_shutdown(
            "posd",
            std::mem::take(&mut self.static_tasks),
            eph_rx,
            self.shutdown.clone(),
            SHUTDOWN_TIMEOUT,
        )
        .await;
        Ok(())
    }
}

/// The helper `main` delegates to.
pub async fn run(args: Args) -> anyhow::Result<()> {
    let config = Config::load(&args.config_path())
        .context("loading posd.conf")?;
    let runtime = build(&args, config).await?;
    runtime.serve().await
}
