//! The control process configuration file.
//!
//! `posd.conf` is a sectioned key/value file: one `[terminal <name>]`
//! section per display, one `[printer <n>]` per device, a `[credit]`
//! section for the authorization backend, and `[supervisor]` overrides
//! for the persistence timers.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use common::datafile::KeyValueFile;
use till_pos::persist::SupervisorConfig;
use till_pos::printer::{PrinterEntry, PrinterModel, PrinterTargetCode};
use till_pos::terminal::TerminalKind;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TerminalConfig {
    pub name: String,
    pub kind: TerminalKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendConfig {
    /// No card processing configured.
    None,
    MainStreet { addr: String },
    CreditCheq { addr: String },
}

#[derive(Clone, Debug)]
pub struct Config {
    pub terminals: Vec<TerminalConfig>,
    pub printers: Vec<PrinterEntry>,
    pub backend: BackendConfig,
    pub supervisor: SupervisorConfig,
    /// Path of the printer helper binary.
    pub printer_helper: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            terminals: Vec::new(),
            printers: Vec::new(),
            backend: BackendConfig::None,
            supervisor: SupervisorConfig::default(),
            printer_helper: "vt_print".into(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let kv = KeyValueFile::load(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut config = Self::default();

        for section in kv.sections() {
            if let Some(name) = section.strip_prefix("terminal ") {
                let kind = match kv.get(section, "kind").unwrap_or("normal")
                {
                    "normal" => TerminalKind::Normal,
                    "order" => TerminalKind::OrderOnly,
                    "bar" => TerminalKind::Bar,
                    "fastfood" => TerminalKind::FastFood,
                    "kitchen" => TerminalKind::KitchenVideo,
                    "kitchen2" => TerminalKind::KitchenVideo2,
                    other => bail!("terminal {name}: unknown kind {other}"),
                };
                config.terminals.push(TerminalConfig {
                    name: name.to_owned(),
                    kind,
                });
            } else if let Some(number) = section.strip_prefix("printer ") {
                let number: u8 = number
                    .parse()
                    .with_context(|| format!("printer id '{number}'"))?;
                let host = kv
                    .get(section, "host")
                    .context("printer needs a host")?
                    .to_owned();
                let port =
                    kv.get_i32(section, "port").unwrap_or(9100) as u16;
                let model = match kv.get(section, "model").unwrap_or("epson")
                {
                    "epson" => PrinterModel::Epson,
                    "star" => PrinterModel::Star,
                    "hp" => PrinterModel::Hp,
                    other => bail!("printer {number}: unknown model {other}"),
                };
                let target = PrinterTargetCode(
                    kv.get_i32(section, "target").unwrap_or(6) as u8,
                );
                config.printers.push(PrinterEntry {
                    target,
                    host,
                    port,
                    model,
                    number,
                });
            }
        }

        if let Some(kind) = kv.get("credit", "backend") {
            let addr = kv
                .get("credit", "addr")
                .context("credit backend needs addr")?
                .to_owned();
            config.backend = match kind {
                "mainstreet" => BackendConfig::MainStreet { addr },
                "creditcheq" => BackendConfig::CreditCheq { addr },
                other => bail!("unknown credit backend '{other}'"),
            };
        }

        if let Some(secs) = kv.get_i32("supervisor", "auto_save_interval") {
            config.supervisor.auto_save_interval =
                Duration::from_secs(secs.max(1) as u64);
        }
        if let Some(secs) = kv.get_i32("supervisor", "cups_check_interval") {
            config.supervisor.cups_check_interval =
                Duration::from_secs(secs.max(1) as u64);
        }
        if let Some(secs) = kv.get_i32("supervisor", "system_call_timeout") {
            config.supervisor.system_call_timeout =
                Duration::from_secs(secs.max(1) as u64);
        }
        if let Some(helper) = kv.get("supervisor", "printer_helper") {
            config.printer_helper = helper.to_owned();
        }

        Ok(config)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("posd.conf");
        std::fs::write(
            &path,
            "\
[terminal front]
kind=normal

[terminal expo]
kind=kitchen

[printer 1]
host=kitchen1
port=9101
model=star
target=1

[credit]
backend=mainstreet
addr=127.0.0.1:9300

[supervisor]
auto_save_interval=15
",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.terminals.len(), 2);
        assert_eq!(config.terminals[1].kind, TerminalKind::KitchenVideo);
        assert_eq!(config.printers.len(), 1);
        assert_eq!(config.printers[0].model, PrinterModel::Star);
        assert_eq!(config.printers[0].target, PrinterTargetCode::KITCHEN1);
        assert_eq!(
            config.backend,
            BackendConfig::MainStreet {
                addr: "127.0.0.1:9300".into()
            },
        );
        assert_eq!(
            config.supervisor.auto_save_interval,
            Duration::from_secs(15),
        );
    }

    #[test]
    fn missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            Config::load(&dir.path().join("absent.conf")).unwrap();
        assert!(config.terminals.is_empty());
        assert_eq!(config.backend, BackendConfig::None);
    }

    #[test]
    fn bad_kind_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("posd.conf");
        std::fs::write(&path, "[terminal t]\nkind=hologram\n").unwrap();
        assert!(Config::load(&path).is_err());
    }
}
