//! Business-day archives.
//!
//! An archive is the immutable bundle of one completed day: its checks,
//! drawers, exception log, credit-card batch results, and a snapshot of
//! the media catalogues in effect. Layout under
//! `<archive_path>/<start_stamp>/`:
//!
//! ```text
//! checks/check_<serial>.dat
//! drawers/drawer_<serial>.dat
//! exceptions.dat
//! cc_batches.dat
//! media.dat
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use common::datafile::{
    write_with_backup, InputDataFile, OutputDataFile,
};
use common::time_info::TimeInfo;
use tracing::{info, warn};

use crate::checks::Check;
use crate::credit::batch::{DayBatches, BATCH_DB_VERSION};
use crate::drawer::{Drawer, DRAWER_VERSION};
use crate::error::{PosError, PosResult};
use crate::settings::Settings;

pub const EXCEPTIONS_VERSION: u32 = 1;

pub struct Archive {
    /// Business-day start; names the directory.
    pub stamp: TimeInfo,
    pub checks: Vec<Check>,
    pub drawers: Vec<Drawer>,
    pub exceptions: Vec<String>,
    pub batches: DayBatches,
}

impl Archive {
    pub fn dir(archive_path: &Path, stamp: TimeInfo) -> PathBuf {
        archive_path.join(stamp.dir_stamp())
    }

    /// Writes the archive. The media snapshot ("alt media") is written
    /// only if the directory doesn't already carry one.
    pub fn save(
        &self,
        archive_path: &Path,
        settings: &Settings,
    ) -> PosResult<PathBuf> {
        let dir = Self::dir(archive_path, self.stamp);
        let checks_dir = dir.join("checks");
        let drawers_dir = dir.join("drawers");
        fs::create_dir_all(&checks_dir)?;
        fs::create_dir_all(&drawers_dir)?;

        for check in &self.checks {
            check.save_to_dir(&checks_dir)?;
        }
        for drawer in &self.drawers {
            write_with_backup(
                drawers_dir.join(format!("drawer_{}.dat", drawer.serial)),
                DRAWER_VERSION,
                |out| drawer.write(out),
            )?;
        }

        write_with_backup(
            dir.join("exceptions.dat"),
            EXCEPTIONS_VERSION,
            |out: &mut OutputDataFile| {
                out.put_u32(self.exceptions.len() as u32)?;
                for entry in &self.exceptions {
                    out.put_str(entry)?;
                }
                Ok(())
            },
        )?;

        write_with_backup(
            dir.join("cc_batches.dat"),
            BATCH_DB_VERSION,
            |out| self.batches.write(out),
        )?;

        let media_path = dir.join("media.dat");
        if !media_path.exists() {
            settings.save_media_snapshot(&media_path)?;
        }

        info!(
            "archived {} checks, {} drawers to {}",
            self.checks.len(),
            self.drawers.len(),
            dir.display(),
        );
        Ok(dir)
    }

    /// Reads an archive back, recomputing check totals with the given
    /// settings (the archive's own media snapshot can be loaded into a
    /// historical settings copy first for exact tender resolution).
    pub fn load(
        dir: &Path,
        settings: &Settings,
        now: TimeInfo,
    ) -> PosResult<Self> {
        let stamp = dir
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(TimeInfo::parse_dir_stamp)
            .ok_or_else(|| {
                PosError::protocol(format!(
                    "archive directory {} has no valid stamp",
                    dir.display(),
                ))
            })?;

        let mut checks = Vec::new();
        let checks_dir = dir.join("checks");
        if checks_dir.exists() {
            for entry in fs::read_dir(&checks_dir)? {
                let path = entry?.path();
                match Check::load_from_file(&path, settings, now) {
                    Ok(check) => checks.push(check),
                    Err(e) => warn!(
                        "skipping unreadable archived check {}: {e}",
                        path.display(),
                    ),
                }
            }
        }
        checks.sort_by_key(|c| c.serial());

        let mut drawers = Vec::new();
        let drawers_dir = dir.join("drawers");
        if drawers_dir.exists() {
            for entry in fs::read_dir(&drawers_dir)? {
                let path = entry?.path();
                let mut input = InputDataFile::open(
                    &path,
                    DRAWER_VERSION,
                    DRAWER_VERSION,
                )?;
                drawers.push(Drawer::read(&mut input)?);
            }
        }
        drawers.sort_by_key(|d| d.serial);

        let mut exceptions = Vec::new();
        let exceptions_path = dir.join("exceptions.dat");
        if exceptions_path.exists() {
            let mut input = InputDataFile::open(
                &exceptions_path,
                EXCEPTIONS_VERSION,
                EXCEPTIONS_VERSION,
            )?;
            let count = input.get_u32()?;
            for _ in 0..count {
                exceptions.push(input.get_str()?);
            }
        }

        let batches_path = dir.join("cc_batches.dat");
        let batches = if batches_path.exists() {
            let mut input = InputDataFile::open(
                &batches_path,
                BATCH_DB_VERSION,
                BATCH_DB_VERSION,
            )?;
            DayBatches::read(&mut input)?
        } else {
            DayBatches::default()
        };

        Ok(Self {
            stamp,
            checks,
            drawers,
            exceptions,
            batches,
        })
    }

    /// Stamps of every archive under `archive_path`, oldest first.
    pub fn list(archive_path: &Path) -> PosResult<Vec<TimeInfo>> {
        let mut stamps = Vec::new();
        let entries = match fs::read_dir(archive_path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(stamps)
            }
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(stamp) = entry
                .file_name()
                .to_str()
                .and_then(TimeInfo::parse_dir_stamp)
            {
                stamps.push(stamp);
            }
        }
        stamps.sort();
        Ok(stamps)
    }

    /// Loads the archive's own media snapshot into a copy of
    /// `settings`, for resolving historical tender ids.
    pub fn historical_settings(
        dir: &Path,
        settings: &Settings,
    ) -> PosResult<Settings> {
        let mut historical = Settings {
            discounts: Default::default(),
            coupons: Default::default(),
            credit_cards: Default::default(),
            comps: Default::default(),
            meals: Default::default(),
            ..settings.clone()
        };
        let media_path = dir.join("media.dat");
        if media_path.exists() {
            historical.load_media_snapshot(&media_path)?;
        }
        Ok(historical)
    }

    // The loader intentionally has no `save_check` counterpart for
    // individual members: archives never mutate.
}
