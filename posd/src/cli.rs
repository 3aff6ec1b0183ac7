//! Command line options for the control process.

use std::path::PathBuf;

use argh::FromArgs;

/// The POS control process.
#[derive(Debug, FromArgs)]
pub struct Args {
    /// data directory (settings, live checks, employee db)
    #[argh(option, default = "PathBuf::from(\"/var/lib/till\")")]
    pub data_path: PathBuf,

    /// archive directory for completed business days
    #[argh(option)]
    pub archive_path: Option<PathBuf>,

    /// configuration file (defaults to <data_path>/posd.conf)
    #[argh(option)]
    pub config: Option<PathBuf>,

    /// tracing filter directives, e.g. "info,till_pos=debug"
    #[argh(option)]
    pub log: Option<String>,
}

impl Args {
    pub fn archive_path(&self) -> PathBuf {
        self.archive_path
            .clone()
            .unwrap_or_else(|| self.data_path.join("archive"))
    }

    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| self.data_path.join("posd.conf"))
    }
}
