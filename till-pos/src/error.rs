//! The kernel error taxonomy.
//!
//! Every mutating operation returns a typed [`PosError`] so UI code can
//! translate failures into dialog banners and the supervisor can route
//! them (retry on `Io`, manager override on `Permission`, safe shutdown
//! on `Fatal`). Card-decline verbs arrive verbatim from the backend and
//! are preserved so receipts match historical artifacts.

use common::datafile::DataFileError;
use thiserror::Error;

pub type PosResult<T> = Result<T, PosError>;

#[derive(Debug, Error)]
pub enum PosError {
    /// File or socket failure; recoverable by retry or emergency save.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed version, out-of-range enumerated value, or a backend
    /// response violating its schema.
    #[error("protocol: {0}")]
    Protocol(String),

    /// Operation not permitted in the current state.
    #[error("wrong state: {0}")]
    State(&'static str),

    /// The card backend declined or timed out. The verb is shown (and
    /// printed) exactly as received.
    #[error("authorization failed: {verb}")]
    Auth { verb: String },

    /// The employee lacks the required role.
    #[error("{role} required")]
    Permission { role: &'static str },

    /// A validator found data below its acceptance ratio.
    #[error("integrity: {0}")]
    Integrity(String),

    /// Unrecoverable; the control process should enter safe shutdown.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl PosError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn auth(verb: impl Into<String>) -> Self {
        Self::Auth { verb: verb.into() }
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    /// Whether the supervisor should retry this on the next tick.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Integrity(_))
    }
}

impl From<DataFileError> for PosError {
    fn from(e: DataFileError) -> Self {
        match e {
            DataFileError::Io(io) => Self::Io(io),
            other => Self::Protocol(other.to_string()),
        }
    }
}
