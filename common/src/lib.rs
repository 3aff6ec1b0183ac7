//! The `common` crate contains value types and process-wide utilities shared
//! between the POS kernel and the control process.

/// Application-level constants.
pub mod constants;
/// Versioned binary data files, key/value files, backup-then-write.
pub mod datafile;
/// `Money` and rounding modes.
pub mod money;
/// `Percent`.
pub mod percent;
/// `SerialNumber`.
pub mod serial;
/// `ShutdownChannel`.
pub mod shutdown;
/// `PosTask`.
pub mod task;
/// `TimeInfo`.
pub mod time_info;
