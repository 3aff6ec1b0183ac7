//! The `till-pos` crate is the runtime coordination kernel of the POS:
//! the authoritative in-memory model of checks and payments, the
//! per-terminal state machines, the credit-card workflow, the dispatch
//! fabric for printers and kitchen video, and the persistence supervisor
//! that keeps all of it durable without ever blocking a shutdown.

/// Business-day archives.
pub mod archive;
/// `Check` / `SubCheck` / `Order` / `Payment` engine.
pub mod checks;
/// Customer display units.
pub mod cdu;
/// Terminal registry and cross-terminal update routing.
pub mod control;
/// Credit / debit card records and the authorization workflow.
pub mod credit;
/// Takeout / delivery customer records.
pub mod customer;
/// Cash drawer lifecycle.
pub mod drawer;
/// Employee reference data.
pub mod employee;
/// The end-of-day pipeline.
pub mod endday;
/// `PosError`.
pub mod error;
/// Kitchen video dispatch.
pub mod kitchen;
/// License server response contract.
pub mod license;
/// Menu reference data.
pub mod menu;
/// The persistence supervisor and CUPS health monitor.
pub mod persist;
/// Remote printer channels, jobs, and target resolution.
pub mod printer;
/// Report data flow.
pub mod reports;
/// Process-wide settings and media catalogues.
pub mod settings;
/// `System`: serial counter, live collections, data paths.
pub mod system;
/// Per-terminal state machines.
pub mod terminal;
/// `TestEvent`.
pub mod test_event;
