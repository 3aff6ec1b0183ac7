//! Test-only observability events.
//!
//! Actors emit [`TestEvent`]s at interesting points so integration tests
//! can wait on behavior instead of sleeping. In production the sender is
//! a no-op.

use tokio::sync::mpsc;
use tracing::debug;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TestEvent {
    CheckPersisted,
    AutoSaveRan,
    AutoSaveSkipped,
    CupsProbed,
    CupsRecoveryAttempted,
    PrinterJobQueued,
    PrinterChannelDied,
    CreditFinalized,
    BatchSettled,
    ArchiveWritten,
}

/// Cloneable sender half. [`TestEventSender::noop`] drops all events.
#[derive(Clone)]
pub struct TestEventSender(Option<mpsc::UnboundedSender<TestEvent>>);

impl TestEventSender {
    pub fn noop() -> Self {
        Self(None)
    }

    pub fn new_pair() -> (Self, mpsc::UnboundedReceiver<TestEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(Some(tx)), rx)
    }

    pub fn send(&self, event: TestEvent) {
        if let Some(tx) = &self.0 {
            debug!("test event: {event:?}");
            let _ = tx.send(event);
        }
    }
}
