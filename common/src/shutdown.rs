//! The process-wide shutdown signal.
//!
//! Every long-lived actor in the POS (the persistence supervisor, each
//! printer channel, the idle sweep, the signal handler) holds a
//! [`ShutdownChannel`] handle and selects on [`recv`] alongside its
//! work. The kernel's shutdown rule is "never deadlock on the way out",
//! which dictates the semantics here:
//!
//! - any handle may raise the signal, and raising it twice is harmless
//!   (the OS signal handler and a fatal-error path may race);
//! - a task that subscribes late, or is busy when the signal fires,
//!   still observes it on its next `recv` (a freshly spawned printer
//!   channel must not outlive a shutdown that beat it into existence);
//! - observing the signal never blocks.
//!
//! The state is a single watched flag that only ever latches from
//! `false` to `true`; receivers wait for that edge, or see it already
//! latched.
//!
//! [`recv`]: ShutdownChannel::recv

use tokio::sync::watch;

#[derive(Clone, Debug)]
pub struct ShutdownChannel {
    flag_tx: watch::Sender<bool>,
    flag_rx: watch::Receiver<bool>,
}

impl ShutdownChannel {
    /// One channel per process; every actor gets a clone of it.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let (flag_tx, flag_rx) = watch::channel(false);
        Self { flag_tx, flag_rx }
    }

    /// Raises the shutdown flag. Idempotent.
    pub fn send(&self) {
        self.flag_tx.send_replace(true);
    }

    /// Waits until the flag is raised; completes immediately if it
    /// already was.
    pub async fn recv(&self) {
        let mut rx = self.flag_rx.clone();
        rx.wait_for(|&raised| raised)
            .await
            // Every handle carries a sender, so ours cannot be gone.
            .map(|_| ())
            .expect("this handle keeps a sender alive");
    }

    /// Whether the flag has been raised, without waiting.
    pub fn try_recv(&self) -> bool {
        *self.flag_rx.borrow()
    }
}
