//! CUPS health monitoring and recovery.
//!
//! Printing runs through CUPS, and a wedged scheduler is the most
//! common way a store "loses" its printers. The monitor probes on a
//! timer, attempts a service restart on failure, and keeps a
//! consecutive-failure count the integrity report surfaces. Probes are
//! run through [`execute_command_with_timeout`] so a hung `systemctl`
//! can never hang the supervisor, and never hang shutdown.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use super::exec::execute_command_with_timeout;
use crate::test_event::{TestEvent, TestEventSender};

/// Consecutive failures that trigger the loud warning.
pub const CUPS_FAILURE_ALARM: u32 = 3;

/// How probes and recovery commands are run; tests inject fakes.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[&str], timeout: Duration)
        -> i32;
}

/// Runs real commands on the host.
pub struct HostRunner;

#[async_trait]
impl CommandRunner for HostRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> i32 {
        execute_command_with_timeout(program, args, timeout).await
    }
}

pub struct CupsMonitor<R> {
    runner: R,
    probe_timeout: Duration,
    healthy: bool,
    consecutive_failures: u32,
    test_event_tx: TestEventSender,
}

impl<R: CommandRunner> CupsMonitor<R> {
    pub fn new(
        runner: R,
        probe_timeout: Duration,
        test_event_tx: TestEventSender,
    ) -> Self {
        Self {
            runner,
            probe_timeout,
            healthy: true,
            consecutive_failures: 0,
            test_event_tx,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Both probes must pass: the service is active and the scheduler
    /// answers.
    async fn probe(&self) -> bool {
        let service = self
            .runner
            .run(
                "systemctl",
                &["is-active", "--quiet", "cups"],
                self.probe_timeout,
            )
            .await;
        if service != 0 {
            return false;
        }
        let scheduler = self
            .runner
            .run("lpstat", &["-r"], self.probe_timeout)
            .await;
        scheduler == 0
    }

    /// One monitoring pass: probe, and on failure attempt recovery and
    /// re-probe. Returns the resulting health.
    pub async fn check(&mut self) -> bool {
        self.test_event_tx.send(TestEvent::CupsProbed);
        if self.probe().await {
            if !self.healthy {
                info!("CUPS communication restored");
            }
            self.healthy = true;
            self.consecutive_failures = 0;
            return true;
        }

        self.consecutive_failures += 1;
        self.healthy = false;
        warn!(
            "CUPS probe failed ({} consecutive)",
            self.consecutive_failures,
        );

        self.attempt_recovery().await;
        if self.consecutive_failures >= CUPS_FAILURE_ALARM {
            error!(
                "CUPS unreachable after {} attempts - printing is down",
                self.consecutive_failures,
            );
        }
        self.healthy
    }

    /// `systemctl restart cups` with a doubled timeout, a settle pause,
    /// then a fresh probe.
    async fn attempt_recovery(&mut self) {
        self.test_event_tx.send(TestEvent::CupsRecoveryAttempted);
        let restart = self
            .runner
            .run(
                "systemctl",
                &["restart", "cups"],
                self.probe_timeout * 2,
            )
            .await;
        if restart != 0 {
            warn!("CUPS restart failed with code {restart}");
            return;
        }
        // Give the scheduler a moment to come up before re-probing.
        tokio::time::sleep(Duration::from_secs(2)).await;
        if self.probe().await {
            info!("CUPS recovered after restart");
            self.healthy = true;
            self.consecutive_failures = 0;
        }
    }
}

#[cfg(test)]
pub mod testing {
    //! Scriptable command runners.

    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    /// Behaves per command: probes hang or fail, restarts succeed or
    /// not.
    pub struct FakeRunner {
        /// Probes hang this long before answering (the runner still
        /// honours `timeout`, like the real one).
        pub probe_delay: Duration,
        /// Exit code probes produce when they do answer.
        pub probe_code: i32,
        /// Exit code for `systemctl restart`.
        pub restart_code: i32,
        pub calls: AtomicU32,
    }

    impl FakeRunner {
        pub fn healthy() -> Self {
            Self {
                probe_delay: Duration::ZERO,
                probe_code: 0,
                restart_code: 0,
                calls: AtomicU32::new(0),
            }
        }

        pub fn hanging(delay: Duration) -> Self {
            Self {
                probe_delay: delay,
                probe_code: 0,
                restart_code: 0,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(
            &self,
            _program: &str,
            args: &[&str],
            timeout: Duration,
        ) -> i32 {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let restarting = args.first() == Some(&"restart");
            let (delay, code) = if restarting {
                (Duration::ZERO, self.restart_code)
            } else {
                (self.probe_delay, self.probe_code)
            };
            match tokio::time::timeout(timeout, tokio::time::sleep(delay))
                .await
            {
                Ok(()) => code,
                Err(_) => super::super::exec::TIMEOUT_EXIT_CODE,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::Ordering;

    use super::testing::FakeRunner;
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn healthy_probe_keeps_counters_clear() {
        let mut monitor = CupsMonitor::new(
            FakeRunner::healthy(),
            Duration::from_secs(5),
            TestEventSender::noop(),
        );
        assert!(monitor.check().await);
        assert!(monitor.is_healthy());
        assert_eq!(monitor.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_probe_times_out_and_recovers_unhealthy() {
        // Probe hangs 10s against a 2s timeout; the restart "works" but
        // the re-probe hangs too, so the monitor stays unhealthy.
        let mut monitor = CupsMonitor::new(
            FakeRunner::hanging(Duration::from_secs(10)),
            Duration::from_secs(2),
            TestEventSender::noop(),
        );
        assert!(!monitor.check().await);
        assert!(!monitor.is_healthy());
        assert_eq!(monitor.consecutive_failures(), 1);

        // Failures keep accumulating to the alarm threshold.
        monitor.check().await;
        monitor.check().await;
        assert_eq!(monitor.consecutive_failures(), CUPS_FAILURE_ALARM);
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_resets_counters() {
        let runner = FakeRunner {
            probe_delay: Duration::from_secs(10),
            probe_code: 0,
            restart_code: 0,
            calls: std::sync::atomic::AtomicU32::new(0),
        };
        let mut monitor = CupsMonitor::new(
            runner,
            Duration::from_secs(2),
            TestEventSender::noop(),
        );
        assert!(!monitor.check().await);

        // The scheduler comes back: probes answer immediately now.
        monitor.runner.probe_delay = Duration::ZERO;
        assert!(monitor.check().await);
        assert!(monitor.is_healthy());
        assert_eq!(monitor.consecutive_failures(), 0);
        assert!(monitor.runner.calls.load(Ordering::SeqCst) > 0);
    }
}
