//! Running external commands with a hard timeout.
//!
//! This is the only place the kernel blocks on another process. The
//! timeout is honoured by SIGKILL, and the child is always reaped so a
//! hung probe can never accumulate zombies.

use std::time::Duration;

use tokio::process::Command;
use tracing::warn;

/// Distinguished return for a command that had to be killed.
pub const TIMEOUT_EXIT_CODE: i32 = -2;
/// Return for a command that could not be spawned at all.
pub const SPAWN_FAILED_EXIT_CODE: i32 = -1;

/// Runs `program args…` and returns its exit code, or
/// [`TIMEOUT_EXIT_CODE`] after killing and reaping a child that outran
/// `timeout`.
pub async fn execute_command_with_timeout(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> i32 {
    let mut child = match Command::new(program)
        .args(args)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            warn!("could not spawn {program}: {e}");
            return SPAWN_FAILED_EXIT_CODE;
        }
    };

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => status.code().unwrap_or(SPAWN_FAILED_EXIT_CODE),
        Ok(Err(e)) => {
            warn!("waiting on {program} failed: {e}");
            SPAWN_FAILED_EXIT_CODE
        }
        Err(_elapsed) => {
            warn!("{program} outran its {timeout:?} timeout, killing");
            // kill() sends SIGKILL and then reaps the child.
            if let Err(e) = child.kill().await {
                warn!("could not kill {program}: {e}");
            }
            TIMEOUT_EXIT_CODE
        }
    }
}
