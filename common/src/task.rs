//! Named task handles and the join-with-shutdown supervisor.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, Instrument};

use crate::shutdown::ShutdownChannel;

/// Errors that can occur when joining [`PosTask`]s.
#[derive(Debug, Error)]
pub enum Error {
    #[error("static task finished prematurely: {name}")]
    PrematureFinish { name: Cow<'static, str> },
    #[error("some tasks failed to finish on time: {hung_tasks:?}")]
    Hung { hung_tasks: Vec<String> },
}

/// A thin wrapper around [`JoinHandle`] that carries a task name and adds
/// `#[must_use]` so every spawned task is either joined or explicitly
/// detached. Panics inside the task propagate to whoever polls the
/// handle, so keep polling up to the top-level future.
#[must_use]
pub struct PosTask<T> {
    task: JoinHandle<T>,
    name: Cow<'static, str>,
}

impl<T> PosTask<T> {
    /// Spawns a named task. The current tracing span propagates across
    /// the spawn boundary.
    #[allow(clippy::disallowed_methods)]
    pub fn spawn_named<F>(
        name: impl Into<Cow<'static, str>>,
        future: F,
    ) -> PosTask<F::Output>
    where
        F: Future<Output = T> + Send + 'static,
        F::Output: Send + 'static,
    {
        let span = tracing::Span::current();
        PosTask {
            task: tokio::spawn(future.instrument(span)),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Explicitly give up the handle; the task runs unobserved.
    pub fn detach(self) {
        drop(self.task)
    }

    pub fn abort(&self) {
        self.task.abort()
    }

    /// Wraps the task so that finishing logs its name and outcome, and
    /// the output maps to just the name.
    fn logged(self) -> LoggedPosTask<T> {
        LoggedPosTask(self)
    }
}

impl<T> Future for PosTask<T> {
    type Output = Result<T, JoinError>;
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task).poll(cx)
    }
}

/// A [`Future`] wrapping [`PosTask`] whose output is the task's name; the
/// result itself is logged when the task finishes.
struct LoggedPosTask<T>(PosTask<T>);

impl<T> Future for LoggedPosTask<T> {
    type Output = Cow<'static, str>;
    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.0.task).poll(cx) {
            Poll::Ready(result) => {
                let name = self.0.name.clone();
                match result {
                    Ok(_) => debug!("task '{name}' finished"),
                    Err(e) if e.is_panic() => {
                        error!("task '{name}' panicked: {e:#}")
                    }
                    Err(e) => error!("task '{name}' failed to join: {e:#}"),
                }
                Poll::Ready(name)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> fmt::Debug for PosTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PosTask").field("name", &self.name).finish()
    }
}

/// The process's standard structured-concurrency harness.
///
/// - "static" tasks run for the program lifetime; if one finishes early,
///   a shutdown is triggered and an error returned.
/// - "ephemeral" tasks (per-connection readers, one-shot jobs) arrive
///   over `eph_tasks_rx` and may finish freely.
/// - After a shutdown signal, remaining tasks get `shutdown_timeout` to
///   complete before being reported as hung.
pub async fn try_join_tasks_and_shutdown(
    static_tasks: Vec<PosTask<()>>,
    mut eph_tasks_rx: mpsc::Receiver<PosTask<()>>,
    shutdown: ShutdownChannel,
    shutdown_timeout: Duration,
) -> Result<(), Error> {
    let mut static_tasks = static_tasks
        .into_iter()
        .map(PosTask::logged)
        .collect::<FuturesUnordered<_>>();
    let mut ephemeral_tasks = FuturesUnordered::new();

    let mut result = Ok(());

    loop {
        tokio::select! {
            // Mitigate a possible select! race after a signal is sent
            biased;
            () = shutdown.recv() => break,
            Some(task) = eph_tasks_rx.recv() => {
                debug!("received ephemeral task: {}", task.name());
                ephemeral_tasks.push(task.logged());
            }
            Some(name) = ephemeral_tasks.next() => {
                debug!("ephemeral task finished: {name}");
            }
            Some(name) = static_tasks.next(), if !static_tasks.is_empty() => {
                result = Err(Error::PrematureFinish { name });
                shutdown.send();
                break;
            }
        }
    }

    let mut remaining = static_tasks
        .into_iter()
        .chain(ephemeral_tasks)
        .collect::<FuturesUnordered<_>>();

    let timeout = tokio::time::sleep(shutdown_timeout);
    tokio::pin!(timeout);

    while !remaining.is_empty() {
        tokio::select! {
            Some(_name) = remaining.next() => (),
            () = &mut timeout => {
                let hung_tasks = remaining
                    .iter()
                    .map(|task| task.0.name().to_owned())
                    .collect::<Vec<_>>();
                return Err(Error::Hung { hung_tasks });
            }
        }
    }

    result
}

/// [`try_join_tasks_and_shutdown`], logging the outcome. Useful when the
/// callsite wants a plain `Future<Output = ()>`.
pub async fn join_tasks_and_shutdown(
    name: &str,
    static_tasks: Vec<PosTask<()>>,
    eph_tasks_rx: mpsc::Receiver<PosTask<()>>,
    shutdown: ShutdownChannel,
    shutdown_timeout: Duration,
) {
    let result = try_join_tasks_and_shutdown(
        static_tasks,
        eph_tasks_rx,
        shutdown,
        shutdown_timeout,
    )
    .await;

    match result {
        Ok(()) => info!("{name} tasks finished"),
        Err(e) => error!("{name} tasks errored: {e:#}"),
    }
}
