//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio::{task, time};
use tracing::{Instrument, error};

/// A handle for a task created by [`Task::spawn`] or
/// [`Task::spawn_supervised`].
///
/// Dropping the handle cancels the task, so owning a `Task` is owning the
/// work: sockets, timers and receive loops all stop with the structure that
/// holds them.
#[derive(Debug)]
pub struct Task<T> {
    join_handle: task::JoinHandle<T>,
}

/// One-shot timer handle created by [`TimeoutTask::new`].
///
/// The timeout can be pushed back any number of times before it fires;
/// dropping the handle cancels it.
#[derive(Debug)]
pub struct TimeoutTask {
    #[cfg(not(feature = "testing"))]
    inner: TimerHandle,
}

/// Periodic timer handle created by [`IntervalTask::new`].
///
/// Dropping the handle cancels the timer. The first tick fires one full
/// period after creation.
#[derive(Debug)]
pub struct IntervalTask {
    #[cfg(not(feature = "testing"))]
    _task: Task<()>,
}

#[derive(Debug)]
struct TimerHandle {
    _task: Task<()>,
    commands: UnboundedSender<TimerCommand>,
    fires_at: Arc<Mutex<Instant>>,
}

#[derive(Debug)]
enum TimerCommand {
    Restart(Duration),
}

// ===== impl Task =====

impl<T> Task<T> {
    /// Spawns a new asynchronous task, returning a handle for it.
    pub fn spawn<Fut>(future: Fut) -> Task<T>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Task {
            join_handle: task::spawn(future),
        }
    }

    /// Spawns a task that is restarted whenever it panics, and terminates
    /// once it completes normally.
    ///
    /// Network receive loops are fed by remote, possibly hostile input; a
    /// panic while parsing one datagram should cost that datagram, not the
    /// whole routing instance.
    pub fn spawn_supervised<F, Fut>(spawn_fn: F) -> Task<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Task::spawn(
            async move {
                loop {
                    // The worker is wrapped in its own handle so that
                    // cancelling the supervisor also cancels an in-flight
                    // worker.
                    let worker = Task::spawn(spawn_fn());
                    match worker.await {
                        Ok(_) => break,
                        Err(error) if error.is_panic() => {
                            error!("task panicked, restarting...");
                        }
                        Err(error) => {
                            error!(%error, "task failed");
                            break;
                        }
                    }
                }
            }
            .in_current_span(),
        )
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, task::JoinError>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        Pin::new(&mut self.join_handle).poll(cx)
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        self.join_handle.abort();
    }
}

// ===== impl TimeoutTask =====

impl TimeoutTask {
    /// Spawns a timer that calls the provided async closure once, when the
    /// timeout expires.
    #[cfg(not(feature = "testing"))]
    pub fn new<F, Fut>(timeout: Duration, cb: F) -> TimeoutTask
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();

        let fires_at = Arc::new(Mutex::new(Instant::now() + timeout));
        let fires_at_timer = fires_at.clone();

        let task = Task::spawn(
            async move {
                let sleep = time::sleep(timeout);
                tokio::pin!(sleep);

                loop {
                    tokio::select! {
                        _ = &mut sleep => {
                            (cb)().await;
                            break;
                        }
                        command = command_rx.recv() => {
                            match command {
                                Some(TimerCommand::Restart(timeout)) => {
                                    let when = Instant::now() + timeout;
                                    sleep.as_mut().reset(when);
                                    *fires_at_timer.lock().unwrap() = when;
                                }
                                // All handles are gone.
                                None => break,
                            }
                        }
                    }
                }
            }
            .in_current_span(),
        );

        TimeoutTask {
            inner: TimerHandle {
                _task: task,
                commands: command_tx,
                fires_at,
            },
        }
    }

    /// Pushes the timeout back, regardless of whether it already expired.
    pub fn reset(&mut self, timeout: Duration) {
        #[cfg(not(feature = "testing"))]
        {
            let command = TimerCommand::Restart(timeout);
            if self.inner.commands.send(command).is_err() {
                error!("failed to reset timeout");
            }
        }
    }

    /// Returns the remaining time before the timeout expires.
    pub fn remaining(&self) -> Duration {
        #[cfg(not(feature = "testing"))]
        {
            let fires_at = self.inner.fires_at.lock().unwrap();
            fires_at.saturating_duration_since(Instant::now())
        }
        #[cfg(feature = "testing")]
        {
            Duration::ZERO
        }
    }
}

// ===== impl IntervalTask =====

impl IntervalTask {
    /// Spawns a timer that calls the provided async closure on every tick
    /// of the given interval.
    #[cfg(not(feature = "testing"))]
    pub fn new<F, Fut>(interval: Duration, mut cb: F) -> IntervalTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let task = Task::spawn(
            async move {
                let start = Instant::now() + interval;
                let mut ticks = time::interval_at(start, interval);

                loop {
                    ticks.tick().await;
                    (cb)().await;
                }
            }
            .in_current_span(),
        );

        IntervalTask { _task: task }
    }
}
