//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use derive_new::new;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio::{task, time};
use tracing::{Instrument, error};

/// Handle to a task spawned with [`Task::spawn`] or
/// [`Task::spawn_supervised`].
///
/// Dropping the handle aborts the task unless [`Task::detach`] was called.
#[derive(Debug)]
pub struct Task<T> {
    join_handle: task::JoinHandle<T>,
    detached: bool,
}

/// One-shot timer. The callback runs once the timeout expires, unless the
/// handle is dropped first.
#[derive(Debug)]
pub struct TimeoutTask {
    #[cfg(not(feature = "testing"))]
    inner: TimerInner,
}

/// Periodic timer. The callback runs on every tick until the handle is
/// dropped.
#[derive(Debug)]
pub struct IntervalTask {
    #[cfg(not(feature = "testing"))]
    inner: TimerInner,
}

#[derive(Debug, new)]
struct TimerInner {
    _task: Task<()>,
    control: UnboundedSender<TimerCtl>,
    next: Arc<Mutex<Instant>>,
}

#[derive(Debug)]
enum TimerCtl {
    Reset(Option<Duration>),
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
            detached: false,
        }
    }

    /// Spawns a task that is restarted whenever it panics. Used by the
    /// network receive loops, which parse untrusted input.
    pub fn spawn_supervised<F, Fut>(spawn_fn: F) -> Task<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let join_handle = tokio::spawn(
            async move {
                loop {
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
        );
        Task {
            join_handle,
            detached: false,
        }
    }

    /// Keeps the task running after its handle is dropped.
    pub fn detach(&mut self) {
        self.detached = true;
    }

    /// Returns whether the task has already completed.
    pub fn is_finished(&self) -> bool {
        self.join_handle.is_finished()
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
        if !self.detached {
            self.join_handle.abort();
        }
    }
}

// ===== impl TimeoutTask =====

impl TimeoutTask {
    /// Spawns a timer that awaits `cb()` once `timeout` elapses.
    #[cfg(not(feature = "testing"))]
    pub fn new<F, Fut>(timeout: Duration, cb: F) -> TimeoutTask
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let next = Arc::new(Mutex::new(Instant::now() + timeout));
        let next_child = next.clone();

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
                        ctl = control_rx.recv() => match ctl {
                            Some(TimerCtl::Reset(new_timeout)) => {
                                let deadline = Instant::now()
                                    + new_timeout.unwrap_or(timeout);
                                sleep.as_mut().reset(deadline);
                                set_deadline(&next_child, deadline);
                            }
                            // The handle was dropped.
                            None => break,
                        }
                    }
                }
            }
            .in_current_span(),
        );

        TimeoutTask {
            inner: TimerInner::new(task, control_tx, next),
        }
    }

    /// Restarts the timer, using `timeout` if given or the original value
    /// otherwise. Works whether or not the timer already expired.
    pub fn reset(&mut self, timeout: Option<Duration>) {
        #[cfg(not(feature = "testing"))]
        if self.inner.control.send(TimerCtl::Reset(timeout)).is_err() {
            error!("failed to reset timeout");
        }
    }

    /// Time left until expiry.
    pub fn remaining(&self) -> Duration {
        #[cfg(not(feature = "testing"))]
        {
            remaining(&self.inner.next)
        }
        #[cfg(feature = "testing")]
        {
            Duration::ZERO
        }
    }
}

// ===== impl IntervalTask =====

impl IntervalTask {
    /// Spawns a timer that awaits `cb()` every `interval`, optionally
    /// ticking right away.
    #[cfg(not(feature = "testing"))]
    pub fn new<F, Fut>(
        interval: Duration,
        tick_on_start: bool,
        mut cb: F,
    ) -> IntervalTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let next = Arc::new(Mutex::new(Instant::now() + interval));
        let next_child = next.clone();

        let task = Task::spawn(
            async move {
                let start = if tick_on_start {
                    Instant::now()
                } else {
                    Instant::now() + interval
                };
                let mut ticker = time::interval_at(start, interval);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let deadline = Instant::now() + interval;
                            (cb)().await;
                            set_deadline(&next_child, deadline);
                        }
                        ctl = control_rx.recv() => match ctl {
                            Some(TimerCtl::Reset(new_interval)) => {
                                let period = new_interval.unwrap_or(interval);
                                let deadline = Instant::now() + period;
                                ticker = time::interval_at(deadline, period);
                                set_deadline(&next_child, deadline);
                            }
                            // The handle was dropped.
                            None => break,
                        }
                    }
                }
            }
            .in_current_span(),
        );

        IntervalTask {
            inner: TimerInner::new(task, control_tx, next),
        }
    }

    /// Restarts the interval, optionally with a new period.
    pub fn reset(&mut self, interval: Option<Duration>) {
        #[cfg(not(feature = "testing"))]
        if self.inner.control.send(TimerCtl::Reset(interval)).is_err() {
            error!("failed to reset interval");
        }
    }

    /// Time left until the next tick.
    pub fn remaining(&self) -> Duration {
        #[cfg(not(feature = "testing"))]
        {
            remaining(&self.inner.next)
        }
        #[cfg(feature = "testing")]
        {
            Duration::ZERO
        }
    }
}

// ===== helper functions =====

#[cfg(not(feature = "testing"))]
fn set_deadline(next: &Mutex<Instant>, deadline: Instant) {
    if let Ok(mut next) = next.lock() {
        *next = deadline;
    }
}

#[cfg(not(feature = "testing"))]
fn remaining(next: &Mutex<Instant>) -> Duration {
    next.lock()
        .map(|next| next.saturating_duration_since(Instant::now()))
        .unwrap_or_default()
}
