//! Real-time execution of a [`MachineHost`] on a dedicated thread.
//!
//! ```text
//!  Stopped --start--> Running --stop--> Stopped
//!                      ^   |
//!          toggle_pause|   |toggle_pause
//!                      |   v
//!                      Paused
//! ```
//!
//! One mutex (the execution guard) protects all CPU/device mutation. The
//! execution thread takes it for exactly one step at a time; `reset`,
//! `load_state`, `capture_state` and `toggle_pause` take it from the caller's
//! thread, so they never interleave with an in-flight instruction. Waiting
//! for real time happens outside the guard.

pub mod clock;
pub mod events;
pub mod signal;

pub use clock::{ClockConfig, ClockSync, TickRate};
pub use events::{EventRegistry, SchedulerEvent, SubscriptionId};
pub use signal::Signal;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::core::MachineHost;
use crate::error::SchedulerError;
use crate::report::{LogReporter, Reporter};
use crate::snapshot::{self, DEFAULT_CAPTURE_ATTEMPTS, MachineState};

/// Scheduler tuning. Deserializable so front-ends can read it from config.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SchedulerConfig {
    /// Longest wait on the pause gate between paused-frame refreshes.
    pub pause_poll_ms: u64,
    /// How long `stop` waits for the thread before interrupting it, and
    /// again before giving up on it.
    pub join_timeout_ms: u64,
    /// Total attempts `capture_state` makes on a state size mismatch.
    pub capture_attempts: u32,
    pub clock: ClockConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pause_poll_ms: 16,
            join_timeout_ms: 1000,
            capture_attempts: DEFAULT_CAPTURE_ATTEMPTS,
            clock: ClockConfig::default(),
        }
    }
}

/// State shared between the controlling handle and the execution thread.
struct Shared<M> {
    machine: Mutex<M>,
    gate: Signal,
    last_ticks: Arc<AtomicI64>,
    clock: ClockSync,
    events: EventRegistry,
    reporter: Arc<dyn Reporter>,
    pause_poll: Duration,
}

/// Stop flags owned by one execution thread. A stop only ever reaches the
/// thread it took out of the worker slot.
#[derive(Default)]
struct Control {
    shutdown: AtomicBool,
    // Forced interruption: raised by `stop` when a graceful shutdown times out.
    interrupt: AtomicBool,
}

struct Worker {
    handle: JoinHandle<()>,
    done: Receiver<()>,
    control: Arc<Control>,
}

/// Drives a machine in real time and serializes access to it.
pub struct ExecutionScheduler<M: MachineHost + 'static> {
    shared: Arc<Shared<M>>,
    worker: Mutex<Option<Worker>>,
    config: SchedulerConfig,
}

impl<M: MachineHost + 'static> ExecutionScheduler<M> {
    /// Scheduler with default tuning that reports faults to the `log` facade.
    ///
    /// `rate` is read live on every sync, see [`TickRate`].
    pub fn new(machine: M, rate: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        Self::with_config(machine, rate, Arc::new(LogReporter), SchedulerConfig::default())
    }

    pub fn with_config(
        machine: M,
        rate: impl Fn() -> u64 + Send + Sync + 'static,
        reporter: Arc<dyn Reporter>,
        config: SchedulerConfig,
    ) -> Self {
        let last_ticks = Arc::new(AtomicI64::new(machine.cpu_ticks() as i64));
        let clock = {
            let last_ticks = Arc::clone(&last_ticks);
            ClockSync::with_config(
                rate,
                move || last_ticks.load(Ordering::Acquire).max(0) as u64,
                config.clock,
            )
        };
        Self {
            shared: Arc::new(Shared {
                machine: Mutex::new(machine),
                gate: Signal::new(true),
                last_ticks,
                clock,
                events: EventRegistry::new(),
                reporter,
                pause_poll: Duration::from_millis(config.pause_poll_ms.max(1)),
            }),
            worker: Mutex::new(None),
            config,
        }
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reset the machine and the clock, then start executing.
    /// No-op while already running.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let mut worker = self.lock_worker();
        if Self::reap(&mut worker) {
            return Ok(());
        }
        {
            let mut machine = self.shared.lock_machine();
            machine.reset();
            self.shared.store_ticks(machine.cpu_ticks());
        }
        self.shared.clock.reset();
        *worker = Some(self.spawn()?);
        Ok(())
    }

    /// Start executing from whatever state the machine is in (e.g., right
    /// after `load_state`). No-op while already running.
    pub fn start_from_current_state(&self) -> Result<(), SchedulerError> {
        let mut worker = self.lock_worker();
        if Self::reap(&mut worker) {
            return Ok(());
        }
        {
            let machine = self.shared.lock_machine();
            self.shared.store_ticks(machine.cpu_ticks());
        }
        self.shared.clock.resync();
        *worker = Some(self.spawn()?);
        Ok(())
    }

    /// Drop the handle of a thread that already exited (after a fault).
    /// Returns whether a live thread remains.
    fn reap(worker: &mut Option<Worker>) -> bool {
        match worker {
            Some(w) if w.handle.is_finished() => {
                if let Some(w) = worker.take() {
                    let _ = w.handle.join();
                }
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    fn spawn(&self) -> Result<Worker, SchedulerError> {
        self.shared.gate.set();
        let control = Arc::new(Control::default());

        let name = {
            let machine = self.shared.lock_machine();
            format!("{}-exec", machine.name().to_lowercase())
        };
        let (done_tx, done) = crossbeam_channel::bounded(1);
        let shared = Arc::clone(&self.shared);
        let thread_control = Arc::clone(&control);
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || {
                shared.run(&thread_control);
                let _ = done_tx.send(());
            })
            .map_err(SchedulerError::ThreadSpawn)?;
        log::debug!("scheduler: execution thread started");
        Ok(Worker {
            handle,
            done,
            control,
        })
    }

    /// Stop the execution thread. No-op when already stopped.
    ///
    /// Waits up to `join_timeout_ms` for a graceful exit, then raises the
    /// interrupt flag and waits once more. A thread that still has not
    /// exited is detached and reported. The worker slot stays locked until
    /// then, so a concurrent `start` waits for this stop to finish.
    pub fn stop(&self) {
        let mut slot = self.lock_worker();
        let Some(worker) = slot.take() else {
            return;
        };
        let timeout = Duration::from_millis(self.config.join_timeout_ms);

        worker.control.shutdown.store(true, Ordering::Release);
        self.shared.gate.wake();

        if !Self::wait_done(&worker.done, timeout) {
            self.shared.reporter.warn(&format!(
                "execution thread did not stop within {timeout:?}, interrupting"
            ));
            worker.control.interrupt.store(true, Ordering::Release);
            self.shared.gate.wake();
            if !Self::wait_done(&worker.done, timeout) {
                self.shared
                    .reporter
                    .warn("execution thread ignored interruption, detaching it");
                return;
            }
        }
        let _ = worker.handle.join();
        self.shared.reporter.info("execution thread stopped");
    }

    fn wait_done(done: &Receiver<()>, timeout: Duration) -> bool {
        match done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_worker()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    pub fn is_paused(&self) -> bool {
        !self.shared.gate.is_set()
    }

    /// Flip between running and paused. Returns true if now paused.
    ///
    /// On resume the clock is resynced before the guard is released, so the
    /// paused interval is not charged against emulated time.
    pub fn toggle_pause(&self) -> bool {
        let _guard = self.shared.lock_machine();
        if self.shared.gate.is_set() {
            self.shared.gate.clear();
            true
        } else {
            self.shared.clock.resync();
            self.shared.gate.set();
            false
        }
    }

    /// Reset the machine under the execution guard.
    pub fn reset(&self) {
        let mut machine = self.shared.lock_machine();
        machine.reset();
        self.shared.store_ticks(machine.cpu_ticks());
        self.shared.clock.reset();
    }

    pub fn resync_clock(&self) {
        self.shared.clock.resync();
    }

    /// Serialize the machine under the execution guard.
    pub fn capture_state(&self) -> Result<MachineState, SchedulerError> {
        let mut machine = self.shared.lock_machine();
        let state = snapshot::capture(
            &mut *machine,
            self.config.capture_attempts,
            self.shared.reporter.as_ref(),
        )?;
        Ok(state)
    }

    /// Restore the machine under the execution guard, then notify
    /// [`SchedulerEvent::StateLoaded`] subscribers.
    pub fn load_state(&self, state: MachineState) -> Result<(), SchedulerError> {
        {
            let mut machine = self.shared.lock_machine();
            snapshot::restore(&mut *machine, &state)?;
            self.shared.store_ticks(machine.cpu_ticks());
            self.shared.clock.resync();
        }
        self.shared.events.emit(SchedulerEvent::StateLoaded);
        Ok(())
    }

    /// Tick count observed after the most recent step, reset or load.
    pub fn cpu_ticks(&self) -> u64 {
        self.shared.last_ticks.load(Ordering::Acquire).max(0) as u64
    }

    /// Run `f` with exclusive access to the machine.
    pub fn with_machine<R>(&self, f: impl FnOnce(&mut M) -> R) -> R {
        let mut machine = self.shared.lock_machine();
        f(&mut machine)
    }

    pub fn events(&self) -> &EventRegistry {
        &self.shared.events
    }

    pub fn clock(&self) -> &ClockSync {
        &self.shared.clock
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }
}

impl<M: MachineHost + 'static> Drop for ExecutionScheduler<M> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<M: MachineHost> Shared<M> {
    // A fault that panicked mid-step poisons the guard; the fault has been
    // reported and callers may still reset or restore, so keep going.
    fn lock_machine(&self) -> MutexGuard<'_, M> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn store_ticks(&self, ticks: u64) {
        self.last_ticks
            .store(i64::try_from(ticks).unwrap_or(i64::MAX), Ordering::Release);
    }

    /// Thread body: run the loop, report at most one fault.
    fn run(&self, control: &Control) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.execute(control)));
        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(payload) => Some(SchedulerError::Panicked(panic_message(payload.as_ref()))),
        };
        match error {
            Some(e) if e.is_interruption() => log::debug!("scheduler: interrupted during shutdown"),
            Some(e) => self.reporter.fault(&e),
            None => {}
        }
    }

    fn execute(&self, control: &Control) -> Result<(), SchedulerError> {
        while !control.shutdown.load(Ordering::Acquire) {
            if control.interrupt.load(Ordering::Acquire) {
                return Err(SchedulerError::Interrupted);
            }

            if !self.gate.is_set() {
                self.gate.wait_timeout(self.pause_poll);
                if !control.shutdown.load(Ordering::Acquire) {
                    self.events.emit(SchedulerEvent::PausedFrameRefresh);
                }
                continue;
            }

            self.clock
                .sync_with_real_time(&control.shutdown, &control.interrupt)?;
            self.step(control)?;
        }
        Ok(())
    }

    fn step(&self, control: &Control) -> Result<(), SchedulerError> {
        let mut machine = self.lock_machine();
        // Paused or stopped between the sync and taking the guard.
        if !self.gate.is_set() || control.shutdown.load(Ordering::Acquire) {
            return Ok(());
        }

        let before = machine.cpu_ticks();
        machine.step_cpu()?;
        let after = machine.cpu_ticks();

        let delta = after.saturating_sub(before);
        if delta > 0 {
            machine.advance_devices(delta);
        }
        self.store_ticks(after);

        if machine.try_consume_interrupt() {
            machine.request_interrupt();
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
