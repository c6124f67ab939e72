//! Real-time reconciliation of emulated ticks against the wall clock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::SchedulerError;

/// Tuning for [`ClockSync`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClockConfig {
    /// How far behind real time emulation may fall before the baseline is
    /// moved up instead of catching up at full speed.
    pub max_lag_ms: u64,
    /// Longest single sleep; cancellation is checked between slices.
    pub sleep_slice_ms: u64,
    /// Emulation may run this far ahead before the thread sleeps at all.
    pub min_sleep_us: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            max_lag_ms: 250,
            sleep_slice_ms: 10,
            min_sleep_us: 1000,
        }
    }
}

/// Shared, adjustable ticks-per-second value.
///
/// Hand [`TickRate::accessor`] to [`ClockSync`]; calling [`TickRate::set`]
/// later (e.g., switching PAL/NTSC) takes effect from the next resync.
#[derive(Clone, Debug)]
pub struct TickRate(Arc<AtomicU64>);

impl TickRate {
    pub fn new(ticks_per_second: u64) -> Self {
        Self(Arc::new(AtomicU64::new(ticks_per_second)))
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, ticks_per_second: u64) {
        self.0.store(ticks_per_second, Ordering::Relaxed);
    }

    pub fn accessor(&self) -> impl Fn() -> u64 + Send + Sync + 'static {
        let rate = Arc::clone(&self.0);
        move || rate.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Copy, Debug)]
struct Baseline {
    instant: Instant,
    ticks: u64,
}

type Accessor = Box<dyn Fn() -> u64 + Send + Sync>;

/// Keeps emulated time in step with real time.
///
/// Both the rate and the current tick count are read through live
/// accessors, so the clock never holds a machine lock. The baseline pairs a
/// wall-clock instant with the tick count at that instant; an instruction is
/// due once `baseline.instant + (ticks - baseline.ticks) / rate` has passed.
pub struct ClockSync {
    rate: Accessor,
    ticks: Accessor,
    baseline: Mutex<Baseline>,
    config: ClockConfig,
}

impl ClockSync {
    pub fn new(
        rate: impl Fn() -> u64 + Send + Sync + 'static,
        ticks: impl Fn() -> u64 + Send + Sync + 'static,
    ) -> Self {
        Self::with_config(rate, ticks, ClockConfig::default())
    }

    pub fn with_config(
        rate: impl Fn() -> u64 + Send + Sync + 'static,
        ticks: impl Fn() -> u64 + Send + Sync + 'static,
        config: ClockConfig,
    ) -> Self {
        Self {
            rate: Box::new(rate),
            ticks: Box::new(ticks),
            baseline: Mutex::new(Baseline {
                instant: Instant::now(),
                ticks: 0,
            }),
            config,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Baseline> {
        self.baseline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ticks_per_second(&self) -> u64 {
        (self.rate)()
    }

    /// Rebase to tick 0 at the current instant.
    pub fn reset(&self) {
        *self.lock() = Baseline {
            instant: Instant::now(),
            ticks: 0,
        };
    }

    /// Rebase to the current tick count at the current instant, so time
    /// spent paused or loading is not owed to the emulation.
    pub fn resync(&self) {
        let ticks = (self.ticks)();
        *self.lock() = Baseline {
            instant: Instant::now(),
            ticks,
        };
    }

    /// The current `(instant, ticks)` baseline.
    pub fn baseline(&self) -> (Instant, u64) {
        let b = *self.lock();
        (b.instant, b.ticks)
    }

    /// Wall-clock instant at which the current tick count is due, or `None`
    /// when unthrottled (rate 0) or the baseline had to be moved.
    fn due_at(&self) -> Option<Instant> {
        let rate = (self.rate)();
        if rate == 0 {
            return None;
        }
        let ticks = (self.ticks)();
        let now = Instant::now();
        let mut baseline = self.lock();

        if ticks < baseline.ticks {
            // The machine was reset behind our back.
            *baseline = Baseline {
                instant: now,
                ticks,
            };
            return None;
        }

        let elapsed_ticks = (ticks - baseline.ticks) as u128;
        let nanos = elapsed_ticks * 1_000_000_000 / rate as u128;
        let target = baseline.instant + Duration::from_nanos(nanos.min(u64::MAX as u128) as u64);

        if now > target + Duration::from_millis(self.config.max_lag_ms) {
            log::trace!("clock: behind by {:?}, rebasing", now - target);
            *baseline = Baseline {
                instant: now,
                ticks,
            };
            return None;
        }
        Some(target)
    }

    /// Block until the current tick count is due in real time.
    ///
    /// Must be called without holding the machine lock. Returns `Ok` early
    /// once `shutdown` is raised and [`SchedulerError::Interrupted`] as soon
    /// as `interrupt` is raised.
    pub fn sync_with_real_time(
        &self,
        shutdown: &AtomicBool,
        interrupt: &AtomicBool,
    ) -> Result<(), SchedulerError> {
        let Some(target) = self.due_at() else {
            return Ok(());
        };
        let min_sleep = Duration::from_micros(self.config.min_sleep_us);
        let slice = Duration::from_millis(self.config.sleep_slice_ms.max(1));

        let now = Instant::now();
        if target <= now || target - now < min_sleep {
            return Ok(());
        }

        loop {
            if interrupt.load(Ordering::Acquire) {
                return Err(SchedulerError::Interrupted);
            }
            if shutdown.load(Ordering::Acquire) {
                return Ok(());
            }
            let now = Instant::now();
            if now >= target {
                return Ok(());
            }
            spin_sleep::sleep((target - now).min(slice));
        }
    }
}
