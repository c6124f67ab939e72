#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use cyclehost_core::core::{MachineHost, Snapshotter, VideoSource};
use cyclehost_core::error::{MachineError, SchedulerError, SnapshotError};
use cyclehost_core::report::Reporter;

pub const STUB_MEMORY: usize = 16;

/// 4x2 RGB frame filled with a marker byte.
pub struct StubVideo {
    pixels: Vec<u8>,
}

impl VideoSource for StubVideo {
    fn width(&self) -> u32 {
        4
    }
    fn height(&self) -> u32 {
        2
    }
    fn bytes_per_pixel(&self) -> u32 {
        3
    }
    fn frame(&self) -> &[u8] {
        &self.pixels
    }
}

/// Scriptable machine: fixed cycles per step, optional fault/panic at a
/// given step, and a snapshotter whose size can be misreported.
pub struct StubMachine {
    pub ticks: u64,
    pub cycles_per_step: u64,
    pub steps: u64,
    pub advanced: u64,
    pub resets: u32,
    pub memory: [u8; STUB_MEMORY],

    pub fault_at_step: Option<u64>,
    pub panic_at_step: Option<u64>,
    pub interrupt_every: Option<u64>,
    pub interrupts_delivered: u64,
    /// One step sleeps this long while holding the execution guard.
    pub stall_once: Option<Duration>,
    pub stalling: Arc<AtomicBool>,

    pub snapshot_supported: bool,
    pub size_override: Option<usize>,
    pub mismatches_left: u32,
    pub save_calls: u32,
    pub load_calls: u32,

    video: StubVideo,
}

impl StubMachine {
    pub fn new(cycles_per_step: u64) -> Self {
        Self {
            ticks: 0,
            cycles_per_step,
            steps: 0,
            advanced: 0,
            resets: 0,
            memory: [0; STUB_MEMORY],
            fault_at_step: None,
            panic_at_step: None,
            interrupt_every: None,
            interrupts_delivered: 0,
            stall_once: None,
            stalling: Arc::new(AtomicBool::new(false)),
            snapshot_supported: true,
            size_override: None,
            mismatches_left: 0,
            save_calls: 0,
            load_calls: 0,
            video: StubVideo {
                pixels: vec![0xAB; 4 * 2 * 3],
            },
        }
    }

    fn true_size(&self) -> usize {
        8 + STUB_MEMORY
    }
}

impl Snapshotter for StubMachine {
    fn state_size(&self) -> usize {
        self.size_override.unwrap_or(self.true_size())
    }

    fn save(&mut self, state: &mut [u8], frame: &mut [u8]) -> Result<(), SnapshotError> {
        self.save_calls += 1;
        if self.mismatches_left > 0 {
            self.mismatches_left -= 1;
            return Err(SnapshotError::SizeMismatch {
                expected: state.len(),
                actual: state.len() + 1,
            });
        }
        state[..8].copy_from_slice(&self.ticks.to_le_bytes());
        state[8..].copy_from_slice(&self.memory);
        frame.copy_from_slice(self.video.frame());
        Ok(())
    }

    fn load(&mut self, state: &[u8]) -> Result<(), SnapshotError> {
        self.load_calls += 1;
        let mut ticks = [0u8; 8];
        ticks.copy_from_slice(&state[..8]);
        self.ticks = u64::from_le_bytes(ticks);
        self.memory.copy_from_slice(&state[8..]);
        Ok(())
    }
}

impl MachineHost for StubMachine {
    fn name(&self) -> &str {
        "Stub"
    }

    fn cpu_ticks(&self) -> u64 {
        self.ticks
    }

    fn has_loaded_cartridge(&self) -> bool {
        true
    }

    fn video(&self) -> &dyn VideoSource {
        &self.video
    }

    fn snapshotter(&mut self) -> Option<&mut dyn Snapshotter> {
        if self.snapshot_supported {
            Some(self)
        } else {
            None
        }
    }

    fn reset(&mut self) {
        self.ticks = 0;
        self.steps = 0;
        self.advanced = 0;
        self.interrupts_delivered = 0;
        self.memory = [0; STUB_MEMORY];
        self.resets += 1;
    }

    fn load_rom(&mut self, _rom: &[u8], _name: &str) -> Result<(), MachineError> {
        Ok(())
    }

    fn step_cpu(&mut self) -> Result<(), MachineError> {
        self.steps += 1;
        if self.fault_at_step == Some(self.steps) {
            return Err(MachineError::Fault("stub fault".into()));
        }
        if self.panic_at_step == Some(self.steps) {
            panic!("stub panic at step {}", self.steps);
        }
        if let Some(stall) = self.stall_once.take() {
            self.stalling.store(true, Ordering::SeqCst);
            thread::sleep(stall);
            self.stalling.store(false, Ordering::SeqCst);
        }
        self.memory[(self.steps as usize) % STUB_MEMORY] = self.steps as u8;
        self.ticks += self.cycles_per_step;
        Ok(())
    }

    fn advance_devices(&mut self, delta_ticks: u64) {
        self.advanced += delta_ticks;
    }

    fn try_consume_interrupt(&mut self) -> bool {
        self.interrupt_every
            .is_some_and(|n| n > 0 && self.steps % n == 0)
    }

    fn request_interrupt(&mut self) {
        self.interrupts_delivered += 1;
    }

    fn set_input_active(&mut self, _active: bool) {}
}

/// Reporter that records everything it is told.
#[derive(Clone, Default)]
pub struct Recorder {
    pub faults: Arc<Mutex<Vec<String>>>,
    pub warnings: Arc<AtomicUsize>,
}

impl Recorder {
    pub fn fault_messages(&self) -> Vec<String> {
        self.faults.lock().unwrap().clone()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.load(Ordering::SeqCst)
    }
}

impl Reporter for Recorder {
    fn fault(&self, error: &SchedulerError) {
        self.faults.lock().unwrap().push(error.to_string());
    }

    fn warn(&self, _message: &str) {
        self.warnings.fetch_add(1, Ordering::SeqCst);
    }
}

/// Poll `cond` every millisecond until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}
