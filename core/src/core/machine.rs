use crate::cpu::Cpu;
use crate::error::{MachineError, SnapshotError};

/// Frame geometry of a machine's video output.
///
/// The host never interprets pixel contents; it only needs the size of a
/// frame to allocate the scratch buffer captured with each save state.
pub trait VideoSource {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    fn bytes_per_pixel(&self) -> u32;

    /// The most recently completed frame, `frame_len()` bytes, row-major.
    fn frame(&self) -> &[u8];

    fn frame_len(&self) -> usize {
        self.width() as usize * self.height() as usize * self.bytes_per_pixel() as usize
    }
}

/// Audio stream format of a machine.
pub trait AudioSource {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;
}

/// Save-state capability of a machine.
///
/// The state size must be stable for a given machine build. Any size
/// disagreement is reported as [`SnapshotError::SizeMismatch`], which the
/// capture loop treats as retryable.
pub trait Snapshotter {
    /// Exact number of bytes `save` will write into `state`.
    fn state_size(&self) -> usize;

    /// Serialize into `state` (exactly `state_size()` bytes) and copy the
    /// current frame into `frame` so the image can be shown on restore.
    fn save(&mut self, state: &mut [u8], frame: &mut [u8]) -> Result<(), SnapshotError>;

    /// Restore from a buffer produced by `save`.
    fn load(&mut self, state: &[u8]) -> Result<(), SnapshotError>;
}

/// Machine-agnostic interface between a concrete emulated system and the
/// execution scheduler.
///
/// Each machine composes its CPU, bus and peripherals behind this trait.
/// The scheduler treats every method as a black box and only enforces the
/// calling protocol: all calls happen under its execution guard.
pub trait MachineHost: Send {
    /// Human-readable machine name (e.g., "Sandbox").
    fn name(&self) -> &str;

    /// CPU cycles executed since the last reset. Never decreases otherwise.
    fn cpu_ticks(&self) -> u64;

    fn has_loaded_cartridge(&self) -> bool;

    fn video(&self) -> &dyn VideoSource;

    fn audio(&self) -> Option<&dyn AudioSource> {
        None
    }

    /// Save-state support. Machines without it keep the default.
    fn snapshotter(&mut self) -> Option<&mut dyn Snapshotter> {
        None
    }

    /// The main CPU, for attaching debuggers. Machines that keep it private
    /// keep the default.
    fn cpu(&mut self) -> Option<&mut dyn Cpu> {
        None
    }

    /// Reset to power-on state. `cpu_ticks()` returns 0 afterwards.
    fn reset(&mut self);

    fn load_rom(&mut self, rom: &[u8], name: &str) -> Result<(), MachineError>;

    /// Execute one CPU instruction.
    fn step_cpu(&mut self) -> Result<(), MachineError>;

    /// Advance peripherals by `delta_ticks` CPU cycles.
    fn advance_devices(&mut self, delta_ticks: u64);

    /// Take a pending interrupt, clearing it. Polled once per step.
    fn try_consume_interrupt(&mut self) -> bool;

    /// Deliver an interrupt to the CPU.
    fn request_interrupt(&mut self);

    /// Whether host input (keyboard/pad) is routed to the machine.
    fn set_input_active(&mut self, active: bool);
}

impl<M: MachineHost + ?Sized> MachineHost for Box<M> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn cpu_ticks(&self) -> u64 {
        (**self).cpu_ticks()
    }

    fn has_loaded_cartridge(&self) -> bool {
        (**self).has_loaded_cartridge()
    }

    fn video(&self) -> &dyn VideoSource {
        (**self).video()
    }

    fn audio(&self) -> Option<&dyn AudioSource> {
        (**self).audio()
    }

    fn snapshotter(&mut self) -> Option<&mut dyn Snapshotter> {
        (**self).snapshotter()
    }

    fn cpu(&mut self) -> Option<&mut dyn Cpu> {
        (**self).cpu()
    }

    fn reset(&mut self) {
        (**self).reset();
    }

    fn load_rom(&mut self, rom: &[u8], name: &str) -> Result<(), MachineError> {
        (**self).load_rom(rom, name)
    }

    fn step_cpu(&mut self) -> Result<(), MachineError> {
        (**self).step_cpu()
    }

    fn advance_devices(&mut self, delta_ticks: u64) {
        (**self).advance_devices(delta_ticks);
    }

    fn try_consume_interrupt(&mut self) -> bool {
        (**self).try_consume_interrupt()
    }

    fn request_interrupt(&mut self) {
        (**self).request_interrupt();
    }

    fn set_input_active(&mut self, active: bool) {
        (**self).set_input_active(active);
    }
}
