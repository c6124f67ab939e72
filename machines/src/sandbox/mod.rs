//! Sandbox: a small reference machine for exercising the host.
//!
//! Memory map (64 KiB address space):
//!
//! | range           | device                         |
//! |-----------------|--------------------------------|
//! | 0x0000 - 0x7FFF | work RAM (stack in page 1)     |
//! | 0x8000 - 0x83FF | video RAM, 32x32, 1 byte/pixel |
//! | 0xC000 - 0xC003 | interval timer                 |
//! | 0xF000 - 0xFFFF | program ROM, IRQ vector at top |
//!
//! I/O ports 0x00 - 0x02 are the console. Unmapped addresses float to 0xFF.

pub mod console;
pub mod cpu;
pub mod timer;
pub mod video;

use std::io::{Read, Write};

use cyclehost_core::core::{Bus, DeviceId, MachineHost, PortId, Snapshotter, VideoSource};
use cyclehost_core::cpu::{Cpu, CpuView};
use cyclehost_core::device::Memory;
use cyclehost_core::error::{ConfigError, MachineError, SnapshotError};

pub use console::Console;
pub use cpu::SandboxCpu;
pub use timer::IntervalTimer;
pub use video::FrameBuffer;

use crate::registry::MachineEntry;

pub const ADDRESS_SPACE: u64 = 0x1_0000;
pub const RAM_BASE: u32 = 0x0000;
pub const RAM_SIZE: u32 = 0x8000;
pub const VRAM_BASE: u32 = 0x8000;
pub const TIMER_BASE: u32 = 0xC000;
pub const ROM_BASE: u32 = 0xF000;
pub const ROM_SIZE: u32 = 0x1000;
pub const CONSOLE_PORT: u16 = 0x00;

/// Master clock: 1 MHz.
pub const DEFAULT_HZ: u64 = 1_000_000;

/// A frame is rendered from video RAM every 1/60 s of emulated time.
pub const CYCLES_PER_FRAME: u64 = DEFAULT_HZ / 60;

pub struct SandboxMachine {
    cpu: SandboxCpu,
    ram: DeviceId,
    vram: DeviceId,
    timer: DeviceId,
    rom: DeviceId,
    console: PortId,
    frame: FrameBuffer,
    frame_countdown: u64,
    rom_name: Option<String>,
}

impl SandboxMachine {
    pub fn new() -> Result<Self, ConfigError> {
        let mut bus = Bus::new(ADDRESS_SPACE)?;
        let ram = bus.attach(Memory::ram(RAM_BASE, RAM_SIZE)?)?;
        let vram = bus.attach(Memory::ram(VRAM_BASE, video::VRAM_SIZE)?)?;
        let timer = bus.attach(IntervalTimer::new(TIMER_BASE))?;
        let rom = bus.attach(Memory::rom(ROM_BASE, ROM_SIZE)?)?;
        let console = bus.attach_port(Console::new(CONSOLE_PORT))?;

        Ok(Self {
            cpu: SandboxCpu::new(bus),
            ram,
            vram,
            timer,
            rom,
            console,
            frame: FrameBuffer::new(),
            frame_countdown: CYCLES_PER_FRAME,
            rom_name: None,
        })
    }

    pub fn sandbox_cpu(&self) -> &SandboxCpu {
        &self.cpu
    }

    pub fn ram(&self) -> &[u8] {
        self.memory(self.ram)
    }

    pub fn vram(&self) -> &[u8] {
        self.memory(self.vram)
    }

    fn memory(&self, id: DeviceId) -> &[u8] {
        self.cpu
            .bus()
            .device::<Memory>(id)
            .map(Memory::as_slice)
            .unwrap_or_default()
    }

    pub fn timer(&self) -> Option<&IntervalTimer> {
        self.cpu.bus().device::<IntervalTimer>(self.timer)
    }

    /// Everything the program has written to the console since reset.
    pub fn console_output(&self) -> &str {
        self.cpu
            .bus()
            .port_device::<Console>(self.console)
            .map(Console::transcript)
            .unwrap_or_default()
    }

    pub fn push_input(&mut self, bytes: &[u8]) {
        if let Some(console) = self.cpu.bus_mut().port_device_mut::<Console>(self.console) {
            console.push_input(bytes);
        }
    }

    fn render(&mut self) {
        if let Some(vram) = self.cpu.bus().device::<Memory>(self.vram) {
            self.frame.render(vram.as_slice());
        }
    }
}

impl Snapshotter for SandboxMachine {
    fn state_size(&self) -> usize {
        cpu::CPU_STATE_SIZE + 8 + self.cpu.bus().state_size()
    }

    fn save(&mut self, state: &mut [u8], frame: &mut [u8]) -> Result<(), SnapshotError> {
        let expected = self.state_size();
        if state.len() != expected {
            return Err(SnapshotError::SizeMismatch {
                expected,
                actual: state.len(),
            });
        }
        if frame.len() != self.frame.frame_len() {
            return Err(SnapshotError::SizeMismatch {
                expected: self.frame.frame_len(),
                actual: frame.len(),
            });
        }

        let mut out: &mut [u8] = state;
        self.cpu.save_state(&mut out)?;
        out.write_all(&self.frame_countdown.to_le_bytes())?;
        self.cpu.bus().save_state(&mut out)?;
        if !out.is_empty() {
            return Err(SnapshotError::SizeMismatch {
                expected,
                actual: expected - out.len(),
            });
        }

        frame.copy_from_slice(self.frame.frame());
        Ok(())
    }

    fn load(&mut self, state: &[u8]) -> Result<(), SnapshotError> {
        let expected = self.state_size();
        if state.len() != expected {
            return Err(SnapshotError::SizeMismatch {
                expected,
                actual: state.len(),
            });
        }

        let mut input = state;
        self.cpu.load_state(&mut input)?;
        let mut countdown = [0u8; 8];
        input.read_exact(&mut countdown)?;
        self.frame_countdown = u64::from_le_bytes(countdown).clamp(1, CYCLES_PER_FRAME);
        self.cpu.bus_mut().load_state(&mut input)?;
        self.render();
        Ok(())
    }
}

impl MachineHost for SandboxMachine {
    fn name(&self) -> &str {
        "Sandbox"
    }

    fn cpu_ticks(&self) -> u64 {
        self.cpu.ticks()
    }

    fn has_loaded_cartridge(&self) -> bool {
        self.rom_name.is_some()
    }

    fn video(&self) -> &dyn VideoSource {
        &self.frame
    }

    fn snapshotter(&mut self) -> Option<&mut dyn Snapshotter> {
        Some(self)
    }

    fn cpu(&mut self) -> Option<&mut dyn Cpu> {
        Some(&mut self.cpu)
    }

    fn reset(&mut self) {
        self.cpu.reset();
        let ram = self.ram;
        let vram = self.vram;
        let bus = self.cpu.bus_mut();
        for id in [ram, vram] {
            if let Some(memory) = bus.device_mut::<Memory>(id) {
                memory.fill(0);
            }
        }
        if let Some(timer) = bus.device_mut::<IntervalTimer>(self.timer) {
            timer.reset();
        }
        if let Some(console) = bus.port_device_mut::<Console>(self.console) {
            console.clear();
        }
        self.frame.clear();
        self.frame_countdown = CYCLES_PER_FRAME;
    }

    fn load_rom(&mut self, rom: &[u8], name: &str) -> Result<(), MachineError> {
        if rom.len() > ROM_SIZE as usize {
            return Err(MachineError::RomTooLarge {
                name: name.to_string(),
                size: rom.len(),
                capacity: ROM_SIZE as usize,
            });
        }
        let slot = self
            .cpu
            .bus_mut()
            .device_mut::<Memory>(self.rom)
            .ok_or_else(|| MachineError::Fault("program ROM not mapped".into()))?;
        slot.fill(0xFF);
        slot.load_from(0, rom);
        log::debug!("sandbox: loaded {name} ({} bytes)", rom.len());
        self.rom_name = Some(name.to_string());
        Ok(())
    }

    fn step_cpu(&mut self) -> Result<(), MachineError> {
        self.cpu.step().map(|_| ())
    }

    fn advance_devices(&mut self, delta_ticks: u64) {
        if let Some(timer) = self.cpu.bus_mut().device_mut::<IntervalTimer>(self.timer) {
            timer.advance(delta_ticks);
        }

        let mut remaining = delta_ticks;
        let mut frame_done = false;
        while remaining >= self.frame_countdown {
            remaining -= self.frame_countdown;
            self.frame_countdown = CYCLES_PER_FRAME;
            frame_done = true;
        }
        self.frame_countdown -= remaining;
        if frame_done {
            self.render();
        }
    }

    fn try_consume_interrupt(&mut self) -> bool {
        self.cpu
            .bus_mut()
            .device_mut::<IntervalTimer>(self.timer)
            .is_some_and(|t| t.take_irq())
    }

    fn request_interrupt(&mut self) {
        self.cpu.raise_irq();
    }

    fn set_input_active(&mut self, active: bool) {
        if let Some(console) = self.cpu.bus_mut().port_device_mut::<Console>(self.console) {
            console.set_input_active(active);
        }
    }
}

// ---------------------------------------------------------------------------
// Built-in demo program
// ---------------------------------------------------------------------------

const DEMO_MESSAGE: &[u8] = b"HELLO FROM SANDBOX\n\0";

/// A 4 KiB ROM image that prints a greeting, programs the timer to fire
/// once per frame and, in the interrupt handler, counts ticks at 0x0300
/// while painting successive pixels of video RAM.
pub fn demo_program() -> Vec<u8> {
    let mut rom = vec![0xFF; ROM_SIZE as usize];
    let mut put = |addr: u16, bytes: &[u8]| {
        let at = (addr as u32 - ROM_BASE) as usize;
        rom[at..at + bytes.len()].copy_from_slice(bytes);
    };

    let [reload_lo, reload_hi] = (CYCLES_PER_FRAME as u16).to_le_bytes();
    put(
        0xF000,
        &[
            0xA2, 0x00, // LDX #0
            0xBD, 0x40, 0xF0, // LDA $F040,X
            0xF0, 0x06, // BEQ $F00D
            0xD3, 0x00, // OUT ($00)
            0xE8, // INX
            0x4C, 0x02, 0xF0, // JMP $F002
            0xA9, reload_lo, // LDA #lo
            0x8D, 0x00, 0xC0, // STA $C000
            0xA9, reload_hi, // LDA #hi
            0x8D, 0x01, 0xC0, // STA $C001
            0xA9, 0x03, // LDA #(RUN|IRQ)
            0x8D, 0x02, 0xC0, // STA $C002
            0x58, // CLI
            0x76, // HLT
            0x4C, 0x1D, 0xF0, // JMP $F01D
        ],
    );
    put(0xF040, DEMO_MESSAGE);
    put(
        0xF080,
        &[
            0xA9, 0x01, // LDA #1
            0x8D, 0x03, 0xC0, // STA $C003
            0xEE, 0x00, 0x03, // INC $0300
            0xE8, // INX
            0xAD, 0x00, 0x03, // LDA $0300
            0x9D, 0x00, 0x80, // STA $8000,X
            0x40, // RTI
        ],
    );
    put(cpu::IRQ_VECTOR, &[0x80, 0xF0]);
    rom
}

fn create_machine() -> Result<Box<dyn MachineHost>, ConfigError> {
    Ok(Box::new(SandboxMachine::new()?))
}

inventory::submit! {
    MachineEntry::new(
        "sandbox",
        "8-bit reference machine with timer, console and 32x32 display",
        DEFAULT_HZ,
        create_machine,
    )
    .with_builtin_rom(demo_program)
}
