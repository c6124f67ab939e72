//! Sandbox 8-bit CPU.
//!
//! A deliberately small accumulator machine with 6502-flavoured encodings:
//! A and X registers, an 8-bit stack pointer into page 1, and a single
//! maskable interrupt vectored through 0xFFFE/0xFFFF (little-endian).
//! Undefined opcodes fault with [`MachineError::InvalidOpcode`], so running
//! from erased (0xFF) ROM stops the machine at the first fetch.

use std::io::{self, Read, Write};

use cyclehost_core::core::Bus;
use cyclehost_core::cpu::{Cpu, CpuView, DebuggerHub};
use cyclehost_core::error::MachineError;

pub const RESET_VECTOR: u16 = 0xF000;
pub const IRQ_VECTOR: u16 = 0xFFFE;
pub const STACK_PAGE: u16 = 0x0100;

/// Cycles taken to enter an interrupt handler.
pub const IRQ_CYCLES: u32 = 7;

/// Serialized size of [`SandboxCpu::save_state`].
pub const CPU_STATE_SIZE: usize = 16;

#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub enum Flag {
    Z = 0x01, // Zero
    C = 0x02, // Carry (no borrow on compare)
    I = 0x04, // Interrupt disable
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Registers {
    pub a: u8,
    pub x: u8,
    pub sp: u8,
    pub pc: u16,
    pub flags: u8,
}

impl Registers {
    fn power_on() -> Self {
        Self {
            a: 0,
            x: 0,
            sp: 0xFF,
            pc: RESET_VECTOR,
            flags: Flag::I as u8,
        }
    }
}

/// Register snapshot handed to debuggers while the CPU itself is borrowed.
#[derive(Clone, Copy)]
struct View {
    regs: Registers,
    ticks: u64,
}

impl CpuView for View {
    fn pc(&self) -> u32 {
        self.regs.pc as u32
    }

    fn ticks(&self) -> u64 {
        self.ticks
    }

    fn registers(&self) -> Vec<(&'static str, u32)> {
        register_list(&self.regs)
    }
}

fn register_list(r: &Registers) -> Vec<(&'static str, u32)> {
    vec![
        ("A", r.a as u32),
        ("X", r.x as u32),
        ("SP", r.sp as u32),
        ("PC", r.pc as u32),
        ("F", r.flags as u32),
    ]
}

// ---------------------------------------------------------------------------
// Opcode table
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Implied,
    Immediate,
    Absolute,
    AbsoluteX,
    Relative,
    Port,
}

impl Mode {
    fn operand_len(self) -> u16 {
        match self {
            Self::Implied => 0,
            Self::Immediate | Self::Relative | Self::Port => 1,
            Self::Absolute | Self::AbsoluteX => 2,
        }
    }
}

fn decode(opcode: u8) -> Option<(&'static str, Mode)> {
    let entry = match opcode {
        0x00 => ("NOP", Mode::Implied),
        0xA9 => ("LDA", Mode::Immediate),
        0xAD => ("LDA", Mode::Absolute),
        0xBD => ("LDA", Mode::AbsoluteX),
        0x8D => ("STA", Mode::Absolute),
        0x9D => ("STA", Mode::AbsoluteX),
        0xA2 => ("LDX", Mode::Immediate),
        0xE8 => ("INX", Mode::Implied),
        0xCA => ("DEX", Mode::Implied),
        0xEE => ("INC", Mode::Absolute),
        0xC9 => ("CMP", Mode::Immediate),
        0xE0 => ("CPX", Mode::Immediate),
        0x4C => ("JMP", Mode::Absolute),
        0xD0 => ("BNE", Mode::Relative),
        0xF0 => ("BEQ", Mode::Relative),
        0x20 => ("JSR", Mode::Absolute),
        0x60 => ("RTS", Mode::Implied),
        0x40 => ("RTI", Mode::Implied),
        0x58 => ("CLI", Mode::Implied),
        0x78 => ("SEI", Mode::Implied),
        0xD3 => ("OUT", Mode::Port),
        0xDB => ("IN", Mode::Port),
        0x76 => ("HLT", Mode::Implied),
        _ => return None,
    };
    Some(entry)
}

/// Disassemble the instruction at `addr`. Returns the text and the
/// instruction length in bytes.
///
/// Reads go straight to the bus without debugger notification.
pub fn disassemble(bus: &mut Bus, addr: u16) -> (String, u16) {
    let opcode = bus.read8(addr as u32);
    let Some((mnemonic, mode)) = decode(opcode) else {
        return (format!(".byte ${opcode:02X}"), 1);
    };
    let b1 = bus.read8(addr.wrapping_add(1) as u32);
    let w = bus.read16_le(addr.wrapping_add(1) as u32);
    let text = match mode {
        Mode::Implied => mnemonic.to_string(),
        Mode::Immediate => format!("{mnemonic} #${b1:02X}"),
        Mode::Absolute => format!("{mnemonic} ${w:04X}"),
        Mode::AbsoluteX => format!("{mnemonic} ${w:04X},X"),
        Mode::Relative => {
            let target = addr.wrapping_add(2).wrapping_add(b1 as i8 as u16);
            format!("{mnemonic} ${target:04X}")
        }
        Mode::Port => format!("{mnemonic} (${b1:02X})"),
    };
    (text, 1 + mode.operand_len())
}

// ---------------------------------------------------------------------------
// CPU
// ---------------------------------------------------------------------------

pub struct SandboxCpu {
    pub regs: Registers,
    ticks: u64,
    halted: bool,
    irq_line: bool,
    bus: Bus,
    debuggers: DebuggerHub,
}

impl SandboxCpu {
    pub fn new(bus: Bus) -> Self {
        Self {
            regs: Registers::power_on(),
            ticks: 0,
            halted: false,
            irq_line: false,
            bus,
            debuggers: DebuggerHub::new(),
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Latch the interrupt line. Serviced at the start of the next step
    /// once the I flag is clear.
    pub fn raise_irq(&mut self) {
        self.irq_line = true;
    }

    pub fn irq_pending(&self) -> bool {
        self.irq_line
    }

    fn view(&self) -> View {
        View {
            regs: self.regs,
            ticks: self.ticks,
        }
    }

    #[inline]
    fn flag(&self, flag: Flag) -> bool {
        self.regs.flags & flag as u8 != 0
    }

    #[inline]
    fn set_flag(&mut self, flag: Flag, set: bool) {
        if set {
            self.regs.flags |= flag as u8;
        } else {
            self.regs.flags &= !(flag as u8);
        }
    }

    fn fetch8(&mut self) -> u8 {
        let value = self.read8(self.regs.pc as u32);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        value
    }

    fn fetch16(&mut self) -> u16 {
        let lo = self.fetch8();
        let hi = self.fetch8();
        u16::from_le_bytes([lo, hi])
    }

    fn push(&mut self, value: u8) {
        self.write8((STACK_PAGE | self.regs.sp as u16) as u32, value);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
    }

    fn pull(&mut self) -> u8 {
        self.regs.sp = self.regs.sp.wrapping_add(1);
        self.read8((STACK_PAGE | self.regs.sp as u16) as u32)
    }

    fn push16(&mut self, value: u16) {
        let [lo, hi] = value.to_le_bytes();
        self.push(hi);
        self.push(lo);
    }

    fn pull16(&mut self) -> u16 {
        let lo = self.pull();
        let hi = self.pull();
        u16::from_le_bytes([lo, hi])
    }

    fn compare(&mut self, reg: u8, operand: u8) {
        self.set_flag(Flag::Z, reg == operand);
        self.set_flag(Flag::C, reg >= operand);
    }

    fn load_flags(&mut self, value: u8) {
        self.set_flag(Flag::Z, value == 0);
    }

    fn branch(&mut self, taken: bool) -> u32 {
        let offset = self.fetch8() as i8;
        if taken {
            self.regs.pc = self.regs.pc.wrapping_add(offset as u16);
            3
        } else {
            2
        }
    }

    fn enter_irq(&mut self) -> u32 {
        self.irq_line = false;
        self.halted = false;
        self.push16(self.regs.pc);
        self.push(self.regs.flags);
        self.set_flag(Flag::I, true);
        let lo = self.read8(IRQ_VECTOR as u32);
        let hi = self.read8(IRQ_VECTOR.wrapping_add(1) as u32);
        self.regs.pc = u16::from_le_bytes([lo, hi]);
        IRQ_CYCLES
    }

    fn execute(&mut self, opcode: u8, opcode_addr: u16) -> Result<u32, MachineError> {
        let cycles = match opcode {
            0x00 => 2,
            0xA9 => {
                self.regs.a = self.fetch8();
                self.load_flags(self.regs.a);
                2
            }
            0xAD => {
                let addr = self.fetch16();
                self.regs.a = self.read8(addr as u32);
                self.load_flags(self.regs.a);
                4
            }
            0xBD => {
                let addr = self.fetch16().wrapping_add(self.regs.x as u16);
                self.regs.a = self.read8(addr as u32);
                self.load_flags(self.regs.a);
                4
            }
            0x8D => {
                let addr = self.fetch16();
                self.write8(addr as u32, self.regs.a);
                4
            }
            0x9D => {
                let addr = self.fetch16().wrapping_add(self.regs.x as u16);
                self.write8(addr as u32, self.regs.a);
                5
            }
            0xA2 => {
                self.regs.x = self.fetch8();
                self.load_flags(self.regs.x);
                2
            }
            0xE8 => {
                self.regs.x = self.regs.x.wrapping_add(1);
                self.load_flags(self.regs.x);
                2
            }
            0xCA => {
                self.regs.x = self.regs.x.wrapping_sub(1);
                self.load_flags(self.regs.x);
                2
            }
            0xEE => {
                let addr = self.fetch16() as u32;
                let value = self.read8(addr).wrapping_add(1);
                self.write8(addr, value);
                self.load_flags(value);
                6
            }
            0xC9 => {
                let operand = self.fetch8();
                self.compare(self.regs.a, operand);
                2
            }
            0xE0 => {
                let operand = self.fetch8();
                self.compare(self.regs.x, operand);
                2
            }
            0x4C => {
                self.regs.pc = self.fetch16();
                3
            }
            0xD0 => {
                let taken = !self.flag(Flag::Z);
                self.branch(taken)
            }
            0xF0 => {
                let taken = self.flag(Flag::Z);
                self.branch(taken)
            }
            0x20 => {
                let target = self.fetch16();
                self.push16(self.regs.pc);
                self.regs.pc = target;
                6
            }
            0x60 => {
                self.regs.pc = self.pull16();
                6
            }
            0x40 => {
                self.regs.flags = self.pull();
                self.regs.pc = self.pull16();
                6
            }
            0x58 => {
                self.set_flag(Flag::I, false);
                2
            }
            0x78 => {
                self.set_flag(Flag::I, true);
                2
            }
            0xD3 => {
                let port = self.fetch8() as u16;
                self.bus.write_port(port, self.regs.a);
                3
            }
            0xDB => {
                let port = self.fetch8() as u16;
                self.regs.a = self.bus.read_port(port);
                self.load_flags(self.regs.a);
                3
            }
            0x76 => {
                self.halted = true;
                2
            }
            _ => {
                self.regs.pc = opcode_addr;
                return Err(MachineError::InvalidOpcode {
                    opcode,
                    pc: opcode_addr as u32,
                });
            }
        };
        Ok(cycles)
    }

    pub fn save_state(&self, out: &mut dyn Write) -> io::Result<()> {
        let [pc_lo, pc_hi] = self.regs.pc.to_le_bytes();
        out.write_all(&[
            self.regs.a,
            self.regs.x,
            self.regs.sp,
            pc_lo,
            pc_hi,
            self.regs.flags,
            self.halted as u8,
            self.irq_line as u8,
        ])?;
        out.write_all(&self.ticks.to_le_bytes())
    }

    pub fn load_state(&mut self, input: &mut dyn Read) -> io::Result<()> {
        let mut regs = [0u8; 8];
        input.read_exact(&mut regs)?;
        let mut ticks = [0u8; 8];
        input.read_exact(&mut ticks)?;
        self.regs = Registers {
            a: regs[0],
            x: regs[1],
            sp: regs[2],
            pc: u16::from_le_bytes([regs[3], regs[4]]),
            flags: regs[5],
        };
        self.halted = regs[6] != 0;
        self.irq_line = regs[7] != 0;
        self.ticks = u64::from_le_bytes(ticks);
        Ok(())
    }
}

impl CpuView for SandboxCpu {
    fn pc(&self) -> u32 {
        self.regs.pc as u32
    }

    fn ticks(&self) -> u64 {
        self.ticks
    }

    fn registers(&self) -> Vec<(&'static str, u32)> {
        register_list(&self.regs)
    }
}

impl Cpu for SandboxCpu {
    fn reset(&mut self) {
        self.regs = Registers::power_on();
        self.ticks = 0;
        self.halted = false;
        self.irq_line = false;
    }

    fn step(&mut self) -> Result<u32, MachineError> {
        let cycles = if self.irq_line && !self.flag(Flag::I) {
            self.enter_irq()
        } else if self.halted {
            2
        } else {
            let pc = self.regs.pc;
            if self.debuggers.is_active() {
                let opcode = self.bus.read8(pc as u32);
                let view = self.view();
                let bus = &mut self.bus;
                self.debuggers
                    .before_instruction(&view, pc as u32, opcode, || disassemble(bus, pc).0);
            }
            let opcode = self.fetch8();
            self.execute(opcode, pc)?
        };

        self.ticks += cycles as u64;
        if self.debuggers.is_active() {
            let view = self.view();
            self.debuggers.after_step(&view);
        }
        Ok(cycles)
    }

    fn read8(&mut self, addr: u32) -> u8 {
        let value = self.bus.read8(addr);
        if self.debuggers.is_active() {
            let view = self.view();
            self.debuggers.memory_read(&view, addr, value);
        }
        value
    }

    fn write8(&mut self, addr: u32, value: u8) {
        self.bus.write8(addr, value);
        if self.debuggers.is_active() {
            let view = self.view();
            self.debuggers.memory_write(&view, addr, value);
        }
    }

    fn bus(&self) -> &Bus {
        &self.bus
    }

    fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    fn debuggers(&self) -> &DebuggerHub {
        &self.debuggers
    }

    fn debuggers_mut(&mut self) -> &mut DebuggerHub {
        &mut self.debuggers
    }
}
