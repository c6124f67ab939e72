//! Programmable interval timer.
//!
//! Four registers at the timer base:
//!
//! | offset | read            | write                          |
//! |--------|-----------------|--------------------------------|
//! | 0      | reload low      | reload low                     |
//! | 1      | reload high     | reload high                    |
//! | 2      | control         | control (bit 0 run, bit 1 IRQ) |
//! | 3      | status          | bit 0 set: acknowledge         |
//!
//! The counter is in CPU cycles. When it expires it reloads, sets the
//! status flag and, with IRQ enabled, raises an interrupt edge.

use std::io::{self, Read, Write};

use cyclehost_core::core::{AddressRange, Device};

pub const REG_RELOAD_LO: u32 = 0;
pub const REG_RELOAD_HI: u32 = 1;
pub const REG_CONTROL: u32 = 2;
pub const REG_STATUS: u32 = 3;

pub const CONTROL_RUN: u8 = 0x01;
pub const CONTROL_IRQ: u8 = 0x02;
pub const STATUS_EXPIRED: u8 = 0x01;

const STATE_SIZE: usize = 10;

pub struct IntervalTimer {
    range: AddressRange,
    reload: u16,
    counter: u32,
    control: u8,
    status: u8,
    irq_edge: bool,
}

impl IntervalTimer {
    pub fn new(base: u32) -> Self {
        Self {
            range: AddressRange {
                from: base,
                to: base + 3,
            },
            reload: 0,
            counter: 0,
            control: 0,
            status: 0,
            irq_edge: false,
        }
    }

    pub fn reset(&mut self) {
        self.reload = 0;
        self.counter = 0;
        self.control = 0;
        self.status = 0;
        self.irq_edge = false;
    }

    fn period(&self) -> u32 {
        // A reload of 0 counts 65536 cycles.
        if self.reload == 0 {
            0x1_0000
        } else {
            self.reload as u32
        }
    }

    /// Count down `cycles`. Expiry reloads the counter; several expiries in
    /// one call still raise a single interrupt edge.
    pub fn advance(&mut self, cycles: u64) {
        if self.control & CONTROL_RUN == 0 {
            return;
        }
        let period = self.period() as u64;
        let mut remaining = cycles;
        let mut expired = false;
        while remaining >= self.counter as u64 {
            remaining -= self.counter as u64;
            self.counter = period as u32;
            expired = true;
            if remaining >= period {
                remaining %= period;
            }
        }
        self.counter -= remaining as u32;

        if expired {
            self.status |= STATUS_EXPIRED;
            if self.control & CONTROL_IRQ != 0 {
                self.irq_edge = true;
            }
        }
    }

    /// Take the pending interrupt edge.
    pub fn take_irq(&mut self) -> bool {
        std::mem::take(&mut self.irq_edge)
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn is_running(&self) -> bool {
        self.control & CONTROL_RUN != 0
    }
}

impl Device for IntervalTimer {
    fn range(&self) -> AddressRange {
        self.range
    }

    fn read8(&mut self, offset: u32) -> u8 {
        match offset {
            REG_RELOAD_LO => self.reload as u8,
            REG_RELOAD_HI => (self.reload >> 8) as u8,
            REG_CONTROL => self.control,
            _ => self.status,
        }
    }

    fn write8(&mut self, offset: u32, value: u8) {
        match offset {
            REG_RELOAD_LO => self.reload = (self.reload & 0xFF00) | value as u16,
            REG_RELOAD_HI => self.reload = (self.reload & 0x00FF) | ((value as u16) << 8),
            REG_CONTROL => {
                let starting = self.control & CONTROL_RUN == 0 && value & CONTROL_RUN != 0;
                self.control = value;
                if starting {
                    self.counter = self.period();
                }
            }
            _ => self.status &= !(value & STATUS_EXPIRED),
        }
    }

    fn state_size(&self) -> usize {
        STATE_SIZE
    }

    fn save_state(&self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(&self.reload.to_le_bytes())?;
        out.write_all(&self.counter.to_le_bytes())?;
        out.write_all(&[self.control, self.status, self.irq_edge as u8, 0])
    }

    fn load_state(&mut self, input: &mut dyn Read) -> io::Result<()> {
        let mut buf = [0u8; STATE_SIZE];
        input.read_exact(&mut buf)?;
        self.reload = u16::from_le_bytes([buf[0], buf[1]]);
        self.counter = u32::from_le_bytes([buf[2], buf[3], buf[4], buf[5]]);
        self.control = buf[6];
        self.status = buf[7];
        self.irq_edge = buf[8] != 0;
        if self.is_running() {
            // A running counter is always in 1..=period.
            self.counter = self.counter.clamp(1, self.period());
        }
        Ok(())
    }
}
