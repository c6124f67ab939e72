//! Byte-wide console on the I/O port space.
//!
//! Port 0 writes a character; completed lines go to the `log` facade under
//! the `sandbox::console` target. Port 1 reads the next queued input byte
//! (0 when empty or while input is not routed to the machine). Port 2 reads
//! the number of queued input bytes, saturated at 255.

use std::collections::VecDeque;

use cyclehost_core::core::{AddressRange, PortDevice};

pub const PORT_DATA_OUT: u16 = 0;
pub const PORT_DATA_IN: u16 = 1;
pub const PORT_STATUS: u16 = 2;

/// Bytes of output kept in the transcript; older output is discarded.
pub const TRANSCRIPT_LIMIT: usize = 64 * 1024;

// Longer lines are logged in pieces.
const LINE_LIMIT: usize = 256;

pub struct Console {
    ports: AddressRange,
    line: Vec<u8>,
    transcript: String,
    input: VecDeque<u8>,
    input_active: bool,
}

impl Console {
    pub fn new(base: u16) -> Self {
        Self {
            ports: AddressRange {
                from: base as u32,
                to: base as u32 + 2,
            },
            line: Vec::new(),
            transcript: String::new(),
            input: VecDeque::new(),
            input_active: true,
        }
    }

    /// The most recent output (up to [`TRANSCRIPT_LIMIT`] bytes), including
    /// a partial last line.
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    pub fn push_input(&mut self, bytes: &[u8]) {
        self.input.extend(bytes);
    }

    pub fn set_input_active(&mut self, active: bool) {
        self.input_active = active;
    }

    pub fn clear(&mut self) {
        self.line.clear();
        self.transcript.clear();
        self.input.clear();
    }

    fn emit(&mut self, byte: u8) {
        self.transcript.push(byte as char);
        if self.transcript.len() > TRANSCRIPT_LIMIT {
            // Drop down to half the limit so trimming is not per byte.
            let mut cut = self.transcript.len() - TRANSCRIPT_LIMIT / 2;
            while !self.transcript.is_char_boundary(cut) {
                cut += 1;
            }
            self.transcript.drain(..cut);
        }
        if byte != b'\n' {
            self.line.push(byte);
        }
        if byte == b'\n' || self.line.len() >= LINE_LIMIT {
            log::info!(target: "sandbox::console", "{}", String::from_utf8_lossy(&self.line));
            self.line.clear();
        }
    }
}

impl PortDevice for Console {
    fn ports(&self) -> AddressRange {
        self.ports
    }

    fn read_port(&mut self, offset: u16) -> u8 {
        match offset {
            PORT_DATA_IN if self.input_active => self.input.pop_front().unwrap_or(0),
            PORT_STATUS if self.input_active => self.input.len().min(255) as u8,
            _ => 0,
        }
    }

    fn write_port(&mut self, offset: u16, value: u8) {
        if offset == PORT_DATA_OUT {
            self.emit(value);
        }
    }
}
