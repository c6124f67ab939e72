//! Instruction trace debugger.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use cyclehost_core::cpu::{CpuView, Debugger, InstructionTextDebugger};

#[derive(Default)]
struct TraceBuffer {
    lines: VecDeque<String>,
    dropped: u64,
}

/// Handle for reading and controlling a [`TraceDebugger`] after it has been
/// moved into a CPU.
#[derive(Clone)]
pub struct TraceLog {
    buffer: Arc<Mutex<TraceBuffer>>,
    enabled: Arc<AtomicBool>,
}

impl TraceLog {
    /// Most recent lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        let buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        buffer.lines.iter().cloned().collect()
    }

    /// Lines evicted because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .dropped
    }

    /// Turning tracing off also stops the CPU from formatting text.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

/// Records `PC  disassembly  registers` for every executed instruction into
/// a bounded ring, and echoes each line at `trace` level.
pub struct TraceDebugger {
    log: TraceLog,
    capacity: usize,
}

impl TraceDebugger {
    pub fn new(capacity: usize) -> (Self, TraceLog) {
        let log = TraceLog {
            buffer: Arc::new(Mutex::new(TraceBuffer::default())),
            enabled: Arc::new(AtomicBool::new(true)),
        };
        let debugger = Self {
            log: log.clone(),
            capacity: capacity.max(1),
        };
        (debugger, log)
    }
}

impl Debugger for TraceDebugger {
    fn before_instruction(
        &mut self,
        cpu: &dyn CpuView,
        opcode_addr: u32,
        opcode: u8,
        text: Option<&str>,
    ) {
        if !self.log.is_enabled() {
            return;
        }
        let regs: Vec<String> = cpu
            .registers()
            .iter()
            .map(|(name, value)| format!("{name}={value:02X}"))
            .collect();
        let line = format!(
            "{opcode_addr:04X}  {:<16}{}",
            text.map_or_else(|| format!("?? {opcode:02X}"), str::to_string),
            regs.join(" ")
        );
        log::trace!(target: "trace", "{line}");

        let mut buffer = self
            .log
            .buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if buffer.lines.len() == self.capacity {
            buffer.lines.pop_front();
            buffer.dropped += 1;
        }
        buffer.lines.push_back(line);
    }
}

impl InstructionTextDebugger for TraceDebugger {
    fn wants_instruction_text(&self) -> bool {
        self.log.is_enabled()
    }
}
