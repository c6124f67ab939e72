//! Debugger attachment for CPUs.
//!
//! A CPU owns one [`DebuggerHub`] and calls its `notify` methods around each
//! instruction and memory access. With nothing attached every notification
//! is a single branch on a cached flag; with the `debugger` cargo feature
//! disabled the calls compile to nothing.

use super::CpuView;

/// Observer of CPU execution. Every hook defaults to a no-op.
pub trait Debugger: Send {
    /// Called before the instruction at `opcode_addr` executes. `text` is the
    /// disassembly, present only when some attached debugger asked for it.
    fn before_instruction(
        &mut self,
        _cpu: &dyn CpuView,
        _opcode_addr: u32,
        _opcode: u8,
        _text: Option<&str>,
    ) {
    }

    fn after_step(&mut self, _cpu: &dyn CpuView) {}

    fn on_memory_read(&mut self, _cpu: &dyn CpuView, _addr: u32, _value: u8) {}

    fn on_memory_write(&mut self, _cpu: &dyn CpuView, _addr: u32, _value: u8) {}
}

/// A debugger that can consume human-readable instruction text.
///
/// The CPU only formats text while at least one attached debugger of this
/// kind returns true from [`wants_instruction_text`](Self::wants_instruction_text).
pub trait InstructionTextDebugger: Debugger {
    fn wants_instruction_text(&self) -> bool;
}

/// Handle returned on attach, used to detach again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DebuggerId(u64);

enum DebuggerSlot {
    Plain(Box<dyn Debugger>),
    Text(Box<dyn InstructionTextDebugger>),
}

impl DebuggerSlot {
    fn debugger(&mut self) -> &mut dyn Debugger {
        match self {
            Self::Plain(d) => d.as_mut(),
            Self::Text(d) => d.as_mut(),
        }
    }
}

/// The set of debuggers attached to one CPU.
#[derive(Default)]
pub struct DebuggerHub {
    slots: Vec<(DebuggerId, DebuggerSlot)>,
    next_id: u64,
    // Recomputed only when the list changes.
    active: bool,
    has_text_capable: bool,
}

impl DebuggerHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, debugger: Box<dyn Debugger>) -> DebuggerId {
        self.push(DebuggerSlot::Plain(debugger))
    }

    pub fn add_text(&mut self, debugger: Box<dyn InstructionTextDebugger>) -> DebuggerId {
        self.push(DebuggerSlot::Text(debugger))
    }

    fn push(&mut self, slot: DebuggerSlot) -> DebuggerId {
        let id = DebuggerId(self.next_id);
        self.next_id += 1;
        self.slots.push((id, slot));
        self.refresh();
        id
    }

    /// Detach a debugger. Returns false if `id` was not attached.
    pub fn remove(&mut self, id: DebuggerId) -> bool {
        let before = self.slots.len();
        self.slots.retain(|(slot_id, _)| *slot_id != id);
        let removed = self.slots.len() != before;
        if removed {
            self.refresh();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn refresh(&mut self) {
        self.active = !self.slots.is_empty();
        self.has_text_capable = self
            .slots
            .iter()
            .any(|(_, slot)| matches!(slot, DebuggerSlot::Text(_)));
    }

    /// True when notifications will reach at least one debugger.
    #[inline]
    pub fn is_active(&self) -> bool {
        cfg!(feature = "debugger") && self.active
    }

    /// True when some attached text-capable debugger currently wants text.
    #[inline]
    pub fn has_instruction_text_debugger(&self) -> bool {
        if !(cfg!(feature = "debugger") && self.has_text_capable) {
            return false;
        }
        self.slots.iter().any(|(_, slot)| match slot {
            DebuggerSlot::Text(d) => d.wants_instruction_text(),
            DebuggerSlot::Plain(_) => false,
        })
    }

    /// Notify before an instruction. `format` runs only when a debugger
    /// wants instruction text.
    #[inline]
    pub fn before_instruction(
        &mut self,
        cpu: &dyn CpuView,
        opcode_addr: u32,
        opcode: u8,
        format: impl FnOnce() -> String,
    ) {
        if !self.is_active() {
            return;
        }
        let text = self.has_instruction_text_debugger().then(format);
        for (_, slot) in &mut self.slots {
            slot.debugger()
                .before_instruction(cpu, opcode_addr, opcode, text.as_deref());
        }
    }

    #[inline]
    pub fn after_step(&mut self, cpu: &dyn CpuView) {
        if !self.is_active() {
            return;
        }
        for (_, slot) in &mut self.slots {
            slot.debugger().after_step(cpu);
        }
    }

    #[inline]
    pub fn memory_read(&mut self, cpu: &dyn CpuView, addr: u32, value: u8) {
        if !self.is_active() {
            return;
        }
        for (_, slot) in &mut self.slots {
            slot.debugger().on_memory_read(cpu, addr, value);
        }
    }

    #[inline]
    pub fn memory_write(&mut self, cpu: &dyn CpuView, addr: u32, value: u8) {
        if !self.is_active() {
            return;
        }
        for (_, slot) in &mut self.slots {
            slot.debugger().on_memory_write(cpu, addr, value);
        }
    }
}
