use crate::core::Bus;
use crate::error::MachineError;

pub mod debugger;
pub use debugger::{Debugger, DebuggerHub, DebuggerId, InstructionTextDebugger};

/// Read-only view of a CPU, handed to debuggers.
pub trait CpuView {
    fn pc(&self) -> u32;

    /// Cycles executed since the last reset.
    fn ticks(&self) -> u64;

    /// Named register values for inspection. Defaults to none.
    fn registers(&self) -> Vec<(&'static str, u32)> {
        Vec::new()
    }
}

/// Generic CPU interface.
///
/// A CPU owns its bus. Implementations route every memory access through
/// `read8`/`write8` and notify their [`DebuggerHub`] around each access and
/// each instruction.
pub trait Cpu: CpuView + Send {
    /// Return to the power-on state and zero the tick counter.
    fn reset(&mut self);

    /// Execute one instruction. Returns cycles consumed.
    fn step(&mut self) -> Result<u32, MachineError>;

    fn read8(&mut self, addr: u32) -> u8;

    fn write8(&mut self, addr: u32, value: u8);

    fn bus(&self) -> &Bus;

    fn bus_mut(&mut self) -> &mut Bus;

    fn debuggers(&self) -> &DebuggerHub;

    fn debuggers_mut(&mut self) -> &mut DebuggerHub;

    fn add_debugger(&mut self, debugger: Box<dyn Debugger>) -> DebuggerId {
        self.debuggers_mut().add(debugger)
    }

    fn add_text_debugger(&mut self, debugger: Box<dyn InstructionTextDebugger>) -> DebuggerId {
        self.debuggers_mut().add_text(debugger)
    }

    fn remove_debugger(&mut self, id: DebuggerId) -> bool {
        self.debuggers_mut().remove(id)
    }

    fn has_instruction_text_debugger(&self) -> bool {
        self.debuggers().has_instruction_text_debugger()
    }
}
