//! Host framework for cycle-stepped emulators.
//!
//! - [`core::Bus`] decodes an 8-bit-addressable space onto attached devices.
//! - [`cpu::Cpu`] is the contract concrete CPUs implement, with a
//!   [`cpu::DebuggerHub`] for instruction and memory hooks.
//! - [`core::MachineHost`] is what a complete system exposes to the host.
//! - [`scheduler::ExecutionScheduler`] runs a machine on its own thread,
//!   paced to real time by [`scheduler::ClockSync`].
//! - [`snapshot`] captures and restores machine state.

pub mod core;
pub mod cpu;
pub mod device;
pub mod error;
pub mod report;
pub mod scheduler;
pub mod snapshot;

pub mod prelude {
    pub use crate::core::{
        AddressRange, AudioSource, Bus, Device, MachineHost, OPEN_BUS, PortDevice, Snapshotter,
        VideoSource,
    };
    pub use crate::cpu::{Cpu, CpuView, Debugger, DebuggerHub, InstructionTextDebugger};
    pub use crate::device::Memory;
    pub use crate::error::{ConfigError, MachineError, SchedulerError, SnapshotError};
    pub use crate::report::{LogReporter, Reporter};
    pub use crate::scheduler::{
        ExecutionScheduler, SchedulerConfig, SchedulerEvent, TickRate,
    };
    pub use crate::snapshot::MachineState;
}
