//! Error taxonomy shared by the bus, snapshot and scheduler layers.
//!
//! Out-of-range bus accesses are deliberately absent: they read the floating
//! bus value and never fail.

use std::io;

use thiserror::Error;

/// Wiring mistakes caught at construction/attachment time. Never retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid address range {from:#X}..={to:#X} (end before start)")]
    InvalidRange { from: u32, to: u32 },

    #[error("range {from:#X}..={to:#X} exceeds bus capacity (max address {max:#X})")]
    CapacityExceeded { from: u32, to: u32, max: u32 },

    #[error("address space must hold at least one byte")]
    ZeroCapacity,

    #[error("address space of {0} bytes does not fit a 32-bit bus")]
    CapacityTooLarge(u64),
}

/// Failures of the save-state protocol.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The machine has no snapshotter. A programming error, not retried.
    #[error("machine does not support save states")]
    Unsupported,

    /// The snapshotter reported a zero-byte state.
    #[error("machine reported an invalid state size of 0 bytes")]
    InvalidStateSize,

    /// Buffer and machine disagree on the state size. Retryable during capture.
    #[error("state size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// Every capture attempt hit a size mismatch.
    #[error("state capture failed after {attempts} attempts")]
    CaptureFailed { attempts: u32 },

    #[error("state I/O: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt state: {0}")]
    Corrupt(String),
}

impl SnapshotError {
    /// True for conditions the capture loop may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SizeMismatch { .. })
    }
}

/// Errors raised by a machine while executing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MachineError {
    #[error("invalid opcode {opcode:#04X} at {pc:#06X}")]
    InvalidOpcode { opcode: u8, pc: u32 },

    #[error("ROM image {name} is {size} bytes, slot holds {capacity}")]
    RomTooLarge {
        name: String,
        size: usize,
        capacity: usize,
    },

    #[error("{0}")]
    Fault(String),
}

/// Everything the execution scheduler can surface.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("execution fault: {0}")]
    Fault(#[from] MachineError),

    #[error("execution thread panicked: {0}")]
    Panicked(String),

    /// Cooperative interruption during shutdown. Expected, never reported.
    #[error("execution interrupted")]
    Interrupted,

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("failed to spawn execution thread: {0}")]
    ThreadSpawn(io::Error),
}

impl SchedulerError {
    /// Whether this error is the expected shutdown signal.
    pub fn is_interruption(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}
