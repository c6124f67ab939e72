//! Save-state capture and restore.
//!
//! These functions assume the caller already holds the execution guard;
//! the scheduler wraps them so they never interleave with a step.

use crate::core::MachineHost;
use crate::error::SnapshotError;
use crate::report::Reporter;

/// Attempts made by [`capture`] before a size mismatch becomes fatal.
pub const DEFAULT_CAPTURE_ATTEMPTS: u32 = 3;

/// A captured machine state.
///
/// Opaque bytes plus the frame that was on screen when it was taken. The
/// host defines no on-disk format; persisting the bytes is up to the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MachineState {
    data: Box<[u8]>,
    frame: Box<[u8]>,
}

impl MachineState {
    /// Rebuild a state from bytes previously taken out with
    /// [`into_parts`](Self::into_parts) (e.g., read back from disk).
    pub fn from_parts(data: Vec<u8>, frame: Vec<u8>) -> Self {
        Self {
            data: data.into_boxed_slice(),
            frame: frame.into_boxed_slice(),
        }
    }

    /// Declared state size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Frame buffer captured alongside the state.
    pub fn frame(&self) -> &[u8] {
        &self.frame
    }

    pub fn into_parts(self) -> (Vec<u8>, Vec<u8>) {
        (self.data.into_vec(), self.frame.into_vec())
    }
}

/// Serialize `machine` into a new [`MachineState`].
///
/// A size mismatch reported by the snapshotter (the machine resized a
/// device between sizing and saving) is retried with freshly sized buffers,
/// up to `attempts` times in total.
pub fn capture(
    machine: &mut dyn MachineHost,
    attempts: u32,
    reporter: &dyn Reporter,
) -> Result<MachineState, SnapshotError> {
    let attempts = attempts.max(1);
    for attempt in 1..=attempts {
        let frame_len = machine.video().frame_len();
        let snapshotter = machine.snapshotter().ok_or(SnapshotError::Unsupported)?;

        let size = snapshotter.state_size();
        if size == 0 {
            return Err(SnapshotError::InvalidStateSize);
        }

        let mut data = vec![0u8; size];
        let mut frame = vec![0u8; frame_len];
        match snapshotter.save(&mut data, &mut frame) {
            Ok(()) => return Ok(MachineState::from_parts(data, frame)),
            Err(e) if e.is_retryable() => {
                reporter.warn(&format!(
                    "state capture attempt {attempt}/{attempts} failed: {e}"
                ));
            }
            Err(e) => return Err(e),
        }
    }
    Err(SnapshotError::CaptureFailed { attempts })
}

/// Restore `machine` from `state`.
///
/// The state must be exactly the size the machine currently reports.
pub fn restore(machine: &mut dyn MachineHost, state: &MachineState) -> Result<(), SnapshotError> {
    let snapshotter = machine.snapshotter().ok_or(SnapshotError::Unsupported)?;
    let expected = snapshotter.state_size();
    if expected == 0 {
        return Err(SnapshotError::InvalidStateSize);
    }
    if state.len() != expected {
        return Err(SnapshotError::SizeMismatch {
            expected,
            actual: state.len(),
        });
    }
    snapshotter.load(state.as_bytes())
}
