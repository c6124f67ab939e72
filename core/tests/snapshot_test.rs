mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use common::{Recorder, STUB_MEMORY, StubMachine, wait_until};
use cyclehost_core::error::{SchedulerError, SnapshotError};
use cyclehost_core::report::{LogReporter, Reporter};
use cyclehost_core::scheduler::{ExecutionScheduler, SchedulerConfig, SchedulerEvent, TickRate};
use cyclehost_core::snapshot::{self, MachineState};

fn scheduler(machine: StubMachine) -> (ExecutionScheduler<StubMachine>, Recorder) {
    let recorder = Recorder::default();
    let reporter: Arc<dyn Reporter> = Arc::new(recorder.clone());
    let s = ExecutionScheduler::with_config(
        machine,
        TickRate::new(1_000_000).accessor(),
        reporter,
        SchedulerConfig::default(),
    );
    (s, recorder)
}

// ==========================================================================
// Capture
// ==========================================================================

#[test]
fn test_capture_contains_state_and_frame() {
    let mut m = StubMachine::new(4);
    m.ticks = 0x0102_0304;
    m.memory[0] = 0x55;
    let (s, _rec) = scheduler(m);

    let state = s.capture_state().unwrap();
    assert_eq!(state.len(), 8 + STUB_MEMORY);
    assert_eq!(&state.as_bytes()[..8], &0x0102_0304u64.to_le_bytes());
    assert_eq!(state.as_bytes()[8], 0x55);
    assert_eq!(state.frame(), &[0xAB; 24][..]);
}

#[test]
fn test_zero_state_size_is_rejected_without_saving() {
    let mut m = StubMachine::new(4);
    m.size_override = Some(0);
    let (s, _rec) = scheduler(m);

    let err = s.capture_state().unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::Snapshot(SnapshotError::InvalidStateSize)
    ));
    assert_eq!(s.with_machine(|m| m.save_calls), 0);
}

#[test]
fn test_persistent_size_mismatch_gives_up_after_three_attempts() {
    let mut m = StubMachine::new(4);
    m.mismatches_left = u32::MAX;
    let (s, rec) = scheduler(m);

    let err = s.capture_state().unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::Snapshot(SnapshotError::CaptureFailed { attempts: 3 })
    ));
    assert_eq!(s.with_machine(|m| m.save_calls), 3);
    assert_eq!(rec.warning_count(), 3);
}

#[test]
fn test_transient_size_mismatch_is_retried() {
    let mut m = StubMachine::new(4);
    m.mismatches_left = 2;
    let (s, rec) = scheduler(m);

    assert!(s.capture_state().is_ok());
    assert_eq!(s.with_machine(|m| m.save_calls), 3);
    assert_eq!(rec.warning_count(), 2);
}

#[test]
fn test_machine_without_snapshotter_is_unsupported() {
    let mut m = StubMachine::new(4);
    m.snapshot_supported = false;
    let (s, _rec) = scheduler(m);

    assert!(matches!(
        s.capture_state(),
        Err(SchedulerError::Snapshot(SnapshotError::Unsupported))
    ));
    let state = MachineState::from_parts(vec![0; 8 + STUB_MEMORY], Vec::new());
    assert!(matches!(
        s.load_state(state),
        Err(SchedulerError::Snapshot(SnapshotError::Unsupported))
    ));
}

#[test]
fn test_capture_attempts_are_configurable() {
    let mut m = StubMachine::new(4);
    m.mismatches_left = u32::MAX;
    let config = SchedulerConfig {
        capture_attempts: 5,
        ..SchedulerConfig::default()
    };
    let s = ExecutionScheduler::with_config(
        m,
        TickRate::new(1_000_000).accessor(),
        Arc::new(LogReporter),
        config,
    );
    assert!(matches!(
        s.capture_state(),
        Err(SchedulerError::Snapshot(SnapshotError::CaptureFailed { attempts: 5 }))
    ));
}

#[test]
fn test_free_function_capture_and_restore() {
    let mut m = StubMachine::new(4);
    m.ticks = 99;
    let state = snapshot::capture(&mut m, 3, &LogReporter).unwrap();
    m.ticks = 0;
    snapshot::restore(&mut m, &state).unwrap();
    assert_eq!(m.ticks, 99);
    assert_eq!(m.load_calls, 1);
}

// ==========================================================================
// Restore
// ==========================================================================

#[test]
fn test_load_rejects_wrong_size() {
    let (s, _rec) = scheduler(StubMachine::new(4));
    let state = MachineState::from_parts(vec![0; 3], Vec::new());
    let err = s.load_state(state).unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::Snapshot(SnapshotError::SizeMismatch {
            expected: 24,
            actual: 3
        })
    ));
    assert_eq!(s.with_machine(|m| m.load_calls), 0);
}

#[test]
fn test_round_trip_while_running() {
    let (s, rec) = scheduler(StubMachine::new(4));
    let loaded = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loaded);
    s.events().subscribe(SchedulerEvent::StateLoaded, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    s.start().unwrap();
    assert!(wait_until(Duration::from_secs(1), || s.cpu_ticks() > 1_000));

    // Capture while running: the guard serializes it against steps.
    s.toggle_pause();
    let state = s.capture_state().unwrap();
    let (saved_ticks, saved_memory) = s.with_machine(|m| (m.ticks, m.memory));

    s.toggle_pause();
    thread::sleep(Duration::from_millis(20));
    s.toggle_pause();
    assert!(s.cpu_ticks() > saved_ticks);

    s.load_state(state).unwrap();
    assert_eq!(s.cpu_ticks(), saved_ticks);
    let (ticks, memory) = s.with_machine(|m| (m.ticks, m.memory));
    assert_eq!(ticks, saved_ticks);
    assert_eq!(memory, saved_memory);
    assert_eq!(loaded.load(Ordering::SeqCst), 1);

    // The restored baseline starts at the restored tick count.
    assert_eq!(s.clock().baseline().1, saved_ticks);

    s.toggle_pause();
    assert!(wait_until(Duration::from_secs(1), || s.cpu_ticks() > saved_ticks));
    s.stop();
    assert!(rec.fault_messages().is_empty());
}

#[test]
fn test_load_then_start_from_current_state() {
    let mut source = StubMachine::new(4);
    source.ticks = 777_000;
    let state = snapshot::capture(&mut source, 3, &LogReporter).unwrap();

    let (s, _rec) = scheduler(StubMachine::new(4));
    s.load_state(state).unwrap();
    s.start_from_current_state().unwrap();
    assert!(s.cpu_ticks() >= 777_000);
    s.stop();
    assert!(s.cpu_ticks() >= 777_000);
}
