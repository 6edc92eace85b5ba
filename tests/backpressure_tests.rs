//! Back-pressure controller and dispatcher tests with a scripted memory probe.

use crossbeam_channel::bounded;
use ctxpack::engine::MemoryProbe;
use ctxpack::pipeline::{
    Admission, BackpressureController, MemoryCeiling, dispatch_files,
};
use ctxpack::{CancelReason, CancelToken, FileDescriptor, MemoryPolicy, Outcome, SkipReason};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

struct FakeProbe(AtomicU64);

impl FakeProbe {
    fn new(bytes: u64) -> Arc<Self> {
        Arc::new(Self(AtomicU64::new(bytes)))
    }

    fn set(&self, bytes: u64) {
        self.0.store(bytes, Ordering::SeqCst);
    }
}

impl MemoryProbe for FakeProbe {
    fn resident_bytes(&self) -> Option<u64> {
        Some(self.0.load(Ordering::SeqCst))
    }
}

fn ceiling(limit: u64, interval: usize, policy: MemoryPolicy) -> MemoryCeiling {
    MemoryCeiling {
        limit,
        interval,
        policy,
        resume_below: limit * 9 / 10,
    }
}

fn controller(
    capacity: usize,
    ceiling: Option<MemoryCeiling>,
    probe: &Arc<FakeProbe>,
) -> Arc<BackpressureController> {
    let probe: Arc<dyn MemoryProbe> = probe.clone();
    Arc::new(BackpressureController::new(capacity, ceiling, probe))
}

/// Over the ceiling on the first sample only.
struct SpikeProbe(AtomicU64);

impl MemoryProbe for SpikeProbe {
    fn resident_bytes(&self) -> Option<u64> {
        let calls = self.0.fetch_add(1, Ordering::SeqCst);
        Some(if calls == 0 { 2000 } else { 100 })
    }
}

fn file(seq: u64, size: u64) -> FileDescriptor {
    FileDescriptor {
        seq,
        absolute_path: PathBuf::from(format!("/r/f{seq}.txt")),
        relative_path: format!("f{seq}.txt"),
        size_bytes: size,
    }
}

// --- structural bound ---

#[test]
fn test_admission_blocks_at_capacity_until_a_worker_claims() {
    let probe = FakeProbe::new(0);
    let c = controller(2, None, &probe);
    let cancel = CancelToken::new();
    assert_eq!(c.admit_one_file(&cancel), Admission::Allow);
    assert_eq!(c.admit_one_file(&cancel), Admission::Allow);
    assert_eq!(c.snapshot().pending_tasks, 2);

    let (tx, rx) = mpsc::channel();
    let blocked = {
        let c = Arc::clone(&c);
        let cancel = cancel.clone();
        thread::spawn(move || tx.send(c.admit_one_file(&cancel)).unwrap())
    };
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    c.record_file_start();
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        Admission::Allow
    );
    blocked.join().unwrap();
    let state = c.snapshot();
    assert_eq!(state.pending_tasks, 2);
    assert_eq!(state.in_flight, 1);
    assert_eq!(state.admitted, 3);
    assert!(state.pending_tasks <= c.task_capacity());
}

#[test]
fn test_blocked_admission_observes_cancellation() {
    let probe = FakeProbe::new(0);
    let c = controller(1, None, &probe);
    let cancel = CancelToken::new();
    assert_eq!(c.admit_one_file(&cancel), Admission::Allow);

    let (tx, rx) = mpsc::channel();
    {
        let c = Arc::clone(&c);
        let cancel = cancel.clone();
        thread::spawn(move || tx.send(c.admit_one_file(&cancel)).unwrap());
    }
    thread::sleep(Duration::from_millis(50));
    cancel.cancel(CancelReason::Requested);
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        Admission::Cancelled
    );
}

#[test]
fn test_counters_never_go_negative() {
    let probe = FakeProbe::new(0);
    let c = controller(4, None, &probe);
    c.record_file_done();
    c.record_write_done();
    c.record_file_start();
    let state = c.snapshot();
    assert_eq!(state.pending_tasks, 0);
    assert_eq!(state.pending_writes, 0);
    assert_eq!(state.in_flight, 1);
    c.record_file_done();
    c.record_file_done();
    assert_eq!(c.snapshot().in_flight, 0);
}

#[test]
fn test_write_gauge_tracks_queue() {
    let probe = FakeProbe::new(0);
    let c = controller(4, None, &probe);
    c.record_write_queued();
    c.record_write_queued();
    assert_eq!(c.snapshot().pending_writes, 2);
    c.record_write_done();
    assert_eq!(c.snapshot().pending_writes, 1);
}

// --- memory ceiling ---

#[test]
fn test_memory_sampled_every_k_admissions() {
    let probe = FakeProbe::new(10);
    let c = controller(100, Some(ceiling(1000, 3, MemoryPolicy::Pause)), &probe);
    let cancel = CancelToken::new();
    for _ in 0..9 {
        assert_eq!(c.admit_one_file(&cancel), Admission::Allow);
    }
    assert_eq!(c.samples(), 3);
    assert_eq!(c.snapshot().estimated_memory_bytes, 10);
}

#[test]
fn test_no_ceiling_never_samples() {
    let probe = FakeProbe::new(u64::MAX);
    let c = controller(100, None, &probe);
    let cancel = CancelToken::new();
    for _ in 0..10 {
        assert_eq!(c.admit_one_file(&cancel), Admission::Allow);
    }
    assert_eq!(c.samples(), 0);
}

#[test]
fn test_shed_largest_until_below_hysteresis() {
    let probe = FakeProbe::new(2000);
    let c = controller(100, Some(ceiling(1000, 1, MemoryPolicy::ShedLargest)), &probe);
    let cancel = CancelToken::new();
    assert_eq!(c.admit_one_file(&cancel), Admission::Shed);
    // Over the ceiling every admission re-samples.
    assert_eq!(c.admit_one_file(&cancel), Admission::Shed);
    // Below the ceiling but above the resume threshold: still shedding.
    probe.set(950);
    assert_eq!(c.admit_one_file(&cancel), Admission::Shed);
    probe.set(850);
    assert_eq!(c.admit_one_file(&cancel), Admission::Allow);
    assert_eq!(c.snapshot().admitted, 1);
}

#[test]
fn test_over_limit_rechecks_even_with_long_interval() {
    let probe = FakeProbe::new(2000);
    let c = controller(100, Some(ceiling(1000, 1000, MemoryPolicy::ShedLargest)), &probe);
    let cancel = CancelToken::new();
    for _ in 0..999 {
        assert_eq!(c.admit_one_file(&cancel), Admission::Allow);
        c.record_file_start();
    }
    assert_eq!(c.samples(), 0);
    assert_eq!(c.admit_one_file(&cancel), Admission::Shed);
    assert_eq!(c.admit_one_file(&cancel), Admission::Shed);
    assert_eq!(c.samples(), 2);
}

#[test]
fn test_pause_with_nothing_in_flight_sheds() {
    let probe = FakeProbe::new(2000);
    let c = controller(100, Some(ceiling(1000, 1, MemoryPolicy::Pause)), &probe);
    assert_eq!(c.admit_one_file(&CancelToken::new()), Admission::Shed);
}

#[test]
fn test_pause_resumes_when_memory_drops() {
    let probe = FakeProbe::new(10);
    let c = controller(100, Some(ceiling(1000, 1, MemoryPolicy::Pause)), &probe);
    let cancel = CancelToken::new();
    assert_eq!(c.admit_one_file(&cancel), Admission::Allow);
    c.record_file_start();
    probe.set(5000);

    let (tx, rx) = mpsc::channel();
    {
        let c = Arc::clone(&c);
        let cancel = cancel.clone();
        thread::spawn(move || tx.send(c.admit_one_file(&cancel)).unwrap());
    }
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    probe.set(100);
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        Admission::Allow
    );
}

#[test]
fn test_current_memory_estimate_exceeds() {
    let probe = FakeProbe::new(500);
    let c = controller(1, None, &probe);
    assert!(c.current_memory_estimate_exceeds(100));
    assert!(!c.current_memory_estimate_exceeds(500));
    assert_eq!(c.snapshot().estimated_memory_bytes, 500);
}

// --- reorder window ---

#[test]
fn test_reorder_window_blocks_until_units_are_written() {
    let probe: Arc<dyn MemoryProbe> = FakeProbe::new(0);
    let c = Arc::new(BackpressureController::new(10, None, probe).with_reorder_window(2));
    let cancel = CancelToken::new();
    for _ in 0..2 {
        assert_eq!(c.admit_one_file(&cancel), Admission::Allow);
        c.record_file_start();
        c.record_file_done();
    }
    // Structural bound is free; only the unwritten units hold admission back.
    assert_eq!(c.snapshot().pending_tasks, 0);

    let (tx, rx) = mpsc::channel();
    let blocked = {
        let c = Arc::clone(&c);
        let cancel = cancel.clone();
        thread::spawn(move || tx.send(c.admit_one_file(&cancel)).unwrap())
    };
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    c.record_unit_emitted();
    assert_eq!(
        rx.recv_timeout(Duration::from_secs(5)).unwrap(),
        Admission::Allow
    );
    blocked.join().unwrap();
    let state = c.snapshot();
    assert_eq!(state.admitted, 3);
    assert_eq!(state.emitted, 1);
}

#[test]
fn test_unmatched_emission_is_ignored() {
    let probe = FakeProbe::new(0);
    let c = controller(4, None, &probe);
    c.record_unit_emitted();
    assert_eq!(c.snapshot().emitted, 0);
}

#[test]
fn test_dispatch_holds_back_behind_unwritten_predecessor() {
    let probe: Arc<dyn MemoryProbe> = FakeProbe::new(0);
    let c = Arc::new(BackpressureController::new(100, None, probe).with_reorder_window(4));
    let (task_tx, task_rx) = bounded(100);
    let (write_tx, _write_rx) = bounded(100);
    let cancel = CancelToken::new();
    let dispatcher = {
        let c = Arc::clone(&c);
        let cancel = cancel.clone();
        thread::spawn(move || {
            let files = (0..20).map(|i| file(i, 1)).collect();
            dispatch_files(files, &task_tx, &write_tx, &c, &cancel)
        })
    };

    // Nothing is written (the first unit is still being read): the window caps admission.
    thread::sleep(Duration::from_millis(150));
    assert_eq!(task_rx.len(), 4);

    c.record_unit_emitted();
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while task_rx.len() < 5 && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    thread::sleep(Duration::from_millis(50));
    assert_eq!(task_rx.len(), 5);

    cancel.cancel(CancelReason::Requested);
    let report = dispatcher.join().unwrap();
    assert_eq!(report.dispatched, 5);
    assert_eq!(report.undispatched, 15);
}

// --- dispatcher ---

#[test]
fn test_dispatch_shed_ties_go_to_earliest() {
    let probe = FakeProbe::new(2000);
    let c = controller(10, Some(ceiling(1000, 1, MemoryPolicy::ShedLargest)), &probe);
    let (task_tx, _task_rx) = bounded(10);
    let (write_tx, write_rx) = bounded(10);
    let files = vec![file(0, 5), file(1, 9), file(2, 9), file(3, 1)];
    let report = dispatch_files(files, &task_tx, &write_tx, &c, &CancelToken::new());
    drop(write_tx);
    assert_eq!(report.shed, 4);
    assert_eq!(report.undispatched, 0);
    let order: Vec<u64> = write_rx.iter().map(|u| u.seq).collect();
    assert_eq!(order, vec![1, 2, 0, 3]);
}

#[test]
fn test_dispatch_resumes_traversal_after_shedding() {
    let probe: Arc<dyn MemoryProbe> = Arc::new(SpikeProbe(AtomicU64::new(0)));
    let c = BackpressureController::new(
        10,
        Some(ceiling(1000, 1, MemoryPolicy::ShedLargest)),
        probe,
    );
    let (task_tx, task_rx) = bounded(10);
    let (write_tx, write_rx) = bounded(10);
    let files = vec![file(0, 5), file(1, 50), file(2, 7)];
    let report = dispatch_files(files, &task_tx, &write_tx, &c, &CancelToken::new());
    drop(task_tx);
    drop(write_tx);
    assert_eq!(report.shed, 1);
    assert_eq!(report.dispatched, 2);
    let shed: Vec<u64> = write_rx.iter().map(|u| u.seq).collect();
    assert_eq!(shed, vec![1]);
    let seqs: Vec<u64> = task_rx.iter().map(|f| f.seq).collect();
    assert_eq!(seqs, vec![0, 2]);
}

#[test]
fn test_dispatch_sheds_largest_first() {
    let probe = FakeProbe::new(2000);
    let c = controller(10, Some(ceiling(1000, 1, MemoryPolicy::ShedLargest)), &probe);
    let (task_tx, task_rx) = bounded(10);
    let (write_tx, write_rx) = bounded(10);
    let files = vec![file(0, 10), file(1, 500), file(2, 20)];
    let report = dispatch_files(files, &task_tx, &write_tx, &c, &CancelToken::new());
    drop(write_tx);

    assert_eq!(report.dispatched, 0);
    assert_eq!(report.shed, 3);
    assert!(task_rx.try_recv().is_err());
    let shed: Vec<_> = write_rx.iter().collect();
    let order: Vec<u64> = shed.iter().map(|u| u.seq).collect();
    assert_eq!(order, vec![1, 2, 0]);
    assert!(
        shed.iter()
            .all(|u| u.outcome == Outcome::Skipped(SkipReason::MemoryPressure))
    );
    assert_eq!(c.snapshot().pending_writes, 3);
}

#[test]
fn test_dispatch_in_traversal_order() {
    let probe = FakeProbe::new(0);
    let c = controller(10, None, &probe);
    let (task_tx, task_rx) = bounded(10);
    let (write_tx, _write_rx) = bounded(10);
    let files = (0..5).map(|i| file(i, 1)).collect();
    let report = dispatch_files(files, &task_tx, &write_tx, &c, &CancelToken::new());
    drop(task_tx);
    assert_eq!(report.dispatched, 5);
    let seqs: Vec<u64> = task_rx.iter().map(|f| f.seq).collect();
    assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_dispatch_stops_on_cancel() {
    let probe = FakeProbe::new(0);
    let c = controller(10, None, &probe);
    let (task_tx, _task_rx) = bounded(10);
    let (write_tx, _write_rx) = bounded(10);
    let cancel = CancelToken::new();
    cancel.cancel(CancelReason::Requested);
    let report = dispatch_files(vec![file(0, 1), file(1, 1)], &task_tx, &write_tx, &c, &cancel);
    assert_eq!(report.dispatched, 0);
    assert_eq!(report.undispatched, 2);
}
