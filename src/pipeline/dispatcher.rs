//! Dispatcher: feeds collected files into the task queue under back-pressure control.

use crossbeam_channel::Sender;
use log::debug;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::types::{Category, FileDescriptor, Outcome, SkipReason, WriteUnit};

use super::backpressure::{Admission, BackpressureController};
use super::context::CancelToken;

/// What the dispatcher did with the collected files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Sent to the task queue.
    pub dispatched: usize,
    /// Shed under memory pressure (sent straight to the writer as skips).
    pub shed: usize,
    /// Left undispatched because of cancellation or a closed queue.
    pub undispatched: usize,
}

/// Run the dispatch loop on its own thread. Drops both senders when done.
pub fn spawn_dispatcher(
    files: Vec<FileDescriptor>,
    task_tx: Sender<FileDescriptor>,
    write_tx: Sender<WriteUnit>,
    controller: Arc<BackpressureController>,
    cancel: CancelToken,
) -> JoinHandle<DispatchReport> {
    thread::spawn(move || dispatch_files(files, &task_tx, &write_tx, &controller, &cancel))
}

/// Admit files in traversal order. When the controller says shed, the largest remaining file
/// is skipped instead of the next one.
pub fn dispatch_files(
    files: Vec<FileDescriptor>,
    task_tx: &Sender<FileDescriptor>,
    write_tx: &Sender<WriteUnit>,
    controller: &BackpressureController,
    cancel: &CancelToken,
) -> DispatchReport {
    let mut report = DispatchReport::default();
    let mut candidates = Candidates::new(files);
    let mut unsent = 0;

    while candidates.has_next() {
        match controller.admit_one_file(cancel) {
            Admission::Allow => {
                let Some(next) = candidates.take_next() else {
                    break;
                };
                if task_tx.send(next).is_err() {
                    controller.record_admission_revoked();
                    unsent = 1;
                    break;
                }
                report.dispatched += 1;
            }
            Admission::Shed => {
                let Some(victim) = candidates.take_largest() else {
                    break;
                };
                debug!(
                    "Shedding {} ({} bytes) under memory pressure",
                    victim.relative_path, victim.size_bytes
                );
                let unit = WriteUnit::without_content(
                    &victim,
                    Arc::from(""),
                    Category::Skip,
                    Outcome::Skipped(SkipReason::MemoryPressure),
                );
                controller.record_write_queued();
                if write_tx.send(unit).is_err() {
                    controller.record_write_done();
                    unsent = 1;
                    break;
                }
                report.shed += 1;
            }
            Admission::Cancelled => break,
        }
    }
    report.undispatched = candidates.left() + unsent;
    debug!(
        "Dispatch done: {} dispatched, {} shed, {} left",
        report.dispatched, report.shed, report.undispatched
    );
    report
}

/// Remaining files, reachable both in traversal order and largest first.
///
/// Slots are emptied as files leave; heap entries for emptied slots are skipped lazily.
struct Candidates {
    slots: Vec<Option<FileDescriptor>>,
    next: usize,
    /// (size, earliest slot first on ties)
    by_size: BinaryHeap<(u64, Reverse<usize>)>,
    left: usize,
}

impl Candidates {
    fn new(files: Vec<FileDescriptor>) -> Self {
        let by_size = files
            .iter()
            .enumerate()
            .map(|(i, f)| (f.size_bytes, Reverse(i)))
            .collect();
        Self {
            left: files.len(),
            slots: files.into_iter().map(Some).collect(),
            next: 0,
            by_size,
        }
    }

    fn has_next(&mut self) -> bool {
        while self.next < self.slots.len() && self.slots[self.next].is_none() {
            self.next += 1;
        }
        self.next < self.slots.len()
    }

    fn take_next(&mut self) -> Option<FileDescriptor> {
        if !self.has_next() {
            return None;
        }
        let taken = self.slots[self.next].take();
        self.left -= 1;
        taken
    }

    fn take_largest(&mut self) -> Option<FileDescriptor> {
        while let Some((_, Reverse(i))) = self.by_size.pop() {
            if let Some(file) = self.slots[i].take() {
                self.left -= 1;
                return Some(file);
            }
        }
        None
    }

    fn left(&self) -> usize {
        self.left
    }
}
