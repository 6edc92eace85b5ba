//! Back-pressure controller: a shared gauge of in-flight work plus a sampled memory ceiling.
//!
//! Bounds on admission:
//! - structural: at most `task_capacity` admitted-but-unclaimed tasks;
//! - reorder window (traversal order only): at most `window` admitted units not yet written,
//!   so units parked behind a slow predecessor cannot pile up;
//! - memory: every K admissions the process RSS is sampled; over the ceiling the controller
//!   pauses (until usage drops below the hysteresis threshold) or sheds the largest candidates.
//!
//! Admission is driven by a single dispatcher thread. Counters never go below zero; a
//! mismatched decrement is logged and ignored.

use log::{debug, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::engine::memory::MemoryProbe;
use crate::pipeline::CancelToken;
use crate::types::{MemoryPolicy, OutputOrder, PipelineConfig};
use crate::utils::config::CANCEL_POLL_INTERVAL;

/// Point-in-time view of the gauge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BackpressureState {
    /// Admitted to the task queue, not yet claimed by a worker.
    pub pending_tasks: usize,
    /// Claimed by a worker, no write unit emitted yet.
    pub in_flight: usize,
    /// Write units queued, not yet received by the writer.
    pub pending_writes: usize,
    /// Last sampled resident memory.
    pub estimated_memory_bytes: u64,
    /// Admissions since the last memory sample.
    pub admitted_since_check: usize,
    /// Total admissions granted this run.
    pub admitted: usize,
    /// Admitted units whose output the writer has produced.
    pub emitted: usize,
}

/// Decision for one admission request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Enqueue the next candidate.
    Allow,
    /// Over the memory ceiling: skip the largest remaining candidate instead.
    Shed,
    /// Cancellation observed while waiting.
    Cancelled,
}

/// Memory ceiling settings.
#[derive(Clone, Copy, Debug)]
pub struct MemoryCeiling {
    pub limit: u64,
    /// Sample every `interval` admissions while under the ceiling.
    pub interval: usize,
    pub policy: MemoryPolicy,
    /// Once over the ceiling, usage must fall to this before admission resumes.
    pub resume_below: u64,
}

impl MemoryCeiling {
    pub fn from_config(config: &PipelineConfig) -> Option<Self> {
        let limit = config.memory_limit?;
        Some(Self {
            limit,
            interval: config.memory_check_interval.max(1),
            policy: config.memory_policy,
            resume_below: (limit as f64 * config.memory_hysteresis) as u64,
        })
    }
}

enum MemoryVerdict {
    Ok,
    Shed,
    Cancelled,
}

#[derive(Default)]
struct Gauge {
    state: BackpressureState,
    over_limit: bool,
}

impl Gauge {
    fn idle(&self) -> bool {
        self.state.pending_tasks == 0 && self.state.in_flight == 0 && self.state.pending_writes == 0
    }

    fn unwritten(&self) -> usize {
        self.state.admitted.saturating_sub(self.state.emitted)
    }
}

fn decrement(counter: &mut usize, name: &str) {
    match counter.checked_sub(1) {
        Some(v) => *counter = v,
        None => warn!("Ignoring unmatched {name} decrement (already zero)"),
    }
}

pub struct BackpressureController {
    gauge: Mutex<Gauge>,
    room: Condvar,
    task_capacity: usize,
    reorder_window: Option<usize>,
    ceiling: Option<MemoryCeiling>,
    probe: Arc<dyn MemoryProbe>,
    samples: AtomicU64,
}

impl BackpressureController {
    pub fn new(
        task_capacity: usize,
        ceiling: Option<MemoryCeiling>,
        probe: Arc<dyn MemoryProbe>,
    ) -> Self {
        Self {
            gauge: Mutex::new(Gauge::default()),
            room: Condvar::new(),
            task_capacity: task_capacity.max(1),
            reorder_window: None,
            ceiling,
            probe,
            samples: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &PipelineConfig, probe: Arc<dyn MemoryProbe>) -> Self {
        let controller = Self::new(
            config.task_queue_capacity,
            MemoryCeiling::from_config(config),
            probe,
        );
        match config.order {
            OutputOrder::Traversal => controller
                .with_reorder_window(config.task_queue_capacity + config.write_queue_capacity),
            OutputOrder::Completion => controller,
        }
    }

    /// Cap admitted-but-unwritten units at `window`.
    ///
    /// Only sound when admission follows traversal order: the unit the writer waits for is
    /// then either already admitted or the next candidate, admitted once nothing is unwritten.
    pub fn with_reorder_window(mut self, window: usize) -> Self {
        self.reorder_window = Some(window.max(1));
        self
    }

    fn lock(&self) -> MutexGuard<'_, Gauge> {
        self.gauge.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until one more task may be admitted, or say to shed / stop.
    pub fn admit_one_file(&self, cancel: &CancelToken) -> Admission {
        // Structural bound. The lock is never held across a cancellation check.
        loop {
            if cancel.is_cancelled() {
                return Admission::Cancelled;
            }
            let gauge = self.lock();
            let window_full = self
                .reorder_window
                .is_some_and(|window| gauge.unwritten() >= window);
            if gauge.state.pending_tasks < self.task_capacity && !window_full {
                break;
            }
            let _ = self.room.wait_timeout(gauge, CANCEL_POLL_INTERVAL);
        }

        if let Some(ceiling) = self.ceiling {
            let due = {
                let mut gauge = self.lock();
                gauge.state.admitted_since_check += 1;
                if gauge.over_limit || gauge.state.admitted_since_check >= ceiling.interval {
                    gauge.state.admitted_since_check = 0;
                    true
                } else {
                    false
                }
            };
            if due {
                match self.check_memory(&ceiling, cancel) {
                    MemoryVerdict::Ok => {}
                    MemoryVerdict::Shed => return Admission::Shed,
                    MemoryVerdict::Cancelled => return Admission::Cancelled,
                }
            }
        }

        let mut gauge = self.lock();
        gauge.state.pending_tasks += 1;
        gauge.state.admitted += 1;
        Admission::Allow
    }

    fn check_memory(&self, ceiling: &MemoryCeiling, cancel: &CancelToken) -> MemoryVerdict {
        if self.under_threshold(ceiling) {
            return MemoryVerdict::Ok;
        }
        match ceiling.policy {
            MemoryPolicy::ShedLargest => MemoryVerdict::Shed,
            MemoryPolicy::Pause => loop {
                if cancel.is_cancelled() {
                    return MemoryVerdict::Cancelled;
                }
                {
                    let gauge = self.lock();
                    if gauge.idle() {
                        // Nothing in flight can release memory; waiting would never end.
                        debug!("Memory ceiling exceeded with nothing in flight; shedding");
                        return MemoryVerdict::Shed;
                    }
                    let _ = self.room.wait_timeout(gauge, CANCEL_POLL_INTERVAL);
                }
                if self.under_threshold(ceiling) {
                    return MemoryVerdict::Ok;
                }
            },
        }
    }

    /// Sample memory and update the over-limit flag. Uses the hysteresis threshold while over.
    fn under_threshold(&self, ceiling: &MemoryCeiling) -> bool {
        let Some(estimate) = self.sample() else {
            return true;
        };
        let mut gauge = self.lock();
        let threshold = if gauge.over_limit {
            ceiling.resume_below
        } else {
            ceiling.limit
        };
        if estimate <= threshold {
            if gauge.over_limit {
                debug!("Memory back under {} bytes; resuming admission", threshold);
            }
            gauge.over_limit = false;
            true
        } else {
            if !gauge.over_limit {
                warn!(
                    "Memory ceiling exceeded ({} > {} bytes); applying {:?}",
                    estimate, ceiling.limit, ceiling.policy
                );
            }
            gauge.over_limit = true;
            false
        }
    }

    fn sample(&self) -> Option<u64> {
        self.samples.fetch_add(1, Ordering::Relaxed);
        let estimate = self.probe.resident_bytes()?;
        self.lock().state.estimated_memory_bytes = estimate;
        Some(estimate)
    }

    /// Sample now and report whether usage is above `limit`.
    pub fn current_memory_estimate_exceeds(&self, limit: u64) -> bool {
        self.sample().is_some_and(|estimate| estimate > limit)
    }

    /// A worker claimed a task from the queue.
    pub fn record_file_start(&self) {
        let mut gauge = self.lock();
        decrement(&mut gauge.state.pending_tasks, "pending_tasks");
        gauge.state.in_flight += 1;
        drop(gauge);
        self.room.notify_all();
    }

    /// A worker finished (or abandoned) its claimed task.
    pub fn record_file_done(&self) {
        let mut gauge = self.lock();
        decrement(&mut gauge.state.in_flight, "in_flight");
        drop(gauge);
        self.room.notify_all();
    }

    /// An admitted task never reached the queue (queue closed).
    pub fn record_admission_revoked(&self) {
        let mut gauge = self.lock();
        decrement(&mut gauge.state.pending_tasks, "pending_tasks");
        decrement(&mut gauge.state.admitted, "admitted");
    }

    pub fn record_write_queued(&self) {
        self.lock().state.pending_writes += 1;
    }

    /// The writer received a unit (or a queued send failed).
    pub fn record_write_done(&self) {
        let mut gauge = self.lock();
        decrement(&mut gauge.state.pending_writes, "pending_writes");
        drop(gauge);
        self.room.notify_all();
    }

    /// The writer produced the output of an admitted unit.
    pub fn record_unit_emitted(&self) {
        let mut gauge = self.lock();
        if gauge.state.emitted < gauge.state.admitted {
            gauge.state.emitted += 1;
        } else {
            warn!("Ignoring unmatched unit emission (nothing admitted is unwritten)");
        }
        drop(gauge);
        self.room.notify_all();
    }

    pub fn snapshot(&self) -> BackpressureState {
        self.lock().state
    }

    pub fn task_capacity(&self) -> usize {
        self.task_capacity
    }

    /// Number of memory samples taken so far.
    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }
}
