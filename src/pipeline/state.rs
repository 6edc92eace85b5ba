//! Run lifecycle: Idle → Collecting → Processing → Draining → Finalized, plus the metrics hook.

use log::{debug, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::types::OutcomeKind;

/// Lifecycle phase of one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Collecting,
    Processing,
    Draining,
    Finalized,
}

impl PipelineState {
    /// Forward-only transitions. Cancellation may jump from any live phase to `Draining`.
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Idle, Collecting)
                | (Collecting, Processing)
                | (Processing, Draining)
                | (Idle | Collecting, Draining)
                | (Draining, Finalized)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == PipelineState::Finalized
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Collecting => "collecting",
            PipelineState::Processing => "processing",
            PipelineState::Draining => "draining",
            PipelineState::Finalized => "finalized",
        }
    }
}

/// Observer for run progress. Every method defaults to a no-op; all calls are best-effort and
/// never affect the run.
pub trait MetricsSink: Send + Sync {
    /// Walk finished with `count` candidate files.
    fn files_discovered(&self, _count: usize) {}

    /// The writer emitted (or gave up on) one unit.
    fn file_finished(&self, _path: &str, _kind: OutcomeKind) {}

    /// A lifecycle phase ended after `elapsed`.
    fn phase_finished(&self, _phase: PipelineState, _elapsed: Duration) {}
}

/// Metrics sink that records nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}

/// Tracks the current phase and reports phase durations.
pub struct StateTracker {
    state: PipelineState,
    entered: Instant,
    metrics: Arc<dyn MetricsSink>,
}

impl StateTracker {
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            state: PipelineState::Idle,
            entered: Instant::now(),
            metrics,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Move to `next`. Illegal transitions are logged and ignored.
    pub fn transition(&mut self, next: PipelineState) {
        if !self.state.can_transition_to(next) {
            warn!(
                "Ignoring pipeline transition {} -> {}",
                self.state.as_str(),
                next.as_str()
            );
            return;
        }
        let elapsed = self.entered.elapsed();
        debug!(
            "Pipeline {} -> {} ({:.2?} in {})",
            self.state.as_str(),
            next.as_str(),
            elapsed,
            self.state.as_str()
        );
        self.metrics.phase_finished(self.state, elapsed);
        self.state = next;
        self.entered = Instant::now();
    }

    /// Drain then finalize, from wherever the run stopped.
    pub fn finish(&mut self) {
        if self.state != PipelineState::Draining {
            self.transition(PipelineState::Draining);
        }
        self.transition(PipelineState::Finalized);
    }
}
