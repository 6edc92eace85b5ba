//! Progress bar for CLI runs, driven through the pipeline's [`MetricsSink`] hook.

use kdam::{Animation, Bar, BarExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::pipeline::{MetricsSink, PipelineState};
use crate::types::OutcomeKind;

/// Force a refresh of the bar.
pub fn refresh_bar(pb: &Arc<Mutex<Bar>>) {
    if let Ok(mut bar) = pb.try_lock() {
        let _ = bar.refresh();
    }
}

/// Configuration for creating a progress bar
pub struct ProgressBarConfig {
    pub total: usize,
    pub desc: &'static str,
    pub animation: Animation,
}

impl ProgressBarConfig {
    pub fn new(total: usize, desc: &'static str, animation: Animation) -> Self {
        Self {
            total,
            desc,
            animation,
        }
    }
}

/// Create a progress bar with the given configuration
pub fn create_progress_bar(config: ProgressBarConfig) -> Arc<Mutex<Bar>> {
    Arc::new(Mutex::new(kdam::tqdm!(
        total = config.total,
        desc = config.desc,
        animation = config.animation,
        unit = " files"
    )))
}

/// Update progress bar if available
/// Uses try_lock so a slow terminal never blocks the writer.
pub fn update_progress_bar(pb: &Arc<Mutex<Bar>>, n: usize) {
    if let Ok(mut pb) = pb.try_lock() {
        let _ = pb.update(n);
    }
}

pub type ProgressBar = Arc<Mutex<Bar>>;

/// Shows one bar for the processing phase: created once the walk has a total, advanced per
/// written unit, closed when draining ends.
#[derive(Default)]
pub struct ProgressMetrics {
    bar: Mutex<Option<ProgressBar>>,
}

impl ProgressMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn bar(&self) -> Option<ProgressBar> {
        self.bar.lock().ok().and_then(|b| b.clone())
    }
}

impl MetricsSink for ProgressMetrics {
    fn files_discovered(&self, count: usize) {
        if count == 0 {
            return;
        }
        let bar = create_progress_bar(ProgressBarConfig::new(
            count,
            "Packing",
            Animation::FillUp,
        ));
        refresh_bar(&bar);
        if let Ok(mut slot) = self.bar.lock() {
            *slot = Some(bar);
        }
    }

    fn file_finished(&self, _path: &str, _kind: OutcomeKind) {
        if let Some(bar) = self.bar() {
            update_progress_bar(&bar, 1);
        }
    }

    fn phase_finished(&self, phase: PipelineState, _elapsed: Duration) {
        if phase != PipelineState::Draining {
            return;
        }
        if let Some(bar) = self.bar.lock().ok().and_then(|mut b| b.take()) {
            refresh_bar(&bar);
            eprintln!();
        }
    }
}
