use log::{debug, info};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::engine::classify::ClassifierCache;
use crate::engine::memory::{MemoryProbe, ProcessMemoryProbe};
use crate::error::{AbortedRun, CancelReason, PipelineError};
use crate::pipeline;
use crate::types::{PipelineConfig, RunSummary};

use super::backpressure::BackpressureController;
use super::context::{CancelToken, PipelineContext, PipelineTuning};
use super::dispatcher::DispatchReport;
use super::state::{MetricsSink, NoopMetrics, PipelineState, StateTracker};
use super::worker::WorkerShared;

/// One configured aggregation run. Build with [`Pipeline::new`], attach optional hooks, then
/// call [`Pipeline::run`].
pub struct Pipeline {
    config: PipelineConfig,
    metrics: Arc<dyn MetricsSink>,
    classifier: Option<Arc<ClassifierCache>>,
    probe: Arc<dyn MemoryProbe>,
    exclude_path: Option<PathBuf>,
    verbose: bool,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            metrics: Arc::new(NoopMetrics),
            classifier: None,
            probe: Arc::new(ProcessMemoryProbe::new()),
            exclude_path: None,
            verbose: false,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Use this cache instead of the process-wide one.
    pub fn with_classifier(mut self, cache: Arc<ClassifierCache>) -> Self {
        self.classifier = Some(cache);
        self
    }

    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Never collect this file (the output document, when written under the root).
    pub fn exclude_output(mut self, path: &Path) -> Self {
        self.exclude_path = Some(path.to_path_buf());
        self
    }

    /// List every skipped walk path on stderr.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Aggregate `root` into `sink`.
    ///
    /// Pre-flight failures (bad config, unreadable root, resource ceilings, cancellation during
    /// the walk) return before a single byte reaches `sink`. Once processing starts the
    /// document is always closed with a summary; cancellation and sink failures are reported
    /// together with the counts reached.
    pub fn run(
        &self,
        root: &Path,
        sink: Box<dyn Write + Send>,
        cancel: &CancelToken,
    ) -> Result<RunSummary, AbortedRun> {
        let mut tracker = StateTracker::new(Arc::clone(&self.metrics));
        tracker.transition(PipelineState::Collecting);

        let collected = self.config.validate().and_then(|()| {
            let ctx = PipelineContext::new(
                root,
                &self.config,
                self.exclude_path.as_deref(),
                cancel.clone(),
            )?;
            let collected = pipeline::collect_files(&ctx)?;
            Ok((ctx, collected))
        });
        let (ctx, collected) = match collected {
            Ok(found) => found,
            Err(e) => {
                tracker.finish();
                return Err(AbortedRun::preflight(e, 0));
            }
        };
        pipeline::report_skipped_paths(&collected.skipped_paths, self.verbose);
        let discovered = collected.files.len();
        let walk_warnings = collected.skipped_paths.len();
        self.metrics.files_discovered(discovered);
        if cancel.is_cancelled() {
            tracker.finish();
            let reason = cancel.reason().unwrap_or(CancelReason::Requested);
            return Err(AbortedRun::preflight(
                PipelineError::Cancelled(reason),
                discovered,
            ));
        }

        tracker.transition(PipelineState::Processing);
        if let Some(timeout) = self.config.overall_timeout() {
            cancel.arm_timeout(timeout);
        }
        let tuning = PipelineTuning::resolve(&self.config);
        debug!(
            "Processing {} files with {} workers (task queue {}, write queue {})",
            discovered,
            tuning.num_workers,
            tuning.task_queue_capacity,
            tuning.write_queue_capacity
        );

        let ctx = Arc::new(ctx);
        let channels = pipeline::create_pipeline_channels(&tuning);
        let controller = Arc::new(BackpressureController::from_config(
            &self.config,
            Arc::clone(&self.probe),
        ));
        let cache = self
            .classifier
            .clone()
            .unwrap_or_else(|| ClassifierCache::shared(self.config.cache_capacity));

        let writer = pipeline::Writer::new(
            sink,
            &ctx,
            Arc::clone(&controller),
            Arc::clone(&self.metrics),
            discovered,
            walk_warnings,
        );
        let writer_handle = pipeline::spawn_writer(writer, channels.write_rx);

        let shared = Arc::new(WorkerShared {
            ctx: Arc::clone(&ctx),
            cache,
            controller: Arc::clone(&controller),
        });
        let worker_handles = pipeline::spawn_workers(
            channels.task_rx,
            &channels.write_tx,
            &shared,
            tuning.num_workers,
        );
        let dispatch_handle = pipeline::spawn_dispatcher(
            collected.files,
            channels.task_tx,
            channels.write_tx.clone(),
            Arc::clone(&controller),
            cancel.clone(),
        );
        // Dropping the last sender closes the write queue once workers and dispatcher exit.
        drop(channels.write_tx);

        let mut panicked: Option<&'static str> = None;
        let dispatch = join_or_cancel(dispatch_handle, "dispatcher", cancel, &mut panicked)
            .unwrap_or_default();
        tracker.transition(PipelineState::Draining);
        for h in worker_handles {
            let _ = join_or_cancel(h, "worker", cancel, &mut panicked);
        }
        let report = join_or_cancel(writer_handle, "writer", cancel, &mut panicked);
        tracker.transition(PipelineState::Finalized);

        let (summary, sink_error) = build_summary(discovered, walk_warnings, &dispatch, report);
        debug_assert_eq!(
            summary.written() + summary.abandoned,
            summary.discovered,
            "every discovered file is written or abandoned"
        );

        let error = sink_error
            .or_else(|| panicked.map(PipelineError::Internal))
            .or_else(|| {
                cancel.tripped().then(|| {
                    PipelineError::Cancelled(cancel.reason().unwrap_or(CancelReason::Requested))
                })
            });
        match error {
            Some(error) => Err(AbortedRun::new(error, summary)),
            None => {
                info!(
                    "Packed {} files ({} processed, {} skipped, {} errored), {} bytes",
                    summary.written(),
                    summary.processed,
                    summary.skipped,
                    summary.errored,
                    summary.bytes_written
                );
                Ok(summary)
            }
        }
    }
}

/// Join a pipeline thread. A panic cancels the run so the other stages unwind.
fn join_or_cancel<T>(
    handle: JoinHandle<T>,
    name: &'static str,
    cancel: &CancelToken,
    panicked: &mut Option<&'static str>,
) -> Option<T> {
    match handle.join() {
        Ok(v) => Some(v),
        Err(_) => {
            log::error!("{} thread panicked", name);
            cancel.cancel(CancelReason::Requested);
            panicked.get_or_insert(name);
            None
        }
    }
}

fn build_summary(
    discovered: usize,
    walk_warnings: usize,
    dispatch: &DispatchReport,
    report: Option<pipeline::WriterReport>,
) -> (RunSummary, Option<PipelineError>) {
    let report = report.unwrap_or_default();
    let written = report.processed + report.skipped + report.errored;
    let summary = RunSummary {
        discovered,
        dispatched: dispatch.dispatched,
        processed: report.processed,
        skipped: report.skipped,
        errored: report.errored,
        abandoned: discovered.saturating_sub(written),
        shed: report.shed,
        bytes_written: report.bytes_written,
        walk_warnings,
    };
    (summary, report.error)
}

/// Aggregate `root` into `sink` with `config`. See [`Pipeline::run`].
pub fn run_pipeline(
    root: &Path,
    sink: Box<dyn Write + Send>,
    config: &PipelineConfig,
    cancel: &CancelToken,
) -> Result<RunSummary, AbortedRun> {
    Pipeline::new(config.clone()).run(root, sink, cancel)
}
