//! Pipeline components: collector, back-pressure, dispatcher, workers, writer, orchestrator.
//!
//! ```text
//! walk ─▶ Vec<FileDescriptor> ─▶ dispatcher ─▶ task queue ─▶ workers ─▶ write queue ─▶ writer ─▶ sink
//!                                    ▲                                        │
//!                                    └──────── BackpressureController ◀───────┘
//! ```

pub mod backpressure;
pub mod context;
pub mod dispatcher;
pub mod error_handler;
pub mod orchestrator;
pub mod state;
pub mod walk;
pub mod worker;
pub mod writer;

pub use backpressure::{Admission, BackpressureController, BackpressureState, MemoryCeiling};
pub use context::{
    CancelToken, PipelineChannels, PipelineContext, PipelineTuning, create_pipeline_channels,
};
pub use dispatcher::{DispatchReport, dispatch_files, spawn_dispatcher};
pub use error_handler::report_skipped_paths;
pub use orchestrator::{Pipeline, run_pipeline};
pub use state::{MetricsSink, NoopMetrics, PipelineState, StateTracker};
pub use walk::{
    Collected, WalkOutcome, collect_files, run_walk_loop, to_outcome_ignore, to_outcome_walkdir,
};
pub use worker::{WorkerShared, process_file, spawn_workers};
pub use writer::{CountingWriter, Writer, WriterReport, spawn_writer};
