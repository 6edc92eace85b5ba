//! ctxpack: concurrent aggregation of a source tree into one markdown, JSON or YAML document.
//!
//! ```no_run
//! use ctxpack::{CancelToken, PipelineConfig, run_pipeline};
//!
//! let config = PipelineConfig::default();
//! let summary = run_pipeline(
//!     std::path::Path::new("."),
//!     Box::new(std::io::stdout()),
//!     &config,
//!     &CancelToken::new(),
//! )
//! .map_err(|aborted| aborted.error)?;
//! eprintln!("{} files written", summary.written());
//! # Ok::<(), ctxpack::PipelineError>(())
//! ```

pub mod engine;
pub mod error;
pub mod pipeline;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use error::{AbortedRun, CancelReason, LimitViolation, PipelineError};
pub use pipeline::{CancelToken, MetricsSink, NoopMetrics, Pipeline, PipelineState, run_pipeline};
pub use types::*;

/// Result alias used by the public ctxpack API
pub type Result<T> = std::result::Result<T, PipelineError>;
