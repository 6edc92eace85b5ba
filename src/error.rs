//! Error taxonomy for the aggregation pipeline.
//!
//! Per-file problems never appear here as a returned `Err`: workers turn them into
//! [`Outcome::Error`](crate::Outcome) entries. Everything in [`PipelineError`] aborts the run.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::types::RunSummary;

/// Whole-run failure kinds.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Root cannot be walked, or (strict mode) a subtree could not be read.
    #[error("file system error at {}: {message}", path.display())]
    FileSystem { path: PathBuf, message: String },

    /// Bad configuration value or a path escaping the root.
    #[error("validation error: {0}")]
    Validation(String),

    /// Read/transform failure for one file. Contained by workers; only surfaces through
    /// [`Outcome::Error`](crate::Outcome) text.
    #[error("processing error for {}: {message}", path.display())]
    Processing { path: PathBuf, message: String },

    /// A pre-flight ceiling was exceeded before any file was read.
    #[error("resource limit exceeded: {0}")]
    ResourceLimit(LimitViolation),

    /// Writing to the destination sink failed.
    #[error("output write failed: {0}")]
    Io(#[from] std::io::Error),

    /// The run's cancellation token was tripped.
    #[error("run cancelled: {0}")]
    Cancelled(CancelReason),

    /// A pipeline thread panicked.
    #[error("{0} thread panicked")]
    Internal(&'static str),
}

/// Which pre-flight ceiling was hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitViolation {
    FileCount { limit: usize },
    TotalSize { found: u64, limit: u64 },
}

impl fmt::Display for LimitViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitViolation::FileCount { limit } => {
                write!(f, "more than {limit} files under root")
            }
            LimitViolation::TotalSize { found, limit } => {
                write!(f, "total size {found} bytes exceeds {limit} bytes")
            }
        }
    }
}

/// Why the cancellation token was tripped. The first reason wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Caller or Ctrl+C.
    Requested,
    /// Overall run timeout elapsed.
    Timeout,
    /// The writer could not write to the sink; the run is unwinding.
    SinkFailure,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CancelReason::Requested => "cancellation requested",
            CancelReason::Timeout => "overall timeout elapsed",
            CancelReason::SinkFailure => "output sink failed",
        };
        f.write_str(s)
    }
}

/// Terminal error of an aborted run together with the per-outcome counts reached so far.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct AbortedRun {
    pub error: PipelineError,
    pub summary: RunSummary,
}

impl AbortedRun {
    pub fn new(error: PipelineError, summary: RunSummary) -> Self {
        Self { error, summary }
    }

    /// Abort before any file was processed (pre-flight); counts are all zero except `discovered`.
    pub fn preflight(error: PipelineError, discovered: usize) -> Self {
        Self {
            error,
            summary: RunSummary::abandoned_all(discovered),
        }
    }
}

impl From<PipelineError> for AbortedRun {
    fn from(error: PipelineError) -> Self {
        Self::preflight(error, 0)
    }
}
