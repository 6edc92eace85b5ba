//! Pipeline context and tuning: shared read-only run data, the cancellation token, and channels.

use crossbeam_channel::{Receiver, Sender, bounded};
use log::debug;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use crate::engine::classify::ClassifyRules;
use crate::engine::tools::{canonicalize_lenient, canonicalize_root};
use crate::error::{CancelReason, PipelineError};
use crate::types::{FileDescriptor, PipelineConfig, WriteUnit};
use crate::utils::config::{PackagePaths, WorkerThreadLimits};
use crate::utils::fd_limit::max_workers_by_fd_limit;

/// Run-wide cancellation signal. Cloning shares the same token.
///
/// Any component may trip it; the first [`CancelReason`] is kept. An armed overall timeout
/// trips it lazily the first time [`CancelToken::is_cancelled`] runs past the deadline.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<CancelState>,
}

#[derive(Debug, Default)]
struct CancelState {
    tripped: AtomicBool,
    reason: Mutex<Option<CancelReason>>,
    deadline: OnceLock<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the token. Later reasons do not replace the first one.
    pub fn cancel(&self, reason: CancelReason) {
        {
            let mut slot = self
                .inner
                .reason
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            slot.get_or_insert(reason);
        }
        self.inner.tripped.store(true, Ordering::Release);
    }

    /// Arm the overall timeout, counted from now. Only the first call has an effect.
    pub fn arm_timeout(&self, timeout: Duration) {
        let _ = self.inner.deadline.set(Instant::now() + timeout);
    }

    /// True once tripped or once the armed deadline has passed (which trips it).
    pub fn is_cancelled(&self) -> bool {
        if self.tripped() {
            return true;
        }
        if let Some(deadline) = self.inner.deadline.get()
            && Instant::now() >= *deadline
        {
            self.cancel(CancelReason::Timeout);
            return true;
        }
        false
    }

    /// True only if the token was actually tripped (does not evaluate the deadline).
    pub fn tripped(&self) -> bool {
        self.inner.tripped.load(Ordering::Acquire)
    }

    pub fn reason(&self) -> Option<CancelReason> {
        *self
            .inner
            .reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Worker count and queue capacities resolved for this run.
#[derive(Clone, Debug)]
pub struct PipelineTuning {
    pub num_workers: usize,
    pub task_queue_capacity: usize,
    pub write_queue_capacity: usize,
}

impl PipelineTuning {
    /// Clamp the configured concurrency to available threads and the FD soft limit.
    pub fn resolve(config: &PipelineConfig) -> Self {
        let limits = WorkerThreadLimits::current();
        let wanted = limits.clamp(config.concurrency);
        let num_workers = match max_workers_by_fd_limit() {
            Some(fd_cap) if fd_cap < wanted => {
                debug!("Capping workers {} -> {} (FD limit ~80%)", wanted, fd_cap);
                fd_cap
            }
            _ => wanted,
        };
        Self {
            num_workers,
            task_queue_capacity: config.task_queue_capacity,
            write_queue_capacity: config.write_queue_capacity,
        }
    }
}

/// Read-only data shared by every stage of one run. Only `cancel` is ever mutated.
pub struct PipelineContext {
    /// Canonical root directory.
    pub root: PathBuf,
    /// Canonical output file, excluded from the walk when it sits under the root.
    pub exclude_path: Option<PathBuf>,
    /// Config excludes plus package defaults.
    pub exclude: Vec<String>,
    pub config: PipelineConfig,
    pub rules: ClassifyRules,
    pub cancel: CancelToken,
}

impl PipelineContext {
    pub fn new(
        root: &Path,
        config: &PipelineConfig,
        exclude_path: Option<&Path>,
        cancel: CancelToken,
    ) -> Result<Self, PipelineError> {
        let root = canonicalize_root(root)?;
        let mut exclude = PackagePaths::get().default_exclude_patterns();
        exclude.extend(config.exclude.iter().cloned());
        Ok(Self {
            root,
            exclude_path: exclude_path.and_then(canonicalize_lenient),
            exclude,
            config: config.clone(),
            rules: ClassifyRules::from_config(config),
            cancel,
        })
    }

    /// Root as shown in the document header.
    pub fn root_label(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.root.display().to_string())
    }
}

/// Bounded queues between stages: dispatcher → workers (tasks), workers → writer (units).
pub struct PipelineChannels {
    pub task_tx: Sender<FileDescriptor>,
    pub task_rx: Receiver<FileDescriptor>,
    pub write_tx: Sender<WriteUnit>,
    pub write_rx: Receiver<WriteUnit>,
}

pub fn create_pipeline_channels(tuning: &PipelineTuning) -> PipelineChannels {
    let (task_tx, task_rx) = bounded::<FileDescriptor>(tuning.task_queue_capacity);
    let (write_tx, write_rx) = bounded::<WriteUnit>(tuning.write_queue_capacity);
    PipelineChannels {
        task_tx,
        task_rx,
        write_tx,
        write_rx,
    }
}
