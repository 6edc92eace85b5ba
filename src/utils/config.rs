//! Application configuration constants.
//! Tuning and thresholds in one place.

use std::sync::OnceLock;
use std::time::Duration;

// ---- Package / paths (from CARGO_PKG_NAME, cached) ----

/// Package-derived paths: built once from `CARGO_PKG_NAME`, then cached.
pub struct PackagePaths {
    pkg_name: &'static str,
    config_filename: String,
}

static PACKAGE_PATHS: OnceLock<PackagePaths> = OnceLock::new();

impl PackagePaths {
    /// Build and cache paths from `CARGO_PKG_NAME`. Called once on first use.
    pub fn get() -> &'static PackagePaths {
        PACKAGE_PATHS.get_or_init(|| {
            let pkg = env!("CARGO_PKG_NAME");
            PackagePaths {
                pkg_name: pkg,
                config_filename: format!(".{pkg}.toml"),
            }
        })
    }

    pub fn pkg_name(&self) -> &str {
        self.pkg_name
    }

    /// Per-directory config file (e.g. `.ctxpack.toml`).
    pub fn config_filename(&self) -> &str {
        &self.config_filename
    }

    /// Names excluded from the walk by default. The output file is excluded separately
    /// (by canonical path) when it lands inside the root.
    pub fn default_exclude_patterns(&self) -> Vec<String> {
        vec![self.config_filename().to_string()]
    }
}

/// Directory names never descended into unless the config replaces the list.
pub const DEFAULT_IGNORE_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "target",
    "vendor",
    "dist",
    "build",
    "__pycache__",
    ".venv",
    ".idea",
    ".vscode",
];

// ---- Worker threads ----

/// Thread limits for the worker pool.
/// Use [`WorkerThreadLimits::current()`] to fill `all_threads` from rayon; the rest are const.
#[derive(Clone, Copy, Debug)]
pub struct WorkerThreadLimits {
    /// Available threads (from rayon); set by [`WorkerThreadLimits::current()`].
    pub all_threads: usize,
    /// Never run fewer workers than this.
    pub floor: usize,
    /// Upper bound regardless of core count (file reads are I/O bound past this).
    pub max: usize,
}

impl Default for WorkerThreadLimits {
    fn default() -> Self {
        Self {
            all_threads: 0, // use current() to set from rayon
            floor: Self::FLOOR_THREADS,
            max: Self::MAX_THREADS,
        }
    }
}

impl WorkerThreadLimits {
    pub const FLOOR_THREADS: usize = 1;
    pub const MAX_THREADS: usize = 64;

    /// Build limits with `all_threads` set from `rayon::current_num_threads()`.
    pub fn current() -> Self {
        Self {
            all_threads: rayon::current_num_threads(),
            ..Self::default()
        }
    }

    /// Clamp a requested worker count; `0` means "use all available threads".
    pub fn clamp(&self, requested: usize) -> usize {
        let want = if requested == 0 {
            self.all_threads
        } else {
            requested
        };
        want.clamp(self.floor, self.max)
    }
}

// ---- Pipeline defaults ----

/// Defaults for [`PipelineConfig`](crate::PipelineConfig). Sizes in bytes, times in milliseconds.
pub struct Defaults;

impl Defaults {
    pub const MAX_FILES: usize = 10_000;
    /// 1 GiB across all files.
    pub const MAX_TOTAL_SIZE: u64 = 1024 * 1024 * 1024;
    /// 5 MiB per file; larger files are listed as skipped.
    pub const MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;
    pub const FILE_TIMEOUT_MS: u64 = 30_000;
    pub const TASK_QUEUE_CAPACITY: usize = 256;
    pub const WRITE_QUEUE_CAPACITY: usize = 64;
    /// 1 MiB: files above this are streamed in chunks.
    pub const STREAM_THRESHOLD: u64 = 1024 * 1024;
    /// 64 KiB read chunk.
    pub const CHUNK_SIZE: usize = 64 * 1024;
    /// Sample process memory every K admissions.
    pub const MEMORY_CHECK_INTERVAL: usize = 100;
    /// Resume admission once usage falls below this fraction of the ceiling.
    pub const MEMORY_HYSTERESIS: f64 = 0.9;
    pub const CACHE_CAPACITY: usize = 500;
}

// ---- Blocking / polling ----

/// How long a blocked component waits before re-checking the cancellation token.
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Bytes inspected when sniffing an ambiguous file for binary content.
pub const SNIFF_LEN: usize = 8 * 1024;

/// Read buffer for the pre-scan of a streamed file (independent of `chunk_size`).
pub const SCAN_BUF_LEN: usize = 64 * 1024;

/// Number of shards in the classifier cache (unrelated lookups do not contend).
pub const CLASSIFIER_SHARDS: usize = 16;
