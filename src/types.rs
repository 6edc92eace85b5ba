//! Public and internal types for the ctxpack API and pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::format::TextShape;
use crate::error::PipelineError;
use crate::utils::config::{DEFAULT_IGNORE_DIRS, Defaults};

/// One candidate file found by the walk. Immutable; consumed by exactly one worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileDescriptor {
    /// Position in traversal order (0-based). Used by the writer's reordering buffer.
    pub seq: u64,
    pub absolute_path: PathBuf,
    /// Path relative to the root, `/`-separated.
    pub relative_path: String,
    pub size_bytes: u64,
}

/// Content category of a file, derived from its name (and a sniff when ambiguous).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Text,
    Binary,
    Image,
    Skip,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Text => "text",
            Category::Binary => "binary",
            Category::Image => "image",
            Category::Skip => "skip",
        }
    }
}

/// Result of classifying a file signature. Cheap to clone (language tag is shared).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Classification {
    pub category: Category,
    /// Fence / language tag (`rust`, `go`, ...). Empty when unknown.
    pub language: Arc<str>,
    /// Set when `category == Skip`.
    pub skip_reason: Option<SkipReason>,
    /// Unknown extension: the worker sniffs the first bytes before trusting `Text`.
    pub ambiguous: bool,
}

/// Why a file's content is left out of the document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// Above the per-file size ceiling.
    TooLarge { size: u64, limit: u64 },
    /// Binary extension not in the allow-list.
    Binary,
    /// Image extension not in the allow-list.
    Image,
    /// Unknown extension whose first bytes look binary.
    BinaryContent,
    /// Shed by the back-pressure controller while over the memory ceiling.
    MemoryPressure,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::TooLarge { size, limit } => {
                write!(f, "file too large ({size} bytes, limit {limit})")
            }
            SkipReason::Binary => f.write_str("binary file"),
            SkipReason::Image => f.write_str("image file"),
            SkipReason::BinaryContent => f.write_str("binary content detected"),
            SkipReason::MemoryPressure => f.write_str("skipped under memory pressure"),
        }
    }
}

/// Per-file processing result carried by a [`WriteUnit`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Skipped(SkipReason),
    /// Read failure or per-file timeout; the text is the cause shown in the document.
    Error(String),
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Success => OutcomeKind::Processed,
            Outcome::Skipped(_) => OutcomeKind::Skipped,
            Outcome::Error(_) => OutcomeKind::Errored,
        }
    }

    /// Status word used by the serializers.
    pub fn status(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Skipped(_) => "skipped",
            Outcome::Error(_) => "error",
        }
    }

    /// Human-readable note for non-success outcomes.
    pub fn note(&self) -> Option<String> {
        match self {
            Outcome::Success => None,
            Outcome::Skipped(reason) => Some(reason.to_string()),
            Outcome::Error(cause) => Some(cause.clone()),
        }
    }
}

/// Counter bucket for an [`Outcome`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutcomeKind {
    Processed,
    Skipped,
    Errored,
}

/// Opened large file handed from a worker to the writer, which reads it in chunks.
#[derive(Debug)]
pub struct StreamHandle {
    pub file: File,
    pub path: PathBuf,
    /// Scanned by the worker before hand-off; serializers need it before the first chunk.
    pub shape: TextShape,
}

/// What the writer emits as a unit's body.
#[derive(Debug)]
pub enum Content {
    /// Small text file read in full by the worker.
    Inline(String),
    /// Large text file; streamed by the writer.
    Stream(StreamHandle),
    /// Allowed binary/image: category and size only.
    Metadata,
    /// Skipped or errored: the outcome note stands in for content.
    Empty,
}

/// One processed file's contribution to the output document.
#[derive(Debug)]
pub struct WriteUnit {
    pub seq: u64,
    pub relative_path: String,
    pub language: Arc<str>,
    pub category: Category,
    pub size_bytes: u64,
    pub content: Content,
    pub outcome: Outcome,
}

impl WriteUnit {
    /// A unit carrying no content (skip or error).
    pub fn without_content(
        desc: &FileDescriptor,
        language: Arc<str>,
        category: Category,
        outcome: Outcome,
    ) -> Self {
        Self {
            seq: desc.seq,
            relative_path: desc.relative_path.clone(),
            language,
            category,
            size_bytes: desc.size_bytes,
            content: Content::Empty,
            outcome,
        }
    }
}

/// Per-outcome counts for a run. Always satisfies
/// `processed + skipped + errored + abandoned == discovered`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Files that passed the walk filters.
    pub discovered: usize,
    /// Files admitted into the task queue.
    pub dispatched: usize,
    /// Written with content (or metadata for allowed binaries).
    pub processed: usize,
    /// Written as a skip note.
    pub skipped: usize,
    /// Written as an error note.
    pub errored: usize,
    /// Never written (cancelled before or during processing).
    pub abandoned: usize,
    /// Of `skipped`, how many were shed by the memory ceiling.
    pub shed: usize,
    /// Bytes written to the sink.
    pub bytes_written: u64,
    /// Walk errors downgraded to warnings (permission denied, etc.).
    pub walk_warnings: usize,
}

impl RunSummary {
    /// Nothing was written; every discovered file counts as abandoned.
    pub fn abandoned_all(discovered: usize) -> Self {
        Self {
            discovered,
            abandoned: discovered,
            ..Self::default()
        }
    }

    /// Files accounted for in the output document.
    pub fn written(&self) -> usize {
        self.processed + self.skipped + self.errored
    }
}

/// Output document format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Markdown,
    Json,
    Yaml,
}

/// Order of units in the output document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputOrder {
    /// Units appear as workers finish them (no ordering guarantee).
    #[default]
    Completion,
    /// Units appear in walk order; out-of-order completions are buffered.
    Traversal,
}

/// What the back-pressure controller does once the memory ceiling is exceeded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum MemoryPolicy {
    /// Stop admitting until usage drops below the hysteresis threshold.
    #[default]
    Pause,
    /// Skip the largest remaining candidates until usage drops.
    ShedLargest,
}

/// All ceilings and tunables for a run. Loaded from `.ctxpack.toml` and CLI flags,
/// checked with [`PipelineConfig::validate`] before the run starts.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Worker count; 0 = all available threads (capped by the FD limit).
    pub concurrency: usize,
    /// Directory names never descended into.
    pub ignore_dirs: Vec<String>,
    /// Exclude patterns (glob syntax, matched against file name and full path).
    pub exclude: Vec<String>,
    /// When non-empty, only these extensions (without dot) are collected.
    pub include_extensions: Vec<String>,
    /// Honour `.gitignore` / `.ignore` files.
    pub respect_gitignore: bool,
    /// Fail the run on the first walk error instead of warning.
    pub strict: bool,
    pub max_files: usize,
    pub max_total_size: u64,
    pub max_file_size: u64,
    pub file_timeout_ms: u64,
    /// Whole-run timeout, armed when dispatch begins.
    pub timeout_ms: Option<u64>,
    /// Process memory ceiling in bytes; `None` disables the memory check.
    pub memory_limit: Option<u64>,
    /// Sample process memory every K admissions.
    pub memory_check_interval: usize,
    pub memory_policy: MemoryPolicy,
    /// Resume admission below `memory_limit * memory_hysteresis`.
    pub memory_hysteresis: f64,
    pub task_queue_capacity: usize,
    pub write_queue_capacity: usize,
    pub stream_threshold: u64,
    pub chunk_size: usize,
    pub format: OutputFormat,
    pub order: OutputOrder,
    pub cache_capacity: usize,
    /// Extension → language tag overrides.
    pub language_overrides: BTreeMap<String, String>,
    /// Binary/image extensions listed with metadata instead of being skipped.
    pub allow_binary: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 0,
            ignore_dirs: DEFAULT_IGNORE_DIRS.iter().map(|s| s.to_string()).collect(),
            exclude: Vec::new(),
            include_extensions: Vec::new(),
            respect_gitignore: true,
            strict: false,
            max_files: Defaults::MAX_FILES,
            max_total_size: Defaults::MAX_TOTAL_SIZE,
            max_file_size: Defaults::MAX_FILE_SIZE,
            file_timeout_ms: Defaults::FILE_TIMEOUT_MS,
            timeout_ms: None,
            memory_limit: None,
            memory_check_interval: Defaults::MEMORY_CHECK_INTERVAL,
            memory_policy: MemoryPolicy::default(),
            memory_hysteresis: Defaults::MEMORY_HYSTERESIS,
            task_queue_capacity: Defaults::TASK_QUEUE_CAPACITY,
            write_queue_capacity: Defaults::WRITE_QUEUE_CAPACITY,
            stream_threshold: Defaults::STREAM_THRESHOLD,
            chunk_size: Defaults::CHUNK_SIZE,
            format: OutputFormat::default(),
            order: OutputOrder::default(),
            cache_capacity: Defaults::CACHE_CAPACITY,
            language_overrides: BTreeMap::new(),
            allow_binary: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn file_timeout(&self) -> Duration {
        Duration::from_millis(self.file_timeout_ms)
    }

    pub fn overall_timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |msg: &str| Err(PipelineError::Validation(msg.to_string()));
        if self.task_queue_capacity == 0 {
            return invalid("task_queue_capacity must be at least 1");
        }
        if self.write_queue_capacity == 0 {
            return invalid("write_queue_capacity must be at least 1");
        }
        if self.chunk_size == 0 {
            return invalid("chunk_size must be at least 1");
        }
        if self.max_files == 0 {
            return invalid("max_files must be at least 1");
        }
        if self.memory_check_interval == 0 {
            return invalid("memory_check_interval must be at least 1");
        }
        if self.cache_capacity == 0 {
            return invalid("cache_capacity must be at least 1");
        }
        if !(self.memory_hysteresis > 0.0 && self.memory_hysteresis <= 1.0) {
            return invalid("memory_hysteresis must be in (0, 1]");
        }
        if self.file_timeout_ms == 0 {
            return invalid("file_timeout_ms must be at least 1");
        }
        if self.memory_limit == Some(0) {
            return invalid("memory_limit must be positive when set");
        }
        Ok(())
    }
}
