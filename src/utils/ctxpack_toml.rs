//! Load `.ctxpack.toml` from the root directory (CLI only). The library takes a
//! [`PipelineConfig`] directly.
//!
//! ```toml
//! [settings]
//! format = "json"
//! max_file_size = 1048576
//! exclude = ["*.lock"]
//!
//! [settings.language_overrides]
//! tpl = "html"
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::types::{MemoryPolicy, OutputFormat, OutputOrder, PipelineConfig};
use crate::utils::config::PackagePaths;

#[derive(Debug, Default, Deserialize)]
pub struct CtxpackToml {
    #[serde(default)]
    settings: SettingsSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SettingsSection {
    output: Option<String>,
    verbose: Option<bool>,
    progress: Option<bool>,
    format: Option<OutputFormat>,
    order: Option<OutputOrder>,
    concurrency: Option<usize>,
    ignore_dirs: Option<Vec<String>>,
    exclude: Option<Vec<String>>,
    include_extensions: Option<Vec<String>>,
    respect_gitignore: Option<bool>,
    strict: Option<bool>,
    max_files: Option<usize>,
    max_total_size: Option<u64>,
    max_file_size: Option<u64>,
    file_timeout_ms: Option<u64>,
    timeout_ms: Option<u64>,
    memory_limit: Option<u64>,
    memory_check_interval: Option<usize>,
    memory_policy: Option<MemoryPolicy>,
    memory_hysteresis: Option<f64>,
    task_queue_capacity: Option<usize>,
    write_queue_capacity: Option<usize>,
    stream_threshold: Option<u64>,
    chunk_size: Option<usize>,
    cache_capacity: Option<usize>,
    language_overrides: Option<BTreeMap<String, String>>,
    allow_binary: Option<Vec<String>>,
}

impl CtxpackToml {
    /// Output file from the config, resolved against `dir`.
    pub fn output(&self, dir: &Path) -> Option<PathBuf> {
        self.settings.output.as_ref().map(|p| dir.join(p))
    }

    pub fn verbose(&self) -> Option<bool> {
        self.settings.verbose
    }

    pub fn progress(&self) -> Option<bool> {
        self.settings.progress
    }
}

/// Parse config text. Errors name the offending key.
pub fn parse_ctxpack_toml(s: &str) -> Result<CtxpackToml, toml::de::Error> {
    toml::from_str(s)
}

/// Load `.ctxpack.toml` from `dir` if present. Returns None if the file is missing or invalid
/// (invalid files are reported as a warning).
pub fn load_ctxpack_toml(dir: &Path) -> Option<CtxpackToml> {
    let path = dir.join(PackagePaths::get().config_filename());
    let s = std::fs::read_to_string(&path).ok()?;
    parse_ctxpack_toml(&s)
        .map_err(|e| log::warn!("{}: {}", path.display(), e))
        .ok()
}

/// Overwrite config field from file when present.
macro_rules! apply_file_opt {
    ($file:expr, $config:expr, $($field:ident),+ $(,)?) => {
        $(
            if let Some(v) = $file.$field.clone() {
                $config.$field = v;
            }
        )+
    };
}

/// Apply file settings to `config` (only fields present in the file). Call before applying CLI.
pub fn apply_file_to_config(file: &CtxpackToml, config: &mut PipelineConfig) {
    let s = &file.settings;
    apply_file_opt!(
        s,
        config,
        format,
        order,
        concurrency,
        ignore_dirs,
        exclude,
        include_extensions,
        respect_gitignore,
        strict,
        max_files,
        max_total_size,
        max_file_size,
        file_timeout_ms,
        memory_check_interval,
        memory_policy,
        memory_hysteresis,
        task_queue_capacity,
        write_queue_capacity,
        stream_threshold,
        chunk_size,
        cache_capacity,
        language_overrides,
        allow_binary,
    );
    if s.timeout_ms.is_some() {
        config.timeout_ms = s.timeout_ms;
    }
    if s.memory_limit.is_some() {
        config.memory_limit = s.memory_limit;
    }
}
