//! Classifier cache: file signature → category + language tag.
//!
//! Classification is a pure function of the [`Signature`] (extension or special file name,
//! plus any per-run override / allow-list bit), so results are shared across workers and
//! across runs in the same process. The cache is sharded; each shard is a bounded LRU.

use lru::LruCache;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::engine::tools::extension_of;
use crate::types::{Category, Classification, FileDescriptor, PipelineConfig, SkipReason};
use crate::utils::config::{CLASSIFIER_SHARDS, SNIFF_LEN};

/// What a signature is keyed on.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SignatureKey {
    /// Lowercased extension without the dot (empty when none).
    Extension(String),
    /// Lowercased file name with a fixed language (Makefile, Dockerfile, ...).
    FileName(String),
}

/// Cache key. The override and allow-list bits make it a composite key when per-run rules apply,
/// so one process-wide cache stays correct across differently configured runs.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    pub key: SignatureKey,
    pub language_override: Option<Arc<str>>,
    pub binary_allowed: bool,
}

/// Per-run classification rules taken from [`PipelineConfig`].
#[derive(Clone, Debug, Default)]
pub struct ClassifyRules {
    overrides: HashMap<String, Arc<str>>,
    allow_binary: HashSet<String>,
}

impl ClassifyRules {
    pub fn from_config(config: &PipelineConfig) -> Self {
        let norm = |ext: &str| ext.trim_start_matches('.').to_ascii_lowercase();
        Self {
            overrides: config
                .language_overrides
                .iter()
                .map(|(ext, lang)| (norm(ext), Arc::from(lang.as_str())))
                .collect(),
            allow_binary: config.allow_binary.iter().map(|e| norm(e)).collect(),
        }
    }
}

impl Signature {
    pub fn for_path(path: &Path, rules: &ClassifyRules) -> Self {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        if special_file_language(&name).is_some() {
            return Signature {
                key: SignatureKey::FileName(name),
                language_override: None,
                binary_allowed: false,
            };
        }
        let ext = extension_of(path);
        Signature {
            language_override: rules.overrides.get(&ext).cloned(),
            binary_allowed: rules.allow_binary.contains(&ext),
            key: SignatureKey::Extension(ext),
        }
    }
}

/// Compute a classification from a signature. No I/O.
pub fn classify_signature(sig: &Signature) -> Classification {
    let text = |language: &str, ambiguous: bool| Classification {
        category: Category::Text,
        language: Arc::from(language),
        skip_reason: None,
        ambiguous,
    };
    let ext = match &sig.key {
        SignatureKey::FileName(name) => {
            return text(special_file_language(name).unwrap_or(""), false);
        }
        SignatureKey::Extension(ext) => ext.as_str(),
    };
    if let Some(lang) = &sig.language_override {
        return Classification {
            language: Arc::clone(lang),
            ..text("", false)
        };
    }
    let (category, reason) = if is_image_extension(ext) {
        (Category::Image, SkipReason::Image)
    } else if is_binary_extension(ext) {
        (Category::Binary, SkipReason::Binary)
    } else {
        return match language_for_extension(ext) {
            Some(lang) => text(lang, false),
            None => text("", true),
        };
    };
    if sig.binary_allowed {
        Classification {
            category,
            language: Arc::from(""),
            skip_reason: None,
            ambiguous: false,
        }
    } else {
        Classification {
            category: Category::Skip,
            language: Arc::from(""),
            skip_reason: Some(reason),
            ambiguous: false,
        }
    }
}

/// True if the leading bytes of a file look binary: any NUL, or more than 30% control bytes.
pub fn looks_binary(head: &[u8]) -> bool {
    let head = &head[..head.len().min(SNIFF_LEN)];
    if head.is_empty() {
        return false;
    }
    if head.contains(&0) {
        return true;
    }
    let control = head
        .iter()
        .filter(|&&b| b < 0x20 && !matches!(b, b'\n' | b'\r' | b'\t' | 0x0c | 0x1b))
        .count();
    control * 10 > head.len() * 3
}

type Shard = Mutex<LruCache<Signature, Classification>>;

/// Bounded, sharded memo table for [`classify_signature`].
pub struct ClassifierCache {
    shards: Vec<Shard>,
    capacity: usize,
    compute: fn(&Signature) -> Classification,
    computed: AtomicU64,
    hits: AtomicU64,
}

static SHARED_CACHE: OnceLock<Arc<ClassifierCache>> = OnceLock::new();

impl ClassifierCache {
    pub fn new(capacity: usize) -> Self {
        Self::with_classifier(capacity, classify_signature)
    }

    /// Cache over a custom classification function (e.g. an instrumented one).
    pub fn with_classifier(capacity: usize, compute: fn(&Signature) -> Classification) -> Self {
        let capacity = capacity.max(1);
        let shard_count = CLASSIFIER_SHARDS.min(capacity);
        let base = capacity / shard_count;
        let extra = capacity % shard_count;
        let shards = (0..shard_count)
            .map(|i| {
                let cap = base + usize::from(i < extra);
                let cap = NonZeroUsize::new(cap).unwrap_or(NonZeroUsize::MIN);
                Mutex::new(LruCache::new(cap))
            })
            .collect();
        Self {
            shards,
            capacity,
            compute,
            computed: AtomicU64::new(0),
            hits: AtomicU64::new(0),
        }
    }

    /// Process-wide cache, created on first use with `capacity`; later capacities are ignored.
    pub fn shared(capacity: usize) -> Arc<ClassifierCache> {
        let cache = SHARED_CACHE.get_or_init(|| Arc::new(ClassifierCache::new(capacity)));
        if cache.capacity != capacity.max(1) {
            log::debug!(
                "Classifier cache already sized at {}; ignoring requested {}",
                cache.capacity,
                capacity
            );
        }
        Arc::clone(cache)
    }

    pub fn classify(&self, desc: &FileDescriptor, rules: &ClassifyRules) -> Classification {
        self.lookup(&Signature::for_path(&desc.absolute_path, rules))
    }

    /// Cached classification for `sig`, computing and inserting it on a miss.
    pub fn lookup(&self, sig: &Signature) -> Classification {
        let mut shard = self.shards[self.shard_index(sig)]
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(hit) = shard.get(sig) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return hit.clone();
        }
        let result = (self.compute)(sig);
        self.computed.fetch_add(1, Ordering::Relaxed);
        shard.put(sig.clone(), result.clone());
        result
    }

    fn shard_index(&self, sig: &Signature) -> usize {
        let mut hasher = DefaultHasher::new();
        sig.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }

    /// Entries currently held across all shards.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of times the classification function ran (cache misses).
    pub fn misses(&self) -> u64 {
        self.computed.load(Ordering::Relaxed)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

/// Language tag for files recognised by name alone.
pub fn special_file_language(lower_name: &str) -> Option<&'static str> {
    let lang = match lower_name {
        "makefile" | "gnumakefile" => "makefile",
        "dockerfile" | "containerfile" => "dockerfile",
        "cmakelists.txt" => "cmake",
        "gemfile" | "rakefile" | "podfile" => "ruby",
        "justfile" => "just",
        "vagrantfile" => "ruby",
        "jenkinsfile" => "groovy",
        ".gitignore" | ".dockerignore" | ".gitattributes" => "gitignore",
        ".editorconfig" => "ini",
        _ => return None,
    };
    Some(lang)
}

/// Language tag for a known text extension.
pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    let lang = match ext {
        "rs" => "rust",
        "go" => "go",
        "py" | "pyi" => "python",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "jsx",
        "ts" | "mts" | "cts" => "typescript",
        "tsx" => "tsx",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "scala" => "scala",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" | "hh" | "hxx" => "cpp",
        "cs" => "csharp",
        "swift" => "swift",
        "m" | "mm" => "objectivec",
        "rb" => "ruby",
        "php" => "php",
        "pl" | "pm" => "perl",
        "lua" => "lua",
        "r" => "r",
        "dart" => "dart",
        "ex" | "exs" => "elixir",
        "erl" | "hrl" => "erlang",
        "hs" => "haskell",
        "ml" | "mli" => "ocaml",
        "clj" | "cljs" | "edn" => "clojure",
        "zig" => "zig",
        "nim" => "nim",
        "sh" | "bash" | "zsh" => "bash",
        "fish" => "fish",
        "ps1" => "powershell",
        "sql" => "sql",
        "html" | "htm" => "html",
        "css" => "css",
        "scss" | "sass" => "scss",
        "vue" => "vue",
        "svelte" => "svelte",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "xml" => "xml",
        "ini" | "cfg" => "ini",
        "md" | "markdown" => "markdown",
        "rst" => "rst",
        "tex" => "latex",
        "proto" => "protobuf",
        "graphql" | "gql" => "graphql",
        "tf" | "hcl" => "hcl",
        "txt" | "log" | "csv" | "tsv" => "text",
        _ => return None,
    };
    Some(lang)
}

pub fn is_image_extension(ext: &str) -> bool {
    matches!(
        ext,
        "png" | "jpg" | "jpeg" | "gif" | "bmp" | "ico" | "webp" | "tif" | "tiff" | "svg" | "heic"
            | "avif" | "psd"
    )
}

pub fn is_binary_extension(ext: &str) -> bool {
    matches!(
        ext,
        "exe" | "dll" | "so" | "dylib" | "a" | "lib" | "o" | "obj" | "bin" | "class" | "jar"
            | "war" | "pyc" | "pyo" | "wasm" | "zip" | "gz" | "tgz" | "bz2" | "xz" | "7z"
            | "rar" | "tar" | "zst" | "pdf" | "doc" | "docx" | "xls" | "xlsx" | "ppt"
            | "pptx" | "mp3" | "mp4" | "wav" | "flac" | "ogg" | "avi" | "mov" | "mkv"
            | "ttf" | "otf" | "woff" | "woff2" | "eot" | "db" | "sqlite" | "dat" | "iso"
            | "dmg"
    )
}
