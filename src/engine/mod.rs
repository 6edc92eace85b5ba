//! Engine module: classification, chunked reading, serializers, CLI plumbing.

pub mod arg_parser;
pub mod classify;
pub mod cli;
pub mod format;
pub mod memory;
pub mod progress;
pub mod stream;
pub mod tools;

// Re-export commonly used items
pub use arg_parser::Cli;
pub use classify::{ClassifierCache, ClassifyRules, Signature, classify_signature, looks_binary};
pub use cli::{apply_cli_to_config, handle_run};
pub use format::{FormatSerializer, serializer_for};
pub use memory::{MemoryProbe, ProcessMemoryProbe};
pub use stream::{ChunkReader, Utf8ChunkDecoder, read_to_string_chunked, scan_text_shape};
pub use tools::{glob_match, path_relative_to, should_include_in_walk};
