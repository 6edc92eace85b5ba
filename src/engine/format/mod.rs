//! Output document serializers (markdown, JSON, YAML).
//!
//! The writer drives a serializer unit by unit: `unit_start`, zero or more `content` chunks,
//! then `unit_end`. Content arrives in chunks so large files are escaped incrementally.

mod json;
mod markdown;
mod yaml;

pub use json::JsonSerializer;
pub use markdown::{MarkdownSerializer, longest_backtick_run};
pub use yaml::YamlSerializer;

use std::io::{self, Write};

use crate::types::{Category, Outcome, OutputFormat, RunSummary};

/// Facts about a text body that a serializer must know before the first chunk: the markdown
/// fence has to outrun every backtick run and the YAML block scalar picks its chomping.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TextShape {
    pub longest_backtick_run: usize,
    pub ends_with_newline: bool,
}

impl TextShape {
    pub fn of(text: &str) -> Self {
        let mut scanner = TextShapeScanner::default();
        scanner.feed(text.as_bytes());
        scanner.finish()
    }
}

/// Builds a [`TextShape`] from bytes fed in chunks. Backtick and newline are single bytes in
/// UTF-8, so raw bytes give the same answer as the decoded text.
#[derive(Debug, Default)]
pub struct TextShapeScanner {
    shape: TextShape,
    run: usize,
}

impl TextShapeScanner {
    pub fn feed(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if b == b'`' {
                self.run += 1;
                self.shape.longest_backtick_run = self.shape.longest_backtick_run.max(self.run);
            } else {
                self.run = 0;
            }
        }
        if let Some(&last) = bytes.last() {
            self.shape.ends_with_newline = last == b'\n';
        }
    }

    pub fn finish(self) -> TextShape {
        self.shape
    }
}

/// Shape of a unit's body, known before any content is written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BodyKind {
    /// Text follows.
    Text(TextShape),
    /// Allowed binary/image: category and size only.
    Metadata,
    /// No body (skipped or errored).
    None,
}

/// Per-unit fields every format renders.
#[derive(Clone, Copy, Debug)]
pub struct UnitHeader<'a> {
    pub path: &'a str,
    pub language: &'a str,
    pub category: Category,
    pub size: u64,
    pub body: BodyKind,
}

/// Format-specific rendering of the document. Implementations keep whatever state they need
/// between calls (open string, fence, first-element separators).
pub trait FormatSerializer: Send {
    fn document_start(&mut self, out: &mut dyn Write, root: &str) -> io::Result<()>;

    fn unit_start(&mut self, out: &mut dyn Write, unit: &UnitHeader<'_>) -> io::Result<()>;

    /// One decoded chunk of the current unit's text body.
    fn content(&mut self, out: &mut dyn Write, chunk: &str) -> io::Result<()>;

    /// Close the current unit. `outcome` is final (a streamed body may have been truncated).
    fn unit_end(&mut self, out: &mut dyn Write, outcome: &Outcome) -> io::Result<()>;

    fn document_end(&mut self, out: &mut dyn Write, summary: &RunSummary) -> io::Result<()>;
}

/// Serializer for `format`.
pub fn serializer_for(format: OutputFormat) -> Box<dyn FormatSerializer> {
    match format {
        OutputFormat::Markdown => Box::new(MarkdownSerializer::new()),
        OutputFormat::Json => Box::new(JsonSerializer::new()),
        OutputFormat::Yaml => Box::new(YamlSerializer::new()),
    }
}

/// JSON string literal (quotes included). Also a valid YAML double-quoted scalar.
pub(crate) fn quoted(s: &str) -> io::Result<String> {
    serde_json::to_string(s).map_err(io::Error::other)
}
