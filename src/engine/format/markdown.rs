use std::io::{self, Write};

use super::{BodyKind, FormatSerializer, TextShape, UnitHeader};
use crate::types::{Outcome, RunSummary};

const MIN_FENCE_LEN: usize = 3;

/// Longest run of consecutive backticks in `s`.
pub fn longest_backtick_run(s: &str) -> usize {
    TextShape::of(s).longest_backtick_run
}

/// `## path` heading per file, content in a fenced block tagged with the language.
#[derive(Default)]
pub struct MarkdownSerializer {
    fence: Option<String>,
    ends_with_newline: bool,
}

impl MarkdownSerializer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FormatSerializer for MarkdownSerializer {
    fn document_start(&mut self, out: &mut dyn Write, root: &str) -> io::Result<()> {
        write!(out, "# {root}\n\n")
    }

    fn unit_start(&mut self, out: &mut dyn Write, unit: &UnitHeader<'_>) -> io::Result<()> {
        write!(out, "## {}\n\n", unit.path)?;
        match unit.body {
            BodyKind::Text(shape) => {
                let fence = "`".repeat((shape.longest_backtick_run + 1).max(MIN_FENCE_LEN));
                writeln!(out, "{fence}{}", unit.language)?;
                self.fence = Some(fence);
                self.ends_with_newline = true;
            }
            BodyKind::Metadata => {
                write!(
                    out,
                    "_{} file, {} bytes_\n\n",
                    unit.category.as_str(),
                    unit.size
                )?;
            }
            BodyKind::None => {}
        }
        Ok(())
    }

    fn content(&mut self, out: &mut dyn Write, chunk: &str) -> io::Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        out.write_all(chunk.as_bytes())?;
        self.ends_with_newline = chunk.ends_with('\n');
        Ok(())
    }

    fn unit_end(&mut self, out: &mut dyn Write, outcome: &Outcome) -> io::Result<()> {
        if let Some(fence) = self.fence.take() {
            if !self.ends_with_newline {
                out.write_all(b"\n")?;
            }
            write!(out, "{fence}\n\n")?;
        }
        if let Some(note) = outcome.note() {
            write!(out, "> **{}**: {}\n\n", outcome.status(), note)?;
        }
        Ok(())
    }

    fn document_end(&mut self, out: &mut dyn Write, summary: &RunSummary) -> io::Result<()> {
        write!(
            out,
            "---\n\n**Summary:** {} discovered, {} processed, {} skipped, {} errored, {} abandoned\n",
            summary.discovered,
            summary.processed,
            summary.skipped,
            summary.errored,
            summary.abandoned
        )
    }
}
