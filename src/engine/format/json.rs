use std::io::{self, Write};

use super::{BodyKind, FormatSerializer, UnitHeader, quoted};
use crate::types::{Outcome, RunSummary};

/// `{"root": .., "files": [..], "summary": {..}}`, one object per file.
#[derive(Default)]
pub struct JsonSerializer {
    units: usize,
    in_content: bool,
}

impl JsonSerializer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FormatSerializer for JsonSerializer {
    fn document_start(&mut self, out: &mut dyn Write, root: &str) -> io::Result<()> {
        write!(out, "{{\n  \"root\": {},\n  \"files\": [", quoted(root)?)
    }

    fn unit_start(&mut self, out: &mut dyn Write, unit: &UnitHeader<'_>) -> io::Result<()> {
        if self.units > 0 {
            out.write_all(b",")?;
        }
        self.units += 1;
        write!(
            out,
            "\n    {{\"path\": {}, \"language\": {}, \"category\": \"{}\", \"size\": {}",
            quoted(unit.path)?,
            quoted(unit.language)?,
            unit.category.as_str(),
            unit.size
        )?;
        if let BodyKind::Text(_) = unit.body {
            out.write_all(b", \"content\": \"")?;
            self.in_content = true;
        }
        Ok(())
    }

    fn content(&mut self, out: &mut dyn Write, chunk: &str) -> io::Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        let escaped = quoted(chunk)?;
        // Drop the surrounding quotes; the string stays open across chunks.
        out.write_all(escaped[1..escaped.len() - 1].as_bytes())
    }

    fn unit_end(&mut self, out: &mut dyn Write, outcome: &Outcome) -> io::Result<()> {
        if self.in_content {
            out.write_all(b"\"")?;
            self.in_content = false;
        }
        write!(out, ", \"status\": \"{}\"", outcome.status())?;
        if let Some(note) = outcome.note() {
            write!(out, ", \"note\": {}", quoted(&note)?)?;
        }
        out.write_all(b"}")
    }

    fn document_end(&mut self, out: &mut dyn Write, summary: &RunSummary) -> io::Result<()> {
        if self.units > 0 {
            out.write_all(b"\n  ")?;
        }
        let summary = serde_json::to_string(summary).map_err(io::Error::other)?;
        write!(out, "],\n  \"summary\": {summary}\n}}\n")
    }
}
