use std::io::{self, Write};

use super::{BodyKind, FormatSerializer, UnitHeader, quoted};
use crate::types::{Outcome, RunSummary};

/// Indentation of block-literal content lines (`content: |2+` under a list item at 4).
const CONTENT_INDENT: &str = "      ";

/// `root`, a `files` list with block-literal content, and a `summary` mapping.
pub struct YamlSerializer {
    units: usize,
    in_content: bool,
    at_line_start: bool,
}

impl YamlSerializer {
    pub fn new() -> Self {
        Self {
            units: 0,
            in_content: false,
            at_line_start: true,
        }
    }
}

impl Default for YamlSerializer {
    fn default() -> Self {
        Self::new()
    }
}

/// Characters YAML does not allow in a block scalar are replaced. `\r` is dropped (YAML
/// normalizes line breaks anyway) and Unicode line/paragraph separators, which YAML would
/// read as line breaks, are replaced.
fn yaml_safe(c: char) -> Option<char> {
    match c {
        '\r' => None,
        '\t' | '\n' => Some(c),
        c if c.is_control() || matches!(c, '\u{feff}' | '\u{2028}' | '\u{2029}') => {
            Some(char::REPLACEMENT_CHARACTER)
        }
        c => Some(c),
    }
}

impl FormatSerializer for YamlSerializer {
    fn document_start(&mut self, out: &mut dyn Write, root: &str) -> io::Result<()> {
        writeln!(out, "root: {}", quoted(root)?)
    }

    fn unit_start(&mut self, out: &mut dyn Write, unit: &UnitHeader<'_>) -> io::Result<()> {
        if self.units == 0 {
            out.write_all(b"files:\n")?;
        }
        self.units += 1;
        write!(
            out,
            "  - path: {}\n    language: {}\n    category: {}\n    size: {}\n",
            quoted(unit.path)?,
            quoted(unit.language)?,
            unit.category.as_str(),
            unit.size
        )?;
        if let BodyKind::Text(shape) = unit.body {
            // Keep every trailing newline, or strip the one line break added to close the
            // last line when the text has none.
            let chomp = if shape.ends_with_newline { '+' } else { '-' };
            writeln!(out, "    content: |2{chomp}")?;
            self.in_content = true;
            self.at_line_start = true;
        }
        Ok(())
    }

    fn content(&mut self, out: &mut dyn Write, chunk: &str) -> io::Result<()> {
        let mut line = String::new();
        for segment in chunk.split_inclusive('\n') {
            line.clear();
            if self.at_line_start && segment != "\n" {
                line.push_str(CONTENT_INDENT);
            }
            line.extend(segment.chars().filter_map(yaml_safe));
            out.write_all(line.as_bytes())?;
            self.at_line_start = segment.ends_with('\n');
        }
        Ok(())
    }

    fn unit_end(&mut self, out: &mut dyn Write, outcome: &Outcome) -> io::Result<()> {
        if self.in_content {
            if !self.at_line_start {
                out.write_all(b"\n")?;
            }
            self.in_content = false;
            self.at_line_start = true;
        }
        writeln!(out, "    status: {}", outcome.status())?;
        if let Some(note) = outcome.note() {
            writeln!(out, "    note: {}", quoted(&note)?)?;
        }
        Ok(())
    }

    fn document_end(&mut self, out: &mut dyn Write, summary: &RunSummary) -> io::Result<()> {
        if self.units == 0 {
            out.write_all(b"files: []\n")?;
        }
        let body = serde_yaml_ng::to_string(summary).map_err(io::Error::other)?;
        out.write_all(b"summary:\n")?;
        for line in body.lines() {
            writeln!(out, "  {line}")?;
        }
        Ok(())
    }
}
