//! Writer: the single owner of the output sink.
//!
//! Drains the write queue until every producer has dropped its sender, renders each unit
//! through the configured serializer and always closes the document (summary + flush), also
//! after cancellation. In traversal order, units are held in a reorder buffer keyed by
//! sequence number until their predecessors arrive.

use crossbeam_channel::Receiver;
use log::{debug, error};
use std::collections::BTreeMap;
use std::io::{self, BufWriter, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::engine::format::{BodyKind, FormatSerializer, TextShape, UnitHeader, serializer_for};
use crate::engine::stream::{ChunkError, ChunkReader};
use crate::error::{CancelReason, PipelineError};
use crate::types::{
    Content, Outcome, OutcomeKind, OutputOrder, RunSummary, SkipReason, StreamHandle, WriteUnit,
};

use super::backpressure::BackpressureController;
use super::context::{CancelToken, PipelineContext};
use super::state::MetricsSink;

/// Counts bytes that reach the underlying sink.
pub struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Per-outcome counts from the writer plus its terminal result.
#[derive(Debug, Default)]
pub struct WriterReport {
    pub processed: usize,
    pub skipped: usize,
    pub errored: usize,
    /// Of `skipped`, shed under memory pressure.
    pub shed: usize,
    pub bytes_written: u64,
    /// Set only for sink failures.
    pub error: Option<PipelineError>,
}

impl WriterReport {
    fn written(&self) -> usize {
        self.processed + self.skipped + self.errored
    }
}

pub struct Writer {
    out: BufWriter<CountingWriter<Box<dyn Write + Send>>>,
    serializer: Box<dyn FormatSerializer>,
    order: OutputOrder,
    reorder: BTreeMap<u64, WriteUnit>,
    next_seq: u64,
    report: WriterReport,
    root_label: String,
    discovered: usize,
    walk_warnings: usize,
    chunk_size: usize,
    file_timeout: Duration,
    file_timeout_ms: u64,
    cancel: CancelToken,
    controller: Arc<BackpressureController>,
    metrics: Arc<dyn MetricsSink>,
}

impl Writer {
    pub fn new(
        sink: Box<dyn Write + Send>,
        ctx: &PipelineContext,
        controller: Arc<BackpressureController>,
        metrics: Arc<dyn MetricsSink>,
        discovered: usize,
        walk_warnings: usize,
    ) -> Self {
        let config = &ctx.config;
        Self {
            out: BufWriter::new(CountingWriter::new(sink)),
            serializer: serializer_for(config.format),
            order: config.order,
            reorder: BTreeMap::new(),
            next_seq: 0,
            report: WriterReport::default(),
            root_label: ctx.root_label(),
            discovered,
            walk_warnings,
            chunk_size: config.chunk_size,
            file_timeout: config.file_timeout(),
            file_timeout_ms: config.file_timeout_ms,
            cancel: ctx.cancel.clone(),
            controller,
            metrics,
        }
    }

    /// Drain `write_rx` to completion. On a sink failure the run is cancelled and the
    /// remaining units are dropped.
    pub fn run(mut self, write_rx: Receiver<WriteUnit>) -> WriterReport {
        let result = self.drain(&write_rx);
        if let Err(e) = &result {
            error!("Output write failed: {}", e);
            self.cancel.cancel(CancelReason::SinkFailure);
        }
        self.report.bytes_written = self.out.get_ref().bytes_written();
        self.report.error = result.err();
        self.report
    }

    fn drain(&mut self, write_rx: &Receiver<WriteUnit>) -> Result<(), PipelineError> {
        self.serializer.document_start(&mut self.out, &self.root_label)?;
        for unit in write_rx.iter() {
            self.controller.record_write_done();
            self.accept(unit)?;
        }
        // Gaps left by abandoned files: emit whatever is still buffered, in order.
        if !self.reorder.is_empty() {
            debug!("Flushing {} out-of-order units", self.reorder.len());
        }
        for (_, unit) in std::mem::take(&mut self.reorder) {
            self.emit(unit)?;
        }
        let summary = self.document_summary();
        self.serializer.document_end(&mut self.out, &summary)?;
        self.out.flush()?;
        Ok(())
    }

    fn accept(&mut self, unit: WriteUnit) -> Result<(), PipelineError> {
        match self.order {
            OutputOrder::Completion => self.emit(unit),
            OutputOrder::Traversal => {
                self.reorder.insert(unit.seq, unit);
                while let Some(unit) = self.reorder.remove(&self.next_seq) {
                    self.next_seq += 1;
                    self.emit(unit)?;
                }
                Ok(())
            }
        }
    }

    fn emit(&mut self, unit: WriteUnit) -> Result<(), PipelineError> {
        let WriteUnit {
            relative_path,
            language,
            category,
            size_bytes,
            content,
            outcome,
            ..
        } = unit;
        let body = match &content {
            Content::Inline(text) => BodyKind::Text(TextShape::of(text)),
            Content::Stream(handle) => BodyKind::Text(handle.shape),
            Content::Metadata => BodyKind::Metadata,
            Content::Empty => BodyKind::None,
        };
        let header = UnitHeader {
            path: &relative_path,
            language: &language,
            category,
            size: size_bytes,
            body,
        };
        self.serializer.unit_start(&mut self.out, &header)?;
        let outcome = match content {
            Content::Inline(text) => {
                self.serializer.content(&mut self.out, &text)?;
                outcome
            }
            Content::Stream(handle) => self.stream_body(handle)?,
            Content::Metadata | Content::Empty => outcome,
        };
        self.serializer.unit_end(&mut self.out, &outcome)?;

        let kind = outcome.kind();
        match kind {
            OutcomeKind::Processed => self.report.processed += 1,
            OutcomeKind::Skipped => self.report.skipped += 1,
            OutcomeKind::Errored => self.report.errored += 1,
        }
        if outcome == Outcome::Skipped(SkipReason::MemoryPressure) {
            self.report.shed += 1;
        } else {
            self.controller.record_unit_emitted();
        }
        self.metrics.file_finished(&relative_path, kind);
        Ok(())
    }

    /// Copy a large file into the document chunk by chunk. A timeout, cancellation or read
    /// error truncates the body and turns the outcome into an error note.
    fn stream_body(&mut self, handle: StreamHandle) -> Result<Outcome, PipelineError> {
        let deadline = Instant::now() + self.file_timeout;
        let mut reader = ChunkReader::new(handle.file, self.chunk_size, Some(deadline));
        loop {
            let cause = match reader.next_chunk(&self.cancel) {
                Ok(Some(chunk)) => {
                    self.serializer.content(&mut self.out, &chunk)?;
                    continue;
                }
                Ok(None) => return Ok(Outcome::Success),
                Err(ChunkError::TimedOut) => {
                    format!("timed out after {} ms", self.file_timeout_ms)
                }
                Err(ChunkError::Cancelled) => "run cancelled".to_string(),
                Err(ChunkError::Io(e)) => format!("read failed: {e}"),
            };
            debug!(
                "Truncated {} after {} bytes: {}",
                handle.path.display(),
                reader.bytes_read(),
                cause
            );
            return Ok(Outcome::Error(format!(
                "truncated after {} bytes: {}",
                reader.bytes_read(),
                cause
            )));
        }
    }

    /// Summary written into the document footer.
    fn document_summary(&self) -> RunSummary {
        let written = self.report.written();
        RunSummary {
            discovered: self.discovered,
            dispatched: self.controller.snapshot().admitted,
            processed: self.report.processed,
            skipped: self.report.skipped,
            errored: self.report.errored,
            abandoned: self.discovered.saturating_sub(written),
            shed: self.report.shed,
            bytes_written: self.out.get_ref().bytes_written(),
            walk_warnings: self.walk_warnings,
        }
    }
}

/// Run the writer on its own thread.
pub fn spawn_writer(writer: Writer, write_rx: Receiver<WriteUnit>) -> JoinHandle<WriterReport> {
    thread::spawn(move || writer.run(write_rx))
}
