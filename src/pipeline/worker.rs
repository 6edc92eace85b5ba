//! Worker pool: classify each claimed file and turn it into a write unit for the writer.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::engine::classify::{ClassifierCache, looks_binary};
use crate::engine::stream::{ChunkError, read_to_string_chunked, scan_text_shape};
use crate::error::PipelineError;
use crate::types::{
    Category, Classification, Content, FileDescriptor, Outcome, SkipReason, StreamHandle,
    WriteUnit,
};
use crate::utils::config::{CANCEL_POLL_INTERVAL, SNIFF_LEN};

use super::backpressure::BackpressureController;
use super::context::PipelineContext;

/// What every worker shares: run context, classifier cache and the back-pressure gauge.
pub struct WorkerShared {
    pub ctx: Arc<PipelineContext>,
    pub cache: Arc<ClassifierCache>,
    pub controller: Arc<BackpressureController>,
}

/// Single worker: claim tasks from task_rx, turn each into a write unit, send on write_tx.
/// Stops on cancellation or when the task queue is closed and empty.
fn worker_loop(
    task_rx: Receiver<FileDescriptor>,
    write_tx: Sender<WriteUnit>,
    shared: Arc<WorkerShared>,
) {
    let cancel = &shared.ctx.cancel;
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let desc = match task_rx.recv_timeout(CANCEL_POLL_INTERVAL) {
            Ok(desc) => desc,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        shared.controller.record_file_start();
        let unit = process_file(&desc, &shared);
        shared.controller.record_file_done();
        // `None`: abandoned mid-read because the run was cancelled.
        let Some(unit) = unit else { break };
        shared.controller.record_write_queued();
        if write_tx.send(unit).is_err() {
            shared.controller.record_write_done();
            break;
        }
    }
    drop(write_tx);
}

/// Spawn `num_workers` workers. Caller must drop its own write sender so the writer sees the
/// queue close once the workers exit.
pub fn spawn_workers(
    task_rx: Receiver<FileDescriptor>,
    write_tx: &Sender<WriteUnit>,
    shared: &Arc<WorkerShared>,
    num_workers: usize,
) -> Vec<JoinHandle<()>> {
    (0..num_workers)
        .map(|_| {
            let task_rx = task_rx.clone();
            let write_tx = write_tx.clone();
            let shared = Arc::clone(shared);
            thread::spawn(move || worker_loop(task_rx, write_tx, shared))
        })
        .collect()
}

/// Turn one file into a write unit. Per-file failures become [`Outcome::Error`]; returns
/// `None` only when cancellation interrupted the read.
pub fn process_file(desc: &FileDescriptor, shared: &WorkerShared) -> Option<WriteUnit> {
    let config = &shared.ctx.config;
    if desc.size_bytes > config.max_file_size {
        return Some(WriteUnit::without_content(
            desc,
            Arc::from(""),
            Category::Skip,
            Outcome::Skipped(SkipReason::TooLarge {
                size: desc.size_bytes,
                limit: config.max_file_size,
            }),
        ));
    }
    let class = shared.cache.classify(desc, &shared.ctx.rules);
    match class.category {
        Category::Skip => Some(WriteUnit::without_content(
            desc,
            class.language,
            Category::Skip,
            Outcome::Skipped(class.skip_reason.unwrap_or(SkipReason::Binary)),
        )),
        Category::Binary | Category::Image => Some(WriteUnit {
            content: Content::Metadata,
            ..WriteUnit::without_content(desc, class.language, class.category, Outcome::Success)
        }),
        Category::Text => read_text(desc, class, shared),
    }
}

fn read_text(
    desc: &FileDescriptor,
    class: Classification,
    shared: &WorkerShared,
) -> Option<WriteUnit> {
    let ctx = &shared.ctx;
    let config = &ctx.config;
    let deadline = Instant::now() + config.file_timeout();
    let failed = |message: String| {
        let err = PipelineError::Processing {
            path: PathBuf::from(&desc.relative_path),
            message,
        };
        Some(WriteUnit::without_content(
            desc,
            Arc::clone(&class.language),
            Category::Text,
            Outcome::Error(err.to_string()),
        ))
    };

    let mut file = match File::open(&desc.absolute_path) {
        Ok(f) => f,
        Err(e) => return failed(format!("open failed: {e}")),
    };
    if class.ambiguous {
        match sniff_is_binary(&mut file) {
            Ok(true) => {
                return Some(WriteUnit::without_content(
                    desc,
                    Arc::from(""),
                    Category::Skip,
                    Outcome::Skipped(SkipReason::BinaryContent),
                ));
            }
            Ok(false) => {}
            Err(e) => return failed(format!("read failed: {e}")),
        }
    }

    let read = if desc.size_bytes > config.stream_threshold {
        // The writer reads large files chunk by chunk; only the handle crosses the queue.
        scan_text_shape(&mut file, Some(deadline), &ctx.cancel).map(|shape| {
            Content::Stream(StreamHandle {
                file,
                path: desc.absolute_path.clone(),
                shape,
            })
        })
    } else {
        read_to_string_chunked(file, config.chunk_size, Some(deadline), &ctx.cancel)
            .map(Content::Inline)
    };
    let content = match read {
        Ok(content) => content,
        Err(ChunkError::Cancelled) => return None,
        Err(ChunkError::TimedOut) => {
            return failed(format!("timed out after {} ms", config.file_timeout_ms));
        }
        Err(ChunkError::Io(e)) => return failed(format!("read failed: {e}")),
    };
    Some(WriteUnit {
        seq: desc.seq,
        relative_path: desc.relative_path.clone(),
        language: class.language,
        category: Category::Text,
        size_bytes: desc.size_bytes,
        content,
        outcome: Outcome::Success,
    })
}

/// Read the first bytes, judge them, and rewind.
fn sniff_is_binary(file: &mut File) -> io::Result<bool> {
    let mut head = Vec::with_capacity(SNIFF_LEN);
    file.by_ref().take(SNIFF_LEN as u64).read_to_end(&mut head)?;
    file.seek(SeekFrom::Start(0))?;
    Ok(looks_binary(&head))
}
