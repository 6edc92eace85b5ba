//! Collector: deterministic walk of the root into an ordered list of [`FileDescriptor`]s.
//!
//! Both walkers sort siblings by file name, so the same tree always yields the same order.
//! Pre-flight ceilings (file count, total size) are enforced here, before any file is read.

use log::debug;
use std::fs;
use std::path::PathBuf;

use crate::engine::tools::{
    is_contained_relative, is_ignored_dir, path_relative_to, path_to_slash_string,
    should_include_in_walk,
};
use crate::error::{CancelReason, LimitViolation, PipelineError};
use crate::types::FileDescriptor;

use super::context::PipelineContext;

/// One result from a directory walk: either a path to consider or an error with optional path.
pub enum WalkOutcome {
    Ok(PathBuf),
    Err { msg: String, path: Option<PathBuf> },
}

/// Convert a walkdir result into [`WalkOutcome`].
pub fn to_outcome_walkdir(r: Result<walkdir::DirEntry, walkdir::Error>) -> WalkOutcome {
    match r {
        Ok(entry) => WalkOutcome::Ok(entry.into_path()),
        Err(err) => WalkOutcome::Err {
            msg: format!("{}", err),
            path: err.path().map(PathBuf::from),
        },
    }
}

/// Convert an `ignore` walker result into [`WalkOutcome`].
pub fn to_outcome_ignore(r: Result<ignore::DirEntry, ignore::Error>) -> WalkOutcome {
    match r {
        Ok(entry) => WalkOutcome::Ok(entry.into_path()),
        Err(err) => WalkOutcome::Err {
            path: ignore_error_path(&err),
            msg: format!("{}", err),
        },
    }
}

fn ignore_error_path(err: &ignore::Error) -> Option<PathBuf> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path.clone()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            ignore_error_path(err)
        }
        ignore::Error::Loop { child, .. } => Some(child.clone()),
        _ => None,
    }
}

fn walkdir_iter(ctx: &PipelineContext) -> Box<dyn Iterator<Item = WalkOutcome>> {
    use walkdir::WalkDir;
    let ignore_dirs = ctx.config.ignore_dirs.clone();
    Box::new(
        WalkDir::new(&ctx.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |e| {
                e.depth() == 0
                    || !e.file_type().is_dir()
                    || !is_ignored_dir(&e.file_name().to_string_lossy(), &ignore_dirs)
            })
            .map(to_outcome_walkdir),
    )
}

/// Walker honouring `.gitignore`, `.git/info/exclude` and `.ignore` files (no git repo required).
fn gitignore_iter(ctx: &PipelineContext) -> Box<dyn Iterator<Item = WalkOutcome>> {
    let ignore_dirs = ctx.config.ignore_dirs.clone();
    let mut builder = ignore::WalkBuilder::new(&ctx.root);
    builder
        .standard_filters(false)
        .git_ignore(true)
        .git_exclude(true)
        .ignore(true)
        .parents(true)
        .require_git(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |e| {
            e.depth() == 0
                || !e.file_type().is_some_and(|t| t.is_dir())
                || !is_ignored_dir(&e.file_name().to_string_lossy(), &ignore_dirs)
        });
    Box::new(builder.build().map(to_outcome_ignore))
}

/// Ordered candidates plus walk errors that were downgraded to warnings.
#[derive(Debug, Default)]
pub struct Collected {
    pub files: Vec<FileDescriptor>,
    /// Sum of sizes of files within the per-file ceiling.
    pub total_size: u64,
    pub skipped_paths: Vec<(PathBuf, String)>,
}

/// Walk `ctx.root` and return every candidate file in traversal order.
pub fn collect_files(ctx: &PipelineContext) -> Result<Collected, PipelineError> {
    let iter = if ctx.config.respect_gitignore {
        gitignore_iter(ctx)
    } else {
        walkdir_iter(ctx)
    };
    run_walk_loop(ctx, iter)
}

/// Consume `iter`, filter with [`should_include_in_walk`], stat each regular file and assign
/// traversal sequence numbers. Errors abort in strict mode and are recorded otherwise.
pub fn run_walk_loop<I>(ctx: &PipelineContext, iter: I) -> Result<Collected, PipelineError>
where
    I: Iterator<Item = WalkOutcome>,
{
    let config = &ctx.config;
    let mut collected = Collected::default();
    for outcome in iter {
        if ctx.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled(
                ctx.cancel.reason().unwrap_or(CancelReason::Requested),
            ));
        }
        match outcome {
            WalkOutcome::Ok(path) => {
                if !should_include_in_walk(
                    &path,
                    &ctx.root,
                    &ctx.exclude_path,
                    &ctx.exclude,
                    &config.include_extensions,
                ) {
                    continue;
                }
                // Symlinks are not followed: only regular files count.
                let meta = match fs::symlink_metadata(&path) {
                    Ok(m) => m,
                    Err(e) => {
                        if config.strict {
                            return Err(PipelineError::FileSystem {
                                path,
                                message: e.to_string(),
                            });
                        }
                        collected.skipped_paths.push((path, e.to_string()));
                        continue;
                    }
                };
                if !meta.is_file() {
                    continue;
                }
                let Some(rel) =
                    path_relative_to(&path, &ctx.root).filter(|r| is_contained_relative(r))
                else {
                    let err = PipelineError::Validation(format!(
                        "{} escapes the root",
                        path.display()
                    ));
                    collected.skipped_paths.push((path, err.to_string()));
                    continue;
                };
                if collected.files.len() >= config.max_files {
                    return Err(PipelineError::ResourceLimit(LimitViolation::FileCount {
                        limit: config.max_files,
                    }));
                }
                let size = meta.len();
                // Oversized files are still listed (as skipped) but do not count toward the total.
                if size <= config.max_file_size {
                    collected.total_size += size;
                    if collected.total_size > config.max_total_size {
                        return Err(PipelineError::ResourceLimit(LimitViolation::TotalSize {
                            found: collected.total_size,
                            limit: config.max_total_size,
                        }));
                    }
                }
                collected.files.push(FileDescriptor {
                    seq: collected.files.len() as u64,
                    relative_path: path_to_slash_string(&rel),
                    absolute_path: path,
                    size_bytes: size,
                });
            }
            WalkOutcome::Err { msg, path } => {
                if config.strict {
                    return Err(PipelineError::FileSystem {
                        path: path.unwrap_or_else(|| ctx.root.clone()),
                        message: msg,
                    });
                }
                let to_push = path.unwrap_or_else(|| PathBuf::from("<no-path>"));
                collected.skipped_paths.push((to_push, msg));
            }
        }
    }
    debug!(
        "Collected {} files ({} bytes), {} walk warnings",
        collected.files.len(),
        collected.total_size,
        collected.skipped_paths.len()
    );
    Ok(collected)
}
