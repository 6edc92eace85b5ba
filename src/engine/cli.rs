//! CLI command handler: merge `.ctxpack.toml` with flags, run the pipeline, print the summary.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::engine::arg_parser::Cli;
use crate::engine::progress::ProgressMetrics;
use crate::error::CancelReason;
use crate::pipeline::{CancelToken, MetricsSink, NoopMetrics, Pipeline};
use crate::types::{PipelineConfig, RunSummary};
use crate::utils::{
    Colors, LazyFile, PackagePaths, apply_file_to_config, load_ctxpack_toml, setup_logging,
};

/// Apply CLI flags on top of `config` (only flags that were given).
pub fn apply_cli_to_config(cli: &Cli, config: &mut PipelineConfig) {
    macro_rules! apply_cli_opt {
        ($($field:ident => $cfg:ident),+ $(,)?) => {
            $(
                if let Some(v) = cli.$field {
                    config.$cfg = v;
                }
            )+
        };
    }
    apply_cli_opt!(
        format => format,
        order => order,
        concurrency => concurrency,
        max_files => max_files,
        max_total_size => max_total_size,
        max_file_size => max_file_size,
        file_timeout_ms => file_timeout_ms,
        memory_policy => memory_policy,
        strict => strict,
    );
    if cli.timeout_ms.is_some() {
        config.timeout_ms = cli.timeout_ms;
    }
    if cli.memory_limit.is_some() {
        config.memory_limit = cli.memory_limit;
    }
    if let Some(no_gitignore) = cli.no_gitignore {
        config.respect_gitignore = !no_gitignore;
    }
    config.exclude.extend(cli.exclude.iter().cloned());
    if !cli.include.is_empty() {
        config.include_extensions = cli.include.clone();
    }
}

/// Pack `cli.dir` according to `.ctxpack.toml` and flags.
pub fn handle_run(cli: &Cli) -> Result<()> {
    let file = load_ctxpack_toml(&cli.dir);
    let verbose = cli
        .verbose
        .or_else(|| file.as_ref().and_then(|f| f.verbose()))
        .unwrap_or(false);
    setup_logging(verbose);

    let mut config = PipelineConfig::default();
    if let Some(file) = &file {
        apply_file_to_config(file, &mut config);
    }
    apply_cli_to_config(cli, &mut config);
    debug!(
        "{} CONFIG:{:#?}",
        PackagePaths::get().pkg_name().to_uppercase(),
        config
    );

    let output: Option<PathBuf> = cli
        .output
        .clone()
        .or_else(|| file.as_ref().and_then(|f| f.output(&cli.dir)));
    let show_progress = output.is_some()
        && cli
            .progress
            .or_else(|| file.as_ref().and_then(|f| f.progress()))
            .unwrap_or(true);

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        handler_token.cancel(CancelReason::Requested);
    })
    .context("set Ctrl+C handler")?;

    let metrics: Arc<dyn MetricsSink> = if show_progress {
        Arc::new(ProgressMetrics::new())
    } else {
        Arc::new(NoopMetrics)
    };
    let mut pipeline = Pipeline::new(config)
        .with_metrics(metrics)
        .verbose(verbose);
    let sink: Box<dyn Write + Send> = match &output {
        Some(path) => {
            pipeline = pipeline.exclude_output(path);
            Box::new(LazyFile::new(path))
        }
        None => Box::new(io::stdout()),
    };

    match pipeline.run(&cli.dir, sink, &cancel) {
        Ok(summary) => {
            print_summary(&summary, output.as_deref());
            Ok(())
        }
        Err(aborted) => {
            if aborted.summary.written() > 0 {
                print_summary(&aborted.summary, output.as_deref());
            }
            Err(anyhow::Error::new(aborted.error)).context("packing failed")
        }
    }
}

/// One colored line on stderr (stdout may carry the document).
fn print_summary(summary: &RunSummary, output: Option<&Path>) {
    let target = output
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "stdout".to_string());
    eprintln!(
        "{} | {} | {} | {} -> {} ({} bytes)",
        Colors::colorize(Colors::PROCESSED, &format!("Processed: {}", summary.processed)),
        Colors::colorize(Colors::SKIPPED, &format!("Skipped: {}", summary.skipped)),
        Colors::colorize(Colors::ERRORED, &format!("Errored: {}", summary.errored)),
        Colors::colorize(Colors::ABANDONED, &format!("Abandoned: {}", summary.abandoned)),
        target,
        summary.bytes_written
    );
    if summary.walk_warnings > 0 {
        warn!(
            "{} paths could not be read during the walk (use --verbose to list them)",
            summary.walk_warnings
        );
    }
}
