use log::{debug, warn};
use std::path::PathBuf;

/// Log walk errors that were downgraded to warnings (non-strict runs). With `verbose`, list them.
pub fn report_skipped_paths(skipped_paths: &[(PathBuf, String)], verbose: bool) {
    if skipped_paths.is_empty() {
        return;
    }
    warn!(
        "Skipped {} paths due to permission errors or access issues",
        skipped_paths.len()
    );
    for (path, msg) in skipped_paths {
        if verbose {
            eprintln!("  skipped: {} ({})", path.display(), msg);
        } else {
            debug!("skipped: {} ({})", path.display(), msg);
        }
    }
}
