pub mod config;
pub mod ctxpack_toml;
pub mod fd_limit;
pub mod logger;
pub mod output;

pub use config::*;
pub use ctxpack_toml::{CtxpackToml, apply_file_to_config, load_ctxpack_toml, parse_ctxpack_toml};
pub use fd_limit::{FDS_PER_WORKER, max_open_fds, max_workers_by_fd_limit};
pub use logger::{Colors, setup_logging};
pub use output::LazyFile;
