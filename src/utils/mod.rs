pub mod config;
pub mod fd_limit;
pub mod logger;
pub mod settings_toml;
pub mod size;
pub mod tempfiles;

pub use config::*;
pub use fd_limit::{FDS_PER_WORKER, max_open_fds, max_workers_by_fd_limit, resolve_workers};
pub use logger::{Colors, setup_logging};
pub use settings_toml::{HoardToml, load_settings_toml};
pub use size::{format_size, parse_size};
pub use tempfiles::{remove_snapshot, remove_stale_partials, remove_wal_and_shm, snapshot_path_for};
