//! Engine: containers, index store, checksums, transfers, CLI plumbing

pub mod aggregate;
pub mod arg_parser;
pub mod checksum;
pub mod cli;
pub mod db_ops;
pub mod progress;
pub mod report;
pub mod tools;
pub mod transfer;

// Re-export commonly used functions
pub use arg_parser::{Cli, Commands};
pub use checksum::{checksum_equals, hash_file};
pub use cli::handle_run;
pub use db_ops::{backup_to_file, open_db, open_db_in_memory, open_db_read_only};
pub use report::{print_summary, write_report};
pub use tools::{mtime_changed, path_relative_to};
