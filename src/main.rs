//! Hoard CLI: create, update, extract, check and list archives.

use clap::Parser;
use hoard::engine::arg_parser::Cli;
use hoard::engine::handle_run;
use std::process::ExitCode;
use std::time::Instant;

fn main() -> ExitCode {
    let start_time = Instant::now();
    let cli = Cli::parse();
    let code = match handle_run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            log::error!("{e:#}");
            // Logging may not be initialised if the failure came first.
            if !log::log_enabled!(log::Level::Error) {
                eprintln!("hoard: {e:#}");
            }
            ExitCode::from(2)
        }
    };
    log::debug!("Total time: {:?}", start_time.elapsed());
    code
}
