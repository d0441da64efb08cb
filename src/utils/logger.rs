use colored::{ColoredString, Colorize};
use env_logger::Builder;
use log::{Level, LevelFilter};
use std::io::Write;

/// Colored tag for levels that carry one; info and below print bare.
fn level_tag(level: Level) -> Option<ColoredString> {
    match level {
        Level::Error => Some("ERROR".red()),
        Level::Warn => Some("WARN".yellow()),
        _ => None,
    }
}

/// Initialise env_logger for the CLI: `[hoard] msg`, warnings and errors tagged with their
/// module. Dependencies log at warn; `RUST_LOG` still overrides. Safe to call twice.
pub fn setup_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let _ = Builder::from_default_env()
        .filter_level(LevelFilter::Warn)
        .filter_module(env!("CARGO_PKG_NAME"), level)
        .format(|buf, record| {
            let name = env!("CARGO_PKG_NAME").cyan();
            match level_tag(record.level()) {
                Some(tag) => writeln!(
                    buf,
                    "[{name} {tag} {}] {}",
                    record.target().white(),
                    record.args()
                ),
                None => writeln!(buf, "[{name}] {}", record.args()),
            }
        })
        .try_init();
}

/// Colors for run summaries.
pub struct Colors;

impl Colors {
    pub const SUCCEEDED: &'static str = "green";
    pub const SKIPPED: &'static str = "yellow";
    pub const FAILED: &'static str = "red";

    pub fn colorize(color: &str, text: &str) -> ColoredString {
        text.color(color)
    }
}
