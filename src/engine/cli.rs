//! CLI command handler: layer defaults, `.hoard.toml` and flags, run the subcommand, report.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::archive::{resolve_archive_dir, stored_remote};
use crate::engine::arg_parser::{ArchiveArgs, Cli, Commands, CommonArgs, ExtractArgs, ListArgs};
use crate::engine::report::{print_summary, write_report};
use crate::engine::transfer::open_remote;
use crate::list::{list_archive, list_containers};
use crate::types::{ArchiveOpts, ExtractMode, ExtractOpts, RunSummary};
use crate::utils::{HoardToml, format_size, load_settings_toml, parse_size, setup_logging};
use crate::{check_archive, create_archive, extract_archive, update_archive};

/// Load `.env` from `dir` so transfer command variables are visible to `open_remote`.
fn load_dotenv(dir: &Path) {
    let env_path = dir.join(".env");
    if env_path.is_file() {
        let _ = dotenvy::from_path(&env_path);
    }
}

fn install_cancel_handler() -> Result<Arc<AtomicBool>> {
    let cancel_requested = Arc::new(AtomicBool::new(false));
    let cancel_requested_handler = Arc::clone(&cancel_requested);
    ctrlc::set_handler(move || {
        cancel_requested_handler.store(true, Ordering::Relaxed);
    })
    .context("set Ctrl+C handler")?;
    Ok(cancel_requested)
}

fn archive_opts(
    args: &ArchiveArgs,
    settings: Option<&HoardToml>,
    cancel: Arc<AtomicBool>,
) -> Result<ArchiveOpts> {
    let mut opts = ArchiveOpts::default();
    if let Some(s) = settings {
        s.apply_to_archive_opts(&mut opts);
    }
    let c = &args.common;
    if let Some(ref a) = c.archive {
        opts.archive_dir = Some(a.clone());
    }
    if let Some(ref r) = c.remote {
        opts.remote = Some(r.clone());
    }
    if let Some(ref m) = c.max_size {
        opts.max_size = Some(parse_size(m).context("--max-size")?);
    }
    if c.workers.is_some() {
        opts.workers = c.workers;
    }
    if !c.exclude.is_empty() {
        opts.exclude = c.exclude.clone();
    }
    if let Some(k) = c.keep {
        opts.keep = k;
    }
    if let Some(r) = c.retries {
        opts.retries = r;
    }
    if let Some(f) = args.follow_links {
        opts.follow_links = f;
    }
    if let Some(secs) = args.mtime_window {
        opts.mtime_window_ns = secs * 1_000_000_000; // seconds -> nanoseconds
    }
    opts.include = args.patterns.clone();
    opts.dry_run = c.dry_run;
    opts.verbose = c.verbose.unwrap_or(false) || settings.is_some_and(HoardToml::verbose);
    opts.reconfigure = args.reconfigure;
    opts.cancel = Some(cancel);
    Ok(opts)
}

fn extract_opts(
    common: &CommonArgs,
    settings: Option<&HoardToml>,
    cancel: Option<Arc<AtomicBool>>,
) -> ExtractOpts {
    let mut opts = ExtractOpts {
        archive_dir: PathBuf::from("."),
        ..Default::default()
    };
    if let Some(s) = settings {
        s.apply_to_extract_opts(&mut opts);
    }
    if let Some(ref a) = common.archive {
        opts.archive_dir = a.clone();
    }
    if let Some(ref r) = common.remote {
        opts.remote = Some(r.clone());
    }
    if common.workers.is_some() {
        opts.workers = common.workers;
    }
    if !common.exclude.is_empty() {
        opts.exclude = common.exclude.clone();
    }
    if let Some(k) = common.keep {
        opts.keep = k;
    }
    if let Some(r) = common.retries {
        opts.retries = r;
    }
    if common.max_size.is_some() {
        warn!("--max-size has no effect when reading an archive; ignoring it");
    }
    opts.dry_run = common.dry_run;
    opts.verbose = common.verbose.unwrap_or(false) || settings.is_some_and(HoardToml::verbose);
    opts.cancel = cancel;
    opts
}

/// Log the summary, write the results file when it is long and `--report` when asked.
fn finish_run(summary: &RunSummary, results_dir: &Path, report: Option<&Path>) -> Result<bool> {
    let results_dir = results_dir.is_dir().then_some(results_dir);
    print_summary(summary, results_dir)?;
    if let Some(path) = report {
        write_report(summary, path)?;
        info!("Report written to {}", path.display());
    }
    Ok(summary.is_success())
}

fn run_archive(args: &ArchiveArgs, update: bool, settings: Option<&HoardToml>) -> Result<bool> {
    let cancel = install_cancel_handler()?;
    let opts = archive_opts(args, settings, cancel)?;
    if opts.dry_run {
        warn!("RUNNING IN DRY-RUN MODE. NOTHING WILL BE WRITTEN.");
    }
    let summary = if update {
        update_archive(&args.dir, &opts)?
    } else {
        create_archive(&args.dir, &opts)?
    };
    let archive_dir = resolve_archive_dir(&args.dir, &opts);
    finish_run(&summary, &archive_dir, args.common.report.as_deref())
}

fn run_extract(
    args: &ExtractArgs,
    mode: ExtractMode,
    settings: Option<&HoardToml>,
) -> Result<bool> {
    let cancel = install_cancel_handler()?;
    let mut opts = extract_opts(&args.common, settings, Some(cancel));
    opts.mode = mode;
    opts.dest = args.dest.clone();
    opts.patterns = args.patterns.clone();
    opts.containers = args.containers.clone();
    opts.resume = args.resume;
    if let Some(k) = args.keep_going {
        opts.keep_going = k;
    }
    if let Some(secs) = args.mtime_window {
        opts.mtime_window_ns = secs * 1_000_000_000;
    }
    if opts.dry_run {
        warn!("RUNNING IN DRY-RUN MODE. NOTHING WILL BE FETCHED OR WRITTEN.");
    }
    let summary = match mode {
        ExtractMode::Extract => extract_archive(&opts)?,
        ExtractMode::Check => check_archive(&opts)?,
    };
    finish_run(&summary, &opts.archive_dir, args.common.report.as_deref())
}

fn run_list(args: &ListArgs, settings: Option<&HoardToml>) -> Result<bool> {
    let opts = extract_opts(&args.common, settings, None);
    let spec = opts
        .remote
        .clone()
        .or_else(|| stored_remote(&opts.archive_dir));
    let store = open_remote(spec.as_deref(), &opts.transfer)?;

    if args.containers {
        for c in list_containers(&opts.archive_dir, store.as_deref())? {
            println!(
                "{}\t{}\t{}\t{}\t{}",
                c.id,
                format_size(c.size),
                c.file_count,
                c.checksum,
                c.remote_ref.as_deref().unwrap_or("-")
            );
        }
        return Ok(true);
    }

    let records = list_archive(&opts.archive_dir, &args.patterns, store.as_deref())?;
    for r in &records {
        if args.long {
            println!(
                "{}\t{}\t{}\t{}\t{}\t{}",
                r.size, r.mtime_ns, r.checksum, r.container, r.offset, r.path
            );
        } else {
            println!("{}", r.path);
        }
    }
    debug!("{} matching files", records.len());
    Ok(true)
}

/// Run the selected subcommand. Returns Ok(false) when the run completed with reported failures.
pub fn handle_run(cli: &Cli) -> Result<bool> {
    let settings_dir = match &cli.command {
        Commands::Create(a) | Commands::Update(a) => a.dir.clone(),
        _ => PathBuf::from("."),
    };
    load_dotenv(&settings_dir);
    let settings = load_settings_toml(&settings_dir);
    let verbose = cli.command.common().verbose.unwrap_or(false)
        || settings.as_ref().is_some_and(|s| s.verbose());
    setup_logging(verbose);

    match &cli.command {
        Commands::Create(a) => run_archive(a, false, settings.as_ref()),
        Commands::Update(a) => run_archive(a, true, settings.as_ref()),
        Commands::Extract(a) => run_extract(a, ExtractMode::Extract, settings.as_ref()),
        Commands::Check(a) => run_extract(a, ExtractMode::Check, settings.as_ref()),
        Commands::List(a) => run_list(a, settings.as_ref()),
    }
}
