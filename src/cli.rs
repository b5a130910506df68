// Camsync CLI binary

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use camsync_lib::config::{self, CameraConfig, CameraSource, Settings, SyncConfig};
use camsync_lib::constants::{DEFAULT_INPUT_DIR, DEFAULT_OUTPUT_DIR};
use camsync_lib::lock::{self, LockKind};
use camsync_lib::retention::{bytes_to_mb, run_retention_pass, RetentionReport};
use camsync_lib::sync::convert::converter_for;
use camsync_lib::sync::{run_sync_pass, MediaKind, SyncReport};

#[derive(Parser)]
#[command(name = "camsync")]
#[command(about = "Camsync - harvest finished camera recordings and purge old footage", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Directory whose subdirectories are cameras
    #[arg(long, env = "INPUT_DIR", default_value = DEFAULT_INPUT_DIR, global = true)]
    input_dir: PathBuf,

    /// Root of the per-camera destination trees
    #[arg(long, env = "OUTPUT_DIR", default_value = DEFAULT_OUTPUT_DIR, global = true)]
    output_dir: PathBuf,

    /// TOML config file; its [[camera]] list replaces auto-discovery
    #[arg(long, env = "CONFIG_FILE", global = true)]
    config: Option<PathBuf>,

    /// Directory name to tag map, e.g. "Camera-Tuin:garden,Camera-Oprit:driveway"
    #[arg(long, env = "CAMERA_TRANSLATION", global = true)]
    camera_translation: Option<String>,

    /// Sync lock file; the retention lock sits next to it
    #[arg(long, env = "LOCK_FILE", global = true)]
    lock_file: Option<PathBuf>,

    /// Minimum file age in seconds before a file is considered
    #[arg(long, env = "AGE_THRESHOLD", global = true)]
    age_threshold: Option<u64>,

    /// Seconds between the two size readings
    #[arg(long, env = "SIZE_RECHECK_DELAY", global = true)]
    size_recheck_delay: Option<u64>,

    /// Delete placed files older than this many days (0 disables)
    #[arg(long, env = "RETENTION_DAYS", global = true)]
    retention_days: Option<u32>,

    /// Report what retention would delete without deleting
    #[arg(long, env = "DRY_RUN", num_args = 0..=1, default_missing_value = "true", global = true)]
    dry_run: Option<String>,

    /// Sync still images as well as video
    #[arg(long, env = "SYNC_IMAGES", num_args = 0..=1, default_missing_value = "true", global = true)]
    sync_images: Option<String>,

    /// Only sync videos modified within this many days (0 = no limit)
    #[arg(long, env = "VIDEO_SYNC_DAYS", global = true)]
    video_sync_days: Option<u32>,

    /// Only sync images modified within this many days (0 = no limit)
    #[arg(long, env = "IMAGE_SYNC_DAYS", global = true)]
    image_sync_days: Option<u32>,

    /// Regex for the camera's segment directories
    #[arg(long, env = "SEGMENT_DIR_PATTERN", global = true)]
    segment_dir_pattern: Option<String>,

    /// Source suffixes treated as video
    #[arg(long, env = "VIDEO_SUFFIXES", value_delimiter = ',', global = true)]
    video_suffixes: Option<Vec<String>>,

    /// Source suffixes treated as images
    #[arg(long, env = "IMAGE_SUFFIXES", value_delimiter = ',', global = true)]
    image_suffixes: Option<Vec<String>>,

    /// Converter command template with {input}, {output} and {kind}
    #[arg(long, env = "CONVERTER", global = true)]
    converter: Option<String>,

    /// Print the report as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Run one sync pass
    Sync,
    /// Run one retention pass
    Retention,
    /// Sync pass followed by a retention pass (default)
    Run,
    /// Show the resolved camera list
    Cameras,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match dispatch(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn dispatch(cli: &Cli) -> Result<()> {
    let config = build_config(cli)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Sync => cmd_sync(&config, &install_shutdown_handler(), cli.json),
        Commands::Retention => cmd_retention(&config, &install_shutdown_handler(), cli.json),
        Commands::Run => cmd_run(&config, &install_shutdown_handler(), cli.json),
        Commands::Cameras => cmd_cameras(&config, cli.json),
    }
}

/// Flag/env values first, then the config file, then defaults.
fn build_config(cli: &Cli) -> Result<SyncConfig> {
    let file = match &cli.config {
        Some(path) => Some(
            config::load_config_file(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?,
        ),
        None => None,
    };

    let overrides = Settings {
        lock_file: cli.lock_file.clone(),
        age_threshold_secs: cli.age_threshold,
        size_recheck_delay_secs: cli.size_recheck_delay,
        retention_days: cli.retention_days,
        dry_run: config::bool_setting("DRY_RUN", cli.dry_run.as_deref()),
        sync_images: config::bool_setting("SYNC_IMAGES", cli.sync_images.as_deref()),
        video_sync_days: cli.video_sync_days,
        image_sync_days: cli.image_sync_days,
        segment_dir_pattern: cli.segment_dir_pattern.clone(),
        video_suffixes: cli.video_suffixes.clone(),
        image_suffixes: cli.image_suffixes.clone(),
        converter: cli.converter.clone(),
    };

    let source = CameraSource {
        input_dir: &cli.input_dir,
        output_dir: &cli.output_dir,
        translation: cli.camera_translation.as_deref(),
    };

    Ok(config::resolve_config(overrides, file, &source)?)
}

fn install_shutdown_handler() -> Arc<AtomicBool> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);

    if let Err(e) = ctrlc::set_handler(move || {
        log::warn!("Shutdown requested, finishing the current file");
        flag.store(true, Ordering::SeqCst);
    }) {
        log::warn!("Could not install signal handler: {}", e);
    }

    shutdown
}

/// `Ok(None)` when another sync pass holds the lock.
fn sync_pass(config: &SyncConfig, shutdown: &AtomicBool) -> Result<Option<SyncReport>> {
    let converter = converter_for(config.converter.as_deref())?;
    let lock_path = lock::lock_path_for(&config.lock_file, LockKind::Sync);

    let report = lock::run_exclusive(&lock_path, LockKind::Sync, || {
        run_sync_pass(config, converter.as_ref(), shutdown)
    })?;
    Ok(report)
}

fn retention_pass(config: &SyncConfig, shutdown: &AtomicBool) -> Result<Option<RetentionReport>> {
    let lock_path = lock::lock_path_for(&config.lock_file, LockKind::Retention);

    let report = lock::run_exclusive(&lock_path, LockKind::Retention, || {
        Ok(run_retention_pass(config, shutdown))
    })?;
    Ok(report)
}

fn cmd_sync(config: &SyncConfig, shutdown: &AtomicBool, json: bool) -> Result<()> {
    let Some(report) = sync_pass(config, shutdown)? else {
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_sync_report(&report);
    }
    Ok(())
}

fn cmd_retention(config: &SyncConfig, shutdown: &AtomicBool, json: bool) -> Result<()> {
    let Some(report) = retention_pass(config, shutdown)? else {
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_retention_report(&report);
    }
    Ok(())
}

fn cmd_run(config: &SyncConfig, shutdown: &AtomicBool, json: bool) -> Result<()> {
    let sync = sync_pass(config, shutdown)?;
    let retention = if shutdown.load(Ordering::SeqCst) {
        None
    } else {
        retention_pass(config, shutdown)?
    };

    if json {
        let combined = serde_json::json!({ "sync": sync, "retention": retention });
        println!("{}", serde_json::to_string_pretty(&combined)?);
        return Ok(());
    }

    if let Some(report) = &sync {
        print_sync_report(report);
    }
    if let Some(report) = &retention {
        println!();
        print_retention_report(report);
    }
    Ok(())
}

fn cmd_cameras(config: &SyncConfig, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(&config.cameras)?);
        return Ok(());
    }

    println!("{} camera(s)", config.cameras.len());
    println!();
    println!("{:<20}  {:<40}  {}", "Tag", "Source", "Destination");
    println!("{}", "-".repeat(90));
    for CameraConfig { source, destination, tag } in &config.cameras {
        let status = if source.is_dir() { "" } else { "  (source missing)" };
        println!("{:<20}  {:<40}  {}{}", tag, source.display(), destination.display(), status);
    }
    Ok(())
}

fn print_sync_report(report: &SyncReport) {
    println!("Sync complete{}:", if report.interrupted { " (interrupted)" } else { "" });
    println!();
    println!(
        "{:<20}  {:>6}  {:>6}  {:>8}  {:>8}  {:>6}  {:>6}  {:>6}",
        "Camera", "Kind", "New", "Existing", "Unstable", "Empty", "Failed", "Total"
    );
    println!("{}", "-".repeat(82));

    for camera in &report.cameras {
        if camera.source_missing {
            println!("{:<20}  source missing", camera.tag);
            continue;
        }
        for kind in MediaKind::ALL {
            let s = camera.kind(kind);
            println!(
                "{:<20}  {:>6}  {:>6}  {:>8}  {:>8}  {:>6}  {:>6}  {:>6}",
                camera.tag, kind.as_str(), s.new, s.existing, s.unstable, s.empty, s.failed, s.total
            );
        }
    }

    println!();
    println!("  New:       {}", report.total_new());
    println!("  Existing:  {}", report.total_existing());
    println!("  Failed:    {}", report.total_failed());
    if let Some(efficiency) = report.efficiency() {
        println!("  Skipped:   {:.1}%", efficiency);
    }
}

fn print_retention_report(report: &RetentionReport) {
    if report.retention_days == 0 {
        println!("Retention disabled");
        return;
    }

    println!(
        "Retention ({} days){}{}:",
        report.retention_days,
        if report.dry_run { " [dry run]" } else { "" },
        if report.interrupted { " (interrupted)" } else { "" }
    );
    println!();
    println!("{:<20}  {:>8}  {:>10}  {:>6}", "Camera", "Files", "MB", "Failed");
    println!("{}", "-".repeat(50));
    for sweep in &report.cameras {
        println!(
            "{:<20}  {:>8}  {:>10.1}  {:>6}",
            sweep.tag,
            sweep.deleted,
            bytes_to_mb(sweep.freed_bytes),
            sweep.failed
        );
    }

    println!();
    println!(
        "  {} {} file(s), {:.1} MB",
        if report.dry_run { "Would delete" } else { "Deleted" },
        report.total_deleted(),
        bytes_to_mb(report.total_freed_bytes())
    );
}
