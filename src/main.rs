//! # Netscribe CLI
//!
//! Command-line launcher for the capture pipeline.
//!
//! | Command | Description |
//! |---------|-------------|
//! | `netscribe batch` | Run a capture batch against a filtered inventory |
//! | `netscribe load-fingerprints` | Ingest fingerprint JSON artifacts into the store |
//! | `netscribe load-captures` | Ingest capture artifacts into the store |
//!
//! Exit codes: `0` all ok, `1` any per-device failure, `2` usage error,
//! `3` unrecoverable (store lock, bad inventory), `130` canceled by signal.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};
use tokio::sync::mpsc;

use netscribe::cancel::CancelSource;
use netscribe::capture::CaptureCatalog;
use netscribe::context::CoreContext;
use netscribe::fingerprint::normalize_name;
use netscribe::inventory::{DeviceEntry, DeviceFilter, InventoryDoc};
use netscribe::loader::{Loader, LoaderConfig};
use netscribe::runner::{DeviceJob, ProgressEvent};
use netscribe::scheduler::{BatchConfig, BatchResult, Scheduler};
use netscribe::store::Store;

/// Netscribe — SSH fleet capture, fingerprinting, and inventory loading.
#[derive(Parser)]
#[command(
    name = "netscribe",
    version,
    about = "Concurrent SSH capture pipeline for network device fleets"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a capture batch against the filtered inventory.
    Batch(BatchArgs),

    /// Ingest a fingerprint directory into the store.
    LoadFingerprints(LoadFingerprintsArgs),

    /// Ingest a capture directory into the store.
    LoadCaptures(LoadCapturesArgs),
}

#[derive(Args)]
struct BatchArgs {
    /// Inventory document (JSON).
    #[arg(long)]
    inventory: PathBuf,

    /// Filter by site code (supports `*` wildcards).
    #[arg(long)]
    filter_site: Option<String>,

    /// Filter by vendor hint (supports `*` wildcards).
    #[arg(long)]
    filter_vendor: Option<String>,

    /// Filter by device display name (supports `*` wildcards).
    #[arg(long)]
    filter_name: Option<String>,

    /// Commands to execute, comma or semicolon separated.
    #[arg(long)]
    commands: Option<String>,

    /// Capture output root directory.
    #[arg(long, default_value = "capture")]
    output: PathBuf,

    /// Fingerprint artifact directory.
    #[arg(long, default_value = "fingerprints")]
    fingerprint_dir: PathBuf,

    /// Worker pool size.
    #[arg(long, default_value_t = 8)]
    workers: usize,

    /// Per-device time budget (e.g. 60s, 10m).
    #[arg(long, default_value = "10m", value_parser = parse_duration)]
    per_device_timeout: Duration,

    /// Whole-batch deadline (e.g. 30m).
    #[arg(long, value_parser = parse_duration)]
    batch_deadline: Option<Duration>,

    /// Cancel the batch on the first failed device.
    #[arg(long)]
    stop_on_error: bool,

    /// Write fingerprint artifacts alongside captures.
    #[arg(long)]
    fingerprint: bool,

    /// Only fingerprint; run no capture commands.
    #[arg(long, conflicts_with = "fingerprinted_only")]
    fingerprint_only: bool,

    /// Only run against devices that already have fingerprint artifacts.
    #[arg(long)]
    fingerprinted_only: bool,

    /// Show what would run without connecting.
    #[arg(long)]
    dry_run: bool,

    /// List matching devices and exit.
    #[arg(long)]
    list_devices: bool,

    /// Write the batch summary as JSON.
    #[arg(long)]
    save_summary: Option<PathBuf>,
}

#[derive(Args)]
struct LoadFingerprintsArgs {
    /// Directory of fingerprint JSON artifacts.
    #[arg(long)]
    dir: PathBuf,

    /// SQLite store path.
    #[arg(long, default_value = "assets.db")]
    store: PathBuf,
}

#[derive(Args)]
struct LoadCapturesArgs {
    /// Capture root directory (`<dir>/<capture_type>/<device>.txt`).
    #[arg(long)]
    dir: PathBuf,

    /// SQLite store path.
    #[arg(long, default_value = "assets.db")]
    store: PathBuf,

    /// Comma-separated capture types to process (default: all).
    #[arg(long)]
    types: Option<String>,

    /// Archive retention window in days.
    #[arg(long, default_value_t = 30)]
    archive_days: i64,
}

const EXIT_OK: u8 = 0;
const EXIT_DEVICE_FAILURES: u8 = 1;
const EXIT_FATAL: u8 = 3;
const EXIT_SIGNAL: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Batch(args) => run_batch(args).await,
        Commands::LoadFingerprints(args) => run_load_fingerprints(args),
        Commands::LoadCaptures(args) => run_load_captures(args),
    };
    ExitCode::from(code)
}

async fn run_batch(args: BatchArgs) -> u8 {
    let doc = match InventoryDoc::load(&args.inventory) {
        Ok(doc) => doc,
        Err(e) => {
            error!("{}", e);
            return EXIT_FATAL;
        }
    };

    let filter = DeviceFilter {
        site: args.filter_site.clone(),
        vendor: args.filter_vendor.clone(),
        name: args.filter_name.clone(),
    };
    let mut devices = filter.apply(doc.devices());

    if args.fingerprinted_only {
        let before = devices.len();
        devices.retain(|d| fingerprint_artifact(&args.fingerprint_dir, d).exists());
        info!(
            "fingerprinted-only filter: {} -> {} devices",
            before,
            devices.len()
        );
    }

    if devices.is_empty() {
        warn!("no devices matched the filters");
        return EXIT_OK;
    }

    if args.list_devices {
        for device in &devices {
            println!(
                "{} ({}) [{}] in '{}'",
                device.display_name,
                device.host,
                device.vendor.as_deref().unwrap_or("unknown"),
                device.folder_name
            );
        }
        return EXIT_OK;
    }

    let ctx = CoreContext::bootstrap();
    let (jobs, capture_type) = build_jobs(&devices, &args, &ctx);

    if args.dry_run {
        println!(
            "DRY RUN: {} devices, {} workers, capture type '{}'",
            jobs.len(),
            args.workers,
            capture_type
        );
        for job in &jobs {
            let target = job
                .output_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "fingerprint only".to_string());
            println!("  - {} ({}) -> {}", job.display_name, job.host, target);
        }
        return EXIT_OK;
    }

    let cancel = Arc::new(CancelSource::new());
    let signalled = spawn_signal_handler(cancel.clone());

    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressEvent>();
    tokio::spawn(async move {
        while let Some(event) = progress_rx.recv().await {
            log::debug!(
                "{}: {:?} at {}ms",
                event.host,
                event.phase,
                event.elapsed_ms
            );
        }
    });

    let scheduler = Scheduler::new(
        Arc::new(ctx.runner()),
        BatchConfig {
            workers: args.workers,
            batch_deadline: args.batch_deadline,
            stop_on_error: args.stop_on_error,
            ..Default::default()
        },
    );

    let batch = scheduler.run_batch(jobs, cancel.token(), progress_tx).await;
    print_batch_summary(&batch);

    if let Some(path) = &args.save_summary {
        match serde_json::to_vec_pretty(&batch) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    warn!("could not save summary to {}: {}", path.display(), e);
                } else {
                    info!("summary saved to {}", path.display());
                }
            }
            Err(e) => warn!("could not encode summary: {}", e),
        }
    }

    if signalled.load(Ordering::SeqCst) {
        EXIT_SIGNAL
    } else if batch.failed > 0 {
        EXIT_DEVICE_FAILURES
    } else {
        EXIT_OK
    }
}

fn run_load_fingerprints(args: LoadFingerprintsArgs) -> u8 {
    let loader = match open_loader(&args.store, 30) {
        Ok(loader) => loader,
        Err(code) => return code,
    };
    match loader.ingest_fingerprint_dir(&args.dir) {
        Ok(stats) => {
            info!(
                "fingerprints: {} total, {} loaded, {} skipped, {} failed",
                stats.total, stats.loaded, stats.skipped, stats.failed
            );
            EXIT_OK
        }
        Err(e) => {
            error!("{}", e);
            EXIT_FATAL
        }
    }
}

fn run_load_captures(args: LoadCapturesArgs) -> u8 {
    let loader = match open_loader(&args.store, args.archive_days) {
        Ok(loader) => loader,
        Err(code) => return code,
    };
    let types: Option<Vec<String>> = args
        .types
        .as_deref()
        .map(|t| t.split(',').map(|s| s.trim().to_string()).collect());

    match loader.ingest_capture_dir(&args.dir, types.as_deref()) {
        Ok(stats) => {
            info!(
                "captures: {} total, {} loaded, {} unchanged, {} skipped, {} failed, {} changes",
                stats.total, stats.loaded, stats.unchanged, stats.skipped, stats.failed, stats.changes
            );
            EXIT_OK
        }
        Err(e) => {
            error!("{}", e);
            EXIT_FATAL
        }
    }
}

fn open_loader(store_path: &Path, archive_days: i64) -> Result<Loader, u8> {
    let store = Store::open(store_path).map_err(|e| {
        error!("cannot open store {}: {}", store_path.display(), e);
        EXIT_FATAL
    })?;
    let config = LoaderConfig {
        archive_days,
        ..Default::default()
    };
    Ok(Loader::new(
        store,
        CaptureCatalog::builtin(),
        Arc::new(netscribe::platform::VendorRegistry::builtin()),
        config,
    ))
}

/// Build device jobs from the filtered inventory.
fn build_jobs(
    devices: &[DeviceEntry],
    args: &BatchArgs,
    ctx: &CoreContext,
) -> (Vec<DeviceJob>, String) {
    let mut commands: Vec<String> = args
        .commands
        .as_deref()
        .unwrap_or_default()
        .split([',', ';'])
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect();

    if args.fingerprint_only && commands.is_empty() {
        commands.push("show version".to_string());
    }

    // The capture type follows the first non-prologue command; paging
    // disables in the command list belong to the prologue, not the capture.
    let prologue = ctx.registry.generic_prologue();
    let capture_type = commands
        .iter()
        .find(|c| !prologue.contains(c))
        .map(|c| ctx.catalog.type_for_command(c))
        .unwrap_or_else(|| "version".to_string());

    let wants_fingerprint = args.fingerprint
        || args.fingerprint_only
        || CaptureCatalog::is_fingerprint_source(&capture_type);

    let jobs = devices
        .iter()
        .map(|device| {
            let normalized = normalize_name(&device.display_name);
            let output_path = (!args.fingerprint_only).then(|| {
                args.output
                    .join(&capture_type)
                    .join(format!("{}.txt", normalized))
            });
            let fingerprint_path =
                wants_fingerprint.then(|| fingerprint_artifact(&args.fingerprint_dir, device));
            DeviceJob {
                display_name: device.display_name.clone(),
                host: device.host.clone(),
                port: device.port,
                credential_id: device.credential_id.clone(),
                vendor_hint: device.vendor.clone(),
                commands: commands.clone(),
                capture_type: capture_type.clone(),
                output_path,
                fingerprint_path,
                per_device_timeout: args.per_device_timeout,
            }
        })
        .collect();

    (jobs, capture_type)
}

fn fingerprint_artifact(dir: &Path, device: &DeviceEntry) -> PathBuf {
    dir.join(format!("{}.json", normalize_name(&device.display_name)))
}

fn print_batch_summary(batch: &BatchResult) {
    println!("{}", "=".repeat(60));
    println!(
        "batch: {} total, {} ok, {} failed, {} canceled in {:.1}s",
        batch.total,
        batch.ok,
        batch.failed,
        batch.canceled,
        batch.elapsed_ms as f64 / 1000.0
    );
    for result in batch.results.iter().filter(|r| r.error.is_some()) {
        println!(
            "  FAILED {} ({}): {}",
            result.display_name,
            result.host,
            result.error.as_deref().unwrap_or("")
        );
    }
}

/// First SIGINT/SIGTERM cancels gracefully; a second within three seconds
/// forces immediate exit.
fn spawn_signal_handler(cancel: Arc<CancelSource>) -> Arc<AtomicBool> {
    let signalled = Arc::new(AtomicBool::new(false));
    let flag = signalled.clone();

    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("signal handler registration");
        let mut last_signal: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            let now = Instant::now();
            if let Some(prev) = last_signal {
                if now.duration_since(prev) < Duration::from_secs(3) {
                    eprintln!("forced exit");
                    std::process::exit(EXIT_SIGNAL as i32);
                }
            }
            last_signal = Some(now);
            flag.store(true, Ordering::SeqCst);
            cancel.cancel();
            eprintln!("cancellation requested; signal again within 3s to force exit");
        }
    });

    signalled
}

/// Parse `90`, `90s`, `10m`, or `2h` into a duration.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (value, unit) = match s.find(|c: char| c.is_ascii_alphabetic()) {
        Some(at) => s.split_at(at),
        None => (s, "s"),
    };
    let value: u64 = value
        .parse()
        .map_err(|_| format!("invalid duration '{}'", s))?;
    let secs = match unit {
        "s" | "sec" | "" => value,
        "m" | "min" => value * 60,
        "h" | "hr" => value * 3600,
        other => return Err(format!("unknown duration unit '{}'", other)),
    };
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("5d").is_err());
    }
}
