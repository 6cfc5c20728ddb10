//! bdevstat - iostat-style I/O statistics for Ceph SPDK block devices.
//!
//! Polls OSD admin sockets under a runtime directory and prints per-device
//! throughput, operation-rate and latency tables at a fixed interval.

use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use bdevstat::collector::{CollectorConfig, OsdCollector, RealSource};
use bdevstat::poll::{self, PollConfig};
use bdevstat::rates::DisplayUnit;

/// I/O statistics for Ceph SPDK block devices.
#[derive(Parser)]
#[command(name = "bdevstat", about = "I/O statistics for Ceph SPDK block devices", version)]
struct Args {
    /// Display drive stats in KiB (default).
    #[arg(short = 'k', long = "kb-display", conflicts_with = "mb_display")]
    kb_display: bool,

    /// Display drive stats in MiB.
    #[arg(short = 'm', long = "mb-display")]
    mb_display: bool,

    /// Time interval (in seconds) on which to poll I/O stats.
    /// Used in conjunction with --time.
    #[arg(short, long, requires = "time", value_parser = clap::value_parser!(u64).range(1..))]
    interval: Option<u64>,

    /// The number of seconds to display stats before returning.
    /// Used in conjunction with --interval.
    #[arg(short, long, requires = "interval", value_parser = clap::value_parser!(u64).range(1..))]
    time: Option<u64>,

    /// Name of the block device to report on. Example: 0000:81:00.0
    #[arg(short = 'b', long)]
    name: Option<String>,

    /// OSD admin-socket directory.
    #[arg(short, long, default_value = CollectorConfig::DEFAULT_SOCKET_DIR)]
    path: String,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,
}

/// Picks the log level from the verbosity flags. Default is INFO; -q
/// restricts to errors only.
fn log_level(verbose: u8, quiet: bool) -> Level {
    if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}

/// Initializes the tracing subscriber with the appropriate log level.
fn init_logging(verbose: u8, quiet: bool) {
    let level = log_level(verbose, quiet);

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("bdevstat={}", level).parse().expect("static directive"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let unit = if args.mb_display {
        DisplayUnit::Mib
    } else {
        DisplayUnit::Kib
    };

    let config = CollectorConfig::new(&args.path, args.name.clone());
    info!(
        "bdevstat {} starting, sockets at {}",
        env!("CARGO_PKG_VERSION"),
        config.socket_dir.display()
    );

    let source = RealSource::new(&config.socket_dir);
    let mut collector = OsdCollector::new(source, config.device_filter.clone());
    match collector.discover() {
        Ok(sockets) if sockets.is_empty() => {
            error!("no OSD admin sockets found in {}", config.socket_dir.display());
            return ExitCode::FAILURE;
        }
        Ok(sockets) => info!("polling {} OSD admin socket(s)", sockets.len()),
        Err(e) => {
            error!("admin-socket discovery failed: {}", e);
            return ExitCode::FAILURE;
        }
    }

    let poll_config = PollConfig {
        interval: Duration::from_secs(args.interval.unwrap_or(1)),
        duration: args.time.map(Duration::from_secs),
        unit,
    };

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    }) {
        error!("failed to set Ctrl-C handler: {}", e);
    }

    let mut stdout = std::io::stdout();
    if let Err(e) = poll::run(&collector, &poll_config, &running, &mut stdout) {
        error!("output failed: {}", e);
        return ExitCode::FAILURE;
    }

    if !running.load(Ordering::SeqCst) {
        println!("Interrupted, exiting.");
    }
    ExitCode::SUCCESS
}
