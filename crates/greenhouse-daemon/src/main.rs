//! Greenhouse controller daemon entry point.
//!
//! Wires the control loop to either the simulated board or the host
//! peripherals and runs it until a shutdown signal arrives.

mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use greenhouse_board::{host_peripherals, HostOptions, SimBoard, SystemClock};
use greenhouse_common::config::ControllerConfig;
use greenhouse_runtime::controller::Controller;
use greenhouse_runtime::peripherals::RealTimeClock;
use greenhouse_runtime::watchdog::SoftwareWatchdog;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::signals::{wait_for_shutdown, SignalHandler};

/// Exit status used when the watchdog expires.
const WATCHDOG_EXIT_CODE: i32 = 3;

/// Network time minus local time on the simulated board.
const SIM_NETWORK_OFFSET_US: i64 = 1_500_000;

/// Greenhouse daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "greenhouse-daemon",
    about = "Greenhouse controller daemon - irrigation schedule, tank pressure telemetry",
    version,
    long_about = None
)]
struct Args {
    /// Path to a controller configuration file (JSON or TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run against the simulated board instead of host peripherals.
    #[arg(long, short = 's')]
    simulated: bool,

    /// Maximum dispatcher iterations to run (0 = infinite).
    #[arg(long, default_value = "0")]
    max_iterations: u64,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,

    /// Raw pressure input file (host mode).
    #[arg(long, value_name = "FILE")]
    pressure_input: Option<PathBuf>,

    /// Address probed to decide whether the host network is up.
    #[arg(long, default_value = "1.1.1.1:53", value_name = "ADDR")]
    probe_addr: String,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting greenhouse daemon");

    let config = load_config(&args)?;

    if args.print_config {
        print!("{}", config.to_toml().context("Failed to serialize config")?);
        return Ok(());
    }

    config.log_summary();

    let signal_handler = SignalHandler::new().context("Failed to set up signal handlers")?;

    run_daemon(config, &args, &signal_handler)
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!(
        "greenhouse_daemon={level},greenhouse_runtime={level},greenhouse_board={level},greenhouse_common={level}"
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `GREENHOUSE_CONFIG_PATH` environment variable
/// 3. `/etc/greenhouse/config.json` (system path)
/// 4. `config/default.json` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<ControllerConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return ControllerConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    if let Ok(env_path) = std::env::var("GREENHOUSE_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from GREENHOUSE_CONFIG_PATH");
            return ControllerConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from GREENHOUSE_CONFIG_PATH={env_path:?}")
            });
        }
        warn!(
            path = %env_path,
            "GREENHOUSE_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    for candidate in ["/etc/greenhouse/config.json", "config/default.json"] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            info!(?path, "Loading config");
            return ControllerConfig::from_file(&path)
                .with_context(|| format!("Failed to load config from {path:?}"));
        }
    }

    info!("No config file found, using built-in defaults");
    Ok(ControllerConfig::default())
}

fn expiring_watchdog() -> SoftwareWatchdog {
    SoftwareWatchdog::new(|| {
        error!("Watchdog expired without a successful publish, exiting for restart");
        std::process::exit(WATCHDOG_EXIT_CODE);
    })
}

/// Main daemon run loop.
fn run_daemon(config: ControllerConfig, args: &Args, signal_handler: &SignalHandler) -> Result<()> {
    let board = args.simulated.then(|| {
        let board = SimBoard::new(SystemClock::new().epoch_micros());
        board.set_network_offset(SIM_NETWORK_OFFSET_US);
        info!(offset_us = SIM_NETWORK_OFFSET_US, "Using simulated board");
        board
    });

    let mut peripherals = match &board {
        Some(board) => board.peripherals(),
        None => {
            let options = HostOptions {
                probe_addr: args.probe_addr.clone(),
                pressure_input: args.pressure_input.clone(),
            };
            info!(probe = %options.probe_addr, "Using host peripherals");
            host_peripherals(&options, Box::new(expiring_watchdog()))
                .context("Failed to set up host peripherals")?
        }
    };
    if board.is_some() {
        peripherals.watchdog = Box::new(expiring_watchdog());
    }

    let mut controller = Controller::new(config, peripherals);
    controller.start().context("Failed to start controller")?;

    let mut iterations: u64 = 0;
    loop {
        if let Some(board) = &board {
            board.set_pressure(simulated_pressure(board.now_us()));
        }

        let sleep = controller.run_iteration();
        iterations += 1;

        if args.max_iterations > 0 && iterations >= args.max_iterations {
            info!(iterations, "Reached max iterations, stopping");
            break;
        }

        if wait_for_shutdown(signal_handler, sleep) {
            break;
        }

        if let Some(board) = &board {
            board.advance(sleep);
        }
    }

    controller.shutdown();

    let snapshot = controller.metrics().snapshot();
    info!(
        iterations = snapshot.iterations,
        total_ticks = snapshot.total_ticks,
        backlog_clamps = snapshot.backlog_clamps,
        mean_sleep_ms = ?snapshot.mean_sleep_ms,
        published = controller.telemetry().published(),
        "Daemon stopped"
    );
    Ok(())
}

/// Slow triangle wave between 0 and 1000 with a two-minute period.
fn simulated_pressure(now_us: i64) -> i32 {
    const PERIOD_MS: i64 = 120_000;
    const PEAK: i64 = 1_000;
    let phase = now_us.div_euclid(1_000).rem_euclid(PERIOD_MS);
    let half = PERIOD_MS / 2;
    let level = if phase < half { phase } else { PERIOD_MS - phase };
    i32::try_from(level * PEAK / half).unwrap_or(0)
}
