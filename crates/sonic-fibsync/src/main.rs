//! fibsyncd entry point.
//!
//! Replays a scripted sequence of route, neighbor and link events against a
//! simulated ASIC, optionally seeded from a warm-boot snapshot, and prints
//! the resulting tables as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use sonic_asic::SimAsic;
use sonic_fibsync::replay::{self, FibEvent};
use sonic_fibsync::{FibSync, FibSyncConfig, WarmBootSnapshot};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Hardware forwarding-state sync daemon
#[derive(Parser, Debug)]
#[command(name = "fibsyncd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (YAML, or JSON with a .json extension)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Warm-boot snapshot of the hardware tables; implies --warm-boot
    #[arg(short = 's', long)]
    snapshot: Option<PathBuf>,

    /// Start by reconciling against the snapshot
    #[arg(long)]
    warm_boot: bool,

    /// Program /32 and /128 routes as LPM rows
    #[arg(long)]
    no_host_routes: bool,

    /// JSON event script to replay
    #[arg(short = 'e', long)]
    script: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();

    match run(args) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failed) => {
            error!("{} events failed", failed);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("fibsyncd failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> Result<FibSyncConfig> {
    let mut config = match &args.config {
        Some(path) => FibSyncConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => FibSyncConfig::default(),
    };
    if args.snapshot.is_some() {
        config.warm_boot_snapshot = args.snapshot.clone();
        config.warm_boot = true;
    }
    if args.warm_boot {
        config.warm_boot = true;
    }
    if args.no_host_routes {
        config.platform.host_table_for_host_routes = false;
    }
    config.validate()?;
    Ok(config)
}

/// Seeds the simulated chip with what the previous run left behind.
fn preload(asic: &SimAsic, snapshot: &WarmBootSnapshot) {
    for egress in &snapshot.egresses {
        asic.preload_egress(egress.id, egress.row);
    }
    for ecmp in &snapshot.ecmps {
        asic.preload_ecmp(ecmp.id, ecmp.paths.iter().copied());
    }
    for host in &snapshot.hosts {
        asic.preload_host(*host);
    }
    for route in &snapshot.routes {
        asic.preload_route(*route);
    }
    for port in &snapshot.ports {
        asic.set_port_state(port.port, port.up);
    }
}

/// Returns the number of failed events.
fn run(args: Args) -> Result<usize> {
    let config = load_config(&args)?;
    info!("Starting fibsyncd (warm boot: {})", config.warm_boot);

    let snapshot = match &config.warm_boot_snapshot {
        Some(path) => Some(
            WarmBootSnapshot::load(path)
                .with_context(|| format!("loading warm boot snapshot {}", path.display()))?,
        ),
        None => None,
    };

    let asic = Arc::new(SimAsic::new());
    if let Some(snapshot) = &snapshot {
        preload(&asic, snapshot);
    }
    let fib = FibSync::from_config(asic, &config, snapshot.as_ref())?;

    let events: Vec<FibEvent> = match &args.script {
        Some(path) => replay::load_script(path)
            .with_context(|| format!("loading script {}", path.display()))?,
        None => Vec::new(),
    };
    let summary = replay::replay(&fib, &events);

    let dump = serde_json::to_string_pretty(&fib.dump()).context("serializing table dump")?;
    println!("{}", dump);
    Ok(summary.failed)
}
