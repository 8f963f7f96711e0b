//! connmgrd daemon entry point.
//!
//! Initializes logging, loads the configuration, constructs the
//! manager and runs until interrupted. The platform integration (a
//! real `IfaceRegistry` implementation feeding `handle_net_event`, and
//! backend registration for connectable interfaces) is provided by the
//! target system; this binary wires up the in-memory registry so the
//! daemon structure can run stand-alone.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use connmgrd::{ConnMgr, ConnMgrConfig, InMemoryRegistry};

#[derive(Debug, Parser)]
#[command(name = "connmgrd", about = "Connectivity manager daemon")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log verbosity (error, warn, info, debug, trace).
    #[arg(long, default_value = "info")]
    log_level: Level,
}

fn init_logging(level: Level) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.log_level);

    info!("--- Starting connmgrd ---");

    let config = match &args.config {
        Some(path) => match ConnMgrConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("failed to load {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => ConnMgrConfig::default(),
    };

    info!(
        max_interfaces = config.max_interfaces,
        online_check = config.online_check.enabled,
        strategy = ?config.online_check.strategy,
        "configuration loaded"
    );

    let registry = Arc::new(InMemoryRegistry::new());
    let mgr = ConnMgr::with_system_probe(&config, registry);
    mgr.start();

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("interrupt received, shutting down"),
        Err(e) => {
            error!("failed to wait for interrupt: {e}");
            mgr.shutdown();
            return ExitCode::FAILURE;
        }
    }

    mgr.shutdown();
    info!("connmgrd exiting normally");
    ExitCode::SUCCESS
}
