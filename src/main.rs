use std::sync::Arc;

use clap::{Parser, Subcommand};

use fleet_control::config::{
    ManagerConfig, StoreConfig, ValidatorConfig, WatchdogConfig, WorkerConfig,
};
use fleet_control::manager::Manager;
use fleet_control::shutdown::{Shutdown, listen_for_signals};
use fleet_control::store::{Database, LibSqlBackend};
use fleet_control::validator::Validator;
use fleet_control::watchdog::Watchdog;
use fleet_control::worker::WorkerRuntime;

#[derive(Parser, Debug)]
#[command(name = "fleet-control")]
#[command(version)]
#[command(about = "Control plane for a multi-worker task fleet")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the Control API and run leader election plus scheduling
    Manager {
        /// Listen address (overrides FLEET_BIND)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Claim and execute jobs assigned to one identity
    Worker {
        /// Identity to register and claim under (overrides FLEET_WORKER_ID)
        #[arg(long)]
        worker_id: Option<String>,
    },

    /// Scan for stalled jobs, cost spikes and failure bursts
    Watchdog,

    /// Score completed jobs into run records
    Validator,
}

/// Open the system of record or exit before any loop starts.
async fn open_store() -> Arc<dyn Database> {
    let config = StoreConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export FLEET_DATABASE_URL=./data/fleet.db");
        std::process::exit(1);
    });
    match LibSqlBackend::connect(&config).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            eprintln!("Error: Failed to open database at {}: {e}", config.url);
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let shutdown = Shutdown::new();

    eprintln!("🛰  fleet-control v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Commands::Manager { bind } => {
            let mut config = ManagerConfig::from_env()?;
            if let Some(bind) = bind {
                config.bind = bind;
            }
            eprintln!("   Role: manager ({})", config.node_id);
            eprintln!("   Control API: http://{}", config.bind);

            let store = open_store().await;
            let manager = Manager::build(store, config)?;
            listen_for_signals(shutdown.clone());
            manager.run(shutdown).await?;
        }
        Commands::Worker { worker_id } => {
            let mut config = WorkerConfig::from_env()?;
            if let Some(id) = worker_id {
                config.worker_id = id;
            }
            eprintln!("   Role: worker ({})", config.worker_id);
            eprintln!("   Manager: {}", config.manager_url);
            eprintln!("   Backend: {}", config.adapter.backend);

            let runtime = Arc::new(WorkerRuntime::from_config(&config));
            listen_for_signals(shutdown.clone());
            runtime.start(shutdown).await?;
        }
        Commands::Watchdog => {
            let config = WatchdogConfig::from_env()?;
            eprintln!("   Role: watchdog");
            eprintln!("   Manager: {}", config.manager_url);

            let store = open_store().await;
            listen_for_signals(shutdown.clone());
            Arc::new(Watchdog::new(store, config)).start(shutdown).await?;
        }
        Commands::Validator => {
            let config = ValidatorConfig::from_env()?;
            eprintln!("   Role: validator");

            let store = open_store().await;
            listen_for_signals(shutdown.clone());
            Arc::new(Validator::new(store, config)).start(shutdown).await?;
        }
    }

    Ok(())
}
