//! Candy Master - Region Assignment Service

use anyhow::anyhow;
use candy_master::{
    api::{self, AppState},
    config::{split_endpoints, MasterConfig},
    coordination::{CoordinationService, EtcdCoordination, MemoryCoordination, MASTER_ADDR_KEY},
    master::Master,
    notifier::HttpNotifier,
    observability::{init_metrics, init_tracing, shutdown_tracing, TracingConfig},
    version,
};
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "candy-master")]
#[command(about = "Region assignment and cluster membership master")]
#[command(version = version::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the master
    Run(RunArgs),
    /// Print build information
    Version,
}

#[derive(Args)]
struct RunArgs {
    /// HTTP listen address
    #[arg(long, env = "BIND_ADDR")]
    bind_addr: Option<String>,

    /// Address recorded under the leader key when elected
    #[arg(long, env = "ADVERTISE_ADDR")]
    advertise_addr: Option<String>,

    /// etcd endpoints (comma-separated); standalone mode when unset
    #[arg(long, env = "ETCD_ENDPOINTS")]
    etcd_endpoints: Option<String>,
}

impl RunArgs {
    fn into_config(self) -> MasterConfig {
        let mut config = MasterConfig::from_env();
        if let Some(addr) = self.bind_addr {
            config.bind_addr = addr;
        }
        if let Some(addr) = self.advertise_addr {
            config.advertise_addr = addr;
        }
        if let Some(endpoints) = self.etcd_endpoints {
            config.etcd_endpoints = split_endpoints(&endpoints);
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Version => {
            println!("{}", version::build_info());
            Ok(())
        }
        Commands::Run(args) => run(args.into_config()).await,
    }
}

async fn run(config: MasterConfig) -> anyhow::Result<()> {
    init_tracing(TracingConfig::from_env()).map_err(|e| anyhow!(e))?;
    let metrics_state = init_metrics().map_err(|e| anyhow!(e))?;

    info!(version = %version::full_version(), "Starting candy-master");
    info!(
        bind_addr = %config.bind_addr,
        advertise_addr = %config.advertise_addr,
        modulus = config.modulus,
        standalone = config.is_standalone(),
        "Configuration loaded"
    );

    let notifier = Arc::new(HttpNotifier::new(config.network_timeout));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (master, campaign) = if config.is_standalone() {
        warn!("No etcd endpoints configured, running standalone with in-memory regions");
        let store = Arc::new(MemoryCoordination::new());
        store.put(MASTER_ADDR_KEY, &config.advertise_addr);

        let master = Arc::new(Master::new(config.clone(), store, notifier));
        master.become_leader().await?;
        (master, None)
    } else {
        info!(endpoints = ?config.etcd_endpoints, "Connecting to etcd...");
        let etcd = Arc::new(EtcdCoordination::connect(&config).await?);
        info!("Connected to etcd");

        let coordination: Arc<dyn CoordinationService> = etcd.clone();
        let master = Arc::new(Master::new(config.clone(), coordination, notifier));

        let (leader_tx, leader_rx) = watch::channel(false);
        let follower = master.clone().follow(leader_rx);
        let campaign_config = config.clone();
        let campaign = tokio::spawn(async move {
            etcd.campaign(&campaign_config, leader_tx, shutdown_rx).await;
        });
        (master, Some((campaign, follower)))
    };

    let state = AppState::new(master.clone()).with_metrics(metrics_state);
    let app = api::create_router(state);

    info!(bind_addr = %config.bind_addr, "Starting API server");
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown_tx.send_replace(true);
    if let Some((campaign, follower)) = campaign {
        // campaign drops the leader sender on exit, which ends the follower
        campaign.await?;
        follower.await?;
    }
    master.shutdown().await;
    shutdown_tracing();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
