//! Blobmesh Daemon
//!
//! Runs discovery cycles against a blob container on a fixed interval and
//! logs the resulting peer view. Deregisters on Ctrl-C, including one that
//! arrives mid-cycle.

use anyhow::{anyhow, Context};
use blobmesh_core::{NodeAddress, SystemClock};
use blobmesh_discovery::{
    daemon,
    observability::{init_metrics, init_tracing, TracingConfig},
    storage::{ObjectStoreClient, StoreConfig},
    DiscoveryConfig, DiscoveryController,
};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "blobmeshd")]
#[command(about = "Cluster membership discovery over blob storage")]
struct Cli {
    /// Cluster to join (overrides BLOBMESH_CLUSTER_ID)
    #[arg(long)]
    cluster_id: Option<String>,

    /// Node id (overrides BLOBMESH_NODE_ID)
    #[arg(long)]
    node_id: Option<String>,

    /// Address announced to peers, host:port (overrides BLOBMESH_ADDRESS)
    #[arg(long)]
    address: Option<NodeAddress>,

    /// Storage backend
    #[arg(long, value_enum, env = "BLOBMESH_STORE", default_value = "memory")]
    store: Backend,

    /// Directory used by the local backend
    #[arg(long, env = "BLOBMESH_STORE_ROOT", default_value = "./blobmesh-data")]
    store_root: PathBuf,

    #[arg(long, env = "AZURE_STORAGE_ACCOUNT_NAME")]
    azure_account: Option<String>,

    #[arg(long, env = "AZURE_STORAGE_ACCOUNT_KEY", hide_env_values = true)]
    azure_access_key: Option<String>,

    #[arg(long, env = "BLOBMESH_AZURE_CONTAINER", default_value = "blobmesh")]
    azure_container: String,

    /// Talk to a local Azurite emulator
    #[arg(long, env = "AZURE_STORAGE_USE_EMULATOR")]
    azure_use_emulator: bool,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "BLOBMESH_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,

    /// Run a single cycle, print the peers and exit
    #[arg(long)]
    once: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    Memory,
    Local,
    Azure,
}

impl Cli {
    fn store_config(&self) -> anyhow::Result<StoreConfig> {
        Ok(match self.store {
            Backend::Memory => StoreConfig::Memory,
            Backend::Local => StoreConfig::Local {
                root: self.store_root.clone(),
            },
            Backend::Azure => StoreConfig::Azure {
                account: self
                    .azure_account
                    .clone()
                    .context("--azure-account is required for the azure backend")?,
                access_key: self
                    .azure_access_key
                    .clone()
                    .context("--azure-access-key is required for the azure backend")?,
                container: self.azure_container.clone(),
                use_emulator: self.azure_use_emulator,
            },
        })
    }

    fn discovery_config(&self) -> DiscoveryConfig {
        let mut config = DiscoveryConfig::from_env();
        if let Some(cluster_id) = &self.cluster_id {
            config.cluster_id = cluster_id.clone();
        }
        if let Some(node_id) = &self.node_id {
            config.node_id = node_id.clone();
        }
        if let Some(address) = &self.address {
            config.address = address.clone();
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&TracingConfig::from_env())
        .map_err(|e| anyhow!("Failed to initialize tracing: {e}"))?;

    if let Some(addr) = cli.metrics_addr {
        init_metrics(addr).map_err(|e| anyhow!("Failed to start metrics exporter: {e}"))?;
        info!(%addr, "Metrics exporter listening");
    }

    let config = cli.discovery_config();
    let store = cli.store_config()?;
    info!(
        cluster_id = %config.cluster_id,
        node_id = %config.node_id,
        address = %config.address,
        store = ?store,
        "Starting blobmeshd"
    );

    let client = ObjectStoreClient::connect(&store)?;
    let mut controller = DiscoveryController::new(config, Arc::new(client), Arc::new(SystemClock))
        .context("Invalid discovery configuration")?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    let report = daemon::run(&mut controller, cli.once, shutdown).await;

    if cli.once {
        for peer in &report.view {
            println!("{peer}");
        }
    }
    info!(
        cycles = report.cycles,
        deregistration = ?report.deregistration,
        "blobmeshd stopped"
    );
    Ok(())
}
