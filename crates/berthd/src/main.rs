//! berthd — the Berth hosting-node daemon.
//!
//! Single binary that assembles all Berth subsystems:
//! - State store (redb)
//! - Build pipeline + image builder client
//! - Release manager + cluster client
//! - Billing gate
//! - Domain verifier
//! - Advertisement-refresh worker
//! - REST API
//!
//! # Usage
//!
//! ```text
//! berthd standalone --config /etc/berth/berth.toml --port 8443
//! berthd init-config --node-id node-1 --network mutinynet --base-domain berth.host
//! ```

mod clients;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing::info;

use berth_api::ApiState;
use berth_billing::BillingGate;
use berth_build::BuildPipeline;
use berth_core::config::NodeConfig;
use berth_core::ChainNetwork;
use berth_domains::{DnsTxtLookup, DomainVerifier};
use berth_release::{spawn_advert_worker, LogNotifier, Notifier, ReleaseManager, ReleaseSettings};
use berth_state::StateStore;

const ADVERT_QUEUE_DEPTH: usize = 64;
const CLIENT_TIMEOUT_SECS: u64 = 30;

#[derive(Parser)]
#[command(name = "berthd", about = "Berth hosting-node daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the node (all subsystems in one process).
    Standalone {
        /// Node configuration file.
        #[arg(long, default_value = "/etc/berth/berth.toml")]
        config: PathBuf,

        /// Port to listen on.
        #[arg(long, default_value = "8443")]
        port: u16,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/berth")]
        data_dir: PathBuf,
    },
    /// Write a scaffold configuration file and exit.
    InitConfig {
        /// Stable identifier for this node.
        #[arg(long)]
        node_id: String,

        /// Chain network (mainnet, mutinynet, regtest).
        #[arg(long)]
        network: String,

        /// Base domain generated hostnames live under.
        #[arg(long)]
        base_domain: String,

        /// Where to write the file.
        #[arg(long, default_value = "/etc/berth/berth.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,berthd=debug,berth=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Standalone { config, port, data_dir } => run_standalone(config, port, data_dir).await,
        Command::InitConfig { node_id, network, base_domain, output } => {
            init_config(&node_id, &network, &base_domain, &output)
        }
    }
}

fn parse_network(s: &str) -> anyhow::Result<ChainNetwork> {
    match s {
        "mainnet" => Ok(ChainNetwork::Mainnet),
        "mutinynet" => Ok(ChainNetwork::Mutinynet),
        "regtest" => Ok(ChainNetwork::Regtest),
        other => anyhow::bail!("unknown network: {other}"),
    }
}

fn init_config(node_id: &str, network: &str, base_domain: &str, output: &PathBuf) -> anyhow::Result<()> {
    let config = NodeConfig::scaffold(node_id, parse_network(network)?, base_domain);
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, config.to_toml_string()?)?;
    info!(path = ?output, "configuration written");
    Ok(())
}

async fn run_standalone(config_path: PathBuf, port: u16, data_dir: PathBuf) -> anyhow::Result<()> {
    info!("Berth daemon starting in standalone mode");

    let config = NodeConfig::from_file(&config_path)?;
    std::fs::create_dir_all(&data_dir)?;
    std::fs::create_dir_all(&config.node.staging_dir)?;
    let db_path = data_dir.join("berth.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let builder = Arc::new(clients::HttpBuilder::new(
        &config.services.builder_url,
        config.timeouts.build_secs,
    )?);
    let pipeline = Arc::new(BuildPipeline::new(
        config.registry.host.clone(),
        config.node.staging_dir.clone(),
        builder,
        config.timeouts.push_secs,
    ));
    info!(registry = %config.registry.host, "build pipeline initialized");

    let cluster = Arc::new(clients::HttpCluster::new(
        &config.services.cluster_url,
        config.timeouts.apply_secs,
    )?);

    let notifier: Arc<dyn Notifier> = match &config.services.notify_webhook {
        Some(url) => Arc::new(clients::WebhookNotifier::new(url, CLIENT_TIMEOUT_SECS)?),
        None => Arc::new(LogNotifier),
    };

    let (advert_tx, advert_rx) = mpsc::channel(ADVERT_QUEUE_DEPTH);
    let advert_sink = Arc::new(clients::HttpAdvertSink::new(
        &config.services.advert_url,
        CLIENT_TIMEOUT_SECS,
    )?);
    let advert_handle = spawn_advert_worker(advert_rx, advert_sink);
    info!("advertisement worker started");

    let manager = Arc::new(ReleaseManager::new(
        store.clone(),
        pipeline,
        cluster.clone(),
        notifier,
        advert_tx,
        ReleaseSettings::from_config(&config),
    ));
    info!("release manager initialized");

    let metering = Arc::new(clients::HttpMetering::new(
        &config.services.metering_url,
        CLIENT_TIMEOUT_SECS,
    )?);
    let billing = Arc::new(BillingGate::new(
        store.clone(),
        cluster,
        metering,
        config.billing.clone(),
        ReleaseSettings::from_config(&config).topology,
    ));
    info!(interval = config.billing.interval_secs, "billing gate initialized");

    let verifier = Arc::new(DomainVerifier::new(
        store.clone(),
        Arc::new(DnsTxtLookup::from_system_conf()?),
    ));
    info!("domain verifier initialized");

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let billing_handle = tokio::spawn(billing.clone().run(shutdown_rx));

    // ── Start API server ───────────────────────────────────────

    let router = berth_api::build_router(ApiState {
        store,
        manager,
        billing,
        verifier,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for background tasks. The advert worker drains once every
    // sender (the release manager) is gone.
    let _ = billing_handle.await;
    advert_handle.abort();

    info!("Berth daemon stopped");
    Ok(())
}
