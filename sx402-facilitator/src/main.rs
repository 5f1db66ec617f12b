//! EIP-3009 payment facilitator HTTP server.
//!
//! # Usage
//!
//! ```bash
//! # Run with default config (config.json in current directory)
//! cargo run -p sx402-facilitator --release
//!
//! # Run with custom config path
//! cargo run -p sx402-facilitator -- --config /path/to/config.json
//!
//! # Configure logging level
//! RUST_LOG=debug cargo run -p sx402-facilitator
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to the JSON configuration file (default: `config.json`)
//! - `HOST` - Override bind address (default: `0.0.0.0`)
//! - `PORT` - Override port (default: `4021`)
//! - `RUST_LOG` - Log level filter (default: `info`)

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use sx402::chain::{self, ChainId};
use sx402::networks;
use sx402_evm::client::ChainClient;
use sx402_evm::facilitator::{Facilitator, MultiChainFacilitator};
use sx402_evm::wallet;
use tracing_subscriber::EnvFilter;

use sx402_facilitator::config::FacilitatorConfig;
use sx402_facilitator::facilitator_router;
use sx402_facilitator::util::SigDown;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("Facilitator failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = FacilitatorConfig::load()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        networks = config.networks.len(),
        time_source = ?config.time_source,
        "Loaded configuration"
    );

    let chains = chain::builtin();
    let mut registry = networks::builtin().clone();
    for (key, entry) in &config.networks {
        match entry.resolved_rpc_url() {
            Some(rpc_url) => registry = registry.with_rpc_url(key, rpc_url)?,
            None if entry.rpc_url.is_some() => tracing::warn!(
                network = %key,
                "Ignoring rpc_url: not resolved (missing env var?), using default endpoints"
            ),
            None => {}
        }
    }
    chain::validate_tables(&registry, chains)?;
    let registry = Arc::new(registry);
    let chains = Arc::new(chains.clone());

    let options = config.facilitator_options();
    let mut facilitator = MultiChainFacilitator::new(Arc::clone(&registry), Arc::clone(&chains));
    let mut claimed: BTreeMap<ChainId, &str> = BTreeMap::new();

    for (key, entry) in &config.networks {
        let network = registry.resolve(key)?;
        if let Some(previous) = claimed.insert(network.chain_id, key) {
            return Err(format!(
                "networks {previous} and {key} both resolve to {} (chain {})",
                network.name, network.chain_id
            )
            .into());
        }
        if entry.signer_unresolved() {
            tracing::warn!(
                network = %key,
                "Skipping network: signer_private_key not resolved (missing env var?)"
            );
            continue;
        }

        let client = wallet::connect_network(
            &entry.signer_private_key,
            &network,
            &chains,
            entry.client_options(config.read_timeout()),
        )
        .map_err(|e| format!("network {key}: {e}"))?;
        let signer = client.signer_address();
        tracing::info!(
            network = %network.name,
            chain_id = network.chain_id,
            signer = %signer,
            "Registered network"
        );
        facilitator.register(
            Facilitator::new(network, client, options)
                .with_tables(Arc::clone(&registry), Arc::clone(&chains)),
        );
    }

    if facilitator.is_empty() {
        tracing::warn!("No networks configured, every payment will be rejected");
    }

    let app = facilitator_router(Arc::new(facilitator));

    let sig_down = SigDown::try_new()?;
    let token = sig_down.cancellation_token();

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Facilitator listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;
    sig_down.recv().await;

    tracing::info!("Facilitator shut down gracefully");
    Ok(())
}
