//! Node wiring: chain, peer-to-peer gossip and the optional HTTP API.

pub mod config;
pub mod wallet;

use std::sync::Arc;

use anyhow::Context;
use futures::future::join_all;
use tracing::{info, warn};

use quarry_api::ApiState;
use quarry_chain::{Chain, JsonFileStore};
use quarry_p2p::{Broadcaster, P2pNode};

pub use config::{ConfigError, NodeConfig};

/// Open the chain described by `config`: persisted under `data_dir` when
/// one is set, in memory otherwise.
pub fn open_chain(config: &NodeConfig) -> anyhow::Result<Chain> {
    let params = config.consensus;
    match &config.data_dir {
        Some(dir) => {
            let store = JsonFileStore::open(dir)
                .with_context(|| format!("opening chain store in {}", dir.display()))?;
            let chain = Chain::open(params, Arc::new(store)).context("loading stored chain")?;
            info!(data_dir = %dir.display(), height = chain.height(), "chain loaded");
            Ok(chain)
        }
        None => Ok(Chain::new(params)),
    }
}

/// Start every service and block until ctrl-c.
pub async fn run(config: NodeConfig) -> anyhow::Result<()> {
    config.validate()?;
    info!(
        difficulty = config.consensus.difficulty,
        block_reward = config.consensus.block_reward,
        "starting node"
    );

    let chain_config = config.clone();
    let chain = tokio::task::spawn_blocking(move || open_chain(&chain_config))
        .await
        .context("chain startup task failed")??;
    let chain = Arc::new(chain);

    let node = P2pNode::with_dial_timeout(Arc::clone(&chain), config.dial_timeout());
    node.listen(&config.p2p_listen)
        .await
        .with_context(|| format!("binding p2p listener on {}", config.p2p_listen))?;

    let dials = config.peers.iter().map(|peer| {
        let node = Arc::clone(&node);
        async move { (peer, node.connect(peer).await) }
    });
    for (peer, result) in join_all(dials).await {
        if let Err(err) = result {
            warn!(%peer, %err, "could not reach bootstrap peer");
        }
    }

    if let Some(addr) = config.api_listen {
        let broadcaster: Arc<dyn Broadcaster> = node.clone();
        let state = ApiState::new(Arc::clone(&chain)).with_broadcaster(broadcaster);
        let (_, server) = quarry_api::bind(addr, state)
            .with_context(|| format!("binding http api on {addr}"))?;
        tokio::spawn(server);
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!(height = chain.height(), peers = node.peer_count(), "shutting down");
    Ok(())
}
