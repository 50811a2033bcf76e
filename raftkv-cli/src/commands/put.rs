//! Put command - write one key through a local single-node cluster.

use anyhow::{Context, Result};
use raftkv_cluster::{ClusterNode, LoopbackEngine, NodeConfig};
use std::path::Path;
use std::time::Duration;

const APPLY_TIMEOUT: Duration = Duration::from_secs(10);

/// Run the put command.
pub async fn run(data_dir: &Path, node_id: u64, key: &str, value: &str) -> Result<()> {
    let config = NodeConfig::builder()
        .node_id(node_id)
        .data_dir(data_dir)
        .build()
        .map_err(anyhow::Error::msg)?;

    let engine = LoopbackEngine::new(&config);
    let (node, handle) = ClusterNode::start(config, engine)
        .await
        .context("Failed to start node")?;

    let target = handle.applied_index() + 1;
    handle.put(key, value).await.context("Failed to submit put")?;

    let applied = tokio::time::timeout(APPLY_TIMEOUT, async {
        while handle.applied_index() < target {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;

    let reason = node.stop().await.context("Node stopped with an error")?;
    tracing::debug!(?reason, "Node stopped");

    if applied.is_err() {
        anyhow::bail!("Put was not applied within {:?}", APPLY_TIMEOUT);
    }

    println!("{key}={value} (index {target})");
    Ok(())
}
