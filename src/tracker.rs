//! Tracks this node's position in the authorized set.

use std::sync::{Arc, RwLock};

use anyhow::Result;
use tokio::sync::Mutex;
use tracing::info;

use crate::client::ChainClient;

/// Snapshot of the node set as of the last refresh.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeSetView {
    /// This node's zero-based slot, `None` while unauthorized.
    pub my_index: Option<usize>,
    pub node_count: usize,
}

#[derive(Debug)]
pub struct NodeSet {
    client: Arc<ChainClient>,
    view: RwLock<NodeSetView>,
    refresh_lock: Mutex<()>,
}

impl NodeSet {
    pub fn new(client: Arc<ChainClient>) -> Self {
        NodeSet {
            client,
            view: RwLock::new(NodeSetView::default()),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn view(&self) -> NodeSetView {
        *self.view.read().unwrap()
    }

    /// Re-read the authorized set from the contract. Refreshes are serialized
    /// so overlapping membership events observe a consistent snapshot.
    pub async fn refresh(&self) -> Result<NodeSetView> {
        let _guard = self.refresh_lock.lock().await;

        let nodes = self.client.authorized_nodes().await?;
        let new = NodeSetView {
            my_index: nodes.iter().position(|n| *n == self.client.node_address),
            node_count: nodes.len(),
        };

        let old = std::mem::replace(&mut *self.view.write().unwrap(), new);
        if old != new {
            match new.my_index {
                Some(index) => info!("authorized as node {index} of {}", new.node_count),
                None => info!("not in the authorized set ({} nodes)", new.node_count),
            }
        }
        Ok(new)
    }
}
