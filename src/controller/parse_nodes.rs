use crate::controller::Controller;
use crate::{PoolBalancerError, Result};
use futures_util::TryStreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::api::ListParams;
use kube::Api;
use kube_runtime::watcher;
use kube_runtime::watcher::Event;
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::BTreeSet;

// What decides a node's place in backend pools.
type Membership = (Option<BTreeSet<String>>, bool);

impl Controller {
    pub async fn fetch_nodes(&self) -> Result<Vec<Node>> {
        let node_api: Api<Node> = Api::all(self.client.clone());

        let params = ListParams::default();
        let nodes = node_api.list(&params).await.map_err(PoolBalancerError::KubeError)?.items;

        Ok(nodes)
    }

    pub(super) async fn seed_nodes(&self) -> Result<()> {
        let nodes = self.fetch_nodes().await?;
        info!("Seeding {} nodes", nodes.len());

        let node_cache = &self.cloud.node_cache;
        node_cache.start_sync();
        node_cache.replace_all(&nodes);
        node_cache.mark_synced();

        self.cloud.rebalance_nodes(&nodes).await
    }

    fn membership(&self, node: &Node) -> Membership {
        let name = node.metadata.name.as_deref().unwrap_or_default().to_lowercase();
        let node_cache = &self.cloud.node_cache;

        (node_cache.private_ips(&name), node_cache.excluded_nodes().contains(&name))
    }

    pub async fn watch_nodes(&self) -> Result<()> {
        let node_api: Api<Node> = Api::all(self.client.clone());

        let pending = Mutex::new(Vec::new());
        let pending = &pending;

        let watcher = watcher(node_api, watcher::Config::default());
        watcher
            .try_for_each(move |ev| async move {
                match ev {
                    // Add or update
                    Event::Apply(node) => {
                        let before = self.membership(&node);
                        self.cloud.node_cache.apply(&node);

                        if self.membership(&node) != before {
                            info!("Node {} changed its load balancer membership", node.metadata.name.as_deref().unwrap_or_default());
                            self.reconciler.nodes_changed().await;
                        }
                    }

                    Event::Delete(node) => {
                        self.cloud.node_cache.delete(&node);
                        info!("Deleted node {}", node.metadata.name.as_deref().unwrap_or_default());
                        self.reconciler.nodes_changed().await;
                    }

                    Event::Init => {
                        info!("Got node stream restarted");
                        self.cloud.node_cache.start_sync();
                        pending.lock().clear();
                    }

                    Event::InitApply(node) => pending.lock().push(node),

                    Event::InitDone => {
                        let nodes = std::mem::take(&mut *pending.lock());
                        debug!("Node stream relisted {} nodes", nodes.len());

                        self.cloud.node_cache.replace_all(&nodes);
                        self.cloud.node_cache.mark_synced();
                        self.reconciler.nodes_changed().await;
                    }
                }

                Ok(())
            })
            .await
            .map_err(PoolBalancerError::WatcherError)?;

        Ok(())
    }
}
