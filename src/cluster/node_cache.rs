use crate::cluster::node::{has_cloud_uninitialized_taint, has_label, is_managed_by_cloud_provider, is_node_ready, EXCLUDE_BALANCER_LABEL};
use crate::cluster::node_internal_ips;
use crate::{PoolBalancerError, Result};
use k8s_openapi::api::core::v1::Node;
use log::{debug, info};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum InformerState {
    // No informer feeds this cache; exclusion checks always pass.
    Untracked,
    Syncing,
    Synced,
}

// Keys are lower-cased node names.
pub struct NodeCache {
    nodes: RwLock<HashMap<String, Node>>,
    private_ips: RwLock<HashMap<String, BTreeSet<String>>>,
    ip_to_node: RwLock<HashMap<String, String>>,
    excluded: RwLock<HashSet<String>>,
    state: RwLock<InformerState>,
}

impl Default for NodeCache {
    fn default() -> Self {
        NodeCache::new()
    }
}

impl NodeCache {
    pub fn new() -> NodeCache {
        NodeCache {
            nodes: RwLock::new(HashMap::new()),
            private_ips: RwLock::new(HashMap::new()),
            ip_to_node: RwLock::new(HashMap::new()),
            excluded: RwLock::new(HashSet::new()),
            state: RwLock::new(InformerState::Untracked),
        }
    }

    pub fn start_sync(&self) {
        *self.state.write() = InformerState::Syncing;
    }

    pub fn mark_synced(&self) {
        *self.state.write() = InformerState::Synced;
    }

    pub fn apply(&self, node: &Node) {
        let name = match node.metadata.name.as_deref() {
            Some(name) => name.to_lowercase(),
            None => return,
        };

        self.forget(&name);

        let ips: BTreeSet<String> = node_internal_ips(node).into_iter().collect();
        {
            let mut ip_to_node = self.ip_to_node.write();
            for ip in &ips {
                ip_to_node.insert(ip.clone(), name.clone());
            }
        }
        debug!("node {} has private ips {:?}", name, ips);
        self.private_ips.write().insert(name.clone(), ips);

        if Self::should_exclude(node) {
            info!("excluding node {} from load balancers", name);
            self.excluded.write().insert(name.clone());
        }

        self.nodes.write().insert(name, node.clone());
    }

    pub fn delete(&self, node: &Node) {
        if let Some(name) = node.metadata.name.as_deref() {
            self.forget(&name.to_lowercase());
        }
    }

    pub fn replace_all(&self, nodes: &[Node]) {
        self.nodes.write().clear();
        self.private_ips.write().clear();
        self.ip_to_node.write().clear();
        self.excluded.write().clear();

        for node in nodes {
            self.apply(node);
        }
    }

    fn forget(&self, name: &str) {
        self.nodes.write().remove(name);
        self.excluded.write().remove(name);
        if let Some(ips) = self.private_ips.write().remove(name) {
            let mut ip_to_node = self.ip_to_node.write();
            for ip in ips {
                if ip_to_node.get(&ip).map(|owner| owner == name).unwrap_or(false) {
                    ip_to_node.remove(&ip);
                }
            }
        }
    }

    fn should_exclude(node: &Node) -> bool {
        if !is_managed_by_cloud_provider(node) || has_label(node, EXCLUDE_BALANCER_LABEL) {
            return true;
        }

        // Fresh nodes still waiting for the cloud provider are not excluded.
        !is_node_ready(node) && !has_cloud_uninitialized_taint(node)
    }

    pub fn set_private_ips(&self, node_name: &str, ips: &[&str]) {
        let name = node_name.to_lowercase();
        let mut ip_to_node = self.ip_to_node.write();
        for ip in ips {
            ip_to_node.insert(ip.to_string(), name.clone());
        }
        self.private_ips
            .write()
            .insert(name, ips.iter().map(|ip| ip.to_string()).collect());
    }

    pub fn exclude(&self, node_name: &str) {
        self.excluded.write().insert(node_name.to_lowercase());
    }

    pub fn nodes(&self) -> Vec<Node> {
        let nodes = self.nodes.read();
        let mut names: Vec<&String> = nodes.keys().collect();
        names.sort();
        names.into_iter().filter_map(|name| nodes.get(name).cloned()).collect()
    }

    pub fn private_ips(&self, node_name: &str) -> Option<BTreeSet<String>> {
        self.private_ips.read().get(&node_name.to_lowercase()).cloned()
    }

    pub fn node_name_for_ip(&self, ip: &str) -> Option<String> {
        self.ip_to_node.read().get(ip).cloned()
    }

    pub fn excluded_nodes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.excluded.read().iter().cloned().collect();
        names.sort();
        names
    }

    pub fn should_node_excluded_from_load_balancer(&self, node_name: &str) -> Result<bool> {
        match *self.state.read() {
            InformerState::Untracked => return Ok(false),
            InformerState::Syncing => return PoolBalancerError::NodeCacheNotSynced.into(),
            InformerState::Synced => {}
        }

        Ok(self.excluded.read().contains(&node_name.to_lowercase()))
    }
}
