mod addresses;
pub use addresses::{
    add_node_ip_addresses, backend_ip_configurations_to_be_deleted, count_ips, has_ip_address, is_nic_pool,
    remove_node_ip_addresses,
};

mod names;
pub use names::{is_ipv6_pool_name, PoolNames};

mod node_ip_config;
pub use node_ip_config::NodeIpConfigPool;

mod node_ip;
pub use node_ip::NodeIpPool;

use crate::cluster::{ip_families, IpFamily};
use crate::config::BackendPoolType;
use crate::network::{BackendAddressPool, LoadBalancer};
use crate::provider::Cloud;
use crate::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Service};
use log::info;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Outcome of reconciling the backend pools of a load balancer.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconciledPools {
    pub preconfigured: bool,
    /// A wanted pool was missing and has been appended to the load balancer.
    pub changed: bool,
    /// The load balancer after reconciliation, refreshed from the cloud when a
    /// write happened. None when the refresh found nothing.
    pub load_balancer: Option<LoadBalancer>,
}

#[async_trait]
pub trait BackendPool: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn ensure_hosts_in_pool(
        &self,
        service: &Service,
        nodes: &[Node],
        backend_pool_id: &str,
        vm_set_name: &str,
        cluster_name: &str,
        lb_name: &str,
        pool: &mut BackendAddressPool,
    ) -> Result<()>;

    async fn reconcile_backend_pools(
        &self,
        cluster_name: &str,
        service: &Service,
        lb: LoadBalancer,
    ) -> Result<ReconciledPools>;

    /// Private IPs behind the wanted pools, sorted and split into (IPv4, IPv6).
    async fn get_backend_private_ips(
        &self,
        cluster_name: &str,
        service: &Service,
        lb: &LoadBalancer,
    ) -> (Vec<String>, Vec<String>);

    async fn cleanup_vm_set_from_backend_pool_by_condition(
        &self,
        lb: LoadBalancer,
        service: &Service,
        nodes: &[Node],
        cluster_name: &str,
        should_remove_vm_set: &(dyn for<'s> Fn(&'s str) -> bool + Send + Sync),
    ) -> Result<Option<LoadBalancer>>;
}

pub fn new_backend_pool(cloud: Arc<Cloud>) -> Box<dyn BackendPool> {
    match cloud.config.load_balancer_backend_pool_configuration_type {
        BackendPoolType::NodeIpConfiguration => Box::new(NodeIpConfigPool::new(cloud)),
        BackendPoolType::NodeIp => Box::new(NodeIpPool::new(cloud)),
    }
}

// Appends the wanted pools the load balancer lacks. Creating a pool means it was
// not preconfigured after all.
pub(crate) fn add_missing_pools(
    lb: Option<&mut LoadBalancer>,
    service: &Service,
    names: &PoolNames,
    found: &BTreeSet<IpFamily>,
    preconfigured: &mut bool,
) -> bool {
    let lb = match lb {
        Some(lb) => lb,
        None => return false,
    };

    let mut changed = false;
    for family in ip_families(service) {
        if found.contains(&family) {
            continue;
        }

        let name = names.name(family);
        if *preconfigured {
            info!(
                "backend pool {} of load balancer {} is preconfigured but missing, creating it",
                name,
                lb.name()
            );
            *preconfigured = false;
        }

        lb.backend_pools_mut().push(BackendAddressPool::named(name));
        changed = true;
    }

    changed
}
