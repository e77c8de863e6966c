use crate::network::{BackendAddressPool, LoadBalancer};
use crate::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Service};

#[async_trait]
pub trait LoadBalancerClient: Send + Sync {
    // Ok(None) when the load balancer does not exist.
    async fn get(&self, resource_group: &str, lb_name: &str) -> Result<Option<LoadBalancer>>;

    async fn migrate_to_ip_based(&self, resource_group: &str, lb_name: &str, pool_names: &[String]) -> Result<()>;
}

#[async_trait]
pub trait BackendAddressPoolClient: Send + Sync {
    async fn get(&self, resource_group: &str, lb_name: &str, pool_name: &str) -> Result<BackendAddressPool>;

    async fn create_or_update(
        &self,
        resource_group: &str,
        lb_name: &str,
        pool_name: &str,
        pool: &BackendAddressPool,
    ) -> Result<()>;
}

/// The group of VMs backing a cluster, as seen by the NIC-based backend pool.
#[async_trait]
pub trait VmSet: Send + Sync {
    fn primary_vm_set_name(&self) -> String;

    /// Resolves a NIC IP configuration ID to `(node name, VM set name)`.
    /// Fails with `InstanceNotFound` when the VM behind the NIC is gone.
    async fn node_name_by_ip_configuration_id(&self, ip_config_id: &str) -> Result<(String, String)>;

    async fn node_vm_set_name(&self, node: &Node) -> Result<String>;

    async fn ensure_hosts_in_pool(
        &self,
        service: &Service,
        nodes: &[Node],
        backend_pool_id: &str,
        vm_set_name: &str,
    ) -> Result<()>;

    /// Detaches the IP configurations listed in `pools` from the given pool IDs.
    /// Returns whether any NIC was updated.
    async fn ensure_backend_pool_deleted(
        &self,
        service: &Service,
        backend_pool_ids: &[String],
        vm_set_name: &str,
        pools: &[BackendAddressPool],
        delete_from_vm_set: bool,
    ) -> Result<bool>;
}
