use crate::cloud::{ArmClient, ResourceId, VmSet};
use crate::cluster::{is_control_plane_node, service_key, NodeCache};
use crate::network::{BackendAddressPool, NetworkInterface, SubResource, VirtualMachine};
use crate::{PoolBalancerError, Result};
use async_trait::async_trait;
use futures::future::join_all;
use k8s_openapi::api::core::v1::{Node, Service};
use log::{debug, error, info};
use std::sync::Arc;

const NIC_FAILED_STATE: &str = "Failed";

// VM set made of availability sets and standalone VMs, one NIC per node.
pub struct AvailabilitySet {
    arm: Arc<ArmClient>,
    resource_group: String,
    primary_availability_set: String,
    node_cache: Arc<NodeCache>,
}

impl AvailabilitySet {
    pub fn new(
        arm: Arc<ArmClient>,
        resource_group: String,
        primary_availability_set: String,
        node_cache: Arc<NodeCache>,
    ) -> AvailabilitySet {
        AvailabilitySet {
            arm,
            resource_group,
            primary_availability_set,
            node_cache,
        }
    }

    async fn virtual_machine(&self, vm_name: &str) -> Result<VirtualMachine> {
        self.arm
            .get_virtual_machine(&self.resource_group, vm_name)
            .await?
            .ok_or(PoolBalancerError::InstanceNotFound)
    }

    async fn primary_interface(&self, vm: &VirtualMachine) -> Result<(String, String, NetworkInterface)> {
        let nic_id = vm.primary_nic_id().ok_or(PoolBalancerError::InstanceNotFound)?;
        let parsed = ResourceId::parse(nic_id)?;
        let nic_name = parsed.last_name().to_owned();

        let nic = self
            .arm
            .get_network_interface(&parsed.resource_group, &nic_name)
            .await?
            .ok_or(PoolBalancerError::InstanceNotFound)?;

        Ok((parsed.resource_group, nic_name, nic))
    }

    fn vm_set_name_of(vm: &VirtualMachine) -> String {
        vm.availability_set_id()
            .and_then(|id| ResourceId::parse(id).ok())
            .map(|id| id.last_name().to_lowercase())
            .unwrap_or_default()
    }

    fn nic_failed(nic: &NetworkInterface) -> bool {
        nic.properties
            .as_ref()
            .and_then(|p| p.other.get("provisioningState"))
            .and_then(|state| state.as_str())
            .map(|state| state.eq_ignore_ascii_case(NIC_FAILED_STATE))
            .unwrap_or(false)
    }

    async fn ensure_host_in_pool(&self, node_name: &str, backend_pool_id: &str, vm_set_name: &str) -> Result<()> {
        let vm = self.virtual_machine(node_name).await?;

        let node_vm_set = Self::vm_set_name_of(&vm);
        if !vm_set_name.is_empty() && !node_vm_set.is_empty() && !node_vm_set.eq_ignore_ascii_case(vm_set_name) {
            debug!("node {} is not in vm set {}, skipping", node_name, vm_set_name);
            return Ok(());
        }

        let (resource_group, nic_name, mut nic) = self.primary_interface(&vm).await?;
        if Self::nic_failed(&nic) {
            info!("network interface {} is in failed state, skipping", nic_name);
            return Ok(());
        }

        let ip_config = match nic.primary_ip_configuration_mut() {
            Some(config) => config,
            None => return Ok(()),
        };

        let pools = ip_config
            .properties
            .get_or_insert_with(Default::default)
            .load_balancer_backend_address_pools
            .get_or_insert_with(Vec::new);
        if pools.iter().any(|pool| pool.id().eq_ignore_ascii_case(backend_pool_id)) {
            return Ok(());
        }

        pools.push(SubResource::new(backend_pool_id));
        info!("adding node {} to backend pool {}", node_name, backend_pool_id);
        self.arm
            .create_or_update_network_interface(&resource_group, &nic_name, &nic)
            .await
    }
}

#[async_trait]
impl VmSet for AvailabilitySet {
    fn primary_vm_set_name(&self) -> String {
        self.primary_availability_set.clone()
    }

    async fn node_name_by_ip_configuration_id(&self, ip_config_id: &str) -> Result<(String, String)> {
        let parsed = ResourceId::parse(ip_config_id)?;
        let nic_name = parsed
            .name_of("networkInterfaces")
            .ok_or_else(|| PoolBalancerError::InvalidResourceId(ip_config_id.to_owned()))?;

        let nic = self
            .arm
            .get_network_interface(&parsed.resource_group, nic_name)
            .await?
            .ok_or(PoolBalancerError::InstanceNotFound)?;

        let vm_id = nic.virtual_machine_id().ok_or(PoolBalancerError::InstanceNotFound)?;
        let vm_name = ResourceId::parse(vm_id)?.last_name().to_owned();
        let vm = self.virtual_machine(&vm_name).await?;

        Ok((vm_name.to_lowercase(), Self::vm_set_name_of(&vm)))
    }

    async fn node_vm_set_name(&self, node: &Node) -> Result<String> {
        let name = node.metadata.name.as_deref().unwrap_or_default();
        let vm = self.virtual_machine(name).await?;
        Ok(Self::vm_set_name_of(&vm))
    }

    async fn ensure_hosts_in_pool(
        &self,
        service: &Service,
        nodes: &[Node],
        backend_pool_id: &str,
        vm_set_name: &str,
    ) -> Result<()> {
        let mut updates = Vec::new();
        for node in nodes {
            let name = match node.metadata.name.as_deref() {
                Some(name) => name,
                None => continue,
            };

            if is_control_plane_node(node) {
                continue;
            }

            if self.node_cache.should_node_excluded_from_load_balancer(name)? {
                debug!("node {} is excluded from load balancers", name);
                continue;
            }

            updates.push(async move { (name, self.ensure_host_in_pool(name, backend_pool_id, vm_set_name).await) });
        }

        let mut first_err = None;
        for (name, result) in join_all(updates).await {
            match result {
                Ok(()) => {}
                Err(e) if e.is_instance_not_found() => {
                    info!("node {} not found while ensuring it is in pool, skipping", name);
                }
                Err(e) => {
                    error!("failed to ensure node {} in pool for service {}: {}", name, service_key(service), e);
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn ensure_backend_pool_deleted(
        &self,
        service: &Service,
        backend_pool_ids: &[String],
        vm_set_name: &str,
        pools: &[BackendAddressPool],
        _delete_from_vm_set: bool,
    ) -> Result<bool> {
        let ip_config_ids: Vec<String> = pools
            .iter()
            .filter(|pool| {
                let id = pool.id.as_deref().unwrap_or_default();
                backend_pool_ids.iter().any(|wanted| wanted.eq_ignore_ascii_case(id))
            })
            .flat_map(|pool| pool.ip_configurations())
            .filter_map(|config| config.id.clone())
            .collect();

        let mut nics = Vec::new();
        for ip_config_id in ip_config_ids {
            let (node_name, _) = match self.node_name_by_ip_configuration_id(&ip_config_id).await {
                Ok(found) => found,
                Err(e) if e.is_instance_not_found() => continue,
                Err(e) => {
                    error!("failed to resolve ip configuration {}: {}", ip_config_id, e);
                    return Err(e);
                }
            };

            let vm = self.virtual_machine(&node_name).await?;
            let vm_set = Self::vm_set_name_of(&vm);
            // Standalone VMs have no availability set.
            if !vm_set.is_empty() && !vm_set.eq_ignore_ascii_case(vm_set_name) {
                debug!("skipping node {} because it is not in vm set {}", node_name, vm_set_name);
                continue;
            }

            let (resource_group, nic_name, mut nic) = self.primary_interface(&vm).await?;
            if Self::nic_failed(&nic) {
                info!("network interface {} is in failed state, skipping", nic_name);
                continue;
            }

            let mut changed = false;
            for config in nic.ip_configurations_mut().iter_mut().filter(|c| c.is_primary()) {
                if let Some(attached) = config
                    .properties
                    .as_mut()
                    .and_then(|p| p.load_balancer_backend_address_pools.as_mut())
                {
                    let before = attached.len();
                    attached.retain(|pool| !backend_pool_ids.iter().any(|id| id.eq_ignore_ascii_case(pool.id())));
                    changed |= attached.len() != before;
                }
            }

            if changed {
                nics.push((resource_group, nic_name, nic));
            }
        }

        if nics.is_empty() {
            return Ok(false);
        }

        info!(
            "decoupling {} network interfaces of service {} from {:?}",
            nics.len(),
            service_key(service),
            backend_pool_ids
        );
        let results = join_all(
            nics.iter()
                .map(|(rg, name, nic)| self.arm.create_or_update_network_interface(rg, name, nic)),
        )
        .await;

        for result in results {
            result?;
        }

        Ok(true)
    }
}
