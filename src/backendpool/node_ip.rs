use crate::backendpool::{
    add_missing_pools, add_node_ip_addresses, has_ip_address, is_ipv6_pool_name, is_nic_pool,
    remove_node_ip_addresses, BackendPool, PoolNames, ReconciledPools,
};
use crate::cloud::CacheReadType;
use crate::cluster::{is_control_plane_node, is_local_service, node_private_ip, service_key, IpFamily};
use crate::network::{BackendAddressPool, LoadBalancer, SubResource};
use crate::provider::Cloud;
use crate::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Service};
use log::{debug, error, info, warn};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

/// Backend pools whose members are bare node IPs.
pub struct NodeIpPool {
    cloud: Arc<Cloud>,
}

impl NodeIpPool {
    pub fn new(cloud: Arc<Cloud>) -> NodeIpPool {
        NodeIpPool { cloud }
    }

    // Nodes allowed in the pool; None means every node is.
    async fn active_nodes(&self, service: &Service, lb_name: &str) -> Result<Option<Option<BTreeSet<String>>>> {
        if !self.cloud.use_multiple_standard_load_balancers() {
            return Ok(Some(None));
        }

        if !is_local_service(service) {
            return Ok(Some(Some(self.cloud.active_nodes_for(lb_name))));
        }

        let key = service_key(service);
        let info = match self.cloud.service_info.get(&key) {
            Some(info) => info,
            None => {
                warn!("no load balancer recorded for local service {}", key);
                return Ok(None);
            }
        };

        if !info.lb_name.eq_ignore_ascii_case(lb_name) {
            debug!("local service {} lives on load balancer {}, not {}", key, info.lb_name, lb_name);
            return Ok(None);
        }

        Ok(Some(Some(self.cloud.local_service_endpoint_nodes(service).await?)))
    }

    // Moves the first per-member virtual network up to the pool.
    fn hoist_virtual_network(pool: &mut BackendAddressPool) -> bool {
        let props = match pool.properties.as_mut() {
            Some(props) => props,
            None => return false,
        };

        if props.virtual_network.as_ref().and_then(|vnet| vnet.id.as_ref()).is_some() {
            return false;
        }

        let mut vnet = String::new();
        for address in props.load_balancer_backend_addresses.iter_mut().flatten() {
            if let Some(address_props) = address.properties.as_mut() {
                if let Some(address_vnet) = address_props.virtual_network.take() {
                    if vnet.is_empty() {
                        vnet = address_vnet.id().to_owned();
                    }
                }
            }
        }

        if vnet.is_empty() {
            return false;
        }

        props.virtual_network = Some(SubResource::new(vnet));
        true
    }
}

#[async_trait]
impl BackendPool for NodeIpPool {
    async fn ensure_hosts_in_pool(
        &self,
        service: &Service,
        nodes: &[Node],
        _backend_pool_id: &str,
        _vm_set_name: &str,
        cluster_name: &str,
        lb_name: &str,
        pool: &mut BackendAddressPool,
    ) -> Result<()> {
        let use_multi_slb = self.cloud.use_multiple_standard_load_balancers();

        let active_nodes = match self.active_nodes(service, lb_name).await? {
            Some(active_nodes) => active_nodes,
            None => return Ok(()),
        };

        if use_multi_slb && is_nic_pool(pool) {
            info!("backend pool {} still references NICs, skipping", pool.name());
            return Ok(());
        }

        let family = IpFamily::from_ipv6(is_ipv6_pool_name(pool.name()));
        let wanted = PoolNames::for_service(service, cluster_name, use_multi_slb);
        if !pool.name().eq_ignore_ascii_case(wanted.name(family)) || pool.properties.is_none() {
            return Ok(());
        }

        if let Some(props) = pool.properties.as_mut() {
            props.load_balancer_backend_addresses.get_or_insert_with(Vec::new);
        }

        let is_active = |node_name: &str| {
            active_nodes
                .as_ref()
                .map(|active| active.contains(&node_name.to_lowercase()))
                .unwrap_or(true)
        };

        let mut node_ips = HashSet::new();
        let mut to_add = Vec::new();
        for node in nodes {
            if is_control_plane_node(node) {
                continue;
            }

            let private_ip = node_private_ip(node, family);
            node_ips.insert(private_ip.clone());

            let name = node.metadata.name.as_deref().unwrap_or_default();
            if !is_active(name) {
                continue;
            }

            if !private_ip.is_empty() && !has_ip_address(pool, &private_ip) && !to_add.contains(&private_ip) {
                to_add.push(private_ip);
            }
        }

        let node_cache = &self.cloud.node_cache;
        let vnet_id = self.cloud.vnet_id();
        let added = add_node_ip_addresses(pool, &to_add, &vnet_id, |ip| node_cache.node_name_for_ip(ip));

        let mut to_delete = Vec::new();
        for address in pool.addresses() {
            let ip = address.ip_address();
            if !node_ips.contains(ip) {
                to_delete.push(ip.to_owned());
                continue;
            }

            if use_multi_slb && active_nodes.is_some() {
                match node_cache.node_name_for_ip(ip) {
                    Some(node_name) if !is_active(&node_name) => to_delete.push(ip.to_owned()),
                    Some(_) => {}
                    None => warn!("no node known for IP {} in backend pool {}", ip, pool.name()),
                }
            }
        }
        let removed = remove_node_ip_addresses(pool, &to_delete, false, use_multi_slb, true);

        if !(added || removed) {
            return Ok(());
        }

        info!(
            "backend pool {} of load balancer {}: added {} and removed {} IPs for service {}",
            pool.name(),
            lb_name,
            to_add.len(),
            to_delete.len(),
            service_key(service)
        );
        self.cloud
            .create_or_update_lb_backend_pool(lb_name, pool)
            .await
            .map_err(|e| e.context(format!("failed to update backend pool {}", pool.name())))
    }

    async fn reconcile_backend_pools(
        &self,
        cluster_name: &str,
        service: &Service,
        mut lb: LoadBalancer,
    ) -> Result<ReconciledPools> {
        let lb_name = lb.name().to_owned();
        let names = PoolNames::for_service(service, cluster_name, self.cloud.use_multiple_standard_load_balancers());
        let vm_set_name = self.cloud.map_lb_name_to_vm_set(&lb_name, cluster_name);
        let mut preconfigured = self.cloud.is_backend_pool_preconfigured(service);

        let excluded_ips: Vec<String> = self
            .cloud
            .node_cache
            .excluded_nodes()
            .iter()
            .filter_map(|node_name| self.cloud.node_cache.private_ips(node_name))
            .flatten()
            .collect();

        let mut found = BTreeSet::new();
        let mut should_refresh = false;
        let mut is_migration = false;
        let mut nic_counts = HashMap::new();

        let pool_count = lb.backend_pools().len();
        for i in (0..pool_count).rev() {
            let pool_name = lb.backend_pools()[i].name().to_owned();
            let family = match names.family_of(&pool_name) {
                Some(family) => family,
                None => continue,
            };

            found.insert(family);
            if preconfigured {
                debug!("backend pool {} of load balancer {} is preconfigured", pool_name, lb_name);
                break;
            }

            let holds_nics = {
                let pool = &lb.backend_pools()[i];
                !pool.ip_configurations().is_empty() || pool.addresses().is_empty()
            };

            if lb.backend_pools()[i].properties.is_some() && holds_nics {
                info!("migrating backend pool {} of load balancer {} to IP based", pool_name, lb_name);

                if self.cloud.config.enable_migrate_to_ip_based_backend_pool_api {
                    nic_counts.insert(pool_name.clone(), lb.backend_pools()[i].ip_configurations().len());
                    self.cloud
                        .migrate_to_ip_based_backend_pool_and_wait(&lb_name, &[names.name(family).to_owned()], &nic_counts)
                        .await?;
                }

                let pool_id = self.cloud.backend_pool_id(&lb_name, names.name(family));
                should_refresh = self
                    .cloud
                    .vm_set
                    .ensure_backend_pool_deleted(service, &[pool_id], &vm_set_name, lb.backend_pools(), true)
                    .await?;
                is_migration = true;
            }

            let pool = &mut lb.backend_pools_mut()[i];
            let mut updated = false;
            if !excluded_ips.is_empty() && remove_node_ip_addresses(pool, &excluded_ips, false, false, true) {
                updated = true;
            }

            if Self::hoist_virtual_network(pool) {
                updated = true;
            }

            if updated {
                self.cloud
                    .create_or_update_lb_backend_pool(&lb_name, pool)
                    .await
                    .map_err(|e| {
                        e.context(format!(
                            "failed to update backend pool {} for load balancer {}",
                            pool_name, lb_name
                        ))
                    })?;
                should_refresh = true;
            }
        }

        let mut load_balancer = Some(lb);
        if should_refresh || is_migration {
            debug!("refreshing load balancer {} for service {}", lb_name, service_key(service));
            load_balancer = self
                .cloud
                .get_load_balancer(&lb_name, CacheReadType::ForceRefresh)
                .await
                .map_err(|e| e.context(format!("failed to get load balancer {}", lb_name)))?;
        }

        let changed = add_missing_pools(load_balancer.as_mut(), service, &names, &found, &mut preconfigured);

        Ok(ReconciledPools {
            preconfigured,
            changed,
            load_balancer,
        })
    }

    async fn get_backend_private_ips(
        &self,
        cluster_name: &str,
        service: &Service,
        lb: &LoadBalancer,
    ) -> (Vec<String>, Vec<String>) {
        let names = PoolNames::for_service(service, cluster_name, self.cloud.use_multiple_standard_load_balancers());
        let mut v4 = BTreeSet::new();
        let mut v6 = BTreeSet::new();

        for pool in lb.backend_pools() {
            if names.family_of(pool.name()).is_none() {
                continue;
            }

            for address in pool.addresses() {
                let ip = address.ip_address();
                match ip.parse::<IpAddr>() {
                    Ok(IpAddr::V4(_)) => {
                        v4.insert(ip.to_owned());
                    }
                    Ok(IpAddr::V6(_)) => {
                        v6.insert(ip.to_owned());
                    }
                    Err(_) => error!("backend pool {} has invalid IP {}", pool.name(), ip),
                }
            }
        }

        (v4.into_iter().collect(), v6.into_iter().collect())
    }

    async fn cleanup_vm_set_from_backend_pool_by_condition(
        &self,
        mut lb: LoadBalancer,
        _service: &Service,
        nodes: &[Node],
        cluster_name: &str,
        should_remove_vm_set: &(dyn for<'s> Fn(&'s str) -> bool + Send + Sync),
    ) -> Result<Option<LoadBalancer>> {
        let lb_name = lb.name().to_owned();
        let names = PoolNames::cluster(cluster_name);

        let mut doomed_nodes = Vec::new();
        for node in nodes {
            let vm_set_name = self.cloud.vm_set.node_vm_set_name(node).await?;
            if should_remove_vm_set(&vm_set_name) {
                doomed_nodes.push(node);
            }
        }

        for pool in lb.backend_pools_mut().iter_mut() {
            let family = match names.family_of(pool.name()) {
                Some(family) => family,
                None => continue,
            };
            debug!("checking backend pool {} of load balancer {}", pool.name(), lb_name);

            let doomed_ips: HashSet<String> = doomed_nodes.iter().map(|node| node_private_ip(node, family)).collect();

            let addresses = match pool
                .properties
                .as_mut()
                .and_then(|p| p.load_balancer_backend_addresses.as_mut())
            {
                Some(addresses) => addresses,
                None => continue,
            };

            let before = addresses.len();
            addresses.retain(|address| {
                address
                    .properties
                    .as_ref()
                    .and_then(|p| p.ip_address.as_ref())
                    .map(|ip| !doomed_ips.contains(ip))
                    .unwrap_or(true)
            });

            if addresses.len() != before {
                info!("removing {} IPs of unwanted VM sets from backend pool {}", before - addresses.len(), pool.name());
                self.cloud
                    .create_or_update_lb_backend_pool(&lb_name, pool)
                    .await
                    .map_err(|e| e.context(format!("failed to update backend pool {}", pool.name())))?;
            }
        }

        Ok(Some(lb))
    }
}
