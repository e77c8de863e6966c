use crate::backendpool::{
    add_missing_pools, backend_ip_configurations_to_be_deleted, remove_node_ip_addresses, BackendPool, PoolNames,
    ReconciledPools,
};
use crate::cloud::CacheReadType;
use crate::cluster::{ip_families_enabled, service_key, IpFamily};
use crate::network::{BackendAddressPool, BackendAddressPoolProperties, InterfaceIpConfiguration, LoadBalancer};
use crate::provider::Cloud;
use crate::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Service};
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::sync::Arc;

/// Backend pools whose members are NIC IP configurations.
pub struct NodeIpConfigPool {
    cloud: Arc<Cloud>,
}

impl NodeIpConfigPool {
    pub fn new(cloud: Arc<Cloud>) -> NodeIpConfigPool {
        NodeIpConfigPool { cloud }
    }

    // Sorts the IP configurations of a pool into those of vanished VMs and
    // those of nodes excluded from load balancers.
    async fn stale_ip_configurations(
        &self,
        pool: &BackendAddressPool,
    ) -> Result<(Vec<InterfaceIpConfiguration>, Vec<InterfaceIpConfiguration>)> {
        let mut not_found = Vec::new();
        let mut excluded = Vec::new();

        for ip_config in pool.ip_configurations() {
            let node_name = match self.cloud.vm_set.node_name_by_ip_configuration_id(ip_config.id()).await {
                Ok((node_name, _)) => node_name,
                Err(e) if e.is_instance_not_found() => String::new(),
                Err(e) => return Err(e),
            };

            if node_name.is_empty() {
                debug!("VM behind ip configuration {} is gone", ip_config.id());
                not_found.push(ip_config.clone());
                continue;
            }

            if self.cloud.should_node_excluded_from_load_balancer(&node_name)? {
                debug!("node {} is excluded from load balancers", node_name);
                excluded.push(ip_config.clone());
            }
        }

        Ok((not_found, excluded))
    }
}

#[async_trait]
impl BackendPool for NodeIpConfigPool {
    async fn ensure_hosts_in_pool(
        &self,
        service: &Service,
        nodes: &[Node],
        backend_pool_id: &str,
        vm_set_name: &str,
        _cluster_name: &str,
        _lb_name: &str,
        _pool: &mut BackendAddressPool,
    ) -> Result<()> {
        self.cloud
            .vm_set
            .ensure_hosts_in_pool(service, nodes, backend_pool_id, vm_set_name)
            .await
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

        let mut found = BTreeSet::new();
        let mut should_refresh = false;
        let mut doomed_pool_ids = Vec::new();
        let mut doomed_pools = Vec::new();

        let pool_count = lb.backend_pools().len();
        for i in (0..pool_count).rev() {
            let pool = &mut lb.backend_pools_mut()[i];
            let family = match names.family_of(pool.name()) {
                Some(family) => family,
                None => continue,
            };

            found.insert(family);
            if preconfigured {
                debug!("backend pool {} of load balancer {} is preconfigured", pool.name(), lb_name);
                break;
            }

            // Leftovers of an IP based pool must go before NICs can join it.
            if !pool.addresses().is_empty() && remove_node_ip_addresses(pool, &[], true, false, false) {
                info!("removing IP based members from backend pool {}", pool.name());
                if let Some(props) = pool.properties.as_mut() {
                    props.virtual_network = None;
                }

                self.cloud
                    .create_or_update_lb_backend_pool(&lb_name, pool)
                    .await
                    .map_err(|e| e.context(format!("failed to cleanup IP based backend pool {}", pool.name())))?;
                should_refresh = true;
            }

            let (not_found, excluded) = self.stale_ip_configurations(pool).await?;
            let to_be_deleted = backend_ip_configurations_to_be_deleted(pool, &not_found, &excluded);
            if to_be_deleted.is_empty() {
                continue;
            }

            let pool_id = self.cloud.backend_pool_id(&lb_name, pool.name());
            doomed_pools.push(BackendAddressPool {
                id: Some(pool_id.clone()),
                properties: Some(BackendAddressPoolProperties {
                    backend_ip_configurations: Some(to_be_deleted),
                    ..Default::default()
                }),
                ..Default::default()
            });
            doomed_pool_ids.push(pool_id);
        }

        if !doomed_pool_ids.is_empty() {
            let updated = self
                .cloud
                .vm_set
                .ensure_backend_pool_deleted(service, &doomed_pool_ids, &vm_set_name, &doomed_pools, false)
                .await?;
            should_refresh |= updated;
        }

        let mut load_balancer = Some(lb);
        if should_refresh {
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

            for ip_config in pool.ip_configurations() {
                let node_name = match self.cloud.vm_set.node_name_by_ip_configuration_id(ip_config.id()).await {
                    Ok((node_name, _)) => node_name,
                    Err(e) => {
                        error!("failed to resolve node of ip configuration {}: {}", ip_config.id(), e);
                        continue;
                    }
                };

                let private_ips = match self.cloud.node_cache.private_ips(&node_name) {
                    Some(ips) => ips,
                    None => {
                        warn!("no private IPs known for node {}", node_name);
                        continue;
                    }
                };

                for ip in private_ips {
                    match ip.parse::<IpAddr>() {
                        Ok(IpAddr::V4(_)) => {
                            v4.insert(ip);
                        }
                        Ok(IpAddr::V6(_)) => {
                            v6.insert(ip);
                        }
                        Err(_) => warn!("node {} has invalid private IP {}", node_name, ip),
                    }
                }
            }
        }

        (v4.into_iter().collect(), v6.into_iter().collect())
    }

    async fn cleanup_vm_set_from_backend_pool_by_condition(
        &self,
        mut lb: LoadBalancer,
        service: &Service,
        _nodes: &[Node],
        cluster_name: &str,
        should_remove_vm_set: &(dyn for<'s> Fn(&'s str) -> bool + Send + Sync),
    ) -> Result<Option<LoadBalancer>> {
        let lb_name = lb.name().to_owned();
        let names = PoolNames::cluster(cluster_name);
        let (v4_enabled, v6_enabled) = ip_families_enabled(service);

        let mut by_vm_set: BTreeMap<String, Vec<InterfaceIpConfiguration>> = BTreeMap::new();
        for pool in lb.backend_pools_mut().iter_mut() {
            if names.family_of(pool.name()).is_none() {
                continue;
            }
            debug!("checking backend pool {} of load balancer {}", pool.name(), lb_name);

            let ip_configs = match pool
                .properties
                .as_mut()
                .and_then(|p| p.backend_ip_configurations.as_mut())
            {
                Some(ip_configs) => ip_configs,
                None => continue,
            };

            let mut kept = Vec::with_capacity(ip_configs.len());
            for ip_config in ip_configs.drain(..) {
                let vm_set_name = match self.cloud.vm_set.node_name_by_ip_configuration_id(ip_config.id()).await {
                    Ok((_, vm_set_name)) => vm_set_name,
                    Err(e) if e.is_instance_not_found() => String::new(),
                    Err(e) => return Err(e),
                };

                if should_remove_vm_set(&vm_set_name) {
                    info!("decoupling VM set {} from load balancer {}", vm_set_name, lb_name);
                    by_vm_set
                        .entry(vm_set_name)
                        .or_default()
                        .push(InterfaceIpConfiguration::with_id(ip_config.id()));
                } else {
                    kept.push(ip_config);
                }
            }
            *ip_configs = kept;
        }

        let mut pool_ids = Vec::new();
        if v4_enabled {
            pool_ids.push(self.cloud.backend_pool_id(&lb_name, names.name(IpFamily::V4)));
        }
        if v6_enabled {
            pool_ids.push(self.cloud.backend_pool_id(&lb_name, names.name(IpFamily::V6)));
        }

        let mut load_balancer = Some(lb);
        for (vm_set_name, ip_configs) in by_vm_set {
            let doomed: Vec<BackendAddressPool> = pool_ids
                .iter()
                .map(|id| BackendAddressPool {
                    id: Some(id.clone()),
                    properties: Some(BackendAddressPoolProperties {
                        backend_ip_configurations: Some(ip_configs.clone()),
                        ..Default::default()
                    }),
                    ..Default::default()
                })
                .collect();

            let updated = self
                .cloud
                .vm_set
                .ensure_backend_pool_deleted(service, &pool_ids, &vm_set_name, &doomed, true)
                .await?;

            if updated {
                load_balancer = self
                    .cloud
                    .get_load_balancer(&lb_name, CacheReadType::ForceRefresh)
                    .await
                    .map_err(|e| e.context(format!("failed to get load balancer {}", lb_name)))?;
            }
        }

        Ok(load_balancer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backendpool::addresses::testing::{ips_of, pool_with_ip_configs, pool_with_vm_ips};
    use crate::cluster::service::testing::service;
    use crate::config::PreConfiguredBackendPoolTypes;
    use crate::provider::testing::{harness, test_config, FakeVmSet, Harness, Lookup};

    const NIC_1: &str = "/subscriptions/subscription/resourceGroups/rg/providers/Microsoft.Network/networkInterfaces/k8s-agentpool1-00000000-nic-1/ipConfigurations/ipconfig1";
    const NIC_2: &str = "/subscriptions/subscription/resourceGroups/rg/providers/Microsoft.Network/networkInterfaces/k8s-agentpool2-00000000-nic-1/ipConfigurations/ipconfig1";
    const NIC_3: &str = "/subscriptions/subscription/resourceGroups/rg/providers/Microsoft.Network/networkInterfaces/k8s-agentpool3-00000000-nic-1/ipConfigurations/ipconfig1";

    fn lb_with_ip_configs(name: &str, ids: &[&str]) -> LoadBalancer {
        let mut lb = LoadBalancer::named(name);
        lb.backend_pools_mut().push(pool_with_ip_configs(name, ids));
        lb
    }

    fn lb_with_ips(name: &str, ips: &[&str]) -> LoadBalancer {
        let mut lb = LoadBalancer::named(name);
        lb.backend_pools_mut().push(pool_with_vm_ips(name, ips));
        lb
    }

    fn ids_of(pool: &BackendAddressPool) -> Vec<&str> {
        pool.ip_configurations().iter().map(|c| c.id()).collect()
    }

    fn setup(config: crate::Config, vm_set: FakeVmSet) -> (Harness, NodeIpConfigPool) {
        let h = harness(config, vm_set);
        let pool = NodeIpConfigPool::new(Arc::clone(&h.cloud));
        (h, pool)
    }

    #[tokio::test]
    async fn decouples_excluded_nodes_and_refreshes() {
        let vm_set = FakeVmSet::with_primary("k8s-agentpool1-00000000");
        vm_set.lookup(NIC_1, Lookup::Found("k8s-agentpool1-00000000", ""));
        vm_set.lookup(NIC_2, Lookup::Found("k8s-agentpool2-00000000", ""));
        vm_set.deletes.lock().push_back(Ok(true));
        let (h, bc) = setup(test_config(), vm_set);
        h.node_cache.mark_synced();
        h.node_cache.exclude("k8s-agentpool1-00000000");
        h.lbs.returns(Some(LoadBalancer::default()));

        let svc = service("test", &["IPv4"]);
        let reconciled = bc
            .reconcile_backend_pools("kubernetes", &svc, lb_with_ip_configs("kubernetes", &[NIC_1, NIC_2]))
            .await
            .unwrap();

        let calls = h.vm_set.delete_calls.lock().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].vm_set, "k8s-agentpool1-00000000");
        assert!(!calls[0].delete_from_vm_set);
        assert_eq!(ids_of(&calls[0].pools[0]), vec![NIC_1]);

        // The refreshed load balancer lacks the pool, so it is appended again.
        let lb = reconciled.load_balancer.unwrap();
        assert!(reconciled.changed);
        assert_eq!(lb.backend_pools()[0].name(), "kubernetes");
    }

    #[tokio::test]
    async fn creates_missing_pool_even_when_preconfigured() {
        let mut config = test_config();
        config.pre_configured_backend_pool_load_balancer_types = Some(PreConfiguredBackendPoolTypes::All);
        let (_h, bc) = setup(config, FakeVmSet::default());

        let svc = service("test", &["IPv4"]);
        let reconciled = bc
            .reconcile_backend_pools("kubernetes", &svc, LoadBalancer::named("kubernetes"))
            .await
            .unwrap();

        assert!(!reconciled.preconfigured);
        assert!(reconciled.changed);
        assert_eq!(reconciled.load_balancer.unwrap().backend_pools()[0].name(), "kubernetes");
    }

    #[tokio::test]
    async fn removes_vanished_and_excluded_ip_configurations() {
        let vm_set = FakeVmSet::with_primary("k8s-agentpool1-00000000");
        vm_set.lookup(NIC_1, Lookup::Found("k8s-agentpool1-00000000", ""));
        vm_set.lookup(NIC_2, Lookup::Found("k8s-agentpool2-00000000", ""));
        vm_set.lookup(NIC_3, Lookup::NotFound);
        let (h, bc) = setup(test_config(), vm_set);
        h.node_cache.mark_synced();
        h.node_cache.exclude("k8s-agentpool1-00000000");

        let svc = service("test", &["IPv4"]);
        let lb = lb_with_ip_configs("kubernetes", &[NIC_1, NIC_2, NIC_3]);
        let reconciled = bc.reconcile_backend_pools("kubernetes", &svc, lb.clone()).await.unwrap();

        // Nothing was decoupled, so the load balancer is not refreshed.
        assert_eq!(reconciled.load_balancer, Some(lb.clone()));
        assert!(h.lbs.get_calls.lock().is_empty());

        let calls = h.vm_set.delete_calls.lock().clone();
        let mut deleted = ids_of(&calls[0].pools[0]);
        deleted.sort();
        assert_eq!(deleted, vec![NIC_1, NIC_3]);

        h.vm_set.lookup(NIC_1, Lookup::Fail("error"));
        let err = bc.reconcile_backend_pools("kubernetes", &svc, lb).await.unwrap_err();
        assert!(err.to_string().contains("error"));
    }

    #[tokio::test]
    async fn decouples_every_family_in_one_call() {
        let vm_set = FakeVmSet::with_primary("k8s-agentpool1-00000000");
        vm_set.lookup(NIC_1, Lookup::NotFound);
        vm_set.lookup(NIC_2, Lookup::NotFound);
        vm_set.deletes.lock().push_back(Ok(true));
        let (h, bc) = setup(test_config(), vm_set);
        h.node_cache.mark_synced();
        h.lbs.returns(Some(LoadBalancer::default()));

        // Pools read back without ids still get decoupled by their computed id.
        let mut lb = lb_with_ip_configs("kubernetes", &[NIC_1]);
        lb.backend_pools_mut().push(pool_with_ip_configs("kubernetes-IPv6", &[NIC_2]));

        let svc = service("test", &["IPv4", "IPv6"]);
        bc.reconcile_backend_pools("kubernetes", &svc, lb).await.unwrap();

        let v4_id = "/subscriptions/subscription/resourceGroups/rg/providers/Microsoft.Network/loadBalancers/kubernetes/backendAddressPools/kubernetes";
        let v6_id = "/subscriptions/subscription/resourceGroups/rg/providers/Microsoft.Network/loadBalancers/kubernetes/backendAddressPools/kubernetes-IPv6";

        let calls = h.vm_set.delete_calls.lock().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].pool_ids, vec![v6_id, v4_id]);
        let pool_ids: Vec<Option<&str>> = calls[0].pools.iter().map(|p| p.id.as_deref()).collect();
        assert_eq!(pool_ids, vec![Some(v6_id), Some(v4_id)]);
        assert_eq!(ids_of(&calls[0].pools[0]), vec![NIC_2]);
        assert_eq!(ids_of(&calls[0].pools[1]), vec![NIC_1]);

        assert_eq!(h.lbs.get_calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn preconfigured_pools_are_left_alone() {
        let mut config = test_config();
        config.pre_configured_backend_pool_load_balancer_types = Some(PreConfiguredBackendPoolTypes::All);
        let (h, bc) = setup(config, FakeVmSet::with_primary("k8s-agentpool1-00000000"));

        let svc = service("test", &["IPv4"]);
        let lb = lb_with_ip_configs("kubernetes", &[NIC_1, NIC_2]);
        let reconciled = bc.reconcile_backend_pools("kubernetes", &svc, lb.clone()).await.unwrap();

        assert!(reconciled.preconfigured);
        assert!(!reconciled.changed);
        assert_eq!(reconciled.load_balancer, Some(lb));
        assert!(h.vm_set.lookup_calls.lock().is_empty());
        assert!(h.vm_set.delete_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn strips_ip_members_left_by_node_ip_pools() {
        let (h, bc) = setup(test_config(), FakeVmSet::default());
        let svc = service("test", &["IPv4"]);

        h.pools.writes.lock().push_back(Err(crate::provider::testing::arm_error(
            "create or update LB backend pool error",
        )));
        let err = bc
            .reconcile_backend_pools("kubernetes", &svc, lb_with_ips("kubernetes", &["10.0.0.1", "10.0.0.2"]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("create or update LB backend pool error"));

        let reconciled = bc
            .reconcile_backend_pools("kubernetes", &svc, lb_with_ips("kubernetes", &["10.0.0.1", "10.0.0.2"]))
            .await
            .unwrap();
        assert_eq!(reconciled.load_balancer, None);

        let written = h.pools.written.lock();
        let (_, pool) = &written[0];
        assert!(ips_of(pool).is_empty());
        assert!(pool.properties.as_ref().unwrap().virtual_network.is_none());
    }

    #[tokio::test]
    async fn resolves_private_ips_through_nodes() {
        let vm_set = FakeVmSet::default();
        vm_set.lookup("ipconfig1", Lookup::Found("node1", ""));
        vm_set.lookup("ipconfig2", Lookup::Found("node2", ""));
        let (h, bc) = setup(test_config(), vm_set);
        h.node_cache.set_private_ips("node1", &["1.2.3.4", "fe80::1"]);

        let svc = service("svc1", &["IPv4"]);
        let (v4, v6) = bc
            .get_backend_private_ips(
                "kubernetes",
                &svc,
                &lb_with_ip_configs("kubernetes", &["ipconfig1", "ipconfig2"]),
            )
            .await;

        assert_eq!(v4, vec!["1.2.3.4"]);
        assert_eq!(v6, vec!["fe80::1"]);
    }

    #[tokio::test]
    async fn cleans_up_vm_sets_matching_condition() {
        let vm_set = FakeVmSet::with_primary("agentpool1-availabilitySet-00000000");
        vm_set.lookup(NIC_1, Lookup::Found("", "agentpool1-availabilitySet-00000000"));
        vm_set.lookup(NIC_2, Lookup::Found("", "agentpool2-availabilitySet-00000000"));
        vm_set.deletes.lock().push_back(Ok(true));
        let (h, bc) = setup(test_config(), vm_set);

        let refreshed = lb_with_ip_configs("testCluster", &[NIC_1]);
        h.lbs.returns(Some(refreshed.clone()));

        let primary = h.vm_set.primary.clone();
        let should_remove = move |vm_set: &str| !vm_set.is_empty() && !vm_set.eq_ignore_ascii_case(&primary);

        let svc = service("test", &["IPv4"]);
        let cleaned = bc
            .cleanup_vm_set_from_backend_pool_by_condition(
                lb_with_ip_configs("testCluster", &[NIC_1, NIC_2]),
                &svc,
                &[],
                "testCluster",
                &should_remove,
            )
            .await
            .unwrap();

        assert_eq!(cleaned, Some(refreshed));
        let calls = h.vm_set.delete_calls.lock().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].vm_set, "agentpool2-availabilitySet-00000000");
        assert!(calls[0].delete_from_vm_set);
        assert_eq!(
            calls[0].pool_ids,
            vec!["/subscriptions/subscription/resourceGroups/rg/providers/Microsoft.Network/loadBalancers/testCluster/backendAddressPools/testCluster"]
        );
        assert_eq!(ids_of(&calls[0].pools[0]), vec![NIC_2]);
    }

    #[tokio::test]
    async fn cleanup_keeps_local_copy_when_nothing_changed() {
        let vm_set = FakeVmSet::with_primary("agentpool1-availabilitySet-00000000");
        vm_set.lookup(NIC_1, Lookup::Found("", "agentpool1-availabilitySet-00000000"));
        vm_set.lookup(NIC_2, Lookup::Found("", "agentpool2-availabilitySet-00000000"));
        let (h, bc) = setup(test_config(), vm_set);

        let should_remove = |vm_set: &str| vm_set == "agentpool2-availabilitySet-00000000";
        let svc = service("test", &["IPv4"]);
        let cleaned = bc
            .cleanup_vm_set_from_backend_pool_by_condition(
                lb_with_ip_configs("testCluster", &[NIC_1, NIC_2]),
                &svc,
                &[],
                "testCluster",
                &should_remove,
            )
            .await
            .unwrap();

        assert_eq!(cleaned, Some(lb_with_ip_configs("testCluster", &[NIC_1])));
        assert!(h.lbs.get_calls.lock().is_empty());
    }
}
