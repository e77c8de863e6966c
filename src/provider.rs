use crate::cloud::{
    backend_pool_id, vnet_id, BackendAddressPoolClient, CacheReadType, LoadBalancerClient, TimedCache, VmSet,
};
use crate::cluster::endpoint_slices::SERVICE_NAME_LABEL;
use crate::cluster::{
    active_nodes_for, distribute_nodes, endpoint_node_names, ip_families, is_local_service,
    requires_internal_load_balancer, service_key, trim_internal_suffix, EndpointSliceCache,
    MultipleStandardLoadBalancerConfiguration, NodeAssignment, NodeCache, ServiceInfo, ServiceInfoCache,
};
use crate::config::PreConfiguredBackendPoolTypes;
use crate::network::{BackendAddressPool, LoadBalancer};
use crate::{Config, PoolBalancerError, Result};
use k8s_openapi::api::core::v1::{Node, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::api::ListParams;
use kube::{Api, Client};
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

const MIGRATION_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MIGRATION_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Shared state of the backend pool reconcilers: configuration, cloud clients
/// and the caches fed by the cluster watchers.
pub struct Cloud {
    pub config: Arc<Config>,
    pub(crate) load_balancers: Arc<dyn LoadBalancerClient>,
    pub(crate) backend_pools: Arc<dyn BackendAddressPoolClient>,
    pub(crate) vm_set: Arc<dyn VmSet>,
    pub(crate) node_cache: Arc<NodeCache>,
    pub(crate) service_info: ServiceInfoCache,
    pub(crate) endpoint_slices: EndpointSliceCache,
    pub(crate) multi_slb_configs: RwLock<Vec<MultipleStandardLoadBalancerConfiguration>>,
    lb_cache: TimedCache<LoadBalancer>,
    kube_client: Option<Client>,
    pub(crate) migration_poll_interval: Duration,
    pub(crate) migration_timeout: Duration,
}

impl Cloud {
    pub fn new(
        config: Arc<Config>,
        load_balancers: Arc<dyn LoadBalancerClient>,
        backend_pools: Arc<dyn BackendAddressPoolClient>,
        vm_set: Arc<dyn VmSet>,
        node_cache: Arc<NodeCache>,
    ) -> Cloud {
        let multi_slb_configs = RwLock::new(config.multiple_standard_load_balancer_configurations.clone());
        let lb_cache = TimedCache::new(Duration::from_secs(config.load_balancer_cache_ttl_secs));

        Cloud {
            config,
            load_balancers,
            backend_pools,
            vm_set,
            node_cache,
            service_info: ServiceInfoCache::new(),
            endpoint_slices: EndpointSliceCache::new(),
            multi_slb_configs,
            lb_cache,
            kube_client: None,
            migration_poll_interval: MIGRATION_POLL_INTERVAL,
            migration_timeout: MIGRATION_TIMEOUT,
        }
    }

    pub fn with_kube_client(mut self, client: Client) -> Cloud {
        self.kube_client = Some(client);
        self
    }

    pub fn use_multiple_standard_load_balancers(&self) -> bool {
        self.config.use_multiple_standard_load_balancers()
    }

    pub fn backend_pool_id(&self, lb_name: &str, pool_name: &str) -> String {
        backend_pool_id(
            &self.config.subscription_id,
            self.config.load_balancer_resource_group(),
            lb_name,
            pool_name,
        )
    }

    pub fn vnet_id(&self) -> String {
        vnet_id(
            &self.config.subscription_id,
            self.config.vnet_resource_group(),
            &self.config.vnet_name,
        )
    }

    pub async fn get_load_balancer(&self, lb_name: &str, read_type: CacheReadType) -> Result<Option<LoadBalancer>> {
        let client = Arc::clone(&self.load_balancers);
        let resource_group = self.config.load_balancer_resource_group().to_owned();

        self.lb_cache
            .get(lb_name, read_type, move |name| async move { client.get(&resource_group, &name).await })
            .await
    }

    pub async fn create_or_update_lb_backend_pool(&self, lb_name: &str, pool: &BackendAddressPool) -> Result<()> {
        debug!("updating backend pool {} of load balancer {}", pool.name(), lb_name);
        let result = self
            .backend_pools
            .create_or_update(self.config.load_balancer_resource_group(), lb_name, pool.name(), pool)
            .await;

        // Invalidated on failure too.
        self.lb_cache.delete(lb_name);

        if let Err(e) = &result {
            error!("failed to update backend pool {} of load balancer {}: {}", pool.name(), lb_name, e);
        }
        result
    }

    /// Asks the cloud to turn NIC based pools into IP based ones, then waits until
    /// each pool holds as many IP members as it had NICs. A timeout only logs.
    pub async fn migrate_to_ip_based_backend_pool_and_wait(
        &self,
        lb_name: &str,
        pool_names: &[String],
        nic_counts: &HashMap<String, usize>,
    ) -> Result<()> {
        let resource_group = self.config.load_balancer_resource_group();

        if let Err(e) = self.load_balancers.migrate_to_ip_based(resource_group, lb_name, pool_names).await {
            error!(
                "failed to migrate backend pools {} of load balancer {} to IP based: {}",
                pool_names.join(","),
                lb_name,
                e
            );
            return Err(e);
        }

        let deadline = Instant::now() + self.migration_timeout;
        let mut pending: Vec<(&String, usize)> = nic_counts.iter().map(|(name, count)| (name, *count)).collect();

        loop {
            let mut still_pending = Vec::new();
            for (pool_name, nic_count) in pending {
                let pool = self.backend_pools.get(resource_group, lb_name, pool_name).await.map_err(|e| {
                    error!("failed to get backend pool {} of load balancer {}: {}", pool_name, lb_name, e);
                    e
                })?;

                let ip_count = crate::backendpool::count_ips(&pool);
                if ip_count != nic_count {
                    debug!(
                        "backend pool {} of load balancer {} has {} of {} IPs migrated",
                        pool_name, lb_name, ip_count, nic_count
                    );
                    still_pending.push((pool_name, nic_count));
                }
            }

            if still_pending.is_empty() {
                info!("migrated backend pools {} of load balancer {}", pool_names.join(","), lb_name);
                return Ok(());
            }

            if Instant::now() + self.migration_poll_interval > deadline {
                warn!(
                    "timed out waiting for backend pools {} of load balancer {} to migrate",
                    pool_names.join(","),
                    lb_name
                );
                return Ok(());
            }

            pending = still_pending;
            tokio::time::sleep(self.migration_poll_interval).await;
        }
    }

    pub fn map_lb_name_to_vm_set(&self, lb_name: &str, cluster_name: &str) -> String {
        let mut vm_set = trim_internal_suffix(lb_name).to_owned();
        if vm_set.eq_ignore_ascii_case(cluster_name) {
            vm_set = self.vm_set.primary_vm_set_name();
        }

        if self.use_multiple_standard_load_balancers() {
            let primary = self
                .multi_slb_configs
                .read()
                .iter()
                .find(|config| config.name.eq_ignore_ascii_case(&vm_set))
                .map(|config| config.primary_vm_set.clone());
            if let Some(primary) = primary {
                vm_set = primary;
            }
        }

        vm_set
    }

    pub fn is_backend_pool_preconfigured(&self, service: &Service) -> bool {
        let internal = requires_internal_load_balancer(service);
        match self.config.pre_configured_backend_pool_load_balancer_types {
            Some(PreConfiguredBackendPoolTypes::All) => true,
            Some(PreConfiguredBackendPoolTypes::Internal) => internal,
            Some(PreConfiguredBackendPoolTypes::External) => !internal,
            None => false,
        }
    }

    pub fn should_node_excluded_from_load_balancer(&self, node_name: &str) -> Result<bool> {
        self.node_cache.should_node_excluded_from_load_balancer(node_name)
    }

    pub fn active_nodes_for(&self, lb_name: &str) -> BTreeSet<String> {
        active_nodes_for(&self.multi_slb_configs.read(), lb_name)
    }

    /// Lower-cased names of the nodes running endpoints of a local service.
    pub async fn local_service_endpoint_nodes(&self, service: &Service) -> Result<BTreeSet<String>> {
        let namespace = service.metadata.namespace.as_deref().unwrap_or("default");
        let name = service.metadata.name.as_deref().unwrap_or_default();

        let mut slices = self.endpoint_slices.slices_for_service(namespace, name);
        if slices.is_empty() {
            if let Some(client) = &self.kube_client {
                debug!("endpoint slices of {}/{} are not cached, listing them", namespace, name);
                let api: Api<EndpointSlice> = Api::namespaced(client.clone(), namespace);
                let params = ListParams::default().labels(&format!("{}={}", SERVICE_NAME_LABEL, name));
                slices = api.list(&params).await.map_err(PoolBalancerError::KubeError)?.items;
            }
        }

        Ok(endpoint_node_names(&slices))
    }

    /// Name of the load balancer that should carry a service. With multiple
    /// standard load balancers the placement is remembered per service.
    pub fn load_balancer_name_for_service(&self, service: &Service, cluster_name: &str) -> String {
        let internal = requires_internal_load_balancer(service);
        let with_suffix = |name: &str| {
            if internal {
                format!("{}-internal", name)
            } else {
                name.to_owned()
            }
        };

        if !self.use_multiple_standard_load_balancers() {
            return with_suffix(cluster_name);
        }

        let key = service_key(service);
        if let Some(info) = self.service_info.get(&key) {
            return info.lb_name;
        }

        let mut configs = self.multi_slb_configs.write();
        let chosen = configs
            .iter()
            .position(|config| config.active_services.contains(&key))
            .or_else(|| {
                configs
                    .iter()
                    .enumerate()
                    .min_by_key(|(i, config)| (config.active_services.len(), *i))
                    .map(|(i, _)| i)
            });

        let lb_name = match chosen {
            Some(i) => {
                configs[i].active_services.insert(key.clone());
                with_suffix(&configs[i].name)
            }
            None => with_suffix(cluster_name),
        };

        if is_local_service(service) {
            let family = match ip_families(service).first() {
                Some(family) if family.is_ipv6() => "IPv6",
                _ => "IPv4",
            };
            self.service_info.store(&key, ServiceInfo::new(family, lb_name.clone()));
        }

        lb_name
    }

    pub fn forget_service(&self, service: &Service) {
        let key = service_key(service);
        self.service_info.remove(&key);
        for config in self.multi_slb_configs.write().iter_mut() {
            config.active_services.remove(&key);
        }
    }

    /// Spreads the eligible nodes over the configured load balancers.
    pub async fn rebalance_nodes(&self, nodes: &[Node]) -> Result<()> {
        if !self.use_multiple_standard_load_balancers() {
            return Ok(());
        }

        let mut assignments = Vec::with_capacity(nodes.len());
        for node in nodes {
            let name = match node.metadata.name.as_deref() {
                Some(name) => name,
                None => continue,
            };

            if self.should_node_excluded_from_load_balancer(name)? {
                continue;
            }

            let vm_set = match self.vm_set.node_vm_set_name(node).await {
                Ok(vm_set) => vm_set,
                Err(e) if e.is_instance_not_found() => {
                    debug!("node {} has no backing VM yet", name);
                    continue;
                }
                Err(e) => return Err(e),
            };

            assignments.push(NodeAssignment::new(
                name,
                node.metadata.labels.clone().unwrap_or_default(),
                &vm_set,
            ));
        }

        distribute_nodes(&mut self.multi_slb_configs.write(), &assignments);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::Cloud;
    use crate::cloud::{BackendAddressPoolClient, LoadBalancerClient, VmSet};
    use crate::cluster::NodeCache;
    use crate::network::{BackendAddressPool, LoadBalancer};
    use crate::{Config, PoolBalancerError, Result};
    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::{Node, Service};
    use kube::Client;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Arc;
    use std::time::Duration;

    pub fn arm_error(message: &str) -> PoolBalancerError {
        PoolBalancerError::ArmError {
            status: 500,
            code: "InternalError".to_owned(),
            message: message.to_owned(),
        }
    }

    pub fn test_config() -> Config {
        Config {
            cluster_name: "kubernetes".to_owned(),
            subscription_id: "subscription".to_owned(),
            resource_group: "rg".to_owned(),
            vnet_name: "vnet".to_owned(),
            ..Config::default()
        }
    }

    #[derive(Default)]
    pub struct FakeLoadBalancerClient {
        pub gets: Mutex<VecDeque<Result<Option<LoadBalancer>>>>,
        pub get_calls: Mutex<Vec<String>>,
        pub migrations: Mutex<VecDeque<Result<()>>>,
        pub migrate_calls: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl FakeLoadBalancerClient {
        pub fn returns(&self, lb: Option<LoadBalancer>) {
            self.gets.lock().push_back(Ok(lb));
        }
    }

    #[async_trait]
    impl LoadBalancerClient for FakeLoadBalancerClient {
        async fn get(&self, _resource_group: &str, lb_name: &str) -> Result<Option<LoadBalancer>> {
            self.get_calls.lock().push(lb_name.to_owned());
            self.gets.lock().pop_front().unwrap_or(Ok(None))
        }

        async fn migrate_to_ip_based(&self, _resource_group: &str, lb_name: &str, pool_names: &[String]) -> Result<()> {
            self.migrate_calls.lock().push((lb_name.to_owned(), pool_names.to_vec()));
            self.migrations.lock().pop_front().unwrap_or(Ok(()))
        }
    }

    #[derive(Default)]
    pub struct FakeBackendPoolClient {
        pub gets: Mutex<VecDeque<Result<BackendAddressPool>>>,
        pub writes: Mutex<VecDeque<Result<()>>>,
        pub written: Mutex<Vec<(String, BackendAddressPool)>>,
    }

    #[async_trait]
    impl BackendAddressPoolClient for FakeBackendPoolClient {
        async fn get(&self, _resource_group: &str, _lb_name: &str, pool_name: &str) -> Result<BackendAddressPool> {
            self.gets
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(BackendAddressPool::named(pool_name)))
        }

        async fn create_or_update(
            &self,
            _resource_group: &str,
            lb_name: &str,
            _pool_name: &str,
            pool: &BackendAddressPool,
        ) -> Result<()> {
            let result = self.writes.lock().pop_front().unwrap_or(Ok(()));
            if result.is_ok() {
                self.written.lock().push((lb_name.to_owned(), pool.clone()));
            }
            result
        }
    }

    pub enum Lookup {
        Found(&'static str, &'static str),
        NotFound,
        Fail(&'static str),
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct DeleteCall {
        pub pool_ids: Vec<String>,
        pub vm_set: String,
        pub pools: Vec<BackendAddressPool>,
        pub delete_from_vm_set: bool,
    }

    #[derive(Default)]
    pub struct FakeVmSet {
        pub primary: String,
        pub lookups: Mutex<HashMap<String, Lookup>>,
        pub node_vm_sets: Mutex<HashMap<String, String>>,
        pub deletes: Mutex<VecDeque<Result<bool>>>,
        pub delete_calls: Mutex<Vec<DeleteCall>>,
        pub lookup_calls: Mutex<Vec<String>>,
        pub ensured: Mutex<Vec<(String, Vec<String>, String)>>,
    }

    impl FakeVmSet {
        pub fn with_primary(primary: &str) -> FakeVmSet {
            FakeVmSet {
                primary: primary.to_owned(),
                ..Default::default()
            }
        }

        pub fn lookup(&self, ip_config_id: &str, result: Lookup) {
            self.lookups.lock().insert(ip_config_id.to_owned(), result);
        }
    }

    #[async_trait]
    impl VmSet for FakeVmSet {
        fn primary_vm_set_name(&self) -> String {
            self.primary.clone()
        }

        async fn node_name_by_ip_configuration_id(&self, ip_config_id: &str) -> Result<(String, String)> {
            self.lookup_calls.lock().push(ip_config_id.to_owned());
            match self.lookups.lock().get(ip_config_id) {
                Some(Lookup::Found(node, vm_set)) => Ok((node.to_string(), vm_set.to_string())),
                Some(Lookup::NotFound) => Err(PoolBalancerError::InstanceNotFound),
                Some(Lookup::Fail(message)) => Err(arm_error(message)),
                None => Err(PoolBalancerError::InstanceNotFound),
            }
        }

        async fn node_vm_set_name(&self, node: &Node) -> Result<String> {
            let name = node.metadata.name.clone().unwrap_or_default();
            Ok(self.node_vm_sets.lock().get(&name).cloned().unwrap_or_default())
        }

        async fn ensure_hosts_in_pool(
            &self,
            _service: &Service,
            nodes: &[Node],
            backend_pool_id: &str,
            vm_set_name: &str,
        ) -> Result<()> {
            let names = nodes.iter().filter_map(|n| n.metadata.name.clone()).collect();
            self.ensured
                .lock()
                .push((backend_pool_id.to_owned(), names, vm_set_name.to_owned()));
            Ok(())
        }

        async fn ensure_backend_pool_deleted(
            &self,
            _service: &Service,
            backend_pool_ids: &[String],
            vm_set_name: &str,
            pools: &[BackendAddressPool],
            delete_from_vm_set: bool,
        ) -> Result<bool> {
            self.delete_calls.lock().push(DeleteCall {
                pool_ids: backend_pool_ids.to_vec(),
                vm_set: vm_set_name.to_owned(),
                pools: pools.to_vec(),
                delete_from_vm_set,
            });
            self.deletes.lock().pop_front().unwrap_or(Ok(false))
        }
    }

    pub struct Harness {
        pub cloud: Arc<Cloud>,
        pub lbs: Arc<FakeLoadBalancerClient>,
        pub pools: Arc<FakeBackendPoolClient>,
        pub vm_set: Arc<FakeVmSet>,
        pub node_cache: Arc<NodeCache>,
    }

    pub fn harness(config: Config, vm_set: FakeVmSet) -> Harness {
        build_harness(config, vm_set, None)
    }

    pub fn harness_with_kube_client(config: Config, vm_set: FakeVmSet, client: Client) -> Harness {
        build_harness(config, vm_set, Some(client))
    }

    fn build_harness(config: Config, vm_set: FakeVmSet, client: Option<Client>) -> Harness {
        let lbs = Arc::new(FakeLoadBalancerClient::default());
        let pools = Arc::new(FakeBackendPoolClient::default());
        let vm_set = Arc::new(vm_set);
        let node_cache = Arc::new(NodeCache::new());

        let mut cloud = Cloud::new(
            Arc::new(config),
            lbs.clone(),
            pools.clone(),
            vm_set.clone(),
            Arc::clone(&node_cache),
        );
        cloud.migration_poll_interval = Duration::from_millis(1);
        cloud.migration_timeout = Duration::from_millis(20);
        cloud.kube_client = client;

        Harness {
            cloud: Arc::new(cloud),
            lbs,
            pools,
            vm_set,
            node_cache,
        }
    }
}
