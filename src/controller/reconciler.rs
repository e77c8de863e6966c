use crate::backendpool::{new_backend_pool, BackendPool, PoolNames};
use crate::cloud::CacheReadType;
use crate::cluster::{ip_families, is_load_balancer_service, is_local_service, service_key, trim_internal_suffix};
use crate::provider::Cloud;
use crate::Result;
use k8s_openapi::api::core::v1::Service;
use log::{debug, error, info, warn};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Drives backend pool reconciliation for every tracked `LoadBalancer` service.
pub struct Reconciler {
    cloud: Arc<Cloud>,
    backend_pool: Box<dyn BackendPool>,
    // namespace/name -> svc
    services: RwLock<HashMap<String, Service>>,
}

impl Reconciler {
    pub fn new(cloud: Arc<Cloud>) -> Reconciler {
        let backend_pool = new_backend_pool(Arc::clone(&cloud));
        Reconciler::with_backend_pool(cloud, backend_pool)
    }

    pub fn with_backend_pool(cloud: Arc<Cloud>, backend_pool: Box<dyn BackendPool>) -> Reconciler {
        Reconciler {
            cloud,
            backend_pool,
            services: RwLock::new(HashMap::new()),
        }
    }

    pub fn tracked_services(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.services.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn apply_service(&self, service: Service) -> Result<()> {
        let key = service_key(&service);

        if !is_load_balancer_service(&service) {
            if self.services.write().remove(&key).is_some() {
                info!("Service {} is no longer of type LoadBalancer", key);
                self.cloud.forget_service(&service);
            }
            return Ok(());
        }

        self.services.write().insert(key, service.clone());
        self.reconcile_service(&service).await
    }

    pub fn delete_service(&self, service: &Service) {
        let key = service_key(service);
        if self.services.write().remove(&key).is_some() {
            info!("Deleted service {}", key);
        }
        self.cloud.forget_service(service);
    }

    /// Swaps the tracked services for a fresh listing and reconciles them all.
    pub async fn replace_services(&self, services: Vec<Service>) {
        let fresh: HashMap<String, Service> = services
            .into_iter()
            .filter(is_load_balancer_service)
            .map(|service| (service_key(&service), service))
            .collect();

        let gone: Vec<Service> = self
            .services
            .read()
            .iter()
            .filter(|(key, _)| !fresh.contains_key(*key))
            .map(|(_, service)| service.clone())
            .collect();
        for service in &gone {
            self.cloud.forget_service(service);
        }

        *self.services.write() = fresh;
        self.resync().await;
    }

    pub async fn resync(&self) {
        let services: Vec<Service> = self.services.read().values().cloned().collect();

        for service in &services {
            if let Err(e) = self.reconcile_service(service).await {
                error!("Error while reconciling service {}: {}", service_key(service), e);
            }
        }
    }

    pub async fn nodes_changed(&self) {
        let nodes = self.cloud.node_cache.nodes();
        if let Err(e) = self.cloud.rebalance_nodes(&nodes).await {
            error!("Error while spreading nodes over load balancers: {}", e);
        }

        self.resync().await;
    }

    // Only local services on multiple load balancers follow their endpoints.
    pub async fn endpoints_changed(&self, namespace: &str, name: &str) {
        if !self.cloud.use_multiple_standard_load_balancers() {
            return;
        }

        let key = format!("{}/{}", namespace, name);
        let service = self.services.read().get(&key).cloned();

        if let Some(service) = service.filter(is_local_service) {
            if let Err(e) = self.reconcile_service(&service).await {
                error!("Error while reconciling service {}: {}", key, e);
            }
        }
    }

    // Primary VM sets of every other load balancer configuration.
    fn foreign_vm_sets(&self, lb_name: &str) -> HashSet<String> {
        let own = trim_internal_suffix(lb_name);

        self.cloud
            .multi_slb_configs
            .read()
            .iter()
            .filter(|config| !config.name.eq_ignore_ascii_case(own))
            .map(|config| config.primary_vm_set.to_lowercase())
            .filter(|vm_set| !vm_set.is_empty())
            .collect()
    }

    pub async fn reconcile_service(&self, service: &Service) -> Result<()> {
        let cluster_name = self.cloud.config.cluster_name.as_str();
        let key = service_key(service);
        let lb_name = self.cloud.load_balancer_name_for_service(service, cluster_name);

        let lb = match self.cloud.get_load_balancer(&lb_name, CacheReadType::Default).await? {
            Some(lb) => lb,
            None => {
                debug!("Load balancer {} of service {} does not exist yet", lb_name, key);
                return Ok(());
            }
        };

        let reconciled = self.backend_pool.reconcile_backend_pools(cluster_name, service, lb).await?;
        let mut lb = match reconciled.load_balancer {
            Some(lb) => lb,
            None => {
                warn!("Load balancer {} disappeared while reconciling service {}", lb_name, key);
                return Ok(());
            }
        };

        let names = PoolNames::for_service(service, cluster_name, self.cloud.use_multiple_standard_load_balancers());
        if reconciled.changed {
            for pool in lb.backend_pools_mut().iter_mut().filter(|pool| pool.id.is_none()) {
                if names.family_of(pool.name()).is_none() {
                    continue;
                }

                info!("Creating backend pool {} of load balancer {}", pool.name(), lb_name);
                self.cloud.create_or_update_lb_backend_pool(&lb_name, pool).await?;
                pool.id = Some(self.cloud.backend_pool_id(&lb_name, pool.name()));
            }
        }

        let mut nodes = Vec::new();
        for node in self.cloud.node_cache.nodes() {
            let name = node.metadata.name.as_deref().unwrap_or_default();
            if self.cloud.should_node_excluded_from_load_balancer(name)? {
                debug!("Node {} is excluded from load balancers", name);
                continue;
            }
            nodes.push(node);
        }

        if self.cloud.use_multiple_standard_load_balancers() {
            let foreign = self.foreign_vm_sets(&lb_name);
            let should_remove = move |vm_set: &str| foreign.contains(&vm_set.to_lowercase());

            lb = match self
                .backend_pool
                .cleanup_vm_set_from_backend_pool_by_condition(lb, service, &nodes, cluster_name, &should_remove)
                .await?
            {
                Some(lb) => lb,
                None => return Ok(()),
            };
        }

        if reconciled.preconfigured {
            debug!("Backend pools of load balancer {} are preconfigured, leaving hosts alone", lb_name);
            return Ok(());
        }

        let vm_set_name = self.cloud.map_lb_name_to_vm_set(&lb_name, cluster_name);
        for family in ip_families(service) {
            let pool_name = names.name(family);
            let pool = match lb
                .backend_pools_mut()
                .iter_mut()
                .find(|pool| pool.name().eq_ignore_ascii_case(pool_name))
            {
                Some(pool) => pool,
                None => {
                    warn!("Backend pool {} is missing from load balancer {}", pool_name, lb_name);
                    continue;
                }
            };

            let pool_id = self.cloud.backend_pool_id(&lb_name, pool.name());
            self.backend_pool
                .ensure_hosts_in_pool(service, &nodes, &pool_id, &vm_set_name, cluster_name, &lb_name, pool)
                .await?;
        }

        let (v4, v6) = self.backend_pool.get_backend_private_ips(cluster_name, service, &lb).await;
        debug!("Service {} is backed by {:?} {:?}", key, v4, v6);

        Ok(())
    }
}
