use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceInfo {
    pub ip_family: String,
    pub lb_name: String,
}

impl ServiceInfo {
    pub fn new(ip_family: impl Into<String>, lb_name: impl Into<String>) -> ServiceInfo {
        ServiceInfo {
            ip_family: ip_family.into(),
            lb_name: lb_name.into(),
        }
    }
}

// Which load balancer backs each local service, keyed by "namespace/name".
#[derive(Default)]
pub struct ServiceInfoCache {
    entries: RwLock<HashMap<String, ServiceInfo>>,
}

impl ServiceInfoCache {
    pub fn new() -> ServiceInfoCache {
        ServiceInfoCache::default()
    }

    pub fn store(&self, key: &str, info: ServiceInfo) {
        self.entries.write().insert(key.to_lowercase(), info);
    }

    pub fn get(&self, key: &str) -> Option<ServiceInfo> {
        self.entries.read().get(&key.to_lowercase()).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<ServiceInfo> {
        self.entries.write().remove(&key.to_lowercase())
    }
}
