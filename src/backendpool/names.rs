use crate::cluster::{is_local_service, IpFamily};
use k8s_openapi::api::core::v1::Service;

const IPV6_POOL_SUFFIX: &str = "-ipv6";

pub fn is_ipv6_pool_name(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(IPV6_POOL_SUFFIX)
}

/// Names of the backend pools a service wants on its load balancer, per family.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolNames {
    pub v4: String,
    pub v6: String,
}

impl PoolNames {
    pub fn cluster(cluster_name: &str) -> PoolNames {
        PoolNames {
            v4: cluster_name.to_owned(),
            v6: format!("{}-IPv6", cluster_name),
        }
    }

    // Local services get a dedicated pool per load balancer.
    pub fn for_service(service: &Service, cluster_name: &str, use_multi_slb: bool) -> PoolNames {
        if !(use_multi_slb && is_local_service(service)) {
            return PoolNames::cluster(cluster_name);
        }

        let base = format!(
            "{}-{}",
            service.metadata.namespace.as_deref().unwrap_or("default"),
            service.metadata.name.as_deref().unwrap_or_default()
        );
        PoolNames {
            v6: format!("{}{}", base, IPV6_POOL_SUFFIX),
            v4: base,
        }
    }

    pub fn name(&self, family: IpFamily) -> &str {
        match family {
            IpFamily::V4 => &self.v4,
            IpFamily::V6 => &self.v6,
        }
    }

    /// Which family a pool is wanted for, if it is wanted at all.
    pub fn family_of(&self, pool_name: &str) -> Option<IpFamily> {
        if pool_name.eq_ignore_ascii_case(&self.v4) {
            Some(IpFamily::V4)
        } else if pool_name.eq_ignore_ascii_case(&self.v6) {
            Some(IpFamily::V6)
        } else {
            None
        }
    }
}
