use crate::cluster::IpFamily;
use k8s_openapi::api::core::v1::Service;

pub const INTERNAL_LOAD_BALANCER_ANNOTATION: &str = "service.beta.kubernetes.io/azure-load-balancer-internal";

// "namespace/name"
pub fn service_key(service: &Service) -> String {
    format!(
        "{}/{}",
        service.metadata.namespace.as_deref().unwrap_or("default"),
        service.metadata.name.as_deref().unwrap_or_default()
    )
}

pub fn is_local_service(service: &Service) -> bool {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.external_traffic_policy.as_deref())
        .map(|policy| policy == "Local")
        .unwrap_or(false)
}

pub fn is_load_balancer_service(service: &Service) -> bool {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.type_.as_deref())
        .map(|ty| ty == "LoadBalancer")
        .unwrap_or(false)
}

pub fn requires_internal_load_balancer(service: &Service) -> bool {
    service
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(INTERNAL_LOAD_BALANCER_ANNOTATION))
        .map(|value| value == "true")
        .unwrap_or(false)
}

// Services that do not declare families are treated as IPv4 only.
pub fn ip_families(service: &Service) -> Vec<IpFamily> {
    let families: Vec<IpFamily> = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ip_families.as_ref())
        .map(|families| families.iter().filter_map(|f| IpFamily::parse_service_family(f)).collect())
        .unwrap_or_default();

    if families.is_empty() {
        vec![IpFamily::V4]
    } else {
        families
    }
}

pub fn ip_families_enabled(service: &Service) -> (bool, bool) {
    let families = ip_families(service);
    (families.contains(&IpFamily::V4), families.contains(&IpFamily::V6))
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn reads_service_traits() {
        let svc = internal(local(service("svc-1", &["IPv4", "IPv6"])));
        assert_eq!(service_key(&svc), "default/svc-1");
        assert!(is_local_service(&svc));
        assert!(is_load_balancer_service(&svc));
        assert!(requires_internal_load_balancer(&svc));
        assert_eq!(ip_families_enabled(&svc), (true, true));
    }

    #[test]
    fn defaults_to_ipv4() {
        let svc = service("svc-1", &[]);
        assert_eq!(ip_families(&svc), vec![IpFamily::V4]);
        assert!(!is_local_service(&svc));
        assert!(!requires_internal_load_balancer(&svc));
    }
}
