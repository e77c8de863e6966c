use crate::{PoolBalancerError, Result};

const NETWORK_PROVIDER: &str = "Microsoft.Network";

pub fn load_balancer_id(subscription_id: &str, resource_group: &str, lb_name: &str) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}/providers/{}/loadBalancers/{}",
        subscription_id, resource_group, NETWORK_PROVIDER, lb_name
    )
}

pub fn backend_pool_id(subscription_id: &str, resource_group: &str, lb_name: &str, pool_name: &str) -> String {
    format!(
        "{}/backendAddressPools/{}",
        load_balancer_id(subscription_id, resource_group, lb_name),
        pool_name
    )
}

pub fn vnet_id(subscription_id: &str, resource_group: &str, vnet_name: &str) -> String {
    format!(
        "/subscriptions/{}/resourceGroups/{}/providers/{}/virtualNetworks/{}",
        subscription_id, resource_group, NETWORK_PROVIDER, vnet_name
    )
}

// /subscriptions/{sub}/resourceGroups/{rg}/providers/{ns}/{type}/{name}[/{type}/{name}]*
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceId {
    pub subscription_id: String,
    pub resource_group: String,
    pub provider: String,
    pub segments: Vec<(String, String)>,
}

impl ResourceId {
    pub fn parse(id: &str) -> Result<ResourceId> {
        let invalid = || PoolBalancerError::InvalidResourceId(id.to_owned());

        let parts: Vec<&str> = id.trim_matches('/').split('/').collect();
        if parts.len() < 8 || parts.len() % 2 != 0 {
            return invalid().into();
        }

        if !parts[0].eq_ignore_ascii_case("subscriptions")
            || !parts[2].eq_ignore_ascii_case("resourceGroups")
            || !parts[4].eq_ignore_ascii_case("providers")
        {
            return invalid().into();
        }

        let segments = parts[6..]
            .chunks(2)
            .map(|pair| (pair[0].to_owned(), pair[1].to_owned()))
            .collect();

        Ok(ResourceId {
            subscription_id: parts[1].to_owned(),
            resource_group: parts[3].to_owned(),
            provider: parts[5].to_owned(),
            segments,
        })
    }

    pub fn name_of(&self, resource_type: &str) -> Option<&str> {
        self.segments
            .iter()
            .find(|(ty, _)| ty.eq_ignore_ascii_case(resource_type))
            .map(|(_, name)| name.as_str())
    }

    pub fn last_name(&self) -> &str {
        self.segments.last().map(|(_, name)| name.as_str()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_backend_pool_id() {
        assert_eq!(
            backend_pool_id("subscription", "rg", "kubernetes", "kubernetes-IPv6"),
            "/subscriptions/subscription/resourceGroups/rg/providers/Microsoft.Network/loadBalancers/kubernetes/backendAddressPools/kubernetes-IPv6"
        );
        assert_eq!(
            vnet_id("subscription", "rg", "vnet"),
            "/subscriptions/subscription/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet"
        );
    }

    #[test]
    fn parses_ip_configuration_id() {
        let id = ResourceId::parse(
            "/subscriptions/subscription/resourceGroups/rg/providers/Microsoft.Network/networkInterfaces/k8s-agentpool1-00000000-nic-1/ipConfigurations/ipconfig1",
        )
        .unwrap();

        assert_eq!(id.resource_group, "rg");
        assert_eq!(id.name_of("networkinterfaces"), Some("k8s-agentpool1-00000000-nic-1"));
        assert_eq!(id.last_name(), "ipconfig1");
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(ResourceId::parse("ipconfig1").is_err());
        assert!(ResourceId::parse("/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/networkInterfaces").is_err());
    }
}
