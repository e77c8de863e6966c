use crate::network::{InterfaceIpConfiguration, SubResource};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendAddressPool {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<BackendAddressPoolProperties>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendAddressPoolProperties {
    #[serde(rename = "backendIPConfigurations", skip_serializing_if = "Option::is_none")]
    pub backend_ip_configurations: Option<Vec<InterfaceIpConfiguration>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_balancer_backend_addresses: Option<Vec<LoadBalancerBackendAddress>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virtual_network: Option<SubResource>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerBackendAddress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<LoadBalancerBackendAddressProperties>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerBackendAddressProperties {
    #[serde(rename = "ipAddress", skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virtual_network: Option<SubResource>,
    #[serde(rename = "networkInterfaceIPConfiguration", skip_serializing_if = "Option::is_none")]
    pub network_interface_ip_configuration: Option<SubResource>,
}

impl BackendAddressPool {
    pub fn named(name: impl Into<String>) -> BackendAddressPool {
        BackendAddressPool {
            name: Some(name.into()),
            properties: Some(BackendAddressPoolProperties::default()),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    pub fn addresses(&self) -> &[LoadBalancerBackendAddress] {
        self.properties
            .as_ref()
            .and_then(|p| p.load_balancer_backend_addresses.as_deref())
            .unwrap_or_default()
    }

    pub fn ip_configurations(&self) -> &[InterfaceIpConfiguration] {
        self.properties
            .as_ref()
            .and_then(|p| p.backend_ip_configurations.as_deref())
            .unwrap_or_default()
    }
}

impl LoadBalancerBackendAddress {
    pub fn from_ip(name: Option<String>, ip: impl Into<String>) -> LoadBalancerBackendAddress {
        LoadBalancerBackendAddress {
            name,
            properties: Some(LoadBalancerBackendAddressProperties {
                ip_address: Some(ip.into()),
                ..Default::default()
            }),
        }
    }

    // Empty for NIC based members.
    pub fn ip_address(&self) -> &str {
        self.properties
            .as_ref()
            .and_then(|p| p.ip_address.as_deref())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_arm_backend_pool() {
        let pool: BackendAddressPool = serde_json::from_value(json!({
            "id": "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/loadBalancers/kubernetes/backendAddressPools/kubernetes",
            "name": "kubernetes",
            "properties": {
                "backendIPConfigurations": [
                    { "id": "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/networkInterfaces/nic-0/ipConfigurations/ipconfig1" }
                ],
                "loadBalancerBackendAddresses": [
                    { "name": "vmss-0", "properties": { "ipAddress": "10.0.0.2", "virtualNetwork": { "id": "vnet" } } },
                    { "name": "nic", "properties": {} }
                ]
            }
        }))
        .unwrap();

        assert_eq!(pool.name(), "kubernetes");
        assert_eq!(pool.ip_configurations().len(), 1);
        assert_eq!(pool.addresses()[0].ip_address(), "10.0.0.2");
        assert_eq!(pool.addresses()[1].ip_address(), "");
    }

    #[test]
    fn encodes_only_present_fields() {
        let mut pool = BackendAddressPool::named("kubernetes");
        pool.properties.as_mut().unwrap().load_balancer_backend_addresses =
            Some(vec![LoadBalancerBackendAddress::from_ip(Some("vmss-0".to_owned()), "10.0.0.2")]);

        assert_eq!(
            serde_json::to_value(&pool).unwrap(),
            json!({
                "name": "kubernetes",
                "properties": {
                    "loadBalancerBackendAddresses": [
                        { "name": "vmss-0", "properties": { "ipAddress": "10.0.0.2" } }
                    ]
                }
            })
        );
    }
}
