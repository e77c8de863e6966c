use crate::network::SubResource;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InterfaceIpConfiguration {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<InterfaceIpConfigurationProperties>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceIpConfigurationProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<bool>,
    #[serde(rename = "privateIPAddress", skip_serializing_if = "Option::is_none")]
    pub private_ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_balancer_backend_address_pools: Option<Vec<SubResource>>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkInterface {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<NetworkInterfaceProperties>,
    // location, tags and etag must survive a read-modify-write.
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virtual_machine: Option<SubResource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_configurations: Option<Vec<InterfaceIpConfiguration>>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl InterfaceIpConfiguration {
    pub fn with_id(id: impl Into<String>) -> InterfaceIpConfiguration {
        InterfaceIpConfiguration {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    pub fn is_primary(&self) -> bool {
        self.properties.as_ref().and_then(|p| p.primary).unwrap_or(false)
    }
}

impl NetworkInterface {
    pub fn ip_configurations_mut(&mut self) -> &mut [InterfaceIpConfiguration] {
        self.properties
            .as_mut()
            .and_then(|p| p.ip_configurations.as_deref_mut())
            .unwrap_or_default()
    }

    pub fn virtual_machine_id(&self) -> Option<&str> {
        self.properties
            .as_ref()
            .and_then(|p| p.virtual_machine.as_ref())
            .and_then(|vm| vm.id.as_deref())
    }

    // The primary IP configuration, or the only one when none is flagged.
    pub fn primary_ip_configuration_mut(&mut self) -> Option<&mut InterfaceIpConfiguration> {
        let configs = self.ip_configurations_mut();
        if configs.len() == 1 {
            return configs.first_mut();
        }

        configs.iter_mut().find(|config| config.is_primary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keeps_unknown_fields_on_round_trip() {
        let raw = json!({
            "id": "nic-id",
            "name": "nic-0",
            "location": "eastus",
            "properties": {
                "virtualMachine": { "id": "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm-0" },
                "enableAcceleratedNetworking": true,
                "ipConfigurations": [{
                    "id": "nic-id/ipConfigurations/ipconfig1",
                    "name": "ipconfig1",
                    "properties": {
                        "primary": true,
                        "privateIPAddress": "10.0.0.4",
                        "subnet": { "id": "subnet" },
                        "loadBalancerBackendAddressPools": [{ "id": "pool" }]
                    }
                }]
            }
        });

        let mut nic: NetworkInterface = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(
            nic.virtual_machine_id(),
            Some("/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm-0")
        );
        assert_eq!(nic.primary_ip_configuration_mut().map(|c| c.id().to_owned()), Some("nic-id/ipConfigurations/ipconfig1".to_owned()));
        assert_eq!(serde_json::to_value(&nic).unwrap(), raw);
    }
}
