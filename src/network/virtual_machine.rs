use crate::network::SubResource;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VirtualMachine {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<VirtualMachineProperties>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_set: Option<SubResource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_profile: Option<NetworkProfile>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkProfile {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_interfaces: Option<Vec<NetworkInterfaceReference>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkInterfaceReference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<NetworkInterfaceReferenceProperties>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkInterfaceReferenceProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<bool>,
}

impl VirtualMachine {
    pub fn availability_set_id(&self) -> Option<&str> {
        self.properties
            .as_ref()
            .and_then(|p| p.availability_set.as_ref())
            .and_then(|set| set.id.as_deref())
    }

    pub fn primary_nic_id(&self) -> Option<&str> {
        let nics = self
            .properties
            .as_ref()
            .and_then(|p| p.network_profile.as_ref())
            .and_then(|p| p.network_interfaces.as_deref())
            .unwrap_or_default();

        if nics.len() == 1 {
            return nics[0].id.as_deref();
        }

        nics.iter()
            .find(|nic| nic.properties.as_ref().and_then(|p| p.primary).unwrap_or(false))
            .and_then(|nic| nic.id.as_deref())
    }
}
