use crate::network::BackendAddressPool;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<LoadBalancerProperties>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_address_pools: Option<Vec<BackendAddressPool>>,
    // Frontends, rules and probes are carried through untouched.
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl LoadBalancer {
    pub fn named(name: impl Into<String>) -> LoadBalancer {
        LoadBalancer {
            name: Some(name.into()),
            properties: Some(LoadBalancerProperties::default()),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }

    pub fn backend_pools(&self) -> &[BackendAddressPool] {
        self.properties
            .as_ref()
            .and_then(|p| p.backend_address_pools.as_deref())
            .unwrap_or_default()
    }

    pub fn backend_pools_mut(&mut self) -> &mut Vec<BackendAddressPool> {
        self.properties
            .get_or_insert_with(LoadBalancerProperties::default)
            .backend_address_pools
            .get_or_insert_with(Vec::new)
    }
}
