use k8s_openapi::api::discovery::v1::EndpointSlice;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};

pub const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

// Endpoint slices keyed by "namespace/name" of the slice.
#[derive(Default)]
pub struct EndpointSliceCache {
    slices: RwLock<HashMap<String, EndpointSlice>>,
}

fn slice_key(slice: &EndpointSlice) -> Option<String> {
    Some(format!(
        "{}/{}",
        slice.metadata.namespace.as_deref().unwrap_or("default"),
        slice.metadata.name.as_deref()?
    ))
}

fn owning_service(slice: &EndpointSlice) -> Option<&str> {
    slice
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(SERVICE_NAME_LABEL))
        .map(String::as_str)
}

impl EndpointSliceCache {
    pub fn new() -> EndpointSliceCache {
        EndpointSliceCache::default()
    }

    pub fn apply(&self, slice: EndpointSlice) {
        if let Some(key) = slice_key(&slice) {
            self.slices.write().insert(key, slice);
        }
    }

    pub fn delete(&self, slice: &EndpointSlice) {
        if let Some(key) = slice_key(slice) {
            self.slices.write().remove(&key);
        }
    }

    pub fn replace_all(&self, slices: Vec<EndpointSlice>) {
        let mut cached = self.slices.write();
        cached.clear();
        for slice in slices {
            if let Some(key) = slice_key(&slice) {
                cached.insert(key, slice);
            }
        }
    }

    pub fn slices_for_service(&self, namespace: &str, service_name: &str) -> Vec<EndpointSlice> {
        self.slices
            .read()
            .values()
            .filter(|slice| slice.metadata.namespace.as_deref().unwrap_or("default") == namespace)
            .filter(|slice| owning_service(slice) == Some(service_name))
            .cloned()
            .collect()
    }
}

pub fn endpoint_node_names(slices: &[EndpointSlice]) -> BTreeSet<String> {
    slices
        .iter()
        .flat_map(|slice| slice.endpoints.iter())
        .filter_map(|endpoint| endpoint.node_name.as_ref())
        .map(|name| name.to_lowercase())
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    use super::SERVICE_NAME_LABEL;
    use k8s_openapi::api::discovery::v1::{Endpoint, EndpointSlice};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    pub fn endpoint_slice(name: &str, namespace: &str, service: &str, nodes: &[&str]) -> EndpointSlice {
        EndpointSlice {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                namespace: Some(namespace.to_owned()),
                labels: Some(BTreeMap::from([(SERVICE_NAME_LABEL.to_owned(), service.to_owned())])),
                ..Default::default()
            },
            address_type: "IPv4".to_owned(),
            endpoints: nodes
                .iter()
                .map(|node| Endpoint {
                    addresses: vec!["10.244.0.10".to_owned()],
                    node_name: Some(node.to_string()),
                    ..Default::default()
                })
                .collect(),
            ports: None,
        }
    }
}
