use crate::cluster::IpFamily;
use k8s_openapi::api::core::v1::Node;

pub const CONTROL_PLANE_NODE_ROLE_LABEL: &str = "node-role.kubernetes.io/control-plane";
pub const MASTER_NODE_ROLE_LABEL: &str = "node-role.kubernetes.io/master";
pub const EXCLUDE_BALANCER_LABEL: &str = "node.kubernetes.io/exclude-from-external-load-balancers";
pub const MANAGED_BY_CLOUD_LABEL: &str = "kubernetes.azure.com/managed";
pub const CLOUD_UNINITIALIZED_TAINT: &str = "node.cloudprovider.kubernetes.io/uninitialized";

pub fn is_control_plane_node(node: &Node) -> bool {
    has_label(node, CONTROL_PLANE_NODE_ROLE_LABEL) || has_label(node, MASTER_NODE_ROLE_LABEL)
}

pub(crate) fn has_label(node: &Node, key: &str) -> bool {
    node.metadata
        .labels
        .as_ref()
        .map(|labels| labels.contains_key(key))
        .unwrap_or(false)
}

pub(crate) fn is_managed_by_cloud_provider(node: &Node) -> bool {
    node.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(MANAGED_BY_CLOUD_LABEL))
        .map(|value| value != "false")
        .unwrap_or(true)
}

pub(crate) fn is_node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Ready"))
        .map(|ready| ready.status == "True")
        .unwrap_or(false)
}

pub(crate) fn has_cloud_uninitialized_taint(node: &Node) -> bool {
    node.spec
        .as_ref()
        .and_then(|spec| spec.taints.as_ref())
        .map(|taints| taints.iter().any(|t| t.key == CLOUD_UNINITIALIZED_TAINT))
        .unwrap_or(false)
}

pub fn node_internal_ips(node: &Node) -> Vec<String> {
    node.status
        .as_ref()
        .and_then(|status| status.addresses.as_ref())
        .map(|addresses| {
            addresses
                .iter()
                .filter(|address| address.type_ == "InternalIP")
                .map(|address| address.address.clone())
                .collect()
        })
        .unwrap_or_default()
}

// First InternalIP of the family, empty when the node has none.
pub fn node_private_ip(node: &Node, family: IpFamily) -> String {
    node_internal_ips(node)
        .into_iter()
        .find(|ip| IpFamily::of(ip) == Some(family))
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod testing {
    use k8s_openapi::api::core::v1::{Node, NodeAddress, NodeCondition, NodeSpec, NodeStatus, Taint};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    pub fn node(name: &str, ips: &[&str]) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                addresses: Some(
                    ips.iter()
                        .map(|ip| NodeAddress {
                            address: ip.to_string(),
                            type_: "InternalIP".to_owned(),
                        })
                        .collect(),
                ),
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_owned(),
                    status: "True".to_owned(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn with_label(mut node: Node, key: &str, value: &str) -> Node {
        node.metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_owned(), value.to_owned());
        node
    }

    pub fn not_ready(mut node: Node, tainted: bool) -> Node {
        if let Some(status) = node.status.as_mut() {
            status.conditions = Some(vec![NodeCondition {
                type_: "Ready".to_owned(),
                status: "False".to_owned(),
                ..Default::default()
            }]);
        }
        if tainted {
            node.spec = Some(NodeSpec {
                taints: Some(vec![Taint {
                    key: super::CLOUD_UNINITIALIZED_TAINT.to_owned(),
                    effect: "NoSchedule".to_owned(),
                    ..Default::default()
                }]),
                ..Default::default()
            });
        }
        node
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn picks_first_internal_ip_of_family() {
        let node = node("vmss-0", &["10.0.0.2", "2001::2", "10.0.0.9"]);
        assert_eq!(node_private_ip(&node, IpFamily::V4), "10.0.0.2");
        assert_eq!(node_private_ip(&node, IpFamily::V6), "2001::2");

        let v4_only = super::testing::node("vmss-1", &["10.0.0.1"]);
        assert_eq!(node_private_ip(&v4_only, IpFamily::V6), "");
    }

    #[test]
    fn detects_control_plane_nodes() {
        assert!(is_control_plane_node(&with_label(node("master", &[]), CONTROL_PLANE_NODE_ROLE_LABEL, "true")));
        assert!(is_control_plane_node(&with_label(node("master", &[]), MASTER_NODE_ROLE_LABEL, "")));
        assert!(!is_control_plane_node(&node("vmss-0", &[])));
    }
}
