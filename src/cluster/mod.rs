mod ip_family;
pub use ip_family::IpFamily;

pub(crate) mod node;
pub use node::{is_control_plane_node, node_internal_ips, node_private_ip};

mod node_cache;
pub use node_cache::NodeCache;

pub(crate) mod service;
pub use service::{ip_families, ip_families_enabled, is_load_balancer_service, is_local_service, requires_internal_load_balancer, service_key};

mod service_info;
pub use service_info::{ServiceInfo, ServiceInfoCache};

pub(crate) mod endpoint_slices;
pub use endpoint_slices::{endpoint_node_names, EndpointSliceCache};

mod multi_slb;
pub use multi_slb::{
    active_nodes_for, distribute_nodes, selector_matches, trim_internal_suffix, MultipleStandardLoadBalancerConfiguration,
    NodeAssignment,
};
