use crate::network::{BackendAddressPool, InterfaceIpConfiguration, LoadBalancerBackendAddress, SubResource};
use log::debug;
use std::collections::HashSet;

/// Drops members whose IP is in `ips`, or every IP member with `remove_all`.
/// Members without an IP are NIC based and only go away when `is_node_ip`.
/// Outside of `remove_all` a single load balancer never has its pool emptied;
/// such a removal is skipped and reported as no change.
pub fn remove_node_ip_addresses(
    pool: &mut BackendAddressPool,
    ips: &[String],
    remove_all: bool,
    use_multi_slb: bool,
    is_node_ip: bool,
) -> bool {
    let wanted_gone: HashSet<&str> = ips.iter().map(String::as_str).collect();
    let pool_name = pool.name.clone().unwrap_or_default();

    let addresses = match pool
        .properties
        .as_mut()
        .and_then(|p| p.load_balancer_backend_addresses.as_mut())
    {
        Some(addresses) => addresses,
        None => return false,
    };

    let mut changed = false;
    let mut kept: Vec<LoadBalancerBackendAddress> = Vec::with_capacity(addresses.len());
    for address in addresses.iter() {
        if address.properties.is_none() {
            kept.push(address.clone());
            continue;
        }

        let ip = address.ip_address();
        if ip.is_empty() {
            if is_node_ip {
                changed = true;
            } else {
                kept.push(address.clone());
            }
            continue;
        }

        if remove_all || wanted_gone.contains(ip) {
            debug!("removing {} from backend pool {}", ip, pool_name);
            changed = true;
        } else {
            kept.push(address.clone());
        }
    }

    if remove_all {
        *addresses = kept;
        return changed;
    }

    if kept.is_empty() && !use_multi_slb {
        return false;
    }

    if changed {
        *addresses = kept;
    }
    changed
}

/// Sets the pool's virtual network when missing and appends every IP not yet
/// present, named after the node owning it. Reports whether members were added.
pub fn add_node_ip_addresses<F>(pool: &mut BackendAddressPool, ips: &[String], vnet_id: &str, node_for_ip: F) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    let pool_name = pool.name.clone().unwrap_or_default();
    let props = pool.properties.get_or_insert_with(Default::default);
    if props.virtual_network.as_ref().and_then(|vnet| vnet.id.as_ref()).is_none() {
        props.virtual_network = Some(SubResource::new(vnet_id));
    }

    let addresses = props.load_balancer_backend_addresses.get_or_insert_with(Vec::new);
    let mut changed = false;
    for ip in ips {
        if addresses.iter().any(|address| address.ip_address() == ip.as_str()) {
            continue;
        }

        let node_name = node_for_ip(ip).unwrap_or_default();
        debug!("adding {} ({}) to backend pool {}", ip, node_name, pool_name);
        addresses.push(LoadBalancerBackendAddress::from_ip(Some(node_name), ip.clone()));
        changed = true;
    }

    changed
}

pub fn has_ip_address(pool: &BackendAddressPool, ip: &str) -> bool {
    pool.addresses().iter().any(|address| address.ip_address() == ip)
}

// A pool still referencing NICs carries members without an IP.
pub fn is_nic_pool(pool: &BackendAddressPool) -> bool {
    pool.addresses().iter().any(|address| address.ip_address().is_empty())
}

pub fn count_ips(pool: &BackendAddressPool) -> usize {
    pool.addresses()
        .iter()
        .filter(|address| !address.ip_address().is_empty())
        .count()
}

/// IP configurations of vanished VMs always go. Those of excluded nodes go as
/// well unless that would leave the pool empty.
pub fn backend_ip_configurations_to_be_deleted(
    pool: &BackendAddressPool,
    not_found: &[InterfaceIpConfiguration],
    excluded: &[InterfaceIpConfiguration],
) -> Vec<InterfaceIpConfiguration> {
    let not_found_ids: HashSet<&str> = not_found.iter().map(|config| config.id()).collect();
    let excluded_ids: HashSet<&str> = excluded.iter().map(|config| config.id()).collect();

    let remaining = pool
        .ip_configurations()
        .iter()
        .filter(|config| !not_found_ids.contains(config.id()))
        .filter(|config| !excluded_ids.contains(config.id()))
        .count();

    if remaining == 0 {
        return not_found.to_vec();
    }

    not_found.iter().chain(excluded.iter()).cloned().collect()
}
