use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use log::{debug, info};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub const INTERNAL_LOAD_BALANCER_SUFFIX: &str = "-internal";

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MultipleStandardLoadBalancerConfiguration {
    pub name: String,
    #[serde(rename = "primaryVMSet", default)]
    pub primary_vm_set: String,
    #[serde(default)]
    pub node_selector: Option<LabelSelector>,
    // Runtime state, filled in by the controller.
    #[serde(default)]
    pub active_nodes: BTreeSet<String>,
    #[serde(default)]
    pub active_services: BTreeSet<String>,
}

impl MultipleStandardLoadBalancerConfiguration {
    pub fn new(name: impl Into<String>) -> MultipleStandardLoadBalancerConfiguration {
        MultipleStandardLoadBalancerConfiguration {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_primary_vm_set(mut self, vm_set: impl Into<String>) -> Self {
        self.primary_vm_set = vm_set.into();
        self
    }

    pub fn with_node_selector(mut self, selector: LabelSelector) -> Self {
        self.node_selector = Some(selector);
        self
    }

    pub fn with_active_nodes(mut self, nodes: &[&str]) -> Self {
        self.active_nodes = nodes.iter().map(|n| n.to_lowercase()).collect();
        self
    }

    pub fn has_active_node(&self, node_name: &str) -> bool {
        self.active_nodes.contains(&node_name.to_lowercase())
    }

    // Whether this configuration backs the given load balancer, internal or not.
    pub fn serves(&self, lb_name: &str) -> bool {
        trim_internal_suffix(lb_name).eq_ignore_ascii_case(&self.name)
    }

    fn accepts(&self, node: &NodeAssignment) -> bool {
        if !self.primary_vm_set.is_empty() && self.primary_vm_set.eq_ignore_ascii_case(&node.vm_set) {
            return true;
        }

        match &self.node_selector {
            Some(selector) => selector_matches(selector, &node.labels),
            None => false,
        }
    }
}

pub fn trim_internal_suffix(lb_name: &str) -> &str {
    let lower = lb_name.to_ascii_lowercase();
    if lower.ends_with(INTERNAL_LOAD_BALANCER_SUFFIX) {
        &lb_name[..lb_name.len() - INTERNAL_LOAD_BALANCER_SUFFIX.len()]
    } else {
        lb_name
    }
}

// Empty when no configuration serves the load balancer.
pub fn active_nodes_for(configs: &[MultipleStandardLoadBalancerConfiguration], lb_name: &str) -> BTreeSet<String> {
    configs
        .iter()
        .find(|config| config.serves(lb_name))
        .map(|config| config.active_nodes.clone())
        .unwrap_or_default()
}

// An empty selector matches everything.
pub fn selector_matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> bool {
    if let Some(match_labels) = &selector.match_labels {
        for (key, value) in match_labels {
            match labels.get(key) {
                Some(v) if v == value => {}
                _ => return false,
            }
        }
    }

    for requirement in selector.match_expressions.iter().flatten() {
        let values = requirement.values.as_deref().unwrap_or_default();
        let current = labels.get(&requirement.key);

        let ok = match requirement.operator.as_str() {
            "In" => current.map(|v| values.contains(v)).unwrap_or(false),
            "NotIn" => current.map(|v| !values.contains(v)).unwrap_or(true),
            "Exists" => current.is_some(),
            "DoesNotExist" => current.is_none(),
            _ => false,
        };

        if !ok {
            return false;
        }
    }

    true
}

/// A node eligible for a load balancer, with what placement needs to know about it.
#[derive(Clone, Debug, Default)]
pub struct NodeAssignment {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub vm_set: String,
}

impl NodeAssignment {
    pub fn new(name: &str, labels: BTreeMap<String, String>, vm_set: &str) -> NodeAssignment {
        NodeAssignment {
            name: name.to_lowercase(),
            labels,
            vm_set: vm_set.to_owned(),
        }
    }
}

/// Places every node in at most one configuration's active node set. Nodes that
/// vanished or no longer qualify are dropped first; nodes in a configuration's
/// primary VM set go there, the rest go to the least loaded configuration whose
/// node selector matches.
pub fn distribute_nodes(configs: &mut [MultipleStandardLoadBalancerConfiguration], nodes: &[NodeAssignment]) {
    let by_name: HashMap<&str, &NodeAssignment> = nodes.iter().map(|n| (n.name.as_str(), n)).collect();

    let mut placed = BTreeSet::new();
    for config in configs.iter_mut() {
        let before = config.active_nodes.clone();
        let mut kept = BTreeSet::new();
        for name in before {
            let keep = by_name
                .get(name.as_str())
                .map(|node| config.accepts(node))
                .unwrap_or(false);

            if keep && !placed.contains(&name) {
                placed.insert(name.clone());
                kept.insert(name);
            } else {
                debug!("removing node {} from load balancer configuration {}", name, config.name);
            }
        }
        config.active_nodes = kept;
    }

    for node in nodes {
        if placed.contains(&node.name) {
            continue;
        }

        let primary = configs
            .iter()
            .position(|config| !config.primary_vm_set.is_empty() && config.primary_vm_set.eq_ignore_ascii_case(&node.vm_set));

        let target = primary.or_else(|| {
            configs
                .iter()
                .enumerate()
                .filter(|(_, config)| {
                    config
                        .node_selector
                        .as_ref()
                        .map(|selector| selector_matches(selector, &node.labels))
                        .unwrap_or(false)
                })
                .min_by_key(|(i, config)| (config.active_nodes.len(), *i))
                .map(|(i, _)| i)
        });

        match target {
            Some(i) => {
                info!("placing node {} on load balancer {}", node.name, configs[i].name);
                configs[i].active_nodes.insert(node.name.clone());
                placed.insert(node.name.clone());
            }
            None => debug!("no load balancer configuration accepts node {}", node.name),
        }
    }
}
