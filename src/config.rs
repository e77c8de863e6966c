use crate::cluster::MultipleStandardLoadBalancerConfiguration;
use crate::{PoolBalancerError, Result};
use serde::Deserialize;

pub const LOAD_BALANCER_SKU_STANDARD: &str = "standard";

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub enum BackendPoolType {
    #[serde(rename = "nodeIPConfiguration")]
    NodeIpConfiguration,
    #[serde(rename = "nodeIP")]
    NodeIp,
}

impl Default for BackendPoolType {
    fn default() -> Self {
        BackendPoolType::NodeIpConfiguration
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PreConfiguredBackendPoolTypes {
    All,
    Internal,
    External,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cluster_name: String,
    pub subscription_id: String,
    pub resource_group: String,
    pub load_balancer_resource_group: Option<String>,
    pub vnet_name: String,
    pub vnet_resource_group: Option<String>,
    pub load_balancer_sku: String,
    pub load_balancer_backend_pool_configuration_type: BackendPoolType,
    pub pre_configured_backend_pool_load_balancer_types: Option<PreConfiguredBackendPoolTypes>,
    pub enable_migrate_to_ip_based_backend_pool_api: bool,
    pub primary_availability_set_name: String,
    pub multiple_standard_load_balancer_configurations_path: Option<String>,
    pub arm_endpoint: String,
    pub arm_access_token: String,
    pub load_balancer_cache_ttl_secs: u64,
    pub resync_interval_secs: u64,
    #[serde(skip)]
    pub multiple_standard_load_balancer_configurations: Vec<MultipleStandardLoadBalancerConfiguration>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cluster_name: "kubernetes".to_owned(),
            subscription_id: String::new(),
            resource_group: String::new(),
            load_balancer_resource_group: None,
            vnet_name: String::new(),
            vnet_resource_group: None,
            load_balancer_sku: LOAD_BALANCER_SKU_STANDARD.to_owned(),
            load_balancer_backend_pool_configuration_type: BackendPoolType::default(),
            pre_configured_backend_pool_load_balancer_types: None,
            enable_migrate_to_ip_based_backend_pool_api: false,
            primary_availability_set_name: String::new(),
            multiple_standard_load_balancer_configurations_path: None,
            arm_endpoint: "https://management.azure.com".to_owned(),
            arm_access_token: String::new(),
            load_balancer_cache_ttl_secs: 120,
            resync_interval_secs: 300,
            multiple_standard_load_balancer_configurations: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_envvar() -> Result<Config> {
        let mut config: Config = envy::from_env()?;

        if let Some(path) = config.multiple_standard_load_balancer_configurations_path.clone() {
            let raw = std::fs::read_to_string(&path).map_err(|e| PoolBalancerError::IOError(path.clone(), e))?;
            config.multiple_standard_load_balancer_configurations =
                serde_json::from_str(&raw).map_err(|e| PoolBalancerError::DecodeError(path, e))?;
        }

        Ok(config)
    }

    pub fn load_balancer_resource_group(&self) -> &str {
        self.load_balancer_resource_group.as_deref().unwrap_or(&self.resource_group)
    }

    pub fn vnet_resource_group(&self) -> &str {
        self.vnet_resource_group.as_deref().unwrap_or(&self.resource_group)
    }

    pub fn use_standard_load_balancer(&self) -> bool {
        self.load_balancer_sku.eq_ignore_ascii_case(LOAD_BALANCER_SKU_STANDARD)
    }

    pub fn use_multiple_standard_load_balancers(&self) -> bool {
        self.use_standard_load_balancer() && !self.multiple_standard_load_balancer_configurations.is_empty()
    }
}
