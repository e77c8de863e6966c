use crate::cloud::{BackendAddressPoolClient, LoadBalancerClient};
use crate::network::{BackendAddressPool, LoadBalancer, NetworkInterface, VirtualMachine};
use crate::{Config, PoolBalancerError, Result};
use async_trait::async_trait;
use log::{debug, trace};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const NETWORK_API_VERSION: &str = "2023-09-01";
const COMPUTE_API_VERSION: &str = "2024-03-01";

#[derive(Debug, Default, Deserialize)]
struct ArmErrorBody {
    #[serde(default)]
    error: ArmErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ArmErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
struct MigrateToIpBasedRequest<'a> {
    pools: &'a [String],
}

pub struct ArmClient {
    http: Client,
    endpoint: String,
    subscription_id: String,
    access_token: String,
}

impl ArmClient {
    pub fn new(config: &Config) -> ArmClient {
        ArmClient {
            http: Client::new(),
            endpoint: config.arm_endpoint.trim_end_matches('/').to_owned(),
            subscription_id: config.subscription_id.clone(),
            access_token: config.arm_access_token.clone(),
        }
    }

    fn url(&self, resource_group: &str, provider_path: &str, api_version: &str) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/{}?api-version={}",
            self.endpoint, self.subscription_id, resource_group, provider_path, api_version
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Option<T>> {
        trace!("GET {}", url);
        let response = self.http.get(url).bearer_auth(&self.access_token).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let response = Self::check(response).await?;
        Ok(Some(response.json().await?))
    }

    async fn send_json<B: Serialize + ?Sized>(&self, request: reqwest::RequestBuilder, body: &B) -> Result<()> {
        let response = request.bearer_auth(&self.access_token).json(body).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body: ArmErrorBody = response.json().await.unwrap_or_default();
        PoolBalancerError::ArmError {
            status: status.as_u16(),
            code: body.error.code,
            message: body.error.message,
        }
        .into()
    }

    pub async fn get_network_interface(&self, resource_group: &str, nic_name: &str) -> Result<Option<NetworkInterface>> {
        let url = self.url(
            resource_group,
            &format!("Microsoft.Network/networkInterfaces/{}", nic_name),
            NETWORK_API_VERSION,
        );
        self.get_json(&url).await
    }

    pub async fn create_or_update_network_interface(
        &self,
        resource_group: &str,
        nic_name: &str,
        nic: &NetworkInterface,
    ) -> Result<()> {
        let url = self.url(
            resource_group,
            &format!("Microsoft.Network/networkInterfaces/{}", nic_name),
            NETWORK_API_VERSION,
        );
        debug!("updating network interface {}", nic_name);
        self.send_json(self.http.put(&url), nic).await
    }

    pub async fn get_virtual_machine(&self, resource_group: &str, vm_name: &str) -> Result<Option<VirtualMachine>> {
        let url = self.url(
            resource_group,
            &format!("Microsoft.Compute/virtualMachines/{}", vm_name),
            COMPUTE_API_VERSION,
        );
        self.get_json(&url).await
    }
}

#[async_trait]
impl LoadBalancerClient for ArmClient {
    async fn get(&self, resource_group: &str, lb_name: &str) -> Result<Option<LoadBalancer>> {
        let url = self.url(
            resource_group,
            &format!("Microsoft.Network/loadBalancers/{}", lb_name),
            NETWORK_API_VERSION,
        );
        self.get_json(&url).await
    }

    async fn migrate_to_ip_based(&self, resource_group: &str, lb_name: &str, pool_names: &[String]) -> Result<()> {
        let url = self.url(
            resource_group,
            &format!("Microsoft.Network/loadBalancers/{}/migrateToIpBased", lb_name),
            NETWORK_API_VERSION,
        );
        self.send_json(self.http.post(&url), &MigrateToIpBasedRequest { pools: pool_names }).await
    }
}

#[async_trait]
impl BackendAddressPoolClient for ArmClient {
    async fn get(&self, resource_group: &str, lb_name: &str, pool_name: &str) -> Result<BackendAddressPool> {
        let url = self.url(
            resource_group,
            &format!("Microsoft.Network/loadBalancers/{}/backendAddressPools/{}", lb_name, pool_name),
            NETWORK_API_VERSION,
        );

        match self.get_json(&url).await? {
            Some(pool) => Ok(pool),
            None => PoolBalancerError::ArmError {
                status: StatusCode::NOT_FOUND.as_u16(),
                code: "NotFound".to_owned(),
                message: format!("backend pool {} of load balancer {} not found", pool_name, lb_name),
            }
            .into(),
        }
    }

    async fn create_or_update(
        &self,
        resource_group: &str,
        lb_name: &str,
        pool_name: &str,
        pool: &BackendAddressPool,
    ) -> Result<()> {
        let url = self.url(
            resource_group,
            &format!("Microsoft.Network/loadBalancers/{}/backendAddressPools/{}", lb_name, pool_name),
            NETWORK_API_VERSION,
        );
        self.send_json(self.http.put(&url), pool).await
    }
}
