use kube::Client;
use pool_balancer::cloud::{ArmClient, AvailabilitySet};
use pool_balancer::cluster::NodeCache;
use pool_balancer::controller::Controller;
use pool_balancer::{Cloud, Config};
use std::sync::Arc;

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = Arc::new(Config::from_envvar().expect("Loading config failed"));
    let client = Client::try_default().await.expect("Connecting to k8s failed");

    let arm = Arc::new(ArmClient::new(&config));
    let node_cache = Arc::new(NodeCache::new());
    let vm_set = AvailabilitySet::new(
        Arc::clone(&arm),
        config.resource_group.clone(),
        config.primary_availability_set_name.clone(),
        Arc::clone(&node_cache),
    );

    let cloud = Cloud::new(Arc::clone(&config), arm.clone(), arm, Arc::new(vm_set), node_cache)
        .with_kube_client(client.clone());

    let controller = Arc::new(Controller::new(config, client, Arc::new(cloud)));

    controller.seed().await.expect("Seeding controller failed");
    controller.start_watchers().await; // Blocks
}
