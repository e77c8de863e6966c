use crate::controller::Reconciler;
use crate::provider::Cloud;
use crate::{Config, Result};
use kube::Client;
use log::{error, info};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

pub struct Controller {
    pub config: Arc<Config>,
    pub(super) client: Client,
    pub(super) cloud: Arc<Cloud>,
    pub(super) reconciler: Reconciler,
}

// Jittered delay before a failed watcher restarts.
fn restart_delay() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(500..5000))
}

impl Controller {
    pub fn new(config: Arc<Config>, client: Client, cloud: Arc<Cloud>) -> Controller {
        let reconciler = Reconciler::new(Arc::clone(&cloud));

        Controller {
            config,
            client,
            cloud,
            reconciler,
        }
    }

    pub async fn seed(&self) -> Result<()> {
        self.seed_nodes().await?;
        self.seed_endpoint_slices().await?;
        self.seed_services().await?;

        Ok(())
    }

    pub async fn start_watchers(self: Arc<Self>) {
        let node_handle = tokio::spawn({
            let controller = Arc::clone(&self);

            async move {
                loop {
                    if let Err(e) = controller.watch_nodes().await {
                        error!("Error returned by node watcher: {}", e);
                    }

                    info!("Restarting node watcher");
                    tokio::time::sleep(restart_delay()).await;
                }
            }
        });

        let svc_handle = tokio::spawn({
            let controller = Arc::clone(&self);

            async move {
                loop {
                    if let Err(e) = controller.watch_services().await {
                        error!("Error returned by service watcher: {}", e);
                    }

                    info!("Restarting service watcher");
                    tokio::time::sleep(restart_delay()).await;
                }
            }
        });

        let slice_handle = tokio::spawn({
            let controller = Arc::clone(&self);

            async move {
                loop {
                    if let Err(e) = controller.watch_endpoint_slices().await {
                        error!("Error returned by endpoint slice watcher: {}", e);
                    }

                    info!("Restarting endpoint slice watcher");
                    tokio::time::sleep(restart_delay()).await;
                }
            }
        });

        let resync_handle = tokio::spawn({
            let controller = Arc::clone(&self);
            let period = Duration::from_secs(controller.config.resync_interval_secs.max(1));

            async move {
                let mut interval = tokio::time::interval(period);
                // The first tick completes immediately and seeding already reconciled everything.
                interval.tick().await;

                loop {
                    interval.tick().await;
                    info!("Resyncing load balancer services");
                    controller.reconciler.resync().await;
                }
            }
        });

        // Will never return
        let _ = tokio::join!(node_handle, svc_handle, slice_handle, resync_handle);
    }
}
