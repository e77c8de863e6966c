use crate::cluster::service_key;
use crate::controller::Controller;
use crate::{PoolBalancerError, Result};
use futures_util::TryStreamExt;
use k8s_openapi::api::core::v1::Service;
use kube::api::ListParams;
use kube::Api;
use kube_runtime::watcher;
use kube_runtime::watcher::Event;
use log::{error, info};
use parking_lot::Mutex;

impl Controller {
    pub async fn fetch_services(&self) -> Result<Vec<Service>> {
        let svc_api: Api<Service> = Api::all(self.client.clone());

        let params = ListParams::default();
        let services = svc_api.list(&params).await.map_err(PoolBalancerError::KubeError)?.items;

        Ok(services)
    }

    pub(super) async fn seed_services(&self) -> Result<()> {
        let services = self.fetch_services().await?;
        info!("Seeding {} services", services.len());

        self.reconciler.replace_services(services).await;
        Ok(())
    }

    pub async fn watch_services(&self) -> Result<()> {
        let svc_api: Api<Service> = Api::all(self.client.clone());

        let pending = Mutex::new(Vec::new());
        let pending = &pending;

        let watcher = watcher(svc_api, watcher::Config::default());
        watcher
            .try_for_each(move |ev| async move {
                match ev {
                    // Add or update
                    Event::Apply(svc) => {
                        let key = service_key(&svc);
                        if let Err(e) = self.reconciler.apply_service(svc).await {
                            error!("Error while reconciling service {}: {}", key, e);
                        }
                    }

                    Event::Delete(svc) => self.reconciler.delete_service(&svc),

                    Event::Init => {
                        info!("Got service stream restarted");
                        pending.lock().clear();
                    }

                    Event::InitApply(svc) => pending.lock().push(svc),

                    Event::InitDone => {
                        let services = std::mem::take(&mut *pending.lock());
                        self.reconciler.replace_services(services).await;
                    }
                }

                Ok(())
            })
            .await
            .map_err(PoolBalancerError::WatcherError)?;

        Ok(())
    }
}
