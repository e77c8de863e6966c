use crate::cluster::endpoint_slices::SERVICE_NAME_LABEL;
use crate::controller::Controller;
use crate::{PoolBalancerError, Result};
use futures_util::TryStreamExt;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::api::ListParams;
use kube::Api;
use kube_runtime::watcher;
use kube_runtime::watcher::Event;
use log::{debug, info};
use parking_lot::Mutex;

// (namespace, service name) owning a slice.
fn owner(slice: &EndpointSlice) -> Option<(String, String)> {
    let service = slice.metadata.labels.as_ref()?.get(SERVICE_NAME_LABEL)?;
    let namespace = slice.metadata.namespace.clone().unwrap_or_else(|| "default".to_owned());

    Some((namespace, service.clone()))
}

impl Controller {
    pub async fn fetch_endpoint_slices(&self) -> Result<Vec<EndpointSlice>> {
        let slice_api: Api<EndpointSlice> = Api::all(self.client.clone());

        let params = ListParams::default().labels(SERVICE_NAME_LABEL);
        let slices = slice_api.list(&params).await.map_err(PoolBalancerError::KubeError)?.items;

        Ok(slices)
    }

    pub(super) async fn seed_endpoint_slices(&self) -> Result<()> {
        let slices = self.fetch_endpoint_slices().await?;
        info!("Seeding {} endpoint slices", slices.len());

        self.cloud.endpoint_slices.replace_all(slices);
        Ok(())
    }

    pub async fn watch_endpoint_slices(&self) -> Result<()> {
        let slice_api: Api<EndpointSlice> = Api::all(self.client.clone());
        let config = watcher::Config::default().labels(SERVICE_NAME_LABEL);

        let pending = Mutex::new(Vec::new());
        let pending = &pending;

        let watcher = watcher(slice_api, config);
        watcher
            .try_for_each(move |ev| async move {
                match ev {
                    // Add or update
                    Event::Apply(slice) => {
                        let owner = owner(&slice);
                        self.cloud.endpoint_slices.apply(slice);

                        if let Some((namespace, name)) = owner {
                            debug!("Endpoints of {}/{} changed", namespace, name);
                            self.reconciler.endpoints_changed(&namespace, &name).await;
                        }
                    }

                    Event::Delete(slice) => {
                        self.cloud.endpoint_slices.delete(&slice);

                        if let Some((namespace, name)) = owner(&slice) {
                            self.reconciler.endpoints_changed(&namespace, &name).await;
                        }
                    }

                    Event::Init => {
                        info!("Got endpoint slice stream restarted");
                        pending.lock().clear();
                    }

                    Event::InitApply(slice) => pending.lock().push(slice),

                    Event::InitDone => {
                        let slices = std::mem::take(&mut *pending.lock());
                        self.cloud.endpoint_slices.replace_all(slices);
                    }
                }

                Ok(())
            })
            .await
            .map_err(PoolBalancerError::WatcherError)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::endpoint_slices::testing::endpoint_slice;

    #[test]
    fn slices_are_owned_by_their_labelled_service() {
        let slice = endpoint_slice("svc-1-abcde", "apps", "svc-1", &["node-0"]);
        assert_eq!(owner(&slice), Some(("apps".to_owned(), "svc-1".to_owned())));

        let mut orphan = slice;
        orphan.metadata.labels = None;
        assert_eq!(owner(&orphan), None);
    }
}
