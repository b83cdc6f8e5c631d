//! kube-runtime watchers feeding the object store

use crate::workers::WorkerPool;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Endpoints, Node, Secret, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::api::networking::v1::{Ingress, IngressClass};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, Resource};
use lb_api::{AviInfraSetting, HTTPRule, HealthMonitor, HostRule, L4Rule};
use lb_avi::Pipeline;
use lb_core::objects::Change;
use lb_core::{Input, Settings};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Hands store changes to the workers
pub struct Dispatcher {
    pipeline: Arc<Pipeline>,
    workers: Arc<WorkerPool>,
}

impl Dispatcher {
    pub fn new(pipeline: Arc<Pipeline>, workers: Arc<WorkerPool>) -> Self {
        Self { pipeline, workers }
    }

    /// Queue every target the change touches; returns how many
    pub async fn dispatch(&self, change: Change) -> usize {
        let targets = self.pipeline.targets_for(&change).await;
        let count = targets.len();
        debug!(object = %change.object, targets = count, "Dispatching change");
        for target in targets {
            self.workers.submit(target).await;
        }
        // Revalidation may have flipped rule status without touching a graph
        self.pipeline.publish_status().await;
        count
    }
}

/// Watch state of one resource kind
struct KindWatch<F> {
    kind: String,
    wrap: F,
    dispatcher: Arc<Dispatcher>,
    /// Set once the first listing completed
    listed: bool,
    ready: Option<oneshot::Sender<()>>,
}

impl<F> KindWatch<F> {
    fn new(kind: String, wrap: F, dispatcher: Arc<Dispatcher>, ready: oneshot::Sender<()>) -> Self {
        Self {
            kind,
            wrap,
            dispatcher,
            listed: false,
            ready: Some(ready),
        }
    }

    async fn on_event<K>(&mut self, event: Event<K>)
    where
        F: Fn(K) -> Input,
    {
        let store = self.dispatcher.pipeline.objects();
        match event {
            Event::Init => debug!(kind = %self.kind, "Listing started"),
            Event::InitApply(obj) => {
                let change = store.apply((self.wrap)(obj)).await;
                // Relists after a disconnect are live changes
                if self.listed {
                    self.dispatcher.dispatch(change).await;
                }
            }
            Event::InitDone => {
                self.listed = true;
                if let Some(ready) = self.ready.take() {
                    info!(kind = %self.kind, "Initial listing complete");
                    let _ = ready.send(());
                }
            }
            Event::Apply(obj) => {
                let change = store.apply((self.wrap)(obj)).await;
                self.dispatcher.dispatch(change).await;
            }
            Event::Delete(obj) => {
                let change = store.delete((self.wrap)(obj)).await;
                self.dispatcher.dispatch(change).await;
            }
        }
    }
}

fn spawn_watch<K, F>(api: Api<K>, wrap: F, dispatcher: Arc<Dispatcher>) -> (oneshot::Receiver<()>, JoinHandle<()>)
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + 'static,
    F: Fn(K) -> Input + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let kind = K::kind(&()).to_string();
    let handle = tokio::spawn(async move {
        let mut watch = KindWatch::new(kind, wrap, dispatcher, tx);
        let mut stream = watcher::watcher(api, watcher::Config::default()).default_backoff().boxed();
        info!(kind = %watch.kind, "Starting watcher");
        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => watch.on_event(event).await,
                Err(e) => warn!(kind = %watch.kind, error = %e, "Watch error"),
            }
        }
        info!(kind = %watch.kind, "Watcher stopped");
    });
    (rx, handle)
}

/// Start one watcher per input kind. The receivers resolve once each
/// kind finished its initial listing.
pub fn start(
    client: Client,
    settings: &Settings,
    dispatcher: Arc<Dispatcher>,
) -> (Vec<oneshot::Receiver<()>>, Vec<JoinHandle<()>>) {
    let mut ready = Vec::new();
    let mut handles = Vec::new();
    let mut add = |(rx, handle): (oneshot::Receiver<()>, JoinHandle<()>)| {
        ready.push(rx);
        handles.push(handle);
    };

    add(spawn_watch(Api::<Ingress>::all(client.clone()), Input::Ingress, dispatcher.clone()));
    add(spawn_watch(Api::<IngressClass>::all(client.clone()), Input::IngressClass, dispatcher.clone()));
    add(spawn_watch(Api::<Service>::all(client.clone()), Input::Service, dispatcher.clone()));
    if settings.endpoint_slices_enabled {
        add(spawn_watch(Api::<EndpointSlice>::all(client.clone()), Input::EndpointSlice, dispatcher.clone()));
    } else {
        add(spawn_watch(Api::<Endpoints>::all(client.clone()), Input::Endpoints, dispatcher.clone()));
    }
    add(spawn_watch(Api::<Secret>::all(client.clone()), Input::Secret, dispatcher.clone()));
    add(spawn_watch(Api::<Node>::all(client.clone()), Input::Node, dispatcher.clone()));
    add(spawn_watch(Api::<HostRule>::all(client.clone()), Input::HostRule, dispatcher.clone()));
    add(spawn_watch(Api::<HTTPRule>::all(client.clone()), Input::HttpRule, dispatcher.clone()));
    add(spawn_watch(Api::<L4Rule>::all(client.clone()), Input::L4Rule, dispatcher.clone()));
    add(spawn_watch(Api::<AviInfraSetting>::all(client.clone()), Input::InfraSetting, dispatcher.clone()));
    add(spawn_watch(Api::<HealthMonitor>::all(client), Input::HealthMonitor, dispatcher));

    (ready, handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{EndpointAddress, EndpointPort, EndpointSubset, ServicePort, ServiceSpec};
    use kube::api::ObjectMeta;
    use lb_avi::memory::InMemoryController;
    use lb_avi::{Metrics, RetryPolicy};
    use lb_core::{MemorySink, ObjectKind, ObjectStore};
    use std::time::Duration;

    fn dispatcher() -> (Arc<Dispatcher>, Arc<Pipeline>, Arc<InMemoryController>) {
        let settings = Arc::new(Settings {
            cluster_name: "cluster".to_string(),
            dry_run: true,
            ..Default::default()
        });
        let ctrl = Arc::new(InMemoryController::new());
        let (pipeline, _receivers) = Pipeline::new(
            settings.clone(),
            ObjectStore::new(settings),
            ctrl.clone(),
            Arc::new(MemorySink::new()),
            Metrics::new().unwrap(),
            RetryPolicy::default(),
        )
        .unwrap();
        let (workers, _handles) = WorkerPool::spawn(pipeline.clone(), 2);
        (
            Arc::new(Dispatcher::new(pipeline.clone(), Arc::new(workers))),
            pipeline,
            ctrl,
        )
    }

    fn service() -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("avisvc".to_string()),
                namespace: Some("red".to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("LoadBalancer".to_string()),
                ports: Some(vec![ServicePort {
                    name: Some("http".to_string()),
                    port: 8080,
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn endpoints() -> Endpoints {
        Endpoints {
            metadata: ObjectMeta {
                name: Some("avisvc".to_string()),
                namespace: Some("red".to_string()),
                ..Default::default()
            },
            subsets: Some(vec![EndpointSubset {
                addresses: Some(vec![EndpointAddress {
                    ip: "10.1.1.1".to_string(),
                    ..Default::default()
                }]),
                ports: Some(vec![EndpointPort {
                    name: Some("http".to_string()),
                    port: 8080,
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
        }
    }

    async fn wait_for_vs(ctrl: &InMemoryController, name: &str) -> bool {
        for _ in 0..50 {
            if ctrl.object(ObjectKind::VirtualService, name).await.is_some() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_initial_listing_only_fills_store() {
        let (dispatcher, pipeline, ctrl) = dispatcher();
        let (tx, mut rx) = oneshot::channel();
        let mut watch = KindWatch::new("Service".to_string(), Input::Service, dispatcher, tx);

        watch.on_event(Event::Init).await;
        watch.on_event(Event::InitApply(service())).await;
        assert!(rx.try_recv().is_err());
        watch.on_event(Event::InitDone).await;
        assert!(rx.try_recv().is_ok());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ctrl.write_count().await, 0);
        assert_eq!(pipeline.objects().read().await.services.len(), 1);
    }

    #[tokio::test]
    async fn test_live_events_reach_the_controller() {
        let (dispatcher, _pipeline, ctrl) = dispatcher();
        let (tx, _rx) = oneshot::channel();
        let mut endpoints_watch = KindWatch::new("Endpoints".to_string(), Input::Endpoints, dispatcher.clone(), tx);
        endpoints_watch.on_event(Event::Apply(endpoints())).await;

        let (tx, _rx) = oneshot::channel();
        let mut watch = KindWatch::new("Service".to_string(), Input::Service, dispatcher, tx);
        watch.on_event(Event::InitDone).await;
        watch.on_event(Event::Apply(service())).await;

        assert!(wait_for_vs(&ctrl, "cluster--red-avisvc").await);
        assert_eq!(ctrl.names(ObjectKind::VirtualService).await.len(), 1);
    }
}
