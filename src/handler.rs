//! Event handling for the watched custom resource.
//!
//! [`EventHandler`] owns the watch stream and fans events out to one
//! [`Controller`] per object, created on demand through the
//! [`ControllerFactory`] it was built with.

mod controller;
mod liveness;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{future, pin_mut, Stream, StreamExt};
use kube_client::{Api, Client};
use kube_core::DynamicObject;
use kube_runtime::{reflector::Store, watcher};
use tokio_util::sync::CancellationToken;

pub use controller::{controller, Controller, ControllerFactory, FnController};
pub use liveness::Liveness;

use crate::meta::KubeResourceMeta;
use crate::watch::{object_events, ObjectEvent, QualifiedName};

// The apiserver cuts watch requests off after 295 seconds.
const MAX_WATCH_TIMEOUT: Duration = Duration::from_secs(295);

const DEFAULT_WATCH_TIMEOUT: Duration = Duration::from_secs(300);

/// Watches one resource type and dispatches its events to controllers.
///
/// Built from the [`KubeResourceMeta`] of the resource to watch, a client and
/// a [`ControllerFactory`]. [`start`](Self::start) runs until the optional
/// restart window elapses, restarting the watch itself indefinitely.
pub struct EventHandler {
    meta: KubeResourceMeta,
    client: Client,
    factory: Box<dyn ControllerFactory>,
    watch_timeout: Duration,
    liveness: Option<Liveness>,
    restart_after: Option<Duration>,
}

impl EventHandler {
    pub fn new(
        meta: KubeResourceMeta,
        client: Client,
        factory: impl ControllerFactory + 'static,
    ) -> Self {
        EventHandler {
            meta,
            client,
            factory: Box::new(factory),
            watch_timeout: DEFAULT_WATCH_TIMEOUT,
            liveness: None,
            restart_after: None,
        }
    }

    /// Sets how long each watch request stays open before it is re-issued.
    #[must_use]
    pub fn watch_timeout(mut self, timeout: Duration) -> Self {
        self.watch_timeout = timeout;
        self
    }

    /// Enables the liveness heartbeat while the watch is healthy.
    #[must_use]
    pub fn liveness(mut self, liveness: Liveness) -> Self {
        self.liveness = Some(liveness);
        self
    }

    /// Ends [`start`](Self::start) after the given duration so the pod can be
    /// recycled with a fresh watch.
    #[must_use]
    pub fn restart_after(mut self, after: Duration) -> Self {
        self.restart_after = Some(after);
        self
    }

    /// Runs the watch loop.
    ///
    /// Returns only once the restart window elapses, or if the watch stream
    /// ends, which the retrying watcher does not do on its own.
    pub async fn start(mut self) {
        let api: Api<DynamicObject> =
            Api::all_with(self.client.clone(), self.meta.api_resource());
        let watcher_config =
            watcher::Config::default().timeout(clamped_watch_timeout(self.watch_timeout));
        let (store, events) =
            object_events(api, watcher_config, self.meta.api_resource().clone());

        let healthy = Arc::new(AtomicBool::new(true));
        let stop = CancellationToken::new();
        let heartbeat = self
            .liveness
            .take()
            .map(|liveness| liveness.spawn(Arc::clone(&healthy), stop.child_token()));

        let kind = self.meta.kind().to_owned();
        let restart_after = self.restart_after;
        log::debug!("Starting watch for {kind}");

        tokio::select! {
            _ = dispatch_events(self.factory.as_ref(), events, &healthy, &store) => {
                log::warn!("Watch stream for {kind} ended");
            }
            _ = restart_window(restart_after) => {
                log::info!("Restart window for {kind} elapsed, shutting the watch down");
            }
        }

        stop.cancel();
        if let Some(heartbeat) = heartbeat {
            if let Err(err) = heartbeat.await {
                log::warn!("Liveness heartbeat task failed: {err}");
            }
        }
    }
}

/// Seconds each watch request may stay open, capped at the apiserver limit.
fn clamped_watch_timeout(requested: Duration) -> u32 {
    requested.min(MAX_WATCH_TIMEOUT).as_secs() as u32
}

async fn restart_window(after: Option<Duration>) {
    match after {
        Some(window) => tokio::time::sleep(window).await,
        None => future::pending().await,
    }
}

async fn dispatch_events(
    factory: &dyn ControllerFactory,
    events: impl Stream<Item = Result<ObjectEvent, watcher::Error>>,
    healthy: &AtomicBool,
    store: &Store<DynamicObject>,
) {
    pin_mut!(events);
    let mut controllers: HashMap<QualifiedName, Box<dyn Controller + Send>> = HashMap::new();

    while let Some(event) = events.next().await {
        match event {
            Ok(event) => {
                healthy.store(true, Ordering::Relaxed);
                let key = event.key.clone();
                let exists = event.exists;
                controllers
                    .entry(key.clone())
                    .or_insert_with(|| factory.create(&key))
                    .dispatch(event);
                if !exists {
                    controllers.remove(&key);
                }
                // A relist rebuilds the store without emitting deletions for
                // objects that went away while the watch was disconnected, so
                // drop controllers the store no longer knows. An empty relist
                // emits no events at all; the scheduled restart covers that.
                let live: HashSet<QualifiedName> = store
                    .state()
                    .iter()
                    .map(|object| QualifiedName::from_resource(object.as_ref()))
                    .collect();
                controllers.retain(|key, _| live.contains(key));
            }
            Err(err) => {
                healthy.store(false, Ordering::Relaxed);
                log::warn!("Watch stream error: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::atomic::AtomicBool;
    use std::time::{Duration, Instant};

    use kube::core::discovery::{verbs, ApiCapabilities, ApiResource, Scope};
    use kube::core::{DynamicObject, GroupVersionKind};
    use kube::{Client, Config};
    use kube_runtime::{reflector, watcher};
    use tokio::sync::mpsc;

    use super::{
        clamped_watch_timeout, controller, dispatch_events, Controller, EventHandler,
        DEFAULT_WATCH_TIMEOUT,
    };
    use crate::meta::KubeResourceMeta;
    use crate::watch::{ObjectEvent, QualifiedName};

    fn offline_client() -> Client {
        let uri = "http://127.0.0.1:8080".parse::<http::Uri>().unwrap();
        Client::try_from(Config::new(uri)).unwrap()
    }

    fn template_meta() -> KubeResourceMeta {
        let gvk = GroupVersionKind::gvk("deploy.razee.io", "v1alpha2", "MustacheTemplate");
        KubeResourceMeta::new(
            ApiResource::from_gvk(&gvk),
            ApiCapabilities {
                scope: Scope::Namespaced,
                subresources: vec![],
                operations: vec![verbs::WATCH.to_owned()],
            },
        )
    }

    fn template(name: &str) -> DynamicObject {
        let gvk = GroupVersionKind::gvk("deploy.razee.io", "v1alpha2", "MustacheTemplate");
        DynamicObject::new(name, &ApiResource::from_gvk(&gvk)).within("razeedeploy")
    }

    fn template_event(name: &str, exists: bool) -> ObjectEvent {
        let object = template(name);
        ObjectEvent {
            key: QualifiedName::from_resource(&object),
            object,
            exists,
        }
    }

    struct Tracked {
        key: String,
        dropped: mpsc::UnboundedSender<String>,
    }

    impl Controller for Tracked {
        fn dispatch(&mut self, _event: ObjectEvent) {}
    }

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.dropped.send(self.key.clone()).ok();
        }
    }

    #[test]
    fn watch_timeouts_respect_the_apiserver_cap() {
        assert_eq!(clamped_watch_timeout(Duration::from_secs(30)), 30);
        assert_eq!(clamped_watch_timeout(DEFAULT_WATCH_TIMEOUT), 295);
        assert_eq!(clamped_watch_timeout(Duration::from_secs(6 * 60 * 60)), 295);
    }

    #[tokio::test]
    async fn relist_drops_controllers_for_missed_deletions() {
        let gvk = GroupVersionKind::gvk("deploy.razee.io", "v1alpha2", "MustacheTemplate");
        let mut writer = reflector::store::Writer::new(ApiResource::from_gvk(&gvk));
        let store = writer.as_reader();
        let healthy = AtomicBool::new(true);

        let (dropped_tx, mut dropped_rx) = mpsc::unbounded_channel();
        let factory = move |key: &QualifiedName| -> Box<dyn Controller + Send> {
            Box::new(Tracked {
                key: key.to_string(),
                dropped: dropped_tx.clone(),
            })
        };

        let (events_tx, events_rx) = futures::channel::mpsc::unbounded();
        let dispatch = dispatch_events(&factory, events_rx, &healthy, &store);
        let feed = async move {
            writer.apply_watcher_event(&watcher::Event::Applied(template("alpha")));
            events_tx
                .unbounded_send(Ok(template_event("alpha", true)))
                .unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;

            // The relist returns beta only: alpha was deleted while no watch
            // was open, so no deletion event will ever arrive for it.
            writer.apply_watcher_event(&watcher::Event::Restarted(vec![template("beta")]));
            events_tx
                .unbounded_send(Ok(template_event("beta", true)))
                .unwrap();

            let dropped = tokio::time::timeout(Duration::from_secs(5), dropped_rx.recv())
                .await
                .expect("the controller for the vanished object should be dropped")
                .unwrap();
            assert_eq!(dropped, "razeedeploy/alpha");
        };
        tokio::join!(dispatch, feed);
    }

    #[tokio::test]
    async fn restart_window_ends_the_handler() {
        let factory = |_: &QualifiedName| -> Box<dyn Controller + Send> {
            Box::new(controller(|_stop, _event| async {
                Ok::<_, Infallible>(())
            }))
        };
        let handler = EventHandler::new(template_meta(), offline_client(), factory)
            .restart_after(Duration::from_millis(50));

        let started = Instant::now();
        tokio::time::timeout(Duration::from_secs(5), handler.start())
            .await
            .expect("handler should end once the restart window elapses");
        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
