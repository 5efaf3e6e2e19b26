//! Watch subscription events for the target resource.

use std::{fmt, hash::Hash};

use futures::{Stream, TryStreamExt};
use kube_client::Api;
use kube_core::{DynamicObject, Resource};
use kube_runtime::{reflector, watcher, WatchStreamExt};
use serde::de::DeserializeOwned;

/// Identifies one object of the watched type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QualifiedName {
    /// Namespace the object lives in; `None` for cluster-scoped objects.
    pub namespace: Option<String>,
    /// The object's `metadata.name`.
    pub name: String,
}

impl QualifiedName {
    pub fn from_resource<K: Resource>(resource: &K) -> Self {
        Self {
            namespace: resource.meta().namespace.clone(),
            name: resource.meta().name.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}/{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// One dispatchable change to a watched object.
#[derive(Debug, Clone)]
pub struct ObjectEvent<K = DynamicObject> {
    /// Which object changed.
    pub key: QualifiedName,
    /// The object as seen by the watch; for a deletion, its last known state.
    pub object: K,
    /// Whether the object still exists. `false` means this event is a deletion.
    pub exists: bool,
}

/// Endless stream of [`ObjectEvent`]s for every object of the type `dyntype`,
/// paired with the reflector store backing it.
///
/// List/watch mechanics, resync and reconnect backoff all come from
/// `kube_runtime`; deletions are detected by the object's absence from the
/// store, which always holds the watch's current view of the world. Watch
/// errors are yielded after the default backoff so the consumer can log them
/// and keep polling.
pub fn object_events<K>(
    api: Api<K>,
    watcher_config: watcher::Config,
    dyntype: K::DynamicType,
) -> (
    reflector::Store<K>,
    impl Stream<Item = Result<ObjectEvent<K>, watcher::Error>>,
)
where
    K: Resource + Clone + DeserializeOwned + fmt::Debug + Send + 'static,
    K::DynamicType: Clone + Eq + Hash,
{
    let writer = reflector::store::Writer::new(dyntype.clone());
    let store = writer.as_reader();
    let seen = writer.as_reader();

    let events = reflector(writer, watcher(api, watcher_config).default_backoff())
        .touched_objects()
        .map_ok(move |object| {
            let in_store = seen.get(&reflector::ObjectRef::from_obj_with(
                &object,
                dyntype.clone(),
            ));
            ObjectEvent {
                key: QualifiedName::from_resource(&object),
                object,
                exists: in_store.is_some(),
            }
        });

    (store, events)
}
