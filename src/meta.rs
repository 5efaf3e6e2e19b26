//! API discovery for the watched resource type.

use kube_client::error::DiscoveryError;
use kube_client::{discovery, Client};
use kube_core::discovery::{ApiCapabilities, ApiResource};

/// Resolved apiserver metadata for one resource type, pinned to the requested
/// group and version.
#[derive(Debug, Clone)]
pub struct KubeResourceMeta {
    api_resource: ApiResource,
    capabilities: ApiCapabilities,
}

impl KubeResourceMeta {
    pub fn new(api_resource: ApiResource, capabilities: ApiCapabilities) -> Self {
        KubeResourceMeta {
            api_resource,
            capabilities,
        }
    }

    /// The group of the resource type, or empty string for the core group.
    pub fn group(&self) -> &str {
        &self.api_resource.group
    }

    pub fn version(&self) -> &str {
        &self.api_resource.version
    }

    pub fn kind(&self) -> &str {
        &self.api_resource.kind
    }

    /// The plural name of the resource type.
    pub fn plural(&self) -> &str {
        &self.api_resource.plural
    }

    pub fn api_resource(&self) -> &ApiResource {
        &self.api_resource
    }

    /// Whether the apiserver advertises `verb` for this resource.
    pub fn supports(&self, verb: &str) -> bool {
        self.capabilities.supports_operation(verb)
    }
}

/// Looks up the metadata for `kind` served at exactly `api_version`, requiring
/// the capability for `verb`.
///
/// Returns `Ok(None)` when the group, version or kind is not served, or when
/// the resource does not advertise `verb`. Transport and auth failures
/// propagate.
pub async fn lookup(
    client: &Client,
    api_version: &str,
    kind: &str,
    verb: &str,
) -> Result<Option<KubeResourceMeta>, kube_client::Error> {
    let (group_name, version) = split_api_version(api_version);

    let group = match discovery::oneshot::group(client, group_name).await {
        Ok(group) => group,
        Err(kube_client::Error::Discovery(DiscoveryError::MissingApiGroup(_))) => {
            log::debug!("API group {group_name:?} is not served by this cluster");
            return Ok(None);
        }
        // The group can vanish between the /apis listing and the per-version
        // resource queries.
        Err(kube_client::Error::Api(response)) if response.code == 404 => {
            log::debug!("API group {group_name:?} went away during discovery");
            return Ok(None);
        }
        Err(err) => return Err(err),
    };

    let found = group
        .versioned_resources(version)
        .into_iter()
        .find(|(resource, _)| resource.kind == kind);

    match found {
        Some((api_resource, capabilities)) if capabilities.supports_operation(verb) => {
            Ok(Some(KubeResourceMeta::new(api_resource, capabilities)))
        }
        Some(_) => {
            log::debug!("{api_version}: {kind} is served but does not support {verb}");
            Ok(None)
        }
        None => {
            log::debug!("{api_version}: {kind} is not served by this cluster");
            Ok(None)
        }
    }
}

/// Splits an `apiVersion` string into group and version; a bare version such
/// as `v1` belongs to the core group.
fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}
