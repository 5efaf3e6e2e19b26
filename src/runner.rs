use kube_client::Client;
use kube_core::discovery::verbs;

use crate::handler::{ControllerFactory, EventHandler};
use crate::meta;
use crate::settings::Settings;
use crate::signals;

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("failed to build the kubernetes client")]
    Client(#[source] kube_client::Error),
    #[error("resource metadata lookup for {api_version} {kind} failed")]
    Lookup {
        api_version: String,
        kind: String,
        #[source]
        source: kube_client::Error,
    },
}

/// Boots the controller.
///
/// Builds a client from the environment, resolves the watched resource type
/// against the apiserver and runs the event handler until its restart window
/// elapses. A resource type the cluster does not serve is logged and treated
/// as "no work", not an error.
pub async fn run<F>(settings: Settings, factory: F) -> Result<(), RunError>
where
    F: ControllerFactory + 'static,
{
    signals::install();
    log::info!("Running {} controller", settings.kind);

    let client = match Client::try_default().await {
        Ok(client) => client,
        Err(err) => {
            log::error!("Unable to build a kubernetes client: {err}");
            return Err(RunError::Client(err));
        }
    };

    match meta::lookup(&client, &settings.api_version, &settings.kind, verbs::WATCH).await {
        Ok(Some(meta)) => {
            let mut handler =
                EventHandler::new(meta, client, factory).watch_timeout(settings.watch_timeout);
            if let Some(liveness) = settings.liveness {
                handler = handler.liveness(liveness);
            }
            if let Some(restart_after) = settings.restart_after {
                handler = handler.restart_after(restart_after);
            }
            handler.start().await;
        }
        Ok(None) => {
            log::error!(
                "Unable to find KubeResourceMeta for {}: {}",
                settings.api_version,
                settings.kind
            );
            log::info!("No work found, exiting");
        }
        Err(err) => {
            log::error!(
                "Resource metadata lookup for {} {} failed: {err}",
                settings.api_version,
                settings.kind
            );
            return Err(RunError::Lookup {
                api_version: settings.api_version,
                kind: settings.kind,
                source: err,
            });
        }
    }

    Ok(())
}
