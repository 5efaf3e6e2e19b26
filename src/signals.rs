//! Process-wide signal and panic handlers.

use std::panic;
use std::sync::Once;

static INSTALL: Once = Once::new();

/// Installs the SIGTERM listener and the logging panic hook.
///
/// Idempotent. Must be called from within a tokio runtime so the listener
/// task can be spawned.
pub fn install() {
    INSTALL.call_once(|| {
        install_panic_hook();
        #[cfg(unix)]
        spawn_sigterm_listener();
    });
}

fn install_panic_hook() {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        log::error!("Unhandled panic: {info}");
        previous(info);
    }));
}

/// SIGTERM is logged and otherwise left alone. Kubernetes follows up with
/// SIGKILL once the termination grace period runs out.
#[cfg(unix)]
fn spawn_sigterm_listener() {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                log::warn!("Failed to register the SIGTERM handler: {err}");
                return;
            }
        };
        while sigterm.recv().await.is_some() {
            log::info!("Received SIGTERM, not handling at this time");
        }
    });
}
