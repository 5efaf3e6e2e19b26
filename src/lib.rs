//! Bootstrap for the MustacheTemplate custom resource controller.
//!
//! The crate wires up what a controller pod needs before any reconciliation
//! happens: a kubernetes client, discovery of the watched resource type, a
//! restarting watch with one controller per object, a liveness heartbeat and
//! the process signal handlers. What to do with each object is supplied as a
//! [`ControllerFactory`], usually a closure wrapping [`controller`].
//!
//! ```no_run
//! use mustache_template_controller::{controller, Controller, ObjectEvent, QualifiedName, Settings};
//!
//! # async fn boot() -> Result<(), mustache_template_controller::RunError> {
//! let factory = |_key: &QualifiedName| -> Box<dyn Controller + Send> {
//!     Box::new(controller(|_stop, _event: ObjectEvent| async move {
//!         // render and apply the template here
//!         Ok::<_, std::convert::Infallible>(())
//!     }))
//! };
//! mustache_template_controller::run(Settings::from_env(), factory).await
//! # }
//! ```

pub mod handler;
pub mod meta;
mod runner;
pub mod settings;
pub mod signals;
pub mod watch;

pub use handler::{controller, Controller, ControllerFactory, EventHandler, Liveness};
pub use meta::KubeResourceMeta;
pub use runner::{run, RunError};
pub use settings::Settings;
pub use watch::{ObjectEvent, QualifiedName};

/// Kind of the custom resource this controller watches.
pub const CONTROLLER_KIND: &str = "MustacheTemplate";

/// `apiVersion` the watch is pinned to.
pub const TARGET_API_VERSION: &str = "deploy.razee.io/v1alpha2";
