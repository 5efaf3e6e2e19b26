use std::fmt;
use std::future::Future;
use std::panic;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::watch::{ObjectEvent, QualifiedName};

/// Per-object handler for watch events.
///
/// Instances are created by a [`ControllerFactory`] the first time an object
/// is seen and receive every subsequent event for it, deletion included.
pub trait Controller {
    fn dispatch(&mut self, event: ObjectEvent);
}

/// Creates [`Controller`] instances, one per watched object.
pub trait ControllerFactory: Send {
    fn create(&self, key: &QualifiedName) -> Box<dyn Controller + Send>;
}

impl<F> ControllerFactory for F
where
    F: Fn(&QualifiedName) -> Box<dyn Controller + Send> + Send,
{
    fn create(&self, key: &QualifiedName) -> Box<dyn Controller + Send> {
        self(key)
    }
}

/// Builds a [`Controller`] from an async closure.
///
/// Each dispatched event cancels and awaits the previous in-flight execution
/// for the object, then runs `run` with a fresh cancellation token. Errors are
/// logged and never reach the event loop.
pub fn controller<Run, Fut, Err>(run: Run) -> FnController<Run>
where
    Run: Send + Sync + Fn(CancellationToken, ObjectEvent) -> Fut + 'static,
    Fut: Future<Output = Result<(), Err>> + Send + 'static,
    Err: fmt::Debug + Send,
{
    FnController {
        run: Arc::new(run),
        current_task: None,
    }
}

pub struct FnController<Run> {
    run: Arc<Run>,
    current_task: Option<CancellableTask<()>>,
}

impl<Run, Fut, Err> Controller for FnController<Run>
where
    Run: Send + Sync + Fn(CancellationToken, ObjectEvent) -> Fut + 'static,
    Fut: Future<Output = Result<(), Err>> + Send + 'static,
    Err: fmt::Debug + Send,
{
    fn dispatch(&mut self, event: ObjectEvent) {
        let prev = self.current_task.take();
        let cancel = CancellationToken::new();
        let run = Arc::clone(&self.run);
        let key = event.key.clone();

        let handle = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if let Some(prev) = prev {
                    prev.cancel().await;
                }

                if cancel.is_cancelled() {
                    return;
                }

                if let Err(err) = run(cancel, event).await {
                    log::error!("Controller execution for {key} failed: {err:?}");
                }
            }
        });
        self.current_task = Some(CancellableTask {
            handle,
            stop: cancel,
        });
    }
}

struct CancellableTask<T> {
    handle: JoinHandle<T>,
    stop: CancellationToken,
}

impl<T> CancellableTask<T> {
    /// Cancels the task and waits for it to finish. A panicked task
    /// resurfaces its panic here.
    async fn cancel(self) {
        self.stop.cancel();
        if let Err(err) = self.handle.await {
            if let Ok(panic) = err.try_into_panic() {
                panic::resume_unwind(panic)
            }
        }
    }
}
