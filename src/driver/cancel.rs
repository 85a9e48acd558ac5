//! Cancellation coordinator.
//!
//! Every driven operation is wrapped in an [`Operation`], a settle-once
//! handle around the task actually touching the client handle. The task is
//! shielded from the caller: neither an explicit [`crate::Session::cancel`]
//! nor dropping the caller's future can abort it mid-poll. Instead the
//! coordinator requests server-side abort through the cancellation token
//! (always via worker-pool offload, the token's `cancel` blocks), waits for
//! the shielded task to settle, and only then lets go of the execution
//! permit. Cancellation is re-raised to the caller as [`Error::Cancelled`],
//! never swallowed and never masked as a generic failure.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Notify, OwnedMutexGuard};
use tokio::task::{JoinError, JoinHandle};

use crate::driver::offload;
use crate::error::{Error, Result};
use crate::scheduler::Scheduler;

type CancelFn = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// A single pending unit of work: created when driving begins, settled
/// exactly once, never reused.
pub(crate) struct Operation<T: Send + 'static> {
    task: Option<JoinHandle<Result<T>>>,
    scheduler: Arc<dyn Scheduler>,
    cancel: Option<CancelFn>,
    permit: Option<OwnedMutexGuard<()>>,
}

impl<T: Send + 'static> Operation<T> {
    /// Spawn `fut` as an independent task holding the execution permit.
    pub(crate) fn spawn<F>(
        scheduler: Arc<dyn Scheduler>,
        cancel: CancelFn,
        permit: OwnedMutexGuard<()>,
        fut: F,
    ) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            task: Some(tokio::spawn(fut)),
            scheduler,
            cancel: Some(cancel),
            permit: Some(permit),
        }
    }

    /// Await settlement, watching `cancel_signal` for a caller-requested
    /// cancellation.
    ///
    /// Returns the execution permit (for the caller to reuse or release)
    /// together with the outcome. On cancellation the permit is returned
    /// only after the best-effort server-side cancel and the settlement of
    /// the shielded task, so no second operation can interleave with a
    /// still-cancelling one.
    pub(crate) async fn wait(
        mut self,
        cancel_signal: &Notify,
    ) -> (Option<OwnedMutexGuard<()>>, Result<T>) {
        let settled = {
            let Some(task) = self.task.as_mut() else {
                return (
                    self.permit.take(),
                    Err(Error::Operation("operation already settled".into())),
                );
            };
            let cancelled = cancel_signal.notified();
            tokio::pin!(cancelled);
            tokio::select! {
                result = &mut *task => Some(result),
                _ = &mut cancelled => None,
            }
        };

        match settled {
            Some(result) => {
                self.task = None;
                (self.permit.take(), flatten(result))
            }
            None => {
                tracing::debug!("cancellation requested; asking server to abort");
                if let Some(cancel) = self.cancel.take() {
                    // Best effort: a failed cancel request is not worth
                    // reporting over the cancellation itself.
                    if let Err(e) = offload::run(self.scheduler.as_ref(), cancel).await {
                        tracing::debug!(error = %e, "server-side cancel request failed");
                    }
                }
                if let Some(task) = self.task.take() {
                    let _ = task.await;
                }
                (self.permit.take(), Err(Error::Cancelled))
            }
        }
    }
}

impl<T: Send + 'static> Drop for Operation<T> {
    /// The caller's future was dropped with the operation unsettled. The
    /// cleanup cannot run here, so it is detached: server-side cancel, then
    /// settlement, then permit release, all on a spawned task.
    fn drop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        if task.is_finished() {
            task.abort();
            return;
        }
        let scheduler = Arc::clone(&self.scheduler);
        let cancel = self.cancel.take();
        let permit = self.permit.take();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                tracing::debug!("caller dropped mid-operation; detaching cancel cleanup");
                if let Some(cancel) = cancel {
                    if let Err(e) = offload::run(scheduler.as_ref(), cancel).await {
                        tracing::debug!(error = %e, "server-side cancel request failed");
                    }
                }
                let _ = task.await;
                drop(permit);
            });
        } else {
            // Runtime is gone; the task cannot make progress anyway.
            task.abort();
        }
    }
}

fn flatten<T>(result: std::result::Result<Result<T>, JoinError>) -> Result<T> {
    match result {
        Ok(inner) => inner,
        Err(e) if e.is_cancelled() => Err(Error::Cancelled),
        Err(e) => Err(Error::Operation(format!("operation task failed: {e}"))),
    }
}
