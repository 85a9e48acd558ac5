//! Offload driver strategy.
//!
//! Used when the scheduler offers no descriptor-readiness registration.
//! The blocking client-library call runs directly against the handle on a
//! worker thread while the calling task suspends; no poll/readiness logic
//! is involved.

use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::scheduler::Scheduler;

/// Run a blocking job on the scheduler's worker pool and return its value.
///
/// `Scheduler::offload` is dyn-safe and carries no return value, so the
/// job's result travels back through a shared slot.
pub(crate) async fn run<T, F>(scheduler: &dyn Scheduler, job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let slot: Arc<Mutex<Option<Result<T>>>> = Arc::new(Mutex::new(None));
    let out = Arc::clone(&slot);
    scheduler
        .offload(Box::new(move || {
            let result = job();
            let mut out = out.lock().unwrap_or_else(|e| e.into_inner());
            *out = Some(result);
        }))
        .await?;
    let mut slot = slot.lock().unwrap_or_else(|e| e.into_inner());
    slot.take()
        .unwrap_or_else(|| Err(Error::Operation("worker pool dropped the job".into())))
}
