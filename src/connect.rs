//! Connection establishment.
//!
//! Resolves the configured hosts into an ordered list of attempt targets
//! and tries them strictly in order, each with a fresh handle and the same
//! per-attempt timeout. Non-cancellation failures are collected: a single
//! failed attempt is re-raised verbatim, multiple failures become one
//! aggregate error listing every target. Cancelling the caller (dropping
//! the future) aborts the whole resolution, never falling through to later
//! targets.

use std::sync::Arc;

use crate::driver::{offload, probe_readiness, readiness};
use crate::error::{AttemptFailure, AttemptFailures, Error, Result};
use crate::handle::{ClientHandle, Connector};
use crate::opts::ConnectionParams;
use crate::resolve::{AttemptTarget, resolve_targets};
use crate::scheduler::{Readiness, Scheduler};
use crate::session::Session;

/// Connect to the first reachable target and return an established session.
///
/// The driver strategy is probed once, used for every connect attempt, and
/// fixed on the resulting session for its lifetime.
pub async fn connect<C: Connector>(
    params: &ConnectionParams,
    connector: &C,
    scheduler: Arc<dyn Scheduler>,
) -> Result<Session<C::Handle>> {
    let timeout = params.attempt_timeout();
    let targets = resolve_targets(params, scheduler.as_ref()).await?;
    let readiness = probe_readiness(scheduler.as_ref());

    let mut failures = Vec::new();
    for target in targets {
        match attempt(params, connector, &scheduler, readiness.as_deref(), &target, timeout).await {
            Ok(handle) => {
                return Session::with_capability(handle, scheduler, readiness);
            }
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(error) => {
                tracing::debug!(target = %target.describe(), %error, "connection attempt failed");
                failures.push(AttemptFailure {
                    target: target.describe(),
                    error,
                });
            }
        }
    }

    if failures.len() == 1 {
        // A single attempt's failure is raised verbatim.
        let Some(failure) = failures.pop() else {
            return Err(Error::Connection("no connection attempt was made".into()));
        };
        return Err(failure.error);
    }
    Err(Error::AllAttemptsFailed(AttemptFailures(failures)))
}

/// Drive one connection attempt to completion, honoring the per-attempt
/// timeout. A handle whose handshake fails or times out is closed before
/// the error is reported; `close()` is the socket's release point.
async fn attempt<C: Connector>(
    params: &ConnectionParams,
    connector: &C,
    scheduler: &Arc<dyn Scheduler>,
    readiness: Option<&dyn Readiness>,
    target: &AttemptTarget,
    timeout: Option<std::time::Duration>,
) -> Result<C::Handle> {
    match readiness {
        Some(readiness) => {
            let mut handle = connector.open(target, params)?;
            let drive = readiness::drive_connect(&mut handle, readiness);
            let result = match timeout {
                Some(duration) => match tokio::time::timeout(duration, drive).await {
                    Ok(result) => result,
                    Err(_) => Err(timeout_error(target)),
                },
                None => drive.await,
            };
            match result {
                Ok(()) => Ok(handle),
                Err(error) => {
                    handle.close();
                    Err(error)
                }
            }
        }
        None => {
            let mut handle = connector.open(target, params)?;
            let scheduler = Arc::clone(scheduler);
            let mut drive = Box::pin(async move {
                offload::run(scheduler.as_ref(), move || {
                    match handle.connect_blocking() {
                        Ok(()) => Ok(handle),
                        Err(error) => {
                            handle.close();
                            Err(error)
                        }
                    }
                })
                .await
            });
            match timeout {
                Some(duration) => match tokio::time::timeout(duration, &mut drive).await {
                    Ok(result) => result,
                    Err(_) => {
                        // The worker thread still owns the handle; close it
                        // once the blocking handshake finally returns.
                        tokio::spawn(async move {
                            if let Ok(mut handle) = drive.await {
                                handle.close();
                            }
                        });
                        Err(timeout_error(target))
                    }
                },
                None => drive.await,
            }
        }
    }
}

fn timeout_error(target: &AttemptTarget) -> Error {
    Error::Connection(format!(
        "timeout expired connecting to {}",
        target.describe()
    ))
}
