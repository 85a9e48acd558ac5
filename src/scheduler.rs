//! Scheduler capability surface.
//!
//! The session consumes a small slice of its host runtime: descriptor
//! readiness, blocking-call offload and name resolution. Runtimes that
//! cannot watch raw descriptors (no I/O driver, exotic executors) return
//! `None` from [`Scheduler::readiness`] and every client-library call goes
//! through the worker pool instead. The capability is probed once per
//! session at creation time and the chosen strategy never changes.

use std::future::Future;
use std::io;
use std::net::IpAddr;
use std::os::fd::{AsRawFd, RawFd};
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::Interest;
use tokio::io::unix::AsyncFd;

use crate::error::{Error, Result};

/// Boxed future used by the dyn-safe scheduler traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Readiness waits on one registered descriptor.
///
/// Dropping the watch deregisters the descriptor, so registration and
/// deregistration stay paired on every code path.
pub trait FdWatch: Send + Sync {
    /// Wait until the descriptor is readable, then consume the event.
    fn readable(&self) -> BoxFuture<'_, io::Result<()>>;

    /// Wait until the descriptor is writable, then consume the event.
    fn writable(&self) -> BoxFuture<'_, io::Result<()>>;
}

/// Descriptor-readiness registration.
pub trait Readiness: Send + Sync + 'static {
    /// Register interest in `fd` for both read and write events.
    fn register(&self, fd: RawFd) -> io::Result<Box<dyn FdWatch>>;
}

/// The slice of the host runtime the session relies on.
pub trait Scheduler: Send + Sync + 'static {
    /// Descriptor-readiness support, or `None` when only blocking-call
    /// offload is available.
    fn readiness(&self) -> Option<Arc<dyn Readiness>>;

    /// Run `job` on the worker-thread pool. The returned future resolves
    /// when the job has finished; it fails only if the pool dropped the job.
    fn offload(&self, job: Box<dyn FnOnce() + Send + 'static>) -> BoxFuture<'static, Result<()>>;

    /// Resolve `host` to addresses with the system resolver.
    fn resolve_host(&self, host: &str) -> BoxFuture<'static, io::Result<Vec<IpAddr>>>;
}

/// [`Scheduler`] implementation for tokio.
#[derive(Clone)]
pub struct TokioScheduler {
    readiness: Option<Arc<TokioReadiness>>,
}

impl TokioScheduler {
    /// Scheduler with descriptor-readiness support. Requires a runtime with
    /// an I/O driver.
    pub fn new() -> Self {
        Self {
            readiness: Some(Arc::new(TokioReadiness)),
        }
    }

    /// Scheduler without descriptor-readiness support. Sessions created
    /// against it use the offload strategy for every client-library call.
    pub fn without_readiness() -> Self {
        Self { readiness: None }
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for TokioScheduler {
    fn readiness(&self) -> Option<Arc<dyn Readiness>> {
        self.readiness
            .clone()
            .map(|r| r as Arc<dyn Readiness>)
    }

    fn offload(&self, job: Box<dyn FnOnce() + Send + 'static>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            tokio::task::spawn_blocking(job)
                .await
                .map_err(|e| Error::Operation(format!("worker pool failure: {e}")))
        })
    }

    fn resolve_host(&self, host: &str) -> BoxFuture<'static, io::Result<Vec<IpAddr>>> {
        let host = host.to_owned();
        Box::pin(async move {
            let addrs = tokio::net::lookup_host((host.as_str(), 0)).await?;
            Ok(addrs.map(|addr| addr.ip()).collect())
        })
    }
}

struct TokioReadiness;

impl Readiness for TokioReadiness {
    fn register(&self, fd: RawFd) -> io::Result<Box<dyn FdWatch>> {
        let inner = AsyncFd::with_interest(Raw(fd), Interest::READABLE | Interest::WRITABLE)?;
        Ok(Box::new(TokioWatch { inner }))
    }
}

/// Borrowed descriptor. The handle owns the socket; the watch only
/// registers it with the reactor and must never close it.
struct Raw(RawFd);

impl AsRawFd for Raw {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

struct TokioWatch {
    inner: AsyncFd<Raw>,
}

impl FdWatch for TokioWatch {
    fn readable(&self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            let mut guard = self.inner.readable().await?;
            guard.clear_ready();
            Ok(())
        })
    }

    fn writable(&self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async move {
            let mut guard = self.inner.writable().await?;
            guard.clear_ready();
            Ok(())
        })
    }
}
