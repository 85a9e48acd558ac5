//! Shared descriptor-interest bookkeeping.
//!
//! A session's descriptor has up to two kinds of consumers at once: the
//! command driver of the in-flight statement and any number of notification
//! waiters. The reactor accepts only one registration per descriptor, so
//! all consumers share a single watch behind a reader refcount: the first
//! acquirer registers, the last one out deregisters. Guards pair every
//! registration with its deregistration, including error and cancellation
//! paths.

use std::os::fd::RawFd;
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::scheduler::{FdWatch, Readiness};

struct WatchState {
    users: usize,
    watch: Option<Arc<dyn FdWatch>>,
}

/// Refcounted descriptor-interest registration for one session.
pub(crate) struct DescriptorInterest {
    readiness: Arc<dyn Readiness>,
    fd: RawFd,
    state: Mutex<WatchState>,
}

impl DescriptorInterest {
    pub(crate) fn new(readiness: Arc<dyn Readiness>, fd: RawFd) -> Self {
        Self {
            readiness,
            fd,
            state: Mutex::new(WatchState {
                users: 0,
                watch: None,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, WatchState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take a share of the registration, registering the descriptor if this
    /// is the first consumer.
    pub(crate) fn acquire(&self) -> Result<InterestGuard<'_>> {
        let mut state = self.lock();
        let watch = match &state.watch {
            Some(watch) => Arc::clone(watch),
            None => {
                let watch: Arc<dyn FdWatch> = Arc::from(self.readiness.register(self.fd)?);
                state.watch = Some(Arc::clone(&watch));
                watch
            }
        };
        state.users += 1;
        Ok(InterestGuard {
            interest: self,
            watch,
        })
    }

    /// Tear down the registration regardless of outstanding consumers.
    /// Used by `close()`; repeated calls are no-ops.
    pub(crate) fn clear(&self) {
        let mut state = self.lock();
        state.users = 0;
        state.watch = None;
    }
}

/// One consumer's share of the descriptor registration.
pub(crate) struct InterestGuard<'a> {
    interest: &'a DescriptorInterest,
    watch: Arc<dyn FdWatch>,
}

impl InterestGuard<'_> {
    pub(crate) fn watch(&self) -> &dyn FdWatch {
        self.watch.as_ref()
    }
}

impl Drop for InterestGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.interest.lock();
        state.users = state.users.saturating_sub(1);
        if state.users == 0 {
            state.watch = None;
        }
    }
}
