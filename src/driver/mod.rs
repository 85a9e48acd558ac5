//! Operation drivers.
//!
//! An operation is one pending unit of work against the client handle: the
//! connect handshake or a single command. Two driver strategies exist, one
//! per scheduler capability:
//!
//! - [`readiness`] turns `poll()` results into descriptor-readiness waits;
//! - [`offload`] runs the client library's blocking calls on the worker
//!   pool.
//!
//! The strategy is selected once per session by probing the scheduler and is
//! fixed for the session's lifetime. [`cancel`] wraps every driven operation
//! in the cancellation protocol, and [`interest`] keeps descriptor-interest
//! registrations shared and paired.

pub(crate) mod cancel;
pub(crate) mod interest;
pub(crate) mod offload;
pub(crate) mod readiness;

use std::sync::Arc;

use crate::scheduler::Scheduler;
use interest::DescriptorInterest;

/// The driver strategy held by a session. Chosen at creation, never changed.
pub(crate) enum Strategy {
    /// Drive `poll()` via descriptor-readiness waits.
    Readiness(DescriptorInterest),
    /// Offload blocking client-library calls to the worker pool.
    Offload,
}

impl Strategy {
    pub(crate) fn is_readiness(&self) -> bool {
        matches!(self, Strategy::Readiness(_))
    }
}

/// Probe the scheduler once for the connect phase. The same answer is used
/// for every attempt and for the session built from the winning one.
pub(crate) fn probe_readiness(
    scheduler: &dyn Scheduler,
) -> Option<Arc<dyn crate::scheduler::Readiness>> {
    scheduler.readiness()
}
