//! Server push-message delivery.
//!
//! NOTIFY messages arrive on the session's socket whenever the handle is
//! polled, independent of statement execution. The session drains them into
//! a FIFO queue on every poll cycle (and after every offloaded statement);
//! [`Notifications::pop`] consumes the queue, and when it is empty on the
//! readiness strategy it takes a share of the session's descriptor interest
//! and pumps the handle itself until a message arrives.

use std::collections::VecDeque;
use std::sync::{Mutex, Weak};

use tokio::sync::Notify;

use crate::error::{Error, Result};
use crate::handle::{ClientHandle, Notification};
use crate::session::SessionShared;

/// FIFO queue of notifications with an arrival signal.
#[derive(Default)]
pub(crate) struct NotificationSink {
    queue: Mutex<VecDeque<Notification>>,
    arrived: Notify,
}

impl NotificationSink {
    pub(crate) fn extend(&self, notifications: Vec<Notification>) {
        if notifications.is_empty() {
            return;
        }
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        for n in notifications {
            queue.push_back(n);
            self.arrived.notify_one();
        }
    }

    pub(crate) fn try_pop(&self) -> Option<Notification> {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    pub(crate) fn arrived(&self) -> &Notify {
        &self.arrived
    }
}

/// Handle for consuming a session's server push-messages.
///
/// Holds only a weak reference to its session: an outstanding
/// `Notifications` value never keeps a dropped session (or its socket)
/// alive, and `pop` on a dead or closed session reports a programming
/// error.
pub struct Notifications<H: ClientHandle> {
    pub(crate) shared: Weak<SessionShared<H>>,
}

impl<H: ClientHandle> Clone for Notifications<H> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<H: ClientHandle> Notifications<H> {
    /// Pop the oldest queued notification without waiting.
    pub fn try_pop(&self) -> Option<Notification> {
        self.shared.upgrade().and_then(|s| s.notifications.try_pop())
    }

    /// Pop the oldest notification, suspending until one arrives.
    ///
    /// While the queue is empty on the readiness strategy this registers
    /// read interest on the session's descriptor (shared with any
    /// concurrent statement's own interest) and polls the handle as data
    /// arrives. On the offload strategy it waits for the drains performed
    /// around offloaded statements.
    pub async fn pop(&self) -> Result<Notification> {
        let shared = self
            .shared
            .upgrade()
            .ok_or_else(|| Error::Programming("connection is closed".into()))?;
        shared.pop_notification().await
    }
}
