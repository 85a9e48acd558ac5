//! Readiness driver strategy.
//!
//! Translates `poll()` results into descriptor-readiness waits. Two
//! variants exist:
//!
//! - [`drive_connect`] re-reads the descriptor and registers a fresh watch
//!   on every cycle, because the handle may rebind to a new socket
//!   mid-handshake;
//! - the command loop in [`crate::session`] holds one registration for the
//!   whole command through [`super::interest`], since the descriptor is
//!   stable after connecting and the shared watch covers both interest
//!   kinds.

use crate::error::{Error, Result};
use crate::handle::{ClientHandle, PollStatus};
use crate::scheduler::Readiness;

/// Drive a mid-handshake handle to completion.
pub(crate) async fn drive_connect<H: ClientHandle>(
    handle: &mut H,
    readiness: &dyn Readiness,
) -> Result<()> {
    loop {
        let status = handle.poll()?;
        match status {
            PollStatus::Ready => return Ok(()),
            PollStatus::NeedRead => {
                // Fresh registration each cycle; the watch is dropped (and
                // the interest deregistered) before the next poll.
                let watch = readiness.register(handle.descriptor())?;
                watch.readable().await.map_err(Error::from)?;
            }
            PollStatus::NeedWrite => {
                let watch = readiness.register(handle.descriptor())?;
                watch.writable().await.map_err(Error::from)?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{CancelToken, Notification, TransactionStatus};
    use crate::scheduler::{BoxFuture, FdWatch};
    use std::collections::VecDeque;
    use std::io;
    use std::os::fd::RawFd;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct ScriptedHandle {
        polls: VecDeque<Result<PollStatus>>,
        descriptors: VecDeque<RawFd>,
        fd: RawFd,
    }

    #[derive(Clone)]
    struct NoCancel;

    impl CancelToken for NoCancel {
        fn cancel(&self) -> Result<()> {
            Ok(())
        }
    }

    impl ClientHandle for ScriptedHandle {
        type Rows = ();
        type Cancel = NoCancel;

        fn poll(&mut self) -> Result<PollStatus> {
            let status = self.polls.pop_front().unwrap_or(Ok(PollStatus::Ready));
            if let Some(fd) = self.descriptors.pop_front() {
                self.fd = fd;
            }
            status
        }

        fn descriptor(&self) -> RawFd {
            self.fd
        }

        fn cancel_token(&self) -> Result<Self::Cancel> {
            Ok(NoCancel)
        }

        fn close(&mut self) {}

        fn is_closed(&self) -> bool {
            false
        }

        fn transaction_status(&self) -> TransactionStatus {
            TransactionStatus::Idle
        }

        fn send_query(&mut self, _sql: &str) -> Result<()> {
            Ok(())
        }

        fn take_rows(&mut self) -> Result<()> {
            Ok(())
        }

        fn drain_notifications(&mut self) -> Vec<Notification> {
            Vec::new()
        }

        fn connect_blocking(&mut self) -> Result<()> {
            Ok(())
        }

        fn execute_blocking(&mut self, _sql: &str) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingReadiness {
        registered_fds: Mutex<Vec<RawFd>>,
        live: Arc<AtomicUsize>,
    }

    struct RecordingWatch {
        live: Arc<AtomicUsize>,
    }

    impl Readiness for RecordingReadiness {
        fn register(&self, fd: RawFd) -> io::Result<Box<dyn FdWatch>> {
            self.registered_fds
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(fd);
            self.live.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(RecordingWatch {
                live: Arc::clone(&self.live),
            }))
        }
    }

    impl Drop for RecordingWatch {
        fn drop(&mut self) {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl FdWatch for RecordingWatch {
        fn readable(&self) -> BoxFuture<'_, io::Result<()>> {
            Box::pin(async { Ok(()) })
        }

        fn writable(&self) -> BoxFuture<'_, io::Result<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn connect_reregisters_on_the_rebound_descriptor() {
        let mut handle = ScriptedHandle {
            polls: VecDeque::from([
                Ok(PollStatus::NeedWrite),
                Ok(PollStatus::NeedRead),
                Ok(PollStatus::Ready),
            ]),
            // The handshake rebinds the socket between the first and second
            // poll.
            descriptors: VecDeque::from([3, 8, 8]),
            fd: 3,
        };
        let readiness = RecordingReadiness::default();
        drive_connect(&mut handle, &readiness).await.unwrap();

        let fds = readiness
            .registered_fds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        assert_eq!(fds, vec![3, 8]);
        // Every registration was dropped again.
        assert_eq!(readiness.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn connect_poll_error_settles_with_that_error() {
        let mut handle = ScriptedHandle {
            polls: VecDeque::from([
                Ok(PollStatus::NeedWrite),
                Err(Error::Connection("connection refused".into())),
            ]),
            descriptors: VecDeque::new(),
            fd: 3,
        };
        let readiness = RecordingReadiness::default();
        let err = drive_connect(&mut handle, &readiness).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
        assert_eq!(readiness.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn immediate_ready_never_registers() {
        let mut handle = ScriptedHandle {
            polls: VecDeque::from([Ok(PollStatus::Ready)]),
            descriptors: VecDeque::new(),
            fd: 3,
        };
        let readiness = RecordingReadiness::default();
        drive_connect(&mut handle, &readiness).await.unwrap();
        assert!(
            readiness
                .registered_fds
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .is_empty()
        );
    }
}
