//! The client-handle interface.
//!
//! The underlying client library is an external collaborator: it owns the
//! socket, the wire protocol and SQL execution. This module specifies the
//! seam aiopq drives it through. A handle exposes a non-blocking `poll`
//! plus the descriptor it is multiplexed on, and a set of blocking
//! primitives used when the scheduler can only offload to worker threads.

use std::os::fd::RawFd;

use crate::error::Result;

/// Readiness code returned by [`ClientHandle::poll`].
///
/// A defective handle must report failure through `Err`, which settles the
/// current operation; there is no "unexpected code" value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// The in-flight operation completed.
    Ready,
    /// The handle needs the descriptor to become readable.
    NeedRead,
    /// The handle needs the descriptor to become writable.
    NeedWrite,
}

/// Transaction status mirrored from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    /// Not in a transaction.
    #[default]
    Idle,
    /// A command is in progress.
    Active,
    /// Inside a transaction block.
    InTransaction,
    /// Inside a failed transaction block.
    InError,
    /// The connection is in a bad state.
    Unknown,
}

impl TransactionStatus {
    /// Returns true when no transaction is open.
    pub fn is_idle(self) -> bool {
        matches!(self, TransactionStatus::Idle)
    }
}

/// An asynchronous server push-message (LISTEN/NOTIFY).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Process ID of the notifying backend.
    pub process_id: u32,
    /// Channel the notification was sent on.
    pub channel: String,
    /// Payload string, possibly empty.
    pub payload: String,
}

/// Server-side cancellation token.
///
/// Obtained once per handle and kept by the session. It must be independent
/// of the handle's socket (it opens its own connection to the server), so a
/// cancel request never contends with a worker thread that is blocked inside
/// the handle.
pub trait CancelToken: Clone + Send + Sync + 'static {
    /// Request server-side abort of the in-flight operation. Blocking; only
    /// ever called from a worker thread.
    fn cancel(&self) -> Result<()>;
}

/// A poll-driven database client handle.
///
/// Exactly one logical operation may be in flight per handle; the session
/// enforces this with its execution lock. During the connect handshake the
/// descriptor may rebind to a new socket between polls, so drivers must
/// re-read it each cycle until the handshake completes.
pub trait ClientHandle: Send + 'static {
    /// Materialized result set of one statement. Row decoding is the client
    /// library's business; aiopq only moves the value through.
    type Rows: Send + 'static;

    /// Server-side cancellation token type.
    type Cancel: CancelToken;

    /// Advance the in-flight operation without blocking.
    fn poll(&mut self) -> Result<PollStatus>;

    /// The descriptor the handle is currently multiplexed on.
    fn descriptor(&self) -> RawFd;

    /// Obtain a cancellation token for this handle.
    fn cancel_token(&self) -> Result<Self::Cancel>;

    /// Close the handle and release its socket. Must be idempotent.
    fn close(&mut self);

    /// Returns true once the handle has been closed.
    fn is_closed(&self) -> bool;

    /// Transaction status as of the last completed operation.
    fn transaction_status(&self) -> TransactionStatus;

    /// Begin sending `sql` without blocking; completion is signalled by
    /// `poll` returning [`PollStatus::Ready`].
    fn send_query(&mut self, sql: &str) -> Result<()>;

    /// Consume the finished statement's result set. Only valid after `poll`
    /// returned `Ready` for a sent query.
    fn take_rows(&mut self) -> Result<Self::Rows>;

    /// Drain any push-messages the handle accumulated while polling.
    fn drain_notifications(&mut self) -> Vec<Notification>;

    /// Complete the connection handshake synchronously. Used by the offload
    /// strategy; only ever called from a worker thread.
    fn connect_blocking(&mut self) -> Result<()>;

    /// Execute `sql` synchronously. Used by the offload strategy; only ever
    /// called from a worker thread.
    fn execute_blocking(&mut self, sql: &str) -> Result<Self::Rows>;
}

/// Opens client handles for connection attempts.
pub trait Connector: Send + Sync + 'static {
    /// The handle type this connector produces.
    type Handle: ClientHandle;

    /// Start a non-blocking connection attempt against one resolved target.
    ///
    /// The returned handle is mid-handshake; the caller drives it to
    /// completion with the connect variant of the operation driver (or with
    /// [`ClientHandle::connect_blocking`] on the offload strategy).
    fn open(
        &self,
        target: &crate::resolve::AttemptTarget,
        params: &crate::opts::ConnectionParams,
    ) -> Result<Self::Handle>;
}
