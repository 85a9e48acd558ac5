//! Connection session.
//!
//! A session owns one [`ClientHandle`], the execution lock that serializes
//! operations on it, and the driver strategy chosen at creation. Statements,
//! transaction commands and cancel-waits all pass through the same path:
//! acquire the lock, optionally synthesize the implicit transaction start,
//! drive the operation, and hold the lock until the operation — including
//! any cancellation — has fully settled.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use tokio::sync::{Mutex as AsyncMutex, Notify, OwnedMutexGuard};

use crate::driver::cancel::Operation;
use crate::driver::interest::DescriptorInterest;
use crate::driver::{Strategy, offload};
use crate::error::{Error, Result};
use crate::handle::{CancelToken, ClientHandle, Notification, PollStatus, TransactionStatus};
use crate::notify::{NotificationSink, Notifications};
use crate::scheduler::{Readiness, Scheduler};

/// Transaction isolation level, in server terms.
///
/// The numeric codes (1–4) match the label order historically used by the
/// wrapped library: READ COMMITTED, REPEATABLE READ, SERIALIZABLE,
/// READ UNCOMMITTED. Code 0 / label DEFAULT is represented as `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
    ReadUncommitted,
}

impl IsolationLevel {
    /// The SQL spelling used in synthesized `BEGIN TRANSACTION` commands.
    pub fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
        }
    }

    /// Numeric code of this level.
    pub fn code(self) -> i32 {
        match self {
            IsolationLevel::ReadCommitted => 1,
            IsolationLevel::RepeatableRead => 2,
            IsolationLevel::Serializable => 3,
            IsolationLevel::ReadUncommitted => 4,
        }
    }

    /// Parse a numeric isolation-level code.
    pub fn from_code(code: i32) -> Result<Self> {
        match code {
            1 => Ok(IsolationLevel::ReadCommitted),
            2 => Ok(IsolationLevel::RepeatableRead),
            3 => Ok(IsolationLevel::Serializable),
            4 => Ok(IsolationLevel::ReadUncommitted),
            _ => Err(Error::Config(
                "isolation_level must be between 1 and 4".into(),
            )),
        }
    }

    /// Parse a case-insensitive text label. `DEFAULT` resets to the server
    /// default and parses as `None`.
    pub fn parse(label: &str) -> Result<Option<Self>> {
        match label.to_uppercase().as_str() {
            "DEFAULT" => Ok(None),
            "READ COMMITTED" => Ok(Some(IsolationLevel::ReadCommitted)),
            "REPEATABLE READ" => Ok(Some(IsolationLevel::RepeatableRead)),
            "SERIALIZABLE" => Ok(Some(IsolationLevel::Serializable)),
            "READ UNCOMMITTED" => Ok(Some(IsolationLevel::ReadUncommitted)),
            _ => Err(Error::Config(format!(
                "bad value for isolation_level: '{label}'"
            ))),
        }
    }
}

#[derive(Default)]
struct SessionState {
    autocommit: bool,
    isolation: Option<IsolationLevel>,
    readonly: Option<bool>,
    deferrable: Option<bool>,
    /// Mirror of the handle's transaction status, refreshed on every poll
    /// cycle and after every offloaded statement. Accessors read the mirror
    /// so they never contend with a worker thread holding the handle.
    transaction: TransactionStatus,
    closed: bool,
}

impl SessionState {
    /// Synthesize the implicit transaction-start command for the current
    /// session parameters. Callers have already checked autocommit and the
    /// transaction status.
    fn begin_command(&self) -> String {
        let mut cmd = String::from("BEGIN TRANSACTION");
        if let Some(level) = self.isolation {
            cmd.push_str(" ISOLATION LEVEL ");
            cmd.push_str(level.as_sql());
        }
        match self.readonly {
            Some(true) => cmd.push_str(" READ ONLY"),
            Some(false) => cmd.push_str(" READ WRITE"),
            None => {}
        }
        match self.deferrable {
            Some(true) => cmd.push_str(" DEFERRABLE"),
            Some(false) => cmd.push_str(" NOT DEFERRABLE"),
            None => {}
        }
        cmd
    }
}

/// State shared between the session, in-flight operation tasks and
/// notification consumers.
pub(crate) struct SessionShared<H: ClientHandle> {
    handle: StdMutex<H>,
    cancel_token: H::Cancel,
    scheduler: Arc<dyn Scheduler>,
    strategy: Strategy,
    exec_lock: Arc<AsyncMutex<()>>,
    state: StdMutex<SessionState>,
    /// Cancel signal of the operation currently being waited on. Installed
    /// by `run_command` and removed once the operation has settled, so a
    /// late cancel request can never leave a stored wakeup behind for the
    /// next operation.
    cancel_signal: StdMutex<Option<Arc<Notify>>>,
    pub(crate) notifications: NotificationSink,
}

impl<H: ClientHandle> SessionShared<H> {
    fn lock_handle(&self) -> MutexGuard<'_, H> {
        self.handle.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.lock_state().closed {
            Err(Error::Programming("connection is closed".into()))
        } else {
            Ok(())
        }
    }

    /// Mutating session parameters is only allowed outside a transaction.
    fn check_mutable(&self) -> Result<()> {
        let state = self.lock_state();
        if state.closed {
            return Err(Error::Programming("connection is closed".into()));
        }
        if !state.transaction.is_idle() {
            return Err(Error::Programming(
                "session parameters cannot be changed inside a transaction".into(),
            ));
        }
        Ok(())
    }

    /// The transaction-start command to run before the next statement, or
    /// `None` when autocommit is on or a transaction is already open.
    fn transaction_command(&self) -> Option<String> {
        let state = self.lock_state();
        if state.closed || state.autocommit {
            return None;
        }
        if !state.transaction.is_idle() {
            return None;
        }
        Some(state.begin_command())
    }

    /// Poll the handle once, refreshing the transaction-status mirror and
    /// draining any push-messages it accumulated.
    fn poll_once(&self) -> Result<PollStatus> {
        let mut handle = self.lock_handle();
        let status = handle.poll();
        let transaction = handle.transaction_status();
        let drained = handle.drain_notifications();
        drop(handle);
        self.lock_state().transaction = transaction;
        self.notifications.extend(drained);
        status
    }

    async fn drive_readiness_command(&self, sql: &str) -> Result<H::Rows> {
        let Strategy::Readiness(interest) = &self.strategy else {
            return Err(Error::Operation("readiness strategy not selected".into()));
        };
        // The descriptor is stable after connecting, so one registration
        // (covering both interest kinds) spans the whole command.
        let guard = interest.acquire()?;
        {
            let mut handle = self.lock_handle();
            handle.send_query(sql)?;
        }
        loop {
            match self.poll_once()? {
                PollStatus::Ready => {
                    let mut handle = self.lock_handle();
                    return handle.take_rows();
                }
                PollStatus::NeedRead => guard.watch().readable().await.map_err(Error::from)?,
                PollStatus::NeedWrite => guard.watch().writable().await.map_err(Error::from)?,
            }
        }
    }

    async fn drive_offload_command(self: &Arc<Self>, sql: &str) -> Result<H::Rows> {
        let shared = Arc::clone(self);
        let sql = sql.to_owned();
        offload::run(self.scheduler.as_ref(), move || {
            let mut handle = shared.lock_handle();
            let result = handle.execute_blocking(&sql);
            let transaction = handle.transaction_status();
            let drained = handle.drain_notifications();
            drop(handle);
            shared.lock_state().transaction = transaction;
            shared.notifications.extend(drained);
            result
        })
        .await
    }

    /// Drive one command under the already-held execution permit, wrapped in
    /// the cancellation coordinator.
    pub(crate) async fn run_command(
        self: &Arc<Self>,
        sql: &str,
        permit: OwnedMutexGuard<()>,
    ) -> (Option<OwnedMutexGuard<()>>, Result<H::Rows>) {
        let shared = Arc::clone(self);
        let sql = sql.to_owned();
        let fut: std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<H::Rows>> + Send + 'static>,
        > = if self.strategy.is_readiness() {
            Box::pin(async move { shared.drive_readiness_command(&sql).await })
        } else {
            Box::pin(async move { shared.drive_offload_command(&sql).await })
        };
        let token = self.cancel_token.clone();
        // A fresh signal per operation: a cancel request that arrives after
        // this operation settles notifies a signal nothing will ever wait
        // on, instead of queueing a wakeup for the next operation.
        let signal = Arc::new(Notify::new());
        *self.lock_cancel_signal() = Some(Arc::clone(&signal));
        let op = Operation::spawn(
            Arc::clone(&self.scheduler),
            Box::new(move || token.cancel()),
            permit,
            fut,
        );
        let outcome = op.wait(&signal).await;
        *self.lock_cancel_signal() = None;
        outcome
    }

    fn lock_cancel_signal(&self) -> MutexGuard<'_, Option<Arc<Notify>>> {
        self.cancel_signal.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait for the next push-message; see [`Notifications::pop`].
    pub(crate) async fn pop_notification(&self) -> Result<Notification> {
        if let Some(n) = self.notifications.try_pop() {
            return Ok(n);
        }
        self.ensure_open()?;
        match &self.strategy {
            Strategy::Readiness(interest) => {
                // Share read interest with any in-flight statement; the
                // guard keeps the registration alive until we return.
                let guard = interest.acquire()?;
                loop {
                    if let Some(n) = self.notifications.try_pop() {
                        return Ok(n);
                    }
                    let arrived = self.notifications.arrived().notified();
                    tokio::pin!(arrived);
                    tokio::select! {
                        _ = &mut arrived => {}
                        ready = guard.watch().readable() => {
                            ready.map_err(Error::from)?;
                            // Pump the handle; the poll status itself is
                            // irrelevant here, only the drained messages.
                            let _ = self.poll_once()?;
                        }
                    }
                }
            }
            Strategy::Offload => loop {
                if let Some(n) = self.notifications.try_pop() {
                    return Ok(n);
                }
                self.ensure_open()?;
                self.notifications.arrived().notified().await;
            },
        }
    }

    fn close(&self) {
        {
            let mut state = self.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        tracing::debug!("closing session, tearing down descriptor interest");
        if let Strategy::Readiness(interest) = &self.strategy {
            interest.clear();
        }
        self.lock_handle().close();
    }
}

/// An established database session.
///
/// All operations are serialized on an internal FIFO lock: exactly one
/// operation is in flight at a time and statement order is preserved.
pub struct Session<H: ClientHandle> {
    shared: Arc<SessionShared<H>>,
}

impl<H: ClientHandle> std::fmt::Debug for Session<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

impl<H: ClientHandle> Session<H> {
    /// Wrap an already-connected handle, probing `scheduler` for
    /// descriptor-readiness support to select the driver strategy.
    pub fn new(handle: H, scheduler: Arc<dyn Scheduler>) -> Result<Self> {
        let readiness = scheduler.readiness();
        Self::with_capability(handle, scheduler, readiness)
    }

    /// Wrap a handle with an already-probed capability, so the connect
    /// phase and the session agree on one strategy.
    pub(crate) fn with_capability(
        handle: H,
        scheduler: Arc<dyn Scheduler>,
        readiness: Option<Arc<dyn Readiness>>,
    ) -> Result<Self> {
        let cancel_token = handle.cancel_token()?;
        let strategy = match readiness {
            Some(readiness) => {
                Strategy::Readiness(DescriptorInterest::new(readiness, handle.descriptor()))
            }
            None => Strategy::Offload,
        };
        let state = SessionState {
            transaction: handle.transaction_status(),
            ..SessionState::default()
        };
        Ok(Self {
            shared: Arc::new(SessionShared {
                handle: StdMutex::new(handle),
                cancel_token,
                scheduler,
                strategy,
                exec_lock: Arc::new(AsyncMutex::new(())),
                state: StdMutex::new(state),
                cancel_signal: StdMutex::new(None),
                notifications: NotificationSink::default(),
            }),
        })
    }

    /// Execute one statement.
    ///
    /// When autocommit is off and no transaction is open, the synthesized
    /// `BEGIN TRANSACTION …` command runs first, under the same lock
    /// acquisition.
    pub async fn execute(&self, sql: &str) -> Result<H::Rows> {
        self.shared.ensure_open()?;
        let mut permit = Arc::clone(&self.shared.exec_lock).lock_owned().await;
        self.shared.ensure_open()?;
        if let Some(begin) = self.shared.transaction_command() {
            let (returned, result) = self.shared.run_command(&begin, permit).await;
            result?;
            permit = returned.ok_or_else(|| Error::Operation("execution permit lost".into()))?;
        }
        let (_permit, result) = self.shared.run_command(sql, permit).await;
        result
    }

    /// Commit the open transaction. A no-op when the session is idle.
    pub async fn commit(&self) -> Result<()> {
        self.end_transaction("COMMIT").await
    }

    /// Roll back the open transaction. A no-op when the session is idle.
    pub async fn rollback(&self) -> Result<()> {
        self.end_transaction("ROLLBACK").await
    }

    async fn end_transaction(&self, sql: &str) -> Result<()> {
        self.shared.ensure_open()?;
        let permit = Arc::clone(&self.shared.exec_lock).lock_owned().await;
        self.shared.ensure_open()?;
        if self.shared.lock_state().transaction.is_idle() {
            return Ok(());
        }
        let (_permit, result) = self.shared.run_command(sql, permit).await;
        result.map(|_| ())
    }

    /// Request server-side cancellation of the in-flight operation.
    ///
    /// The cancelled `execute` (or `commit`/`rollback`) returns
    /// [`Error::Cancelled`] once the operation has settled. With nothing in
    /// flight the cancel request is still sent, harmlessly.
    pub async fn cancel(&self) -> Result<()> {
        self.shared.ensure_open()?;
        let signal = self.shared.lock_cancel_signal().clone();
        match signal {
            Some(signal) => {
                signal.notify_one();
                Ok(())
            }
            None => {
                let token = self.shared.cancel_token.clone();
                offload::run(self.shared.scheduler.as_ref(), move || token.cancel()).await
            }
        }
    }

    /// Handle for consuming server push-messages.
    pub fn notifications(&self) -> Notifications<H> {
        Notifications {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Close the session: tear down descriptor-interest registrations, then
    /// close the underlying handle. Idempotent.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Returns true once the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.shared.lock_state().closed
    }

    /// Transaction status as of the last settled operation. Reads the
    /// session's mirror, never the handle, so it does not block while a
    /// worker thread is inside a blocking statement.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.shared.lock_state().transaction
    }

    /// Whether statements run outside implicit transactions.
    pub fn autocommit(&self) -> bool {
        self.shared.lock_state().autocommit
    }

    /// Set the autocommit flag. Fails inside an open transaction.
    pub fn set_autocommit(&self, autocommit: bool) -> Result<()> {
        self.shared.check_mutable()?;
        self.shared.lock_state().autocommit = autocommit;
        Ok(())
    }

    /// The configured isolation level, `None` meaning the server default.
    pub fn isolation_level(&self) -> Option<IsolationLevel> {
        self.shared.lock_state().isolation
    }

    /// Set the isolation level for synthesized transactions. Fails inside
    /// an open transaction.
    pub fn set_isolation_level(&self, level: Option<IsolationLevel>) -> Result<()> {
        self.shared.check_mutable()?;
        self.shared.lock_state().isolation = level;
        Ok(())
    }

    /// The configured read-only flag, `None` meaning the server default.
    pub fn readonly(&self) -> Option<bool> {
        self.shared.lock_state().readonly
    }

    /// Set the read-only flag for synthesized transactions. Fails inside an
    /// open transaction.
    pub fn set_readonly(&self, readonly: Option<bool>) -> Result<()> {
        self.shared.check_mutable()?;
        self.shared.lock_state().readonly = readonly;
        Ok(())
    }

    /// The configured deferrable flag, `None` meaning the server default.
    pub fn deferrable(&self) -> Option<bool> {
        self.shared.lock_state().deferrable
    }

    /// Set the deferrable flag for synthesized transactions. Fails inside
    /// an open transaction.
    pub fn set_deferrable(&self, deferrable: Option<bool>) -> Result<()> {
        self.shared.check_mutable()?;
        self.shared.lock_state().deferrable = deferrable;
        Ok(())
    }
}
