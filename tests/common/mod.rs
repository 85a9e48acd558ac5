//! Scripted mock collaborators for integration tests.
//!
//! The client handle is an external component, so the tests drive the crate
//! against a scripted stand-in: poll results, result sets and transaction
//! statuses are queued up front, and readiness waits resolve against a
//! controllable gate. One `MockEnv` is shared by the handle, its cancel
//! token, the readiness watches and the scheduler so tests can observe
//! every interaction.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::IpAddr;
use std::os::fd::RawFd;
use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use aiopq::{
    AttemptTarget, BoxFuture, CancelToken, ClientHandle, ConnectionParams, Connector, Error,
    FdWatch, Notification, PollStatus, Readiness, Result, Scheduler, TransactionStatus,
};
use tokio::sync::Notify;

pub const MOCK_FD: RawFd = 9;

#[derive(Default)]
pub struct MockEnv {
    /// Scripted `poll()` results; `Ok(Ready)` once exhausted.
    pub polls: Mutex<VecDeque<Result<PollStatus>>>,
    /// Scripted `connect_blocking()` results; `Ok(())` once exhausted.
    pub connect_results: Mutex<VecDeque<Result<()>>>,
    /// Scripted result sets; empty rows once exhausted.
    pub rows: Mutex<VecDeque<Result<Vec<String>>>>,
    /// Statements sent through the non-blocking path, in order.
    pub sent: Mutex<Vec<String>>,
    /// Statements executed through the blocking (offload) path, in order.
    pub blocking_sent: Mutex<Vec<String>>,
    pub status: Mutex<TransactionStatus>,
    /// Push-messages the handle will surface on its next drain.
    pub pending: Mutex<Vec<Notification>>,
    pub cancel_calls: AtomicUsize,
    pub close_calls: AtomicUsize,
    pub closed: AtomicBool,
    /// Sleep inserted into `execute_blocking`, simulating a slow statement
    /// on a worker thread.
    pub blocking_delay: Mutex<Option<std::time::Duration>>,
    /// Set once `execute_blocking` has taken the handle mutex.
    pub blocking_started: AtomicBool,
    /// While set, readiness `readable()` waits park on `unblock`.
    pub block_reads: AtomicBool,
    pub unblock: Notify,
    pub registrations: AtomicUsize,
    pub deregistrations: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockEnv {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script_polls(&self, polls: impl IntoIterator<Item = Result<PollStatus>>) {
        lock(&self.polls).extend(polls);
    }

    pub fn script_connects(&self, results: impl IntoIterator<Item = Result<()>>) {
        lock(&self.connect_results).extend(results);
    }

    pub fn set_blocking_delay(&self, delay: std::time::Duration) {
        *lock(&self.blocking_delay) = Some(delay);
    }

    pub fn push_notification(&self, channel: &str, payload: &str) {
        lock(&self.pending).push(Notification {
            process_id: 4242,
            channel: channel.into(),
            payload: payload.into(),
        });
    }

    pub fn sent(&self) -> Vec<String> {
        lock(&self.sent).clone()
    }

    pub fn blocking_sent(&self) -> Vec<String> {
        lock(&self.blocking_sent).clone()
    }

    pub fn set_status(&self, status: TransactionStatus) {
        *lock(&self.status) = status;
    }

    pub fn block_reads(&self) {
        self.block_reads.store(true, Ordering::SeqCst);
    }

    pub fn unblock_reads(&self) {
        self.block_reads.store(false, Ordering::SeqCst);
        self.unblock.notify_waiters();
    }

    fn apply_statement(&self, sql: &str) {
        let upper = sql.to_uppercase();
        if upper.starts_with("BEGIN") {
            *lock(&self.status) = TransactionStatus::InTransaction;
        } else if upper.starts_with("COMMIT") || upper.starts_with("ROLLBACK") {
            *lock(&self.status) = TransactionStatus::Idle;
        }
    }
}

pub struct MockHandle {
    pub env: Arc<MockEnv>,
}

impl MockHandle {
    pub fn new(env: Arc<MockEnv>) -> Self {
        Self { env }
    }
}

#[derive(Clone)]
pub struct MockCancel {
    env: Arc<MockEnv>,
}

impl CancelToken for MockCancel {
    fn cancel(&self) -> Result<()> {
        self.env.cancel_calls.fetch_add(1, Ordering::SeqCst);
        // The server aborts the statement: the next poll reports the
        // failure, the transaction falls back to idle, and any parked
        // readiness wait wakes up to observe it.
        lock(&self.env.polls).push_back(Err(Error::Database(
            "canceling statement due to user request".into(),
        )));
        *lock(&self.env.status) = TransactionStatus::Idle;
        self.env.unblock_reads();
        Ok(())
    }
}

impl ClientHandle for MockHandle {
    type Rows = Vec<String>;
    type Cancel = MockCancel;

    fn poll(&mut self) -> Result<PollStatus> {
        lock(&self.env.polls)
            .pop_front()
            .unwrap_or(Ok(PollStatus::Ready))
    }

    fn descriptor(&self) -> RawFd {
        MOCK_FD
    }

    fn cancel_token(&self) -> Result<Self::Cancel> {
        Ok(MockCancel {
            env: Arc::clone(&self.env),
        })
    }

    fn close(&mut self) {
        self.env.close_calls.fetch_add(1, Ordering::SeqCst);
        self.env.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.env.closed.load(Ordering::SeqCst)
    }

    fn transaction_status(&self) -> TransactionStatus {
        *lock(&self.env.status)
    }

    fn send_query(&mut self, sql: &str) -> Result<()> {
        lock(&self.env.sent).push(sql.to_owned());
        self.env.apply_statement(sql);
        Ok(())
    }

    fn take_rows(&mut self) -> Result<Self::Rows> {
        lock(&self.env.rows).pop_front().unwrap_or(Ok(Vec::new()))
    }

    fn drain_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut *lock(&self.env.pending))
    }

    fn connect_blocking(&mut self) -> Result<()> {
        lock(&self.env.connect_results).pop_front().unwrap_or(Ok(()))
    }

    fn execute_blocking(&mut self, sql: &str) -> Result<Self::Rows> {
        self.env.blocking_started.store(true, Ordering::SeqCst);
        if let Some(delay) = *lock(&self.env.blocking_delay) {
            std::thread::sleep(delay);
        }
        lock(&self.env.blocking_sent).push(sql.to_owned());
        self.env.apply_statement(sql);
        lock(&self.env.rows).pop_front().unwrap_or(Ok(Vec::new()))
    }
}

pub struct MockReadiness {
    env: Arc<MockEnv>,
}

struct MockWatch {
    env: Arc<MockEnv>,
}

impl Readiness for MockReadiness {
    fn register(&self, _fd: RawFd) -> io::Result<Box<dyn FdWatch>> {
        self.env.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockWatch {
            env: Arc::clone(&self.env),
        }))
    }
}

impl Drop for MockWatch {
    fn drop(&mut self) {
        self.env.deregistrations.fetch_add(1, Ordering::SeqCst);
    }
}

impl FdWatch for MockWatch {
    fn readable(&self) -> BoxFuture<'_, io::Result<()>> {
        let env = Arc::clone(&self.env);
        Box::pin(async move {
            loop {
                if !env.block_reads.load(Ordering::SeqCst) {
                    return Ok(());
                }
                let mut notified = pin!(env.unblock.notified());
                notified.as_mut().enable();
                if !env.block_reads.load(Ordering::SeqCst) {
                    return Ok(());
                }
                notified.await;
            }
        })
    }

    fn writable(&self) -> BoxFuture<'_, io::Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

pub struct MockScheduler {
    readiness: Option<Arc<MockReadiness>>,
    dns: HashMap<String, Vec<IpAddr>>,
}

impl MockScheduler {
    /// Scheduler with descriptor-readiness support wired to `env`.
    pub fn readiness(env: &Arc<MockEnv>) -> Self {
        Self {
            readiness: Some(Arc::new(MockReadiness {
                env: Arc::clone(env),
            })),
            dns: HashMap::new(),
        }
    }

    /// Scheduler with blocking-call offload only.
    pub fn offload_only() -> Self {
        Self {
            readiness: None,
            dns: HashMap::new(),
        }
    }

    pub fn with_dns(mut self, entries: &[(&str, &[&str])]) -> Self {
        for (host, addrs) in entries {
            let addrs = addrs
                .iter()
                .map(|a| a.parse().expect("bad test address"))
                .collect();
            self.dns.insert(host.to_string(), addrs);
        }
        self
    }
}

impl Scheduler for MockScheduler {
    fn readiness(&self) -> Option<Arc<dyn Readiness>> {
        self.readiness
            .clone()
            .map(|r| r as Arc<dyn Readiness>)
    }

    fn offload(&self, job: Box<dyn FnOnce() + Send + 'static>) -> BoxFuture<'static, Result<()>> {
        // Deterministic: the job runs when the future is awaited, on the
        // test's own thread.
        Box::pin(async move {
            job();
            Ok(())
        })
    }

    fn resolve_host(&self, host: &str) -> BoxFuture<'static, io::Result<Vec<IpAddr>>> {
        let found = self.dns.get(host).cloned();
        Box::pin(async move {
            found.ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Name or service not known"))
        })
    }
}

/// Connector handing out handles that all share one `MockEnv`. Scripted
/// `open` failures are consumed in order; once exhausted every open
/// succeeds.
pub struct MockConnector {
    env: Arc<MockEnv>,
    open_results: Mutex<VecDeque<Result<()>>>,
    pub attempts: Mutex<Vec<AttemptTarget>>,
}

impl MockConnector {
    pub fn new(env: &Arc<MockEnv>) -> Self {
        Self {
            env: Arc::clone(env),
            open_results: Mutex::new(VecDeque::new()),
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn script_opens(&self, results: impl IntoIterator<Item = Result<()>>) {
        lock(&self.open_results).extend(results);
    }

    pub fn attempts(&self) -> Vec<AttemptTarget> {
        lock(&self.attempts).clone()
    }
}

impl Connector for MockConnector {
    type Handle = MockHandle;

    fn open(&self, target: &AttemptTarget, _params: &ConnectionParams) -> Result<Self::Handle> {
        lock(&self.attempts).push(target.clone());
        match lock(&self.open_results).pop_front() {
            Some(Err(e)) => Err(e),
            _ => Ok(MockHandle::new(Arc::clone(&self.env))),
        }
    }
}

/// Poll the runtime until `cond` holds, yielding between checks.
pub async fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition never became true");
}
