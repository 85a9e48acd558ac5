//! Bridges a non-blocking, poll-driven PostgreSQL client handle into tokio.
//!
//! # Features
//!
//! - **Dual driver strategies**: descriptor-readiness polling when the
//!   runtime can watch raw descriptors, worker-pool offload when it cannot;
//!   probed once per session and fixed thereafter
//! - **libpq-style multi-host resolution**: host/hostaddr/port lists,
//!   per-address fan-out, per-attempt timeouts
//! - **Safe cancellation**: in-flight operations are shielded, cancelled
//!   server-side, and settled before the session accepts the next statement
//! - **Implicit transactions**: autocommit/isolation/readonly/deferrable
//!   session parameters synthesized into `BEGIN TRANSACTION` commands
//! - **LISTEN/NOTIFY**: push-messages delivered independently of statement
//!   execution, sharing the statement's descriptor interest
//!
//! The wire protocol, SQL execution and result decoding stay with the
//! wrapped client library, consumed through the [`ClientHandle`] trait.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use aiopq::{connect, ConnectionParams, TokioScheduler};
//! # use aiopq::{ClientHandle, Connector};
//! # async fn run<C: Connector>(connector: C) -> aiopq::Result<()> {
//! let params = ConnectionParams::try_from("postgres://app@db1/orders?host=db1,db2")?;
//! let scheduler = Arc::new(TokioScheduler::new());
//!
//! let session = connect(&params, &connector, scheduler).await?;
//! session.execute("UPDATE orders SET state = 'shipped' WHERE id = 7").await?;
//! session.commit().await?;
//! session.close();
//! # Ok(())
//! # }
//! ```

pub mod connect;
mod driver;
pub mod error;
pub mod handle;
pub mod notify;
pub mod opts;
pub mod resolve;
pub mod scheduler;
pub mod session;

pub use connect::connect;
pub use error::{AttemptFailure, AttemptFailures, Error, Result};
pub use handle::{CancelToken, ClientHandle, Connector, Notification, PollStatus, TransactionStatus};
pub use notify::Notifications;
pub use opts::ConnectionParams;
pub use resolve::{AttemptTarget, resolve_targets};
pub use scheduler::{BoxFuture, FdWatch, Readiness, Scheduler, TokioScheduler};
pub use session::{IsolationLevel, Session};
