//! Multi-host resolution.
//!
//! Expands [`ConnectionParams`] into an ordered list of concrete attempt
//! targets, mimicking libpq's host/hostaddr/port fallback semantics. The
//! underlying client library resolves names with a blocking `getaddrinfo`
//! and applies its connect timeout to the whole list rather than per
//! attempt, so both concerns are lifted up here: names are resolved through
//! the scheduler's asynchronous resolver, one target is emitted per
//! address, and [`crate::connect`] applies the timeout to each target
//! separately.

use std::env;

use crate::error::{Error, Result};
use crate::opts::ConnectionParams;
use crate::scheduler::Scheduler;

/// One concrete (host, address, port) connection target.
///
/// Produced by [`resolve_targets`]; consumed exactly once per attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptTarget {
    /// Host name as originally given (kept for TLS verification and error
    /// messages), or `None` for default-socket entries.
    pub host: Option<String>,
    /// Numeric address, or `None` when the host is a unix-socket directory
    /// or the library default applies.
    pub hostaddr: Option<String>,
    /// Port, or `None` for the library default.
    pub port: Option<String>,
}

impl AttemptTarget {
    /// Short description used in attempt-failure reports.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        if let Some(host) = &self.host {
            out.push_str("host=");
            out.push_str(host);
        }
        if let Some(hostaddr) = &self.hostaddr {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str("hostaddr=");
            out.push_str(hostaddr);
        }
        if let Some(port) = &self.port {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str("port=");
            out.push_str(port);
        }
        if out.is_empty() {
            out.push_str("<default>");
        }
        out
    }
}

/// Split a comma-list parameter, falling back to its `PG*` environment
/// variable when the parameter is absent.
fn parse_multi(explicit: Option<&str>, env_name: &str) -> Vec<String> {
    let value = match explicit {
        Some(v) if !v.is_empty() => Some(v.to_owned()),
        _ => env::var(env_name).ok().filter(|v| !v.is_empty()),
    };
    match value {
        Some(v) => v.split(',').map(|s| s.trim().to_owned()).collect(),
        None => Vec::new(),
    }
}

fn optional(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_owned())
    }
}

/// Expand `params` into an ordered sequence of attempt targets.
///
/// When a service name is set the client library's own service mechanism is
/// authoritative and a single raw target is emitted. Otherwise the
/// host/hostaddr/port lists are matched up libpq-style, and every host that
/// is not a numeric address, an empty entry or a unix-socket directory is
/// resolved asynchronously, one target per returned address.
pub async fn resolve_targets(
    params: &ConnectionParams,
    scheduler: &dyn Scheduler,
) -> Result<Vec<AttemptTarget>> {
    if params.service.is_some() {
        return Ok(vec![AttemptTarget {
            host: params.host.clone(),
            hostaddr: params.hostaddr.clone(),
            port: params.port.clone(),
        }]);
    }

    let hostaddrs = parse_multi(params.hostaddr.as_deref(), "PGHOSTADDR");
    let hosts = parse_multi(params.host.as_deref(), "PGHOST");
    let ports = parse_multi(params.port.as_deref(), "PGPORT");

    // Same counting rules as libpq.
    let num_entries = if !hostaddrs.is_empty() {
        hostaddrs.len()
    } else if !hosts.is_empty() {
        hosts.len()
    } else {
        1
    };

    let hostaddrs = if hostaddrs.is_empty() {
        vec![String::new(); num_entries]
    } else {
        hostaddrs
    };

    let hosts = if hosts.is_empty() {
        vec![String::new(); num_entries]
    } else if hosts.len() != num_entries {
        return Err(Error::Config(format!(
            "could not match {} host names to {} hostaddr values",
            hosts.len(),
            num_entries
        )));
    } else {
        hosts
    };

    let ports = if ports.is_empty() {
        vec![String::new(); num_entries]
    } else if ports.len() == num_entries {
        ports
    } else if ports.len() == 1 {
        // One port, many hosts: broadcast it over the whole list.
        vec![ports[0].clone(); num_entries]
    } else {
        return Err(Error::Config(format!(
            "could not match {} port numbers to {} hosts",
            ports.len(),
            num_entries
        )));
    };

    let mut targets = Vec::new();
    for ((host, hostaddr), port) in hosts.iter().zip(&hostaddrs).zip(&ports) {
        if !hostaddr.is_empty() || host.is_empty() || host.starts_with('/') {
            // Address already given, default socket, or a unix-socket
            // directory: nothing to resolve.
            targets.push(AttemptTarget {
                host: optional(host),
                hostaddr: optional(hostaddr),
                port: optional(port),
            });
        } else {
            let addrs = scheduler.resolve_host(host).await.map_err(|e| {
                Error::Connection(format!(
                    "could not translate host name \"{host}\" to address: {e}"
                ))
            })?;
            for addr in addrs {
                targets.push(AttemptTarget {
                    host: Some(host.clone()),
                    hostaddr: Some(addr.to_string()),
                    port: optional(port),
                });
            }
        }
    }

    tracing::debug!(count = targets.len(), "resolved connection targets");
    Ok(targets)
}
