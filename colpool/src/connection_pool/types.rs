// Copyright 2020 Joyent, Inc.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use derive_more::{Add, AddAssign, Display, From, Into, Sub, SubAssign};
use serde_derive::Deserialize;
use slog::Logger;

use crate::error::Error;
use crate::node::NodeName;

/// A newtype wrapper around u32 used for counts of connections maintained by
/// the connection pool.
#[derive(
    Add,
    AddAssign,
    Clone,
    Copy,
    Debug,
    Default,
    Display,
    Eq,
    From,
    Into,
    Ord,
    PartialOrd,
    PartialEq,
    Sub,
    SubAssign,
)]
pub struct ConnectionCount(u32);

/// The connection management policy applied to every node in the pool. All
/// durations are in milliseconds.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolPolicy {
    /// The number of idle connections each node tries to keep ready. The
    /// default is 1.
    pub min_cached_connections_per_node: u32,
    /// The number of connections, idle plus in use, each node tries to
    /// hold. Connections released while a node is at its target are closed.
    /// The default is 2.
    pub target_connections_per_node: u32,
    /// The hard limit on connections per node beyond which the refill worker
    /// creates no more. The default is 8.
    pub max_connections_per_node: u32,
    /// The total time `acquire` may spend backing off before it gives up. The
    /// default is 4000.
    pub max_wait_for_connection: u64,
    /// The first and largest delays between failed acquisition rounds. The
    /// defaults are 50 and 1000.
    pub acquire_backoff_min: u64,
    pub acquire_backoff_max: u64,
    /// The first and largest delays a node waits after failing to open a
    /// connection. The defaults are 200 and 10000.
    pub creation_backoff_min: u64,
    pub creation_backoff_max: u64,
    /// How often each node's refill worker checks its connections when nothing
    /// wakes it sooner. The default is 2000.
    pub refill_interval: u64,
    /// Whether a corrupted connection invalidates every idle connection to the
    /// same node. The default is true.
    pub purge_on_exception: bool,
    /// How long `shutdown` waits for background workers to exit. The default
    /// is 5000.
    pub shutdown_timeout: u64,
}

impl Default for PoolPolicy {
    fn default() -> Self {
        PoolPolicy {
            min_cached_connections_per_node: 1,
            target_connections_per_node: 2,
            max_connections_per_node: 8,
            max_wait_for_connection: 4000,
            acquire_backoff_min: 50,
            acquire_backoff_max: 1000,
            creation_backoff_min: 200,
            creation_backoff_max: 10_000,
            refill_interval: 2000,
            purge_on_exception: true,
            shutdown_timeout: 5000,
        }
    }
}

impl PoolPolicy {
    /// Check the policy for contradictory settings.
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |msg: &str| Err(Error::Configuration(msg.to_string()));

        if self.max_connections_per_node == 0 {
            return invalid("max_connections_per_node must be at least 1");
        }
        if self.target_connections_per_node == 0 {
            return invalid("target_connections_per_node must be at least 1");
        }
        if self.target_connections_per_node > self.max_connections_per_node {
            return invalid(
                "target_connections_per_node exceeds max_connections_per_node",
            );
        }
        if self.min_cached_connections_per_node
            > self.target_connections_per_node
        {
            return invalid(
                "min_cached_connections_per_node exceeds \
                 target_connections_per_node",
            );
        }
        if self.acquire_backoff_min > self.acquire_backoff_max {
            return invalid("acquire_backoff_min exceeds acquire_backoff_max");
        }
        if self.creation_backoff_min > self.creation_backoff_max {
            return invalid("creation_backoff_min exceeds creation_backoff_max");
        }
        if self.refill_interval == 0 {
            return invalid("refill_interval must be greater than zero");
        }
        Ok(())
    }
}

/// The configuration options for a colpool connection pool. This is required
/// to instantiate a new connection pool.
#[derive(Debug, Default)]
pub struct ConnectionPoolOptions {
    /// The connection management policy.
    pub policy: PoolPolicy,
    /// The keyspace selected on every new connection. Required in order to
    /// create operation executors.
    pub keyspace: Option<String>,
    /// Optional cluster refresh interval in seconds. The cluster watcher only
    /// runs when the node registry has a topology source. If not specified
    /// the default is 60 seconds.
    pub cluster_refresh_interval: Option<u64>,
    /// An optional `slog` logger instance. If none is provided then the logging
    /// will fall back to using the [`slog-stdlog`](https://docs.rs/slog-stdlog)
    /// drain which is essentially the same as using the rust standard
    /// [`log`](https://docs.rs/log) crate.
    pub log: Option<Logger>,
}

/// A point-in-time view of one node's connections.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeStats {
    pub node: NodeName,
    /// Connections currently checked out by callers.
    pub in_use: ConnectionCount,
    /// Idle connections waiting in the node's cache.
    pub cached: ConnectionCount,
    /// The current session id. Bumped each time the node's idle connections
    /// are purged after a corrupted release.
    pub session_id: u64,
    pub created: u64,
    pub destroyed: u64,
    pub corrupted: u64,
    pub borrowed: u64,
    pub returned: u64,
}

/// The connection counts for the connection pool
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ConnectionPoolStats {
    /// The number of nodes with a connection context
    pub node_count: u32,
    /// The total number of open connections
    pub total_connections: ConnectionCount,
    /// The count of idle connections in the pool
    pub idle_connections: ConnectionCount,
    /// The count of connections checked out by callers
    pub in_use_connections: ConnectionCount,
}

impl ConnectionPoolStats {
    pub(crate) fn add_node(&mut self, stats: &NodeStats) {
        self.node_count += 1;
        self.total_connections += stats.in_use + stats.cached;
        self.idle_connections += stats.cached;
        self.in_use_connections += stats.in_use;
    }
}

/// Sum type representing the current state of the connection pool. Possible
/// states are running, stopping, or stopped.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConnectionPoolState {
    /// The pool is running and able to service acquire requests.
    Running,
    /// The connection pool is performing cleanup and is no longer accepting
    /// acquire requests.
    Stopping,
    /// The connection pool is stopped and is no longer accepting acquire
    /// requests.
    Stopped,
}

impl fmt::Display for ConnectionPoolState {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectionPoolState::Running => String::from("running").fmt(fmt),
            ConnectionPoolState::Stopping => String::from("stopping").fmt(fmt),
            ConnectionPoolState::Stopped => String::from("stopped").fmt(fmt),
        }
    }
}

// The state guarded by these mutexes is consistent between statements, so a
// panic on another thread does not leave anything half-updated.
#[doc(hidden)]
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
