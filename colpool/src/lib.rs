// Copyright 2020 Joyent, Inc.

//! A load-balancing, retrying connection pool for database clusters
//!
//! colpool manages connections to every node of a clustered column-store
//! database, hands them out to callers on demand, and runs single RPC
//! operations through them with automatic retry on another node when a node
//! misbehaves. The library relies on two primary traits in order to manage a
//! set of connections across the nodes of a cluster. These are the
//! [`Connection`](connection/trait.Connection.html) trait and the
//! [`TopologySource`](topology/trait.TopologySource.html) trait.
//!
//! ## Connections
//!
//! A *connection* is one open RPC session to a single node. It can be
//! anything that obeys a socket-like interface: it is opened with `connect`,
//! bound to a keyspace with `set_keyspace`, checked with `is_open`, and closed
//! with `close`.
//!
//! Users of the pool also provide a function that builds an unconnected
//! *connection* for a node. The trait bounds for this function are as
//! follows:
//! ```rust,ignore
//! Fn(&Node) -> C + Send + Sync + 'static
//! where C: Connection
//! ```
//! The purpose of this function is to capture application level
//! configuration, such as credentials or framing options, needed to talk to a
//! node.
//!
//! ## Nodes and topology
//!
//! The pool is started from a [`NodeRegistry`][registry] holding a set of
//! seed nodes. If the registry is built with a
//! [`TopologySource`](topology/trait.TopologySource.html) the pool also runs a
//! cluster watcher that periodically asks the cluster to describe its token
//! ring and adds any node that appears there. Nodes are never removed; a node
//! that goes away simply stops supplying connections.
//!
//! [registry]: node_registry/struct.NodeRegistry.html
//!
//! ## Per-node connection management
//!
//! Every node has its own connection context and refill worker thread. The
//! worker keeps a configurable number of idle connections ready
//! (`min_cached_connections_per_node`), tries to hold the node at
//! `target_connections_per_node` connections, and never opens more than
//! `max_connections_per_node`. Failed connection attempts are followed by an
//! exponential backoff so that a dead node is not hammered.
//!
//! Connections that fail with a transient error are released as *corrupted*.
//! A corrupted connection is never reused and, by default, every idle
//! connection to the same node is discarded along with it, since they are
//! likely broken for the same reason.
//!
//! ## Load balancing
//!
//! [`acquire`](connection_pool/struct.ConnectionPool.html#method.acquire)
//! picks the node with the fewest connections in use among those that have an
//! idle connection ready. A caller retrying an operation can ask to avoid the
//! node that just failed it. If no node can supply a connection the call backs
//! off and tries again until the policy's `max_wait_for_connection` is spent.
//!
//! ## Running operations
//!
//! Most callers do not acquire connections themselves. An
//! [`OperationExecutor`](executor/struct.OperationExecutor.html) runs a
//! closure against a pooled connection and inspects the classification of
//! any error it returns: transient errors are retried on another node up to
//! `max_op_retries` times, all others are returned as they are. Schema
//! changes that must stay on one node use a
//! [`NodeSession`](admin/struct.NodeSession.html) instead.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Mutex;
//! use std::thread;
//!
//! use slog::{o, Drain, Logger};
//!
//! use colpool::connection::ErrorClass;
//! use colpool::connection_pool::types::ConnectionPoolOptions;
//! use colpool::connection_pool::ConnectionPool;
//! use colpool::executor::OperandPolicy;
//! use colpool::node::{Node, NodeConfig};
//! use colpool::node_registry::NodeRegistry;
//!
//! let plain = slog_term::PlainSyncDecorator::new(std::io::stdout());
//! let log = Logger::root(
//!     Mutex::new(slog_term::FullFormat::new(plain).build()).fuse(),
//!     o!("build-id" => "0.1.0"),
//! );
//!
//! let config = NodeConfig::default();
//! let seeds = vec![
//!     Node::new("10.0.0.1", &config),
//!     Node::new("10.0.0.2", &config),
//! ];
//! let registry = NodeRegistry::new(seeds, Some(log.clone()));
//!
//! let cpo = ConnectionPoolOptions {
//!     keyspace: Some(String::from("users")),
//!     log: Some(log),
//!     ..ConnectionPoolOptions::default()
//! };
//!
//! let pool = ConnectionPool::new(cpo, registry, |node: &Node| {
//!     TcpStreamConnection::from(node)
//! })?;
//! let executor = pool.create_executor(OperandPolicy::default())?;
//!
//! for _ in 0..10 {
//!     let executor = executor.clone();
//!     thread::spawn(move || {
//!         let reply = executor.execute(|conn| conn.ping());
//!         // Do stuff here
//!     });
//! }
//! ```
//!
//! ## [`Connection`](connection/trait.Connection.html) trait implementer
//!
//! * `colpool-tcp-stream-connection`
//!
//! ## [`TopologySource`](topology/trait.TopologySource.html) trait implementer
//!
//! * `colpool-static-topology`

pub mod admin;
pub mod connection;
pub mod connection_pool;
pub mod delay;
pub mod error;
pub mod executor;
pub mod node;
pub mod node_registry;
pub mod pool_registry;
pub mod topology;
