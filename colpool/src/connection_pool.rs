// Copyright 2020 Joyent, Inc.

pub mod node_context;
pub mod types;

use std::collections::{HashMap, HashSet};
use std::fmt::Result as FmtResult;
use std::fmt::{Debug, Formatter};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};
use std::thread;

use slog::{debug, info, o, trace, warn, Drain, Logger};

use crate::admin::NodeSession;
use crate::connection::Connection;
use crate::connection_pool::node_context::{
    refill_loop, ConnectionCreator, NodeContext, SessionConnection,
};
use crate::connection_pool::types::{
    lock, ConnectionPoolOptions, ConnectionPoolState, ConnectionPoolStats,
    NodeStats, PoolPolicy,
};
use crate::delay::backoff_delay;
use crate::error::Error;
use crate::executor::{OperandPolicy, OperationExecutor};
use crate::node::{Node, NodeKey};
use crate::node_registry::NodeRegistry;

// Cluster refresh interval in seconds
const DEFAULT_CLUSTER_REFRESH_INTERVAL: u64 = 60;

type NodeMap<C> = HashMap<NodeKey, Arc<NodeContext<C>>>;

struct PoolInner<C>
where
    C: Connection,
{
    nodes: RwLock<NodeMap<C>>,
    registry: NodeRegistry,
    policy: PoolPolicy,
    keyspace: Option<String>,
    create_connection: ConnectionCreator<C>,
    state: Mutex<ConnectionPoolState>,
    stop: Arc<AtomicBool>,
    // Every background worker reports here when it exits so that shutdown
    // can wait for them with a deadline.
    exit_tx: Mutex<Sender<()>>,
    exit_rx: Mutex<Receiver<()>>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    watcher_tx: Mutex<Option<Sender<()>>>,
    log: Logger,
}

impl<C> PoolInner<C>
where
    C: Connection,
{
    fn read_nodes(&self) -> Vec<Arc<NodeContext<C>>> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    // Ensure a connection context exists for `node`, creating it and starting
    // its refill worker if it does not. Returns true if a context was
    // created.
    fn add_node(&self, node: &Node) -> bool {
        let key = node.key();
        if self
            .nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&key)
        {
            return false;
        }

        let mut nodes =
            self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        if nodes.contains_key(&key) || self.stop.load(AtomicOrdering::SeqCst) {
            return false;
        }

        let log = self.log.new(o!("node" => node.name.clone()));
        let (context, wake_rx) = NodeContext::new(
            node.clone(),
            self.policy.clone(),
            self.stop.clone(),
            log,
        );
        let context = Arc::new(context);
        nodes.insert(key, context.clone());

        let create_connection = self.create_connection.clone();
        let keyspace = self.keyspace.clone();
        let exit_tx = lock(&self.exit_tx).clone();
        let worker = thread::spawn(move || {
            refill_loop(context, wake_rx, create_connection, keyspace);
            let _ = exit_tx.send(());
        });
        lock(&self.workers).push(worker);

        info!(self.log, "Added node {}", node.name);
        true
    }

    // Add every node currently in the registry.
    fn sync_nodes(&self) -> usize {
        self.registry
            .nodes()
            .iter()
            .filter(|node| self.add_node(node))
            .count()
    }

    fn state(&self) -> ConnectionPoolState {
        *lock(&self.state)
    }
}

/// A pool of connections to a cluster of database nodes
///
/// The pool is cheap to clone; clones share the same nodes and connections.
/// Dropping the original instance shuts the pool down, dropping a clone does
/// not.
pub struct ConnectionPool<C>
where
    C: Connection,
{
    inner: Arc<PoolInner<C>>,
    original: bool,
}

impl<C> Debug for ConnectionPool<C>
where
    C: Connection,
{
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_struct("ConnectionPool")
            .field("nodes", &self.inner.registry.nodes())
            .field("policy", &self.inner.policy)
            .field("keyspace", &self.inner.keyspace)
            .field("state", &self.inner.state())
            .field("original", &self.original)
            .finish()
    }
}

impl<C> Clone for ConnectionPool<C>
where
    C: Connection,
{
    fn clone(&self) -> ConnectionPool<C> {
        ConnectionPool {
            inner: self.inner.clone(),
            original: false,
        }
    }
}

impl<C> ConnectionPool<C>
where
    C: Connection,
{
    /// Create a pool over the nodes of `registry`. A connection context, with
    /// its own refill worker, is started for every node the registry knows
    /// of. If the registry can discover nodes, a cluster watcher is started
    /// as well to pick up nodes that join later.
    ///
    /// `create_connection` returns an unconnected connection for a node. The
    /// pool calls `connect` on it, followed by `set_keyspace` if a keyspace is
    /// configured, before handing it out.
    pub fn new<F>(
        cpo: ConnectionPoolOptions,
        registry: NodeRegistry,
        create_connection: F,
    ) -> Result<Self, Error>
    where
        F: Fn(&Node) -> C + Send + Sync + 'static,
    {
        cpo.policy.validate()?;

        if let Some(keyspace) = &cpo.keyspace {
            if keyspace.is_empty() {
                return Err(Error::Configuration(String::from(
                    "keyspace must not be empty",
                )));
            }
        }

        let logger = cpo
            .log
            .unwrap_or_else(|| Logger::root(slog_stdlog::StdLog.fuse(), o!()));

        let (exit_tx, exit_rx) = channel();
        let dynamic = registry.is_dynamic();

        let inner = Arc::new(PoolInner {
            nodes: RwLock::new(HashMap::new()),
            registry,
            policy: cpo.policy,
            keyspace: cpo.keyspace,
            create_connection: Arc::new(create_connection),
            state: Mutex::new(ConnectionPoolState::Running),
            stop: Arc::new(AtomicBool::new(false)),
            exit_tx: Mutex::new(exit_tx),
            exit_rx: Mutex::new(exit_rx),
            workers: Mutex::new(Vec::new()),
            watcher_tx: Mutex::new(None),
            log: logger,
        });

        let added = inner.sync_nodes();
        info!(inner.log, "connection pool started with {} nodes", added);

        if dynamic {
            let refresh_interval = Duration::from_secs(
                cpo.cluster_refresh_interval
                    .unwrap_or(DEFAULT_CLUSTER_REFRESH_INTERVAL),
            );
            let (watcher_tx, watcher_rx) = channel();
            let watcher_inner = inner.clone();
            let exit_tx = lock(&inner.exit_tx).clone();
            let watcher = thread::spawn(move || {
                cluster_watch_loop(watcher_inner, watcher_rx, refresh_interval);
                let _ = exit_tx.send(());
            });
            *lock(&inner.watcher_tx) = Some(watcher_tx);
            lock(&inner.workers).push(watcher);
        }

        Ok(ConnectionPool {
            inner,
            original: true,
        })
    }

    /// Take a connection from the least loaded node that has one idle,
    /// preferring nodes other than `avoid`.
    ///
    /// Each round tries every available node in order of the number of
    /// connections it has in use. If none of them yields a live connection,
    /// one last attempt is made against the least loaded available node
    /// regardless of `avoid`. Failed rounds are separated by exponential
    /// backoff; once the cumulative backoff would exceed the policy's
    /// `max_wait_for_connection` the call fails with
    /// `Error::NoNodesAvailable`.
    pub fn acquire(
        &self,
        avoid: Option<&NodeKey>,
    ) -> Result<PoolConnection<C>, Error> {
        let policy = &self.inner.policy;
        let mut attempt = 0;
        let mut waited = 0;

        loop {
            if self.inner.state() != ConnectionPoolState::Running {
                return Err(Error::PoolStopped);
            }

            let contexts = self.inner.read_nodes();
            let mut tried: HashSet<&NodeKey> = HashSet::new();
            if let Some(avoid) = avoid {
                tried.insert(avoid);
            }

            while let Some(context) =
                least_loaded(&contexts, |c| !tried.contains(c.key()))
            {
                tried.insert(context.key());
                if let Some(conn) = context.get_connection() {
                    trace!(
                        self.inner.log,
                        "acquired connection";
                        "node" => &context.node().name,
                        "in_use" => context.in_use()
                    );
                    return Ok(PoolConnection::new(context.clone(), conn));
                }
            }

            if let Some(context) = least_loaded(&contexts, |_| true) {
                if let Some(conn) = context.get_connection() {
                    return Ok(PoolConnection::new(context.clone(), conn));
                }
            }

            attempt += 1;
            let delay = backoff_delay(
                attempt,
                policy.acquire_backoff_min,
                policy.acquire_backoff_max,
            );
            if waited + delay > policy.max_wait_for_connection {
                warn!(
                    self.inner.log,
                    "no node could supply a connection";
                    "attempts" => attempt,
                    "waited_ms" => waited
                );
                return Err(Error::NoNodesAvailable { waited_ms: waited });
            }
            debug!(
                self.inner.log,
                "no connections available, retrying in {}ms", delay
            );
            thread::sleep(Duration::from_millis(delay));
            waited += delay;
        }
    }

    /// Return a connection to its node. A corrupted connection is closed
    /// rather than reused. Equivalent to marking the connection and dropping
    /// it.
    pub fn release(&self, mut conn: PoolConnection<C>, corrupted: bool) {
        if corrupted {
            conn.mark_corrupted();
        }
        drop(conn);
    }

    /// Make sure the pool holds connections to `node`. Has no effect if the
    /// node is already known or the pool has been shut down.
    pub fn add_node(&self, node: &Node) -> bool {
        self.inner.add_node(node)
    }

    /// Create an executor for running operations against the pool's keyspace.
    /// Fails if the pool was created without a keyspace.
    pub fn create_executor(
        &self,
        policy: OperandPolicy,
    ) -> Result<OperationExecutor<C>, Error> {
        match &self.inner.keyspace {
            Some(keyspace) => Ok(OperationExecutor::new(
                self.clone(),
                keyspace.clone(),
                policy,
                self.inner.log.clone(),
            )),
            None => Err(Error::Configuration(String::from(
                "a keyspace is required to create an operation executor",
            ))),
        }
    }

    /// Open an administrative session pinned to `node`. The session uses the
    /// pool's connection factory and keyspace but its connection is not
    /// counted against the pool.
    pub fn open_session(
        &self,
        node: &Node,
        policy: OperandPolicy,
    ) -> Result<NodeSession<C>, Error> {
        if self.inner.state() != ConnectionPoolState::Running {
            return Err(Error::PoolStopped);
        }
        NodeSession::with_creator(
            node.clone(),
            self.inner.keyspace.clone(),
            self.inner.create_connection.clone(),
            policy,
            Some(self.inner.log.clone()),
        )
    }

    pub fn keyspace(&self) -> Option<&str> {
        self.inner.keyspace.as_deref()
    }

    pub fn policy(&self) -> &PoolPolicy {
        &self.inner.policy
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.inner.registry
    }

    /// The nodes the pool currently holds connection contexts for.
    pub fn nodes(&self) -> Vec<Node> {
        self.inner
            .read_nodes()
            .iter()
            .map(|c| c.node().clone())
            .collect()
    }

    pub fn node_stats(&self) -> Option<Vec<NodeStats>> {
        match self.inner.state() {
            ConnectionPoolState::Running => Some(
                self.inner.read_nodes().iter().map(|c| c.stats()).collect(),
            ),
            _ => None,
        }
    }

    pub fn get_stats(&self) -> Option<ConnectionPoolStats> {
        self.node_stats().map(|nodes| {
            nodes.iter().fold(ConnectionPoolStats::default(), |mut acc, n| {
                acc.add_node(n);
                acc
            })
        })
    }

    pub fn get_state(&self) -> String {
        self.inner.state().to_string()
    }

    /// Stop the cluster watcher and every node's refill worker, then close
    /// all idle connections. Waits up to the policy's `shutdown_timeout` for
    /// the workers to exit. Connections still checked out are closed when
    /// they are released. Calling this more than once, or from any clone, is
    /// harmless.
    pub fn shutdown(&self) {
        {
            let mut state = lock(&self.inner.state);
            match *state {
                ConnectionPoolState::Running => {
                    *state = ConnectionPoolState::Stopping
                }
                _ => return,
            }
        }
        info!(self.inner.log, "stopping connection pool");

        self.inner.stop.store(true, AtomicOrdering::SeqCst);

        // Dropping the sender wakes the watcher
        let watcher = lock(&self.inner.watcher_tx).take();
        let mut expected = if watcher.is_some() { 1 } else { 0 };
        drop(watcher);

        // Taking the write lock orders this after any add_node in progress;
        // later ones see the stop flag.
        let contexts: Vec<Arc<NodeContext<C>>> = self
            .inner
            .nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        expected += contexts.len();
        contexts.iter().for_each(|c| c.signal());

        let deadline = Instant::now()
            + Duration::from_millis(self.inner.policy.shutdown_timeout);
        let mut exited = 0;
        {
            let exit_rx = lock(&self.inner.exit_rx);
            while exited < expected {
                let remaining =
                    deadline.saturating_duration_since(Instant::now());
                match exit_rx.recv_timeout(remaining) {
                    Ok(()) => exited += 1,
                    Err(RecvTimeoutError::Timeout)
                    | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        }

        let workers: Vec<thread::JoinHandle<()>> =
            lock(&self.inner.workers).drain(..).collect();
        if exited == expected {
            workers.into_iter().for_each(|w| {
                let _ = w.join();
            });
            trace!(self.inner.log, "shutdown: joined connection pool workers");
        } else {
            warn!(
                self.inner.log,
                "{} of {} pool workers did not exit in time",
                expected - exited,
                expected
            );
        }

        let closed: usize = contexts.iter().map(|c| c.close_idle()).sum();
        info!(self.inner.log, "closed {} idle connections", closed);

        *lock(&self.inner.state) = ConnectionPoolState::Stopped;
    }
}

impl<C> Drop for ConnectionPool<C>
where
    C: Connection,
{
    fn drop(&mut self) {
        if self.original {
            self.shutdown();
        }
    }
}

// Pick the context with the fewest connections in use among those that have
// an idle connection and satisfy `eligible`. Ties go to the first candidate
// in iteration order.
fn least_loaded<'a, C, P>(
    contexts: &'a [Arc<NodeContext<C>>],
    eligible: P,
) -> Option<&'a Arc<NodeContext<C>>>
where
    C: Connection,
    P: Fn(&NodeContext<C>) -> bool,
{
    contexts
        .iter()
        .filter(|c| c.is_available() && eligible(&***c))
        .min_by_key(|c| c.in_use())
}

fn cluster_watch_loop<C>(
    inner: Arc<PoolInner<C>>,
    stop_rx: Receiver<()>,
    interval: Duration,
) where
    C: Connection,
{
    debug!(
        inner.log,
        "starting cluster watcher, interval {} seconds",
        interval.as_secs()
    );
    loop {
        // Failures are logged by the registry and leave its nodes unchanged
        let _ = inner.registry.refresh();
        let added = inner.sync_nodes();
        if added > 0 {
            info!(inner.log, "cluster watcher added {} nodes", added);
        }

        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => (),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    trace!(inner.log, "cluster_watch_loop exiting");
}

/// A connection abstraction representing a member of the pool. Dereferences
/// to the underlying connection. The connection returns to its node when this
/// value is dropped.
pub struct PoolConnection<C>
where
    C: Connection,
{
    context: Arc<NodeContext<C>>,
    connection: Option<SessionConnection<C>>,
    corrupted: bool,
}

impl<C> PoolConnection<C>
where
    C: Connection,
{
    fn new(context: Arc<NodeContext<C>>, conn: SessionConnection<C>) -> Self {
        PoolConnection {
            context,
            connection: Some(conn),
            corrupted: false,
        }
    }

    /// The node this connection is open to.
    pub fn node(&self) -> &Node {
        self.context.node()
    }

    pub fn node_key(&self) -> &NodeKey {
        self.context.key()
    }

    /// The session the connection was created in.
    pub fn session(&self) -> u64 {
        self.connection.as_ref().map_or(0, |c| c.session)
    }

    /// Mark the connection as corrupted so that it is closed, not reused,
    /// when released.
    pub fn mark_corrupted(&mut self) {
        self.corrupted = true;
    }

    pub fn is_corrupted(&self) -> bool {
        self.corrupted
    }
}

impl<C> Debug for PoolConnection<C>
where
    C: Connection + Debug,
{
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_struct("PoolConnection")
            .field("node", &self.node().name)
            .field("connection", &self.connection)
            .field("corrupted", &self.corrupted)
            .finish()
    }
}

impl<C> Drop for PoolConnection<C>
where
    C: Connection,
{
    fn drop(&mut self) {
        if let Some(conn) = self.connection.take() {
            self.context.on_release(conn, self.corrupted);
        }
    }
}

impl<C> Deref for PoolConnection<C>
where
    C: Connection,
{
    type Target = C;

    fn deref(&self) -> &C {
        match &self.connection {
            Some(conn) => &conn.connection,
            None => unreachable!("connection is only taken on drop"),
        }
    }
}

impl<C> DerefMut for PoolConnection<C>
where
    C: Connection,
{
    fn deref_mut(&mut self) -> &mut C {
        match &mut self.connection {
            Some(conn) => &mut conn.connection,
            None => unreachable!("connection is only taken on drop"),
        }
    }
}
