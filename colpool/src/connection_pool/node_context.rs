// Copyright 2020 Joyent, Inc.

use std::collections::VecDeque;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64};
use std::sync::mpsc::{
    sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError,
};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use slog::{debug, error, info, trace, warn, Logger};

use crate::connection::Connection;
use crate::connection_pool::types::{lock, NodeStats, PoolPolicy};
use crate::error::Error;
use crate::node::{Node, NodeKey};

/// The function used by the pool to create new, unconnected connections.
pub type ConnectionCreator<C> = Arc<dyn Fn(&Node) -> C + Send + Sync>;

// A connection together with the session that was current when it was
// created.
#[doc(hidden)]
#[derive(Debug)]
pub struct SessionConnection<C> {
    pub connection: C,
    pub session: u64,
}

// The idle connections of a node and the session they belong to. Both live
// under one lock so that a purge and a concurrent release or refill can never
// disagree about which session a connection belongs to.
struct ConnectionCache<C> {
    connections: VecDeque<SessionConnection<C>>,
    session: u64,
}

#[derive(Debug, Default)]
struct NodeCounters {
    created: AtomicU64,
    destroyed: AtomicU64,
    corrupted: AtomicU64,
    borrowed: AtomicU64,
    returned: AtomicU64,
}

/// The connections belonging to a single node.
///
/// Callers take idle connections with `get_connection` and hand them back
/// with `on_release`. The node's refill worker (see `refill_loop`) is the
/// only thing that creates connections. It wakes whenever the cache changes
/// hands or the refill interval elapses, evicts dead idle connections and
/// tops the cache back up toward the policy's targets.
#[doc(hidden)]
pub struct NodeContext<C> {
    node: Node,
    key: NodeKey,
    policy: PoolPolicy,
    in_use: AtomicU32,
    cached: AtomicU32,
    cache: Mutex<ConnectionCache<C>>,
    wake_tx: Mutex<SyncSender<()>>,
    stop: Arc<AtomicBool>,
    counters: NodeCounters,
    log: Logger,
}

impl<C> NodeContext<C>
where
    C: Connection,
{
    /// Create the context for `node`. The returned receiver is the wake
    /// signal consumed by the refill worker.
    pub fn new(
        node: Node,
        policy: PoolPolicy,
        stop: Arc<AtomicBool>,
        log: Logger,
    ) -> (Self, Receiver<()>) {
        // A single buffered wake-up is enough: signals that arrive while one
        // is already pending are folded into it.
        let (wake_tx, wake_rx) = sync_channel(1);
        let capacity = policy.max_connections_per_node as usize;
        let context = NodeContext {
            key: node.key(),
            node,
            policy,
            in_use: AtomicU32::new(0),
            cached: AtomicU32::new(0),
            cache: Mutex::new(ConnectionCache {
                connections: VecDeque::with_capacity(capacity),
                session: 0,
            }),
            wake_tx: Mutex::new(wake_tx),
            stop,
            counters: NodeCounters::default(),
            log,
        };
        (context, wake_rx)
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn key(&self) -> &NodeKey {
        &self.key
    }

    pub fn in_use(&self) -> u32 {
        self.in_use.load(AtomicOrdering::SeqCst)
    }

    pub fn cached(&self) -> u32 {
        self.cached.load(AtomicOrdering::SeqCst)
    }

    /// A node is available when it has at least one idle connection.
    pub fn is_available(&self) -> bool {
        self.cached() > 0
    }

    fn cache_lock(&self) -> MutexGuard<ConnectionCache<C>> {
        lock(&self.cache)
    }

    /// Wake the refill worker. Never blocks.
    pub fn signal(&self) {
        match lock(&self.wake_tx).try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => (),
            Err(TrySendError::Disconnected(())) => {
                trace!(self.log, "refill worker has exited, dropping signal")
            }
        }
    }

    /// Take an idle connection from the cache, discarding any that have died
    /// while idle. Returns `None` if the cache runs dry. The connection is
    /// counted as in use from this point until it is passed to `on_release`.
    pub fn get_connection(&self) -> Option<SessionConnection<C>> {
        let result = loop {
            let popped = {
                let mut cache = self.cache_lock();
                let popped = cache.connections.pop_front();
                if popped.is_some() {
                    self.cached.fetch_sub(1, AtomicOrdering::SeqCst);
                }
                popped
            };

            match popped {
                Some(conn) if conn.connection.is_open() => {
                    self.in_use.fetch_add(1, AtomicOrdering::SeqCst);
                    self.counters.borrowed.fetch_add(1, AtomicOrdering::SeqCst);
                    break Some(conn);
                }
                Some(conn) => {
                    debug!(self.log, "discarding idle connection found closed");
                    self.destroy(conn.connection);
                }
                None => break None,
            }
        };

        self.signal();
        result
    }

    /// Return a connection taken with `get_connection`.
    ///
    /// A healthy connection goes back into the cache unless the node already
    /// holds its target number of connections, in which case it is closed. A
    /// corrupted connection is always closed and, when the policy asks for
    /// it, invalidates every idle connection created in the same session.
    pub fn on_release(&self, conn: SessionConnection<C>, corrupted: bool) {
        self.in_use.fetch_sub(1, AtomicOrdering::SeqCst);
        self.counters.returned.fetch_add(1, AtomicOrdering::SeqCst);

        if corrupted {
            self.counters.corrupted.fetch_add(1, AtomicOrdering::SeqCst);
            let session = conn.session;
            debug!(
                self.log,
                "closing corrupted connection";
                "session" => session
            );
            self.destroy(conn.connection);
            if self.policy.purge_on_exception {
                self.purge(session);
            }
        } else if self.stop.load(AtomicOrdering::SeqCst) {
            self.destroy(conn.connection);
        } else if !conn.connection.is_open() {
            debug!(self.log, "released connection is closed, discarding");
            self.destroy(conn.connection);
        } else {
            let mut cache = self.cache_lock();
            let total = self.in_use() + self.cached();
            if conn.session < cache.session {
                drop(cache);
                debug!(
                    self.log,
                    "discarding released connection from purged session";
                    "session" => conn.session
                );
                self.destroy(conn.connection);
            } else if total >= self.policy.target_connections_per_node {
                drop(cache);
                trace!(
                    self.log,
                    "node at target connection count, closing released \
                     connection"
                );
                self.destroy(conn.connection);
            } else {
                cache.connections.push_back(conn);
                self.cached.fetch_add(1, AtomicOrdering::SeqCst);
            }
        }

        self.signal();
    }

    // Close every idle connection created in `session` or earlier and start a
    // new session. If a purge has already moved past `session` the idle
    // connections all belong to the newer session and are left alone.
    fn purge(&self, session: u64) {
        let purged: Vec<SessionConnection<C>> = {
            let mut cache = self.cache_lock();
            if session < cache.session {
                trace!(
                    self.log,
                    "session {} already purged, current session {}",
                    session,
                    cache.session
                );
                return;
            }
            cache.session = session + 1;
            let new_session = cache.session;
            let (stale, current): (VecDeque<_>, VecDeque<_>) = cache
                .connections
                .drain(..)
                .partition(|c| c.session < new_session);
            cache.connections = current;
            self.cached
                .fetch_sub(stale.len() as u32, AtomicOrdering::SeqCst);
            stale.into_iter().collect()
        };

        warn!(
            self.log,
            "purged {} idle connections after corrupted release",
            purged.len();
            "session" => session + 1
        );
        for conn in purged {
            self.destroy(conn.connection);
        }
    }

    fn destroy(&self, mut connection: C) {
        self.counters.destroyed.fetch_add(1, AtomicOrdering::SeqCst);
        if let Err(err) = connection.close() {
            warn!(
                self.log,
                "Failed to properly close connection for node {}. Reason: {}",
                self.node.name,
                err
            );
        }
    }

    // Remove idle connections that have died since they were cached.
    fn evict_closed(&self) -> usize {
        let closed: Vec<SessionConnection<C>> = {
            let mut cache = self.cache_lock();
            let (open, closed): (VecDeque<_>, VecDeque<_>) = cache
                .connections
                .drain(..)
                .partition(|c| c.connection.is_open());
            cache.connections = open;
            self.cached
                .fetch_sub(closed.len() as u32, AtomicOrdering::SeqCst);
            closed.into_iter().collect()
        };

        let count = closed.len();
        if count > 0 {
            warn!(self.log, "evicted {} closed idle connections", count);
        }
        for conn in closed {
            self.destroy(conn.connection);
        }
        count
    }

    fn needs_connection(&self) -> bool {
        let cached = self.cached();
        let total = self.in_use() + cached;
        total < self.policy.max_connections_per_node
            && (cached < self.policy.min_cached_connections_per_node
                || total < self.policy.target_connections_per_node)
    }

    fn open_connection(
        &self,
        create_connection: &ConnectionCreator<C>,
        keyspace: Option<&str>,
    ) -> Result<C, Error> {
        let mut conn = create_connection(&self.node);
        conn.connect().map_err(|e| {
            Error::ConnectionFailed(format!("{}: {}", self.node.name, e))
        })?;

        if let Some(keyspace) = keyspace {
            if let Err(e) = conn.set_keyspace(keyspace) {
                let err = Error::ConnectionFailed(format!(
                    "{}: unable to select keyspace {}: {}",
                    self.node.name, keyspace, e
                ));
                let _ = conn.close();
                return Err(err);
            }
        }
        Ok(conn)
    }

    // Create connections until the cache meets the policy's targets or an
    // attempt fails.
    fn refill(
        &self,
        state: &mut RefillState,
        create_connection: &ConnectionCreator<C>,
        keyspace: Option<&str>,
    ) {
        self.evict_closed();

        if let Some(retry_at) = state.retry_at {
            if Instant::now() < retry_at {
                trace!(self.log, "backing off connection creation");
                return;
            }
            state.retry_at = None;
        }

        while self.needs_connection() && !self.stop.load(AtomicOrdering::SeqCst)
        {
            let session = self.cache_lock().session;
            match self.open_connection(create_connection, keyspace) {
                Ok(connection) => {
                    if state.failures > 0 {
                        info!(
                            self.log,
                            "connection established after {} failures",
                            state.failures
                        );
                    }
                    state.succeeded();
                    self.counters.created.fetch_add(1, AtomicOrdering::SeqCst);

                    // Shutdown sets the stop flag before close_idle takes
                    // this lock.
                    let mut cache = self.cache_lock();
                    if self.stop.load(AtomicOrdering::SeqCst) {
                        drop(cache);
                        debug!(
                            self.log,
                            "pool stopped while connecting, closing new \
                             connection"
                        );
                        self.destroy(connection);
                        break;
                    } else if session < cache.session {
                        // Purged while connecting
                        drop(cache);
                        self.destroy(connection);
                    } else {
                        cache.connections.push_back(SessionConnection {
                            connection,
                            session,
                        });
                        self.cached.fetch_add(1, AtomicOrdering::SeqCst);
                    }
                }
                Err(e) => {
                    let delay = state.failed();
                    error!(
                        self.log,
                        "Failed to create connection: {}", e;
                        "failures" => state.failures,
                        "retry_in_ms" => delay.as_millis() as u64
                    );
                    break;
                }
            }
        }
    }

    /// Close every idle connection. Used when the pool shuts down.
    pub fn close_idle(&self) -> usize {
        let idle: Vec<SessionConnection<C>> = {
            let mut cache = self.cache_lock();
            self.cached.store(0, AtomicOrdering::SeqCst);
            cache.connections.drain(..).collect()
        };
        let count = idle.len();
        for conn in idle {
            self.destroy(conn.connection);
        }
        count
    }

    pub fn stats(&self) -> NodeStats {
        let session_id = self.cache_lock().session;
        NodeStats {
            node: self.node.name.clone(),
            in_use: self.in_use().into(),
            cached: self.cached().into(),
            session_id,
            created: self.counters.created.load(AtomicOrdering::SeqCst),
            destroyed: self.counters.destroyed.load(AtomicOrdering::SeqCst),
            corrupted: self.counters.corrupted.load(AtomicOrdering::SeqCst),
            borrowed: self.counters.borrowed.load(AtomicOrdering::SeqCst),
            returned: self.counters.returned.load(AtomicOrdering::SeqCst),
        }
    }
}

// Pacing of connection attempts after failures. The backoff has no jitter.
#[derive(Debug)]
struct RefillState {
    failures: u32,
    retry_at: Option<Instant>,
    backoff: ExponentialBackoff,
}

impl RefillState {
    fn new(policy: &PoolPolicy) -> Self {
        let min = Duration::from_millis(policy.creation_backoff_min);
        let max = Duration::from_millis(policy.creation_backoff_max);
        let mut backoff = ExponentialBackoff {
            initial_interval: min,
            max_interval: max,
            multiplier: 2.0,
            randomization_factor: 0.0,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };
        backoff.reset();
        RefillState {
            failures: 0,
            retry_at: None,
            backoff,
        }
    }

    // Record a failed attempt and return how long to wait before the next.
    fn failed(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let delay = self
            .backoff
            .next_backoff()
            .unwrap_or(self.backoff.max_interval);
        self.retry_at = Some(Instant::now() + delay);
        delay
    }

    fn succeeded(&mut self) {
        self.failures = 0;
        self.retry_at = None;
        self.backoff.reset();
    }
}

/// Run the refill worker for `context` until the pool stops or the context is
/// dropped.
#[doc(hidden)]
pub fn refill_loop<C>(
    context: Arc<NodeContext<C>>,
    wake_rx: Receiver<()>,
    create_connection: ConnectionCreator<C>,
    keyspace: Option<String>,
) where
    C: Connection,
{
    let interval = Duration::from_millis(context.policy.refill_interval);
    let mut state = RefillState::new(&context.policy);

    debug!(context.log, "refill worker starting");
    // Fill the cache right away rather than after the first interval
    context.refill(&mut state, &create_connection, keyspace.as_deref());

    loop {
        match wake_rx.recv_timeout(interval) {
            Ok(()) => trace!(context.log, "refill worker signaled"),
            Err(RecvTimeoutError::Timeout) => {
                trace!(context.log, "refill interval elapsed")
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if context.stop.load(AtomicOrdering::SeqCst) {
            break;
        }

        context.refill(&mut state, &create_connection, keyspace.as_deref());
    }
    debug!(context.log, "refill worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fmt;
    use std::sync::atomic::AtomicUsize;

    use slog::{o, Discard};

    use crate::node::NodeConfig;

    static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

    #[derive(Debug)]
    struct TestError;

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("test error")
        }
    }

    impl std::error::Error for TestError {}

    #[derive(Debug)]
    struct TestConnection {
        id: usize,
        open: Arc<AtomicBool>,
    }

    impl Connection for TestConnection {
        type Error = TestError;

        fn connect(&mut self) -> Result<(), TestError> {
            self.open.store(true, AtomicOrdering::SeqCst);
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open.load(AtomicOrdering::SeqCst)
        }

        fn close(&mut self) -> Result<(), TestError> {
            self.open.store(false, AtomicOrdering::SeqCst);
            Ok(())
        }
    }

    fn creator() -> ConnectionCreator<TestConnection> {
        Arc::new(|_node: &Node| TestConnection {
            id: NEXT_ID.fetch_add(1, AtomicOrdering::SeqCst),
            open: Arc::new(AtomicBool::new(false)),
        })
    }

    fn context(policy: PoolPolicy) -> NodeContext<TestConnection> {
        let node = Node::new("10.0.0.1", &NodeConfig::default());
        let log = Logger::root(Discard, o!());
        let stop = Arc::new(AtomicBool::new(false));
        let (context, _wake_rx) = NodeContext::new(node, policy, stop, log);
        context
    }

    fn fill(context: &NodeContext<TestConnection>) {
        let mut state = RefillState::new(&context.policy);
        context.refill(&mut state, &creator(), None);
    }

    fn policy(min_cached: u32, target: u32, max: u32) -> PoolPolicy {
        PoolPolicy {
            min_cached_connections_per_node: min_cached,
            target_connections_per_node: target,
            max_connections_per_node: max,
            ..PoolPolicy::default()
        }
    }

    #[test]
    fn refill_reaches_target() {
        let ctx = context(policy(1, 3, 5));
        fill(&ctx);
        assert_eq!(ctx.cached(), 3);
        assert_eq!(ctx.in_use(), 0);
        assert_eq!(ctx.stats().created, 3);
    }

    #[test]
    fn refill_keeps_min_cached_up_to_max() {
        let ctx = context(policy(1, 2, 3));
        fill(&ctx);
        let c1 = ctx.get_connection().unwrap();
        let c2 = ctx.get_connection().unwrap();
        assert_eq!(ctx.cached(), 0);

        fill(&ctx);
        assert_eq!(ctx.cached(), 1);
        let c3 = ctx.get_connection().unwrap();

        // At max, nothing more is created
        fill(&ctx);
        assert_eq!(ctx.cached(), 0);
        assert_eq!(ctx.in_use(), 3);

        for c in vec![c1, c2, c3] {
            ctx.on_release(c, false);
        }
        // Two fit under the target, the third is closed
        assert_eq!(ctx.cached(), 2);
        assert_eq!(ctx.in_use(), 0);
        assert_eq!(ctx.stats().destroyed, 1);
    }

    #[test]
    fn get_connection_skips_dead_connections() {
        let ctx = context(policy(1, 2, 2));
        fill(&ctx);

        let first = ctx.get_connection().unwrap();
        first.connection.open.store(false, AtomicOrdering::SeqCst);
        ctx.on_release(first, false);
        assert_eq!(ctx.cached(), 1);

        let remaining = ctx.get_connection().unwrap();
        assert!(remaining.connection.is_open());
        ctx.on_release(remaining, false);

        let idle: Vec<_> =
            (0..2).filter_map(|_| ctx.get_connection()).collect();
        assert_eq!(idle.len(), 1);
    }

    #[test]
    fn corrupted_connection_is_never_reused() {
        let ctx = context(PoolPolicy {
            purge_on_exception: false,
            ..policy(1, 2, 2)
        });
        fill(&ctx);

        let conn = ctx.get_connection().unwrap();
        let id = conn.connection.id;
        ctx.on_release(conn, true);
        assert_eq!(ctx.stats().corrupted, 1);

        fill(&ctx);
        while let Some(c) = ctx.get_connection() {
            assert_ne!(c.connection.id, id);
        }
    }

    #[test]
    fn corrupted_release_purges_session() {
        let ctx = context(policy(2, 4, 4));
        fill(&ctx);
        assert_eq!(ctx.cached(), 4);

        let bad = ctx.get_connection().unwrap();
        let held = ctx.get_connection().unwrap();
        let idle_before: Vec<Arc<AtomicBool>> = {
            let cache = ctx.cache_lock();
            cache
                .connections
                .iter()
                .map(|c| c.connection.open.clone())
                .collect()
        };
        assert_eq!(idle_before.len(), 2);

        ctx.on_release(bad, true);
        assert_eq!(ctx.cached(), 0);
        assert_eq!(ctx.stats().session_id, 1);
        assert!(idle_before.iter().all(|o| !o.load(AtomicOrdering::SeqCst)));

        // A connection from the old session is not cached on release either
        ctx.on_release(held, false);
        assert_eq!(ctx.cached(), 0);

        // New-session connections survive a stale corrupted release
        fill(&ctx);
        let new_idle = ctx.cached();
        assert!(new_idle > 0);
        let fresh = ctx.get_connection().unwrap();
        assert_eq!(fresh.session, 1);
        let stale = SessionConnection {
            connection: creator()(ctx.node()),
            session: 0,
        };
        ctx.in_use.fetch_add(1, AtomicOrdering::SeqCst);
        ctx.on_release(stale, true);
        assert_eq!(ctx.stats().session_id, 1);
        assert_eq!(ctx.cached(), new_idle - 1);
        ctx.on_release(fresh, false);
    }

    #[test]
    fn failed_creation_backs_off() {
        let node = Node::new("10.0.0.2", &NodeConfig::default());
        let (ctx, _wake_rx) = NodeContext::new(
            node,
            PoolPolicy {
                creation_backoff_min: 60_000,
                creation_backoff_max: 60_000,
                ..policy(1, 2, 2)
            },
            Arc::new(AtomicBool::new(false)),
            Logger::root(Discard, o!()),
        );
        let refuse: ConnectionCreator<RefusingConnection> =
            Arc::new(|_node: &Node| RefusingConnection);

        let mut state = RefillState::new(&ctx.policy);
        ctx.refill(&mut state, &refuse, None);
        assert_eq!(state.failures, 1);
        assert!(state.retry_at.is_some());
        assert_eq!(ctx.cached(), 0);
        assert_eq!(ctx.stats().created, 0);

        // Still backing off, so no further attempt is made
        ctx.refill(&mut state, &refuse, None);
        assert_eq!(state.failures, 1);

        // Once the backoff has passed the next failure extends it
        state.retry_at = Some(Instant::now());
        ctx.refill(&mut state, &refuse, None);
        assert_eq!(state.failures, 2);
    }

    #[test]
    fn creation_backoff_doubles_up_to_max() {
        let mut state = RefillState::new(&PoolPolicy {
            creation_backoff_min: 100,
            creation_backoff_max: 500,
            ..PoolPolicy::default()
        });

        let delays: Vec<u128> =
            (0..5).map(|_| state.failed().as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
        assert_eq!(state.failures, 5);

        state.succeeded();
        assert_eq!(state.failures, 0);
        assert!(state.retry_at.is_none());
        assert_eq!(state.failed().as_millis(), 100);
    }

    #[test]
    fn success_resets_failure_count() {
        let ctx = context(policy(1, 2, 2));
        let mut state = RefillState::new(&ctx.policy);
        for _ in 0..4 {
            state.failed();
        }
        state.retry_at = None;

        ctx.refill(&mut state, &creator(), None);
        assert_eq!(state.failures, 0);
        assert_eq!(ctx.cached(), 2);
        assert_eq!(
            state.failed().as_millis(),
            u128::from(ctx.policy.creation_backoff_min)
        );
    }

    #[test]
    fn connection_opened_during_shutdown_is_closed() {
        let stop = Arc::new(AtomicBool::new(false));
        let (ctx, _wake_rx) = NodeContext::new(
            Node::new("10.0.0.3", &NodeConfig::default()),
            policy(1, 2, 2),
            stop.clone(),
            Logger::root(Discard, o!()),
        );

        // The pool stops while the first connection is still connecting
        let opened = Arc::new(Mutex::new(Vec::new()));
        let created = opened.clone();
        let slow: ConnectionCreator<StoppingConnection> =
            Arc::new(move |_node: &Node| {
                let open = Arc::new(AtomicBool::new(false));
                created.lock().unwrap().push(open.clone());
                StoppingConnection {
                    open,
                    stop: stop.clone(),
                }
            });

        let mut state = RefillState::new(&ctx.policy);
        ctx.refill(&mut state, &slow, None);

        let opened = opened.lock().unwrap();
        assert_eq!(opened.len(), 1);
        assert!(!opened[0].load(AtomicOrdering::SeqCst));
        assert_eq!(ctx.cached(), 0);
        assert_eq!(ctx.close_idle(), 0);
        let stats = ctx.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.destroyed, 1);
    }

    #[derive(Debug)]
    struct StoppingConnection {
        open: Arc<AtomicBool>,
        stop: Arc<AtomicBool>,
    }

    impl Connection for StoppingConnection {
        type Error = TestError;

        fn connect(&mut self) -> Result<(), TestError> {
            self.stop.store(true, AtomicOrdering::SeqCst);
            self.open.store(true, AtomicOrdering::SeqCst);
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open.load(AtomicOrdering::SeqCst)
        }

        fn close(&mut self) -> Result<(), TestError> {
            self.open.store(false, AtomicOrdering::SeqCst);
            Ok(())
        }
    }

    #[derive(Debug)]
    struct RefusingConnection;

    impl Connection for RefusingConnection {
        type Error = TestError;

        fn connect(&mut self) -> Result<(), TestError> {
            Err(TestError)
        }

        fn is_open(&self) -> bool {
            false
        }

        fn close(&mut self) -> Result<(), TestError> {
            Ok(())
        }
    }

    #[test]
    fn close_idle_empties_cache() {
        let ctx = context(policy(1, 3, 3));
        fill(&ctx);
        assert_eq!(ctx.close_idle(), 3);
        assert_eq!(ctx.cached(), 0);
        assert!(!ctx.is_available());
    }
}
