// Copyright 2020 Joyent, Inc.

//! Named connection pools
//!
//! Applications that talk to more than one cluster, or to one cluster with
//! different policies, can keep their pools in a `PoolRegistry` and look them
//! up by name. The registry is an ordinary value; create as many as needed
//! and pass them where they are used.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::PoisonError;

use slog::{info, o, Drain, Logger};

use crate::connection::Connection;
use crate::connection_pool::ConnectionPool;
use crate::error::Error;
use crate::executor::{OperandPolicy, OperationExecutor};

pub struct PoolRegistry<C>
where
    C: Connection,
{
    pools: RwLock<HashMap<String, ConnectionPool<C>>>,
    log: Logger,
}

impl<C> PoolRegistry<C>
where
    C: Connection,
{
    pub fn new(log: Option<Logger>) -> Self {
        let log = log
            .unwrap_or_else(|| Logger::root(slog_stdlog::StdLog.fuse(), o!()));
        PoolRegistry {
            pools: RwLock::new(HashMap::new()),
            log,
        }
    }

    /// Register `pool` under `name`. The registry takes ownership of the
    /// pool, so the pool is shut down when it is removed or the registry is
    /// dropped.
    pub fn add_pool(
        &self,
        name: &str,
        pool: ConnectionPool<C>,
    ) -> Result<(), Error> {
        let mut pools =
            self.pools.write().unwrap_or_else(PoisonError::into_inner);
        if pools.contains_key(name) {
            return Err(Error::DuplicatePool(name.to_string()));
        }
        pools.insert(name.to_string(), pool);
        info!(self.log, "registered pool {}", name);
        Ok(())
    }

    /// Return a handle to the pool registered under `name`.
    pub fn get_pool(&self, name: &str) -> Option<ConnectionPool<C>> {
        self.pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn pool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Create an executor over the pool registered under `name`.
    pub fn create_executor(
        &self,
        name: &str,
        policy: OperandPolicy,
    ) -> Result<OperationExecutor<C>, Error> {
        self.get_pool(name)
            .ok_or_else(|| Error::UnknownPool(name.to_string()))?
            .create_executor(policy)
    }

    /// Unregister the pool under `name` and shut it down.
    pub fn remove_pool(&self, name: &str) -> Result<(), Error> {
        let pool = self
            .pools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .ok_or_else(|| Error::UnknownPool(name.to_string()))?;
        pool.shutdown();
        info!(self.log, "removed pool {}", name);
        Ok(())
    }

    /// Shut down and unregister every pool.
    pub fn shutdown(&self) {
        let pools: Vec<(String, ConnectionPool<C>)> = self
            .pools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (name, pool) in pools {
            pool.shutdown();
            info!(self.log, "removed pool {}", name);
        }
    }
}

impl<C> Drop for PoolRegistry<C>
where
    C: Connection,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fmt;

    use slog::Discard;

    use crate::connection_pool::types::{ConnectionPoolOptions, PoolPolicy};
    use crate::node::{Node, NodeConfig};
    use crate::node_registry::NodeRegistry;

    #[derive(Debug)]
    struct TestError;

    impl fmt::Display for TestError {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("test error")
        }
    }

    impl std::error::Error for TestError {}

    struct TestConnection(bool);

    impl Connection for TestConnection {
        type Error = TestError;

        fn connect(&mut self) -> Result<(), TestError> {
            self.0 = true;
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.0
        }

        fn close(&mut self) -> Result<(), TestError> {
            self.0 = false;
            Ok(())
        }
    }

    fn pool(keyspace: Option<&str>) -> ConnectionPool<TestConnection> {
        let log = Logger::root(Discard, o!());
        let registry = NodeRegistry::new(
            vec![Node::new("10.0.0.1", &NodeConfig::default())],
            Some(log.clone()),
        );
        let cpo = ConnectionPoolOptions {
            policy: PoolPolicy {
                shutdown_timeout: 1000,
                ..PoolPolicy::default()
            },
            keyspace: keyspace.map(String::from),
            cluster_refresh_interval: None,
            log: Some(log),
        };
        ConnectionPool::new(cpo, registry, |_| TestConnection(false)).unwrap()
    }

    fn registry() -> PoolRegistry<TestConnection> {
        PoolRegistry::new(Some(Logger::root(Discard, o!())))
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = registry();
        assert!(registry.add_pool("users", pool(Some("users"))).is_ok());

        let duplicate = pool(Some("users"));
        assert_eq!(
            registry.add_pool("users", duplicate),
            Err(Error::DuplicatePool(String::from("users")))
        );
        assert_eq!(registry.pool_names(), vec![String::from("users")]);
    }

    #[test]
    fn removed_pools_are_shut_down() {
        let registry = registry();
        registry.add_pool("users", pool(Some("users"))).unwrap();
        let handle = registry.get_pool("users").unwrap();

        assert!(registry.remove_pool("users").is_ok());
        assert_eq!(handle.get_state(), "stopped");
        assert!(registry.get_pool("users").is_none());
        assert_eq!(
            registry.remove_pool("users"),
            Err(Error::UnknownPool(String::from("users")))
        );
    }

    #[test]
    fn executors_come_from_named_pools() {
        let registry = registry();
        registry.add_pool("users", pool(Some("users"))).unwrap();
        registry.add_pool("scratch", pool(None)).unwrap();

        let executor = registry
            .create_executor("users", OperandPolicy::default())
            .unwrap();
        assert_eq!(executor.keyspace(), "users");

        match registry.create_executor("scratch", OperandPolicy::default()) {
            Err(Error::Configuration(_)) => (),
            _ => panic!("executor created without a keyspace"),
        }
        match registry.create_executor("missing", OperandPolicy::default()) {
            Err(Error::UnknownPool(name)) => assert_eq!(name, "missing"),
            _ => panic!("executor created for an unknown pool"),
        }
    }

    #[test]
    fn shutdown_stops_every_pool() {
        let registry = registry();
        registry.add_pool("a", pool(None)).unwrap();
        registry.add_pool("b", pool(None)).unwrap();
        let a = registry.get_pool("a").unwrap();
        let b = registry.get_pool("b").unwrap();

        registry.shutdown();

        assert_eq!(a.get_state(), "stopped");
        assert_eq!(b.get_state(), "stopped");
        assert!(registry.pool_names().is_empty());
    }
}
