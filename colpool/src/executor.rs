// Copyright 2020 Joyent, Inc.

use serde_derive::Deserialize;
use slog::{debug, o, trace, warn, Logger};

use crate::connection::{Classify, Connection, ErrorClass};
use crate::connection_pool::ConnectionPool;
use crate::error::ExecuteError;
use crate::node::NodeKey;

/// How operations run through an [`OperationExecutor`] are retried.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct OperandPolicy {
    /// The number of times an operation is retried after a transient failure.
    /// An operation is attempted at most `max_op_retries + 1` times. The
    /// default is 3.
    pub max_op_retries: u32,
    /// Whether writing a null value should delete the column instead. Carried
    /// for the data access layer built on top of the executor. The default is
    /// false.
    pub delete_if_null: bool,
}

impl Default for OperandPolicy {
    fn default() -> Self {
        OperandPolicy {
            max_op_retries: 3,
            delete_if_null: false,
        }
    }
}

/// Runs single RPC operations against a pool, retrying on another node when
/// an operation fails with a transient error.
pub struct OperationExecutor<C>
where
    C: Connection,
{
    pool: ConnectionPool<C>,
    keyspace: String,
    policy: OperandPolicy,
    log: Logger,
}

impl<C> OperationExecutor<C>
where
    C: Connection,
{
    pub(crate) fn new(
        pool: ConnectionPool<C>,
        keyspace: String,
        policy: OperandPolicy,
        log: Logger,
    ) -> Self {
        let log = log.new(o!("keyspace" => keyspace.clone()));
        OperationExecutor {
            pool,
            keyspace,
            policy,
            log,
        }
    }

    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    pub fn operand_policy(&self) -> &OperandPolicy {
        &self.policy
    }

    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }

    /// Run `operation` on a pooled connection and return its result.
    ///
    /// The operation should perform one RPC round trip, or a sequence the
    /// caller is happy to see repeated in full. How a failure is handled
    /// depends on its class:
    ///
    /// * `Transient`: the connection is released as corrupted and the
    ///   operation is retried on a connection from a different node if one
    ///   is available, up to `max_op_retries` times. After the last retry the
    ///   error is returned.
    /// * `Application` and `Fatal`: the connection is released intact and the
    ///   error is returned immediately.
    ///
    /// If the pool cannot supply a connection the pool's error is returned as
    /// `ExecuteError::Pool`.
    pub fn execute<T, E, O>(
        &self,
        mut operation: O,
    ) -> Result<T, ExecuteError<E>>
    where
        O: FnMut(&mut C) -> Result<T, E>,
        E: Classify + std::fmt::Display,
    {
        let mut last_node: Option<NodeKey> = None;
        let mut retries = 0;

        loop {
            // The connection is released when it drops at the end of each
            // iteration, whichever way the iteration ends.
            let mut conn = self.pool.acquire(last_node.as_ref())?;
            last_node = Some(conn.node_key().clone());

            let err = match operation(&mut *conn) {
                Ok(result) => return Ok(result),
                Err(err) => err,
            };

            match err.class() {
                ErrorClass::Transient => {
                    conn.mark_corrupted();
                    retries += 1;
                    if retries > self.policy.max_op_retries {
                        warn!(
                            self.log,
                            "operation failed after {} retries: {}",
                            self.policy.max_op_retries,
                            err;
                            "node" => &conn.node().name
                        );
                        return Err(ExecuteError::Operation(err));
                    }
                    debug!(
                        self.log,
                        "transient failure, retrying on another node: {}", err;
                        "node" => &conn.node().name,
                        "retry" => retries
                    );
                }
                class => {
                    trace!(
                        self.log,
                        "operation failed with {:?} error: {}", class, err;
                        "node" => &conn.node().name
                    );
                    return Err(ExecuteError::Operation(err));
                }
            }
        }
    }
}

impl<C> Clone for OperationExecutor<C>
where
    C: Connection,
{
    fn clone(&self) -> Self {
        OperationExecutor {
            pool: self.pool.clone(),
            keyspace: self.keyspace.clone(),
            policy: self.policy.clone(),
            log: self.log.clone(),
        }
    }
}
