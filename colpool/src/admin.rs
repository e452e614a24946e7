// Copyright 2020 Joyent, Inc.

//! Single-node sessions for administrative operations.
//!
//! Schema changes must all be applied through the same node, so they cannot
//! go through the pool, which is free to pick a different node for every
//! operation. A [`NodeSession`] holds one connection to one node for its whole
//! life and only ever reconnects to that same node.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use backoff::{Error as BackoffError, ExponentialBackoff, Operation};
use slog::{debug, info, o, warn, Drain, Logger};

use crate::connection::{Classify, Connection, ErrorClass};
use crate::connection_pool::node_context::ConnectionCreator;
use crate::error::{Error, ExecuteError};
use crate::executor::OperandPolicy;
use crate::node::Node;

// Reconnect delays in milliseconds
const RECONNECT_INITIAL_INTERVAL: u64 = 100;
const RECONNECT_MAX_INTERVAL: u64 = 2000;
// Upper bound on time spent retrying one operation, in milliseconds
const RECONNECT_MAX_ELAPSED: u64 = 30_000;

/// A dedicated connection to a single node. Operations are retried on the
/// same node after transient failures, reconnecting as needed. The
/// connection must be closed with [`close`](#method.close) when the session
/// is no longer needed; it is also closed when the session is dropped.
pub struct NodeSession<C>
where
    C: Connection,
{
    node: Node,
    keyspace: Option<String>,
    connection: Option<C>,
    create_connection: ConnectionCreator<C>,
    policy: OperandPolicy,
    backoff: ExponentialBackoff,
    log: Logger,
}

impl<C> NodeSession<C>
where
    C: Connection,
{
    /// Open a session to `node`. Fails if the first connection attempt fails.
    pub fn open<F>(
        node: Node,
        keyspace: Option<String>,
        create_connection: F,
        policy: OperandPolicy,
        log: Option<Logger>,
    ) -> Result<Self, Error>
    where
        F: Fn(&Node) -> C + Send + Sync + 'static,
    {
        Self::with_creator(
            node,
            keyspace,
            Arc::new(create_connection),
            policy,
            log,
        )
    }

    pub(crate) fn with_creator(
        node: Node,
        keyspace: Option<String>,
        create_connection: ConnectionCreator<C>,
        policy: OperandPolicy,
        log: Option<Logger>,
    ) -> Result<Self, Error> {
        let log = log
            .unwrap_or_else(|| Logger::root(slog_stdlog::StdLog.fuse(), o!()))
            .new(o!("node" => node.name.clone()));

        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_millis(RECONNECT_INITIAL_INTERVAL),
            max_interval: Duration::from_millis(RECONNECT_MAX_INTERVAL),
            max_elapsed_time: Some(Duration::from_millis(
                RECONNECT_MAX_ELAPSED,
            )),
            ..ExponentialBackoff::default()
        };

        let mut session = NodeSession {
            node,
            keyspace,
            connection: None,
            create_connection,
            policy,
            backoff,
            log,
        };
        session.connection = Some(session.connect()?);
        info!(session.log, "opened administrative session");
        Ok(session)
    }

    /// Shorten or lengthen the reconnect backoff. Mostly useful in tests.
    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn is_open(&self) -> bool {
        self.connection.as_ref().map_or(false, |c| c.is_open())
    }

    fn connect(&self) -> Result<C, Error> {
        open_connection(
            &self.node,
            self.keyspace.as_deref(),
            &*self.create_connection,
        )
    }

    /// Run `operation` on the session's connection. Transient failures close
    /// the connection and the operation is retried, after a backoff, on a new
    /// connection to the same node, at most `max_op_retries` times. Any other
    /// failure is returned immediately.
    pub fn execute<T, E, O>(
        &mut self,
        mut operation: O,
    ) -> Result<T, ExecuteError<E>>
    where
        O: FnMut(&mut C) -> Result<T, E>,
        E: Classify + Display,
    {
        let max_retries = self.policy.max_op_retries;
        let node = &self.node;
        let keyspace = self.keyspace.as_deref();
        let create_connection = &*self.create_connection;
        let connection = &mut self.connection;
        let log = &self.log;
        let mut attempts: u32 = 0;

        let mut op = || -> Result<T, BackoffError<ExecuteError<E>>> {
            attempts += 1;

            if connection.is_none() {
                debug!(log, "reconnecting session");
                match open_connection(node, keyspace, create_connection) {
                    Ok(conn) => *connection = Some(conn),
                    Err(e) if attempts > max_retries => {
                        return Err(BackoffError::Permanent(
                            ExecuteError::Pool(e),
                        ))
                    }
                    Err(e) => {
                        return Err(BackoffError::Transient(
                            ExecuteError::Pool(e),
                        ))
                    }
                }
            }

            let conn = match connection.as_mut() {
                Some(conn) => conn,
                None => {
                    return Err(BackoffError::Permanent(ExecuteError::Pool(
                        Error::ConnectionFailed(node.name.clone()),
                    )))
                }
            };

            match operation(conn) {
                Ok(result) => Ok(result),
                Err(e) if e.class() == ErrorClass::Transient => {
                    warn!(log, "transient failure on session: {}", e);
                    if let Some(mut dead) = connection.take() {
                        let _ = dead.close();
                    }
                    if attempts > max_retries {
                        Err(BackoffError::Permanent(ExecuteError::Operation(e)))
                    } else {
                        Err(BackoffError::Transient(ExecuteError::Operation(e)))
                    }
                }
                Err(e) => {
                    Err(BackoffError::Permanent(ExecuteError::Operation(e)))
                }
            }
        };

        op.retry(&mut self.backoff).map_err(|e| match e {
            BackoffError::Permanent(e) | BackoffError::Transient(e) => e,
        })
    }

    /// Close the session's connection.
    pub fn close(&mut self) -> Result<(), Error> {
        match self.connection.take() {
            Some(mut conn) => {
                debug!(self.log, "closing administrative session");
                conn.close()
                    .map_err(|e| Error::ConnectionFailed(e.to_string()))
            }
            None => Ok(()),
        }
    }
}

impl<C> Drop for NodeSession<C>
where
    C: Connection,
{
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(self.log, "Failed to close session: {}", e);
        }
    }
}

fn open_connection<C>(
    node: &Node,
    keyspace: Option<&str>,
    create_connection: &(dyn Fn(&Node) -> C + Send + Sync),
) -> Result<C, Error>
where
    C: Connection,
{
    let mut conn = create_connection(node);
    conn.connect()
        .map_err(|e| Error::ConnectionFailed(format!("{}: {}", node.name, e)))?;
    if let Some(keyspace) = keyspace {
        if let Err(e) = conn.set_keyspace(keyspace) {
            let _ = conn.close();
            return Err(Error::ConnectionFailed(format!(
                "{}: unable to select keyspace {}: {}",
                node.name, keyspace, e
            )));
        }
    }
    Ok(conn)
}
