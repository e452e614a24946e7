// Copyright 2020 Joyent, Inc.

use std::error::Error as StdError;
use std::fmt;

use crate::connection::{Classify, ErrorClass};

/// Errors raised by the pool itself, as opposed to errors raised by the
/// operations callers run on pooled connections.
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// No node could supply a connection before the pool's wait budget ran
    /// out. Callers should try again later.
    NoNodesAvailable { waited_ms: u64 },
    /// The pool is stopping or stopped and no longer hands out connections.
    PoolStopped,
    /// The pool or one of its clients was configured incorrectly.
    Configuration(String),
    /// The cluster topology could not be obtained.
    Topology(String),
    /// A connection to a node could not be opened.
    ConnectionFailed(String),
    /// A pool with this name is already registered.
    DuplicatePool(String),
    /// No pool with this name is registered.
    UnknownPool(String),
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NoNodesAvailable { waited_ms } => write!(
                fmt,
                "no nodes were able to supply a connection after {}ms",
                waited_ms
            ),
            Error::PoolStopped => {
                String::from("connection pool is not running").fmt(fmt)
            }
            Error::Configuration(msg) => {
                write!(fmt, "invalid configuration: {}", msg)
            }
            Error::Topology(msg) => {
                write!(fmt, "unable to describe cluster topology: {}", msg)
            }
            Error::ConnectionFailed(msg) => {
                write!(fmt, "unable to open connection: {}", msg)
            }
            Error::DuplicatePool(name) => {
                write!(fmt, "a pool named {} already exists", name)
            }
            Error::UnknownPool(name) => {
                write!(fmt, "no pool named {} exists", name)
            }
        }
    }
}

impl StdError for Error {}

/// The error returned by [`OperationExecutor::execute`][execute].
///
/// [execute]: ../executor/struct.OperationExecutor.html#method.execute
///
/// `Pool` means the operation never ran to completion because no connection
/// could be obtained. `Operation` carries the error raised by the caller's
/// operation on its final attempt, unchanged.
#[derive(Debug)]
pub enum ExecuteError<E> {
    Pool(Error),
    Operation(E),
}

impl<E> ExecuteError<E>
where
    E: Classify,
{
    /// True if the failure means "try again later" because the pool ran out
    /// of nodes able to serve the request.
    pub fn is_no_nodes_available(&self) -> bool {
        match self {
            ExecuteError::Pool(Error::NoNodesAvailable { .. }) => true,
            _ => false,
        }
    }

    /// The classification of the failure. Pool exhaustion is reported as
    /// transient, every other pool error as fatal.
    pub fn class(&self) -> ErrorClass {
        match self {
            ExecuteError::Pool(Error::NoNodesAvailable { .. }) => {
                ErrorClass::Transient
            }
            ExecuteError::Pool(_) => ErrorClass::Fatal,
            ExecuteError::Operation(e) => e.class(),
        }
    }

    /// Return the operation error, if the failure came from the operation.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            ExecuteError::Operation(e) => Some(e),
            ExecuteError::Pool(_) => None,
        }
    }
}

impl<E> From<Error> for ExecuteError<E> {
    fn from(error: Error) -> Self {
        ExecuteError::Pool(error)
    }
}

impl<E> fmt::Display for ExecuteError<E>
where
    E: fmt::Display,
{
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExecuteError::Pool(err) => err.fmt(fmt),
            ExecuteError::Operation(err) => err.fmt(fmt),
        }
    }
}

impl<E> StdError for ExecuteError<E>
where
    E: StdError + 'static,
{
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ExecuteError::Pool(err) => Some(err),
            ExecuteError::Operation(err) => Some(err),
        }
    }
}
