// Copyright 2020 Joyent, Inc.

use std::error;
use std::fmt;
use std::io;

/// Pooled connection
///
/// The `Connection` trait defines the interface that must be implemented in
/// order to participate in a colpool connection pool. A connection is one open
/// RPC session to a single node. The pool creates connections through a
/// caller-supplied function of the form `Fn(&Node) -> C`, then drives their
/// lifecycle through this trait: `connect`, an optional `set_keyspace`, any
/// number of `is_open` checks, and finally `close`.
pub trait Connection: Send + Sized + 'static {
    /// The error type returned by the lifecycle functions. Each
    /// implementation may choose the concrete error type appropriate to its
    /// transport as long as it implements the
    /// [Error](https://doc.rust-lang.org/std/error/trait.Error.html) trait.
    type Error: error::Error;
    /// Open the session to the node, including any handshake the transport
    /// requires. Returns an error if the node cannot be reached.
    fn connect(&mut self) -> Result<(), Self::Error>;
    /// Select the logical keyspace for the session. The pool calls this once
    /// per connection, immediately after `connect`, when it has been
    /// configured with a keyspace. The default implementation does nothing.
    fn set_keyspace(&mut self, _keyspace: &str) -> Result<(), Self::Error> {
        Ok(())
    }
    /// Report whether the session is still usable. Connections may die at any
    /// time so this is checked whenever a connection changes hands.
    fn is_open(&self) -> bool;
    /// Close the connection to the node.
    fn close(&mut self) -> Result<(), Self::Error>;
}

/// The classification tag carried by every error an operation may raise.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    /// A timeout, transport failure, or a node reporting it cannot serve the
    /// request right now. The connection is considered corrupted and the
    /// operation is retried on another node.
    Transient,
    /// The request itself is wrong: not found, malformed, protocol mismatch,
    /// authentication failure. The transport is healthy and the error is
    /// returned to the caller without retry.
    Application,
    /// Anything else. Returned to the caller without retry.
    Fatal,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorClass::Transient => String::from("transient").fmt(fmt),
            ErrorClass::Application => String::from("application").fmt(fmt),
            ErrorClass::Fatal => String::from("fatal").fmt(fmt),
        }
    }
}

/// Implemented by the error types returned from pooled operations so that the
/// executor can decide how to react to a failure.
pub trait Classify {
    fn class(&self) -> ErrorClass;
}

impl Classify for ErrorClass {
    fn class(&self) -> ErrorClass {
        *self
    }
}

impl Classify for io::Error {
    fn class(&self) -> ErrorClass {
        match self.kind() {
            io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => {
                ErrorClass::Application
            }
            io::ErrorKind::PermissionDenied => ErrorClass::Application,
            _ => ErrorClass::Transient,
        }
    }
}
