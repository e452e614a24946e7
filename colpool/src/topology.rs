// Copyright 2020 Joyent, Inc.

use std::fmt;
use std::sync::Arc;

use crate::error::Error;
use crate::node::Node;

/// A contiguous range of the token ring and the addresses of the nodes that
/// hold replicas for it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TokenRange {
    pub start_token: String,
    pub end_token: String,
    pub endpoints: Vec<String>,
}

impl TokenRange {
    pub fn new(start_token: &str, end_token: &str, endpoints: &[&str]) -> Self {
        TokenRange {
            start_token: start_token.to_string(),
            end_token: end_token.to_string(),
            endpoints: endpoints.iter().map(|e| e.to_string()).collect(),
        }
    }
}

/// Cluster topology discovery
///
/// A `TopologySource` answers the question "which nodes own which ranges of
/// the ring" for the node registry. Typically this issues the database's
/// ring-description RPC over a connection to one of the currently known
/// nodes, which are passed in as `known_nodes`.
pub trait TopologySource: Send + 'static {
    fn describe_ring(
        &mut self,
        known_nodes: &[Node],
    ) -> Result<Vec<TokenRange>, Error>;
}

/// A predicate over node addresses that decides which discovered nodes the
/// registry keeps.
#[derive(Clone)]
pub struct NodeFilter(Arc<dyn Fn(&str) -> bool + Send + Sync>);

impl NodeFilter {
    pub fn new<P>(predicate: P) -> Self
    where
        P: Fn(&str) -> bool + Send + Sync + 'static,
    {
        NodeFilter(Arc::new(predicate))
    }

    /// A filter that keeps every node.
    pub fn accept_all() -> Self {
        NodeFilter::new(|_| true)
    }

    pub fn accept(&self, address: &str) -> bool {
        (self.0)(address)
    }
}

impl Default for NodeFilter {
    fn default() -> Self {
        NodeFilter::accept_all()
    }
}

impl fmt::Debug for NodeFilter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("NodeFilter")
    }
}
