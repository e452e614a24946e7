// Copyright 2020 Joyent, Inc.

use std::hash::{Hash, Hasher};
use std::time::Duration;

use base64;
use derive_more::{Display, From, Into};
use serde_derive::Deserialize;
use sha1::Sha1;

// Default RPC port for a database node
const DEFAULT_NODE_PORT: u16 = 9160;

/// A base64 encoded identifier based on the node name, address, and port.
#[derive(
    Clone, Debug, Display, Eq, From, Hash, Into, Ord, PartialOrd, PartialEq,
)]
pub struct NodeKey(String);
/// The RPC port for a node. This is a type alias for u16.
pub type NodePort = u16;
/// The concatenation of the node address and port with a colon
/// delimiter. This is a type alias for String.
pub type NodeName = String;
/// The host address of a node as reported by the cluster topology. This is a
/// type alias for String.
pub type NodeAddress = String;

/// Transport settings shared by every connection opened to a node.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodeConfig {
    /// The RPC port. The default is 9160.
    pub port: NodePort,
    /// Whether messages are exchanged as length-prefixed frames. Connection
    /// implementations read this from the node when they are created. The
    /// default is true.
    pub framed: bool,
    /// Optional socket timeout in milliseconds. If not specified, socket
    /// operations block until the peer responds or the connection fails.
    pub timeout: Option<u64>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            port: DEFAULT_NODE_PORT,
            framed: true,
            timeout: None,
        }
    }
}

/// A single database server in the cluster. Two nodes are equal when they
/// share an address and port; transport settings are not compared.
#[derive(Clone, Debug)]
pub struct Node {
    /// The concatenation of the node address and port with a colon delimiter.
    pub name: NodeName,
    /// The address of the node.
    pub address: NodeAddress,
    /// The transport settings for connections to the node.
    pub config: NodeConfig,
}

impl Node {
    /// Return a new instance of `Node` given an address and its transport
    /// settings.
    pub fn new(address: &str, config: &NodeConfig) -> Self {
        Node {
            name: node_name(address, config.port),
            address: address.to_string(),
            config: config.clone(),
        }
    }

    /// The RPC port of the node.
    pub fn port(&self) -> NodePort {
        self.config.port
    }

    /// The configured socket timeout, if any.
    pub fn socket_timeout(&self) -> Option<Duration> {
        self.config.timeout.map(Duration::from_millis)
    }

    pub fn key(&self) -> NodeKey {
        node_key(self)
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Node) -> bool {
        self.name == other.name
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state)
    }
}

// Concatenate the node address and port with a colon delimiter.
fn node_name(address: &str, port: NodePort) -> NodeName {
    format!("{}:{}", address, port)
}

/// Return a base64 encoded identifier based on the fields of the node.
pub fn node_key(node: &Node) -> NodeKey {
    let mut sha1 = Sha1::new();
    sha1.update(node.name.as_bytes());
    sha1.update(b"||");
    sha1.update(node.port().to_string().as_bytes());
    sha1.update(b"||");
    sha1.update(node.address.as_bytes());

    base64::encode(&sha1.digest().bytes()).into()
}
