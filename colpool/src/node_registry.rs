// Copyright 2020 Joyent, Inc.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use slog::{debug, info, o, warn, Drain, Logger};

use crate::error::Error;
use crate::node::{Node, NodeConfig};
use crate::topology::{NodeFilter, TopologySource};

struct Discovery {
    source: Mutex<Box<dyn TopologySource>>,
    node_config: NodeConfig,
    filter: NodeFilter,
}

/// The set of cluster nodes known to a pool.
///
/// A registry is either static, holding the contact points it was created
/// with, or dynamic, in which case `refresh` replaces the node set with the
/// union of the endpoints reported by its `TopologySource`. The node set is
/// never modified in place: readers hold an `Arc` snapshot that a concurrent
/// refresh cannot change underneath them.
pub struct NodeRegistry {
    nodes: RwLock<Arc<Vec<Node>>>,
    discovery: Option<Discovery>,
    log: Logger,
}

impl NodeRegistry {
    /// Create a registry holding a fixed list of nodes.
    pub fn new(nodes: Vec<Node>, log: Option<Logger>) -> Self {
        NodeRegistry {
            nodes: RwLock::new(Arc::new(dedup(nodes))),
            discovery: None,
            log: log.unwrap_or_else(|| {
                Logger::root(slog_stdlog::StdLog.fuse(), o!())
            }),
        }
    }

    /// Create a registry that discovers nodes through `source`, starting from
    /// the `seeds` contact points. An initial refresh is attempted before
    /// returning; if it fails the seeds remain in effect.
    pub fn with_discovery<T>(
        seeds: Vec<Node>,
        source: T,
        node_config: NodeConfig,
        filter: Option<NodeFilter>,
        log: Option<Logger>,
    ) -> Self
    where
        T: TopologySource,
    {
        let mut registry = NodeRegistry::new(seeds, log);
        registry.discovery = Some(Discovery {
            source: Mutex::new(Box::new(source)),
            node_config,
            filter: filter.unwrap_or_default(),
        });
        let _ = registry.refresh();
        registry
    }

    /// A snapshot of the current node set.
    pub fn nodes(&self) -> Arc<Vec<Node>> {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// True if the registry has a topology source to refresh from.
    pub fn is_dynamic(&self) -> bool {
        self.discovery.is_some()
    }

    /// Query the topology source and atomically replace the node set with
    /// the filtered union of every range's endpoints. Returns the size of the
    /// node set now in effect.
    ///
    /// Refreshing is best effort: on failure the error is logged and
    /// returned, and the previous node set stays in effect. A static registry
    /// is left untouched.
    pub fn refresh(&self) -> Result<usize, Error> {
        let discovery = match &self.discovery {
            Some(discovery) => discovery,
            None => return Ok(self.nodes().len()),
        };

        let current = self.nodes();
        let ranges = {
            let mut source = discovery
                .source
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            source.describe_ring(&current)
        };

        let ranges = match ranges {
            Ok(ranges) => ranges,
            Err(e) => {
                warn!(self.log, "Failed to refresh cluster nodes: {}", e);
                return Err(e);
            }
        };

        let addresses: BTreeSet<&str> = ranges
            .iter()
            .flat_map(|range| range.endpoints.iter())
            .map(String::as_str)
            .filter(|address| {
                let keep = discovery.filter.accept(address);
                if !keep {
                    debug!(self.log, "Node filter rejected {}", address);
                }
                keep
            })
            .collect();

        if addresses.is_empty() {
            let err = Error::Topology(String::from(
                "topology query returned no usable nodes",
            ));
            warn!(self.log, "Failed to refresh cluster nodes: {}", err);
            return Err(err);
        }

        let discovered: Vec<Node> = addresses
            .into_iter()
            .map(|address| Node::new(address, &discovery.node_config))
            .collect();

        if discovered != *current {
            let names: Vec<&str> =
                discovered.iter().map(|n| n.name.as_str()).collect();
            info!(
                self.log,
                "Cluster nodes changed";
                "count" => discovered.len(),
                "nodes" => names.join(",")
            );
        }

        let count = discovered.len();
        *self.nodes.write().unwrap_or_else(PoisonError::into_inner) =
            Arc::new(discovered);
        Ok(count)
    }
}

// Drop repeated contact points while keeping their order
fn dedup(nodes: Vec<Node>) -> Vec<Node> {
    let mut unique: Vec<Node> = Vec::with_capacity(nodes.len());
    for node in nodes {
        if !unique.contains(&node) {
            unique.push(node);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::topology::TokenRange;

    struct ScriptedTopology {
        responses: Vec<Result<Vec<TokenRange>, Error>>,
        calls: Arc<AtomicUsize>,
    }

    impl TopologySource for ScriptedTopology {
        fn describe_ring(
            &mut self,
            _known_nodes: &[Node],
        ) -> Result<Vec<TokenRange>, Error> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let idx = call.min(self.responses.len() - 1);
            self.responses[idx].clone()
        }
    }

    fn ring(endpoints: &[&[&str]]) -> Vec<TokenRange> {
        endpoints
            .iter()
            .enumerate()
            .map(|(i, eps)| {
                TokenRange::new(&i.to_string(), &(i + 1).to_string(), eps)
            })
            .collect()
    }

    fn seeds() -> Vec<Node> {
        vec![Node::new("10.0.0.1", &NodeConfig::default())]
    }

    fn addresses(registry: &NodeRegistry) -> Vec<String> {
        registry.nodes().iter().map(|n| n.address.clone()).collect()
    }

    #[test]
    fn static_registry_ignores_refresh() {
        let nodes = vec![
            Node::new("10.0.0.1", &NodeConfig::default()),
            Node::new("10.0.0.2", &NodeConfig::default()),
            Node::new("10.0.0.1", &NodeConfig::default()),
        ];
        let registry = NodeRegistry::new(nodes, None);
        assert!(!registry.is_dynamic());
        assert_eq!(registry.refresh(), Ok(2));
        assert_eq!(addresses(&registry), vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn refresh_unions_range_endpoints() {
        let topology = ScriptedTopology {
            responses: vec![Ok(ring(&[
                &["10.0.0.1", "10.0.0.2"],
                &["10.0.0.2", "10.0.0.3"],
                &["10.0.0.3", "10.0.0.1"],
            ]))],
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let registry = NodeRegistry::with_discovery(
            seeds(),
            topology,
            NodeConfig::default(),
            None,
            None,
        );
        assert_eq!(
            addresses(&registry),
            vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]
        );
    }

    #[test]
    fn refresh_applies_node_filter() {
        let topology = ScriptedTopology {
            responses: vec![Ok(ring(&[&["10.0.0.1", "10.0.1.1"]]))],
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let filter = NodeFilter::new(|address| address.starts_with("10.0.0."));
        let registry = NodeRegistry::with_discovery(
            seeds(),
            topology,
            NodeConfig::default(),
            Some(filter),
            None,
        );
        assert_eq!(addresses(&registry), vec!["10.0.0.1"]);
    }

    #[test]
    fn refresh_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let topology = ScriptedTopology {
            responses: vec![Ok(ring(&[&["10.0.0.2", "10.0.0.1"]]))],
            calls: calls.clone(),
        };
        let registry = NodeRegistry::with_discovery(
            seeds(),
            topology,
            NodeConfig::default(),
            None,
            None,
        );
        let before = registry.nodes();
        assert_eq!(registry.refresh(), Ok(2));
        assert_eq!(*registry.nodes(), *before);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_refresh_keeps_previous_nodes() {
        let topology = ScriptedTopology {
            responses: vec![
                Ok(ring(&[&["10.0.0.5"]])),
                Err(Error::Topology(String::from("connection refused"))),
                Ok(Vec::new()),
            ],
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let registry = NodeRegistry::with_discovery(
            seeds(),
            topology,
            NodeConfig::default(),
            None,
            None,
        );
        assert_eq!(addresses(&registry), vec!["10.0.0.5"]);

        assert!(registry.refresh().is_err());
        assert_eq!(addresses(&registry), vec!["10.0.0.5"]);

        // An empty ring is treated as a failed refresh as well
        assert!(registry.refresh().is_err());
        assert_eq!(addresses(&registry), vec!["10.0.0.5"]);
    }

    #[test]
    fn discovered_nodes_use_configured_transport() {
        let topology = ScriptedTopology {
            responses: vec![Ok(ring(&[&["10.0.0.9"]]))],
            calls: Arc::new(AtomicUsize::new(0)),
        };
        let config = NodeConfig {
            port: 9042,
            framed: false,
            timeout: Some(100),
        };
        let registry = NodeRegistry::with_discovery(
            seeds(),
            topology,
            config.clone(),
            None,
            None,
        );
        let nodes = registry.nodes();
        assert_eq!(nodes[0].name, "10.0.0.9:9042");
        assert_eq!(nodes[0].config, config);
    }
}
