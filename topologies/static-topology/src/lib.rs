// Copyright 2020 Joyent, Inc.

use colpool::error::Error;
use colpool::node::{Node, NodeAddress};
use colpool::topology::{TokenRange, TopologySource};

/// A topology source that always describes the same ring. Useful when the
/// cluster layout is known up front, and in tests.
pub struct StaticTopology {
    ranges: Vec<TokenRange>,
}

impl StaticTopology {
    /// Describe the ring with the given token ranges.
    pub fn new(ranges: Vec<TokenRange>) -> Self {
        StaticTopology { ranges }
    }

    /// Describe a ring in which every address owns one range. The tokens are
    /// placeholders since only the endpoints matter to the node registry.
    pub fn from_addresses(addresses: Vec<NodeAddress>) -> Self {
        let ranges = addresses
            .iter()
            .enumerate()
            .map(|(i, address)| TokenRange {
                start_token: i.to_string(),
                end_token: (i + 1).to_string(),
                endpoints: vec![address.clone()],
            })
            .collect();
        StaticTopology { ranges }
    }
}

impl TopologySource for StaticTopology {
    fn describe_ring(
        &mut self,
        _known_nodes: &[Node],
    ) -> Result<Vec<TokenRange>, Error> {
        if self.ranges.is_empty() {
            return Err(Error::Topology(String::from("static ring is empty")));
        }
        Ok(self.ranges.clone())
    }
}
