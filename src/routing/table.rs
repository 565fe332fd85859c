use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::{
    topology::{failures::FailureState, NodeId, Topology},
    Error,
};

/// Per-device forwarding state: for every destination, the equal-cost next hops.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    node: NodeId,
    nr_nodes: usize,
    neighbors: SmallVec<[NodeId; 8]>,
    entries: FxHashMap<NodeId, SmallVec<[NodeId; 4]>>,
}

impl RoutingTable {
    pub fn new(topo: &Topology, node: NodeId) -> Result<Self, Error> {
        topo.node(node)?;
        Ok(Self {
            node,
            nr_nodes: topo.nr_nodes(),
            neighbors: topo.neighbors(node).collect(),
            entries: FxHashMap::default(),
        })
    }

    /// Adds `next` as a candidate next hop towards `dest`.
    pub fn add_destination_to_next_switch(&mut self, dest: NodeId, next: NodeId) -> Result<(), Error> {
        if dest.into_usize() >= self.nr_nodes {
            return Err(Error::invalid(format!("destination {dest} is not in the topology")));
        }
        if !self.neighbors.contains(&next) {
            return Err(Error::invalid(format!(
                "{next} is not a direct neighbor of {}",
                self.node
            )));
        }
        let hops = self.entries.entry(dest).or_default();
        if hops.contains(&next) {
            return Err(Error::DuplicateEntry {
                node: self.node,
                dest,
                next,
            });
        }
        hops.push(next);
        Ok(())
    }

    /// Next hops towards `dest` in insertion order.
    pub fn candidates(&self, dest: NodeId) -> &[NodeId] {
        self.entries.get(&dest).map_or(&[][..], |hops| hops.as_slice())
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Number of (destination, next hop) entries.
    pub fn len(&self) -> usize {
        self.entries.values().map(|hops| hops.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One table per node holding every live next hop that lies on a shortest path.
    pub(crate) fn build_shortest(
        topo: &Topology,
        failures: &FailureState,
    ) -> Result<Vec<RoutingTable>, Error> {
        let mut tables = topo
            .nodes()
            .iter()
            .map(|n| RoutingTable::new(topo, n.id))
            .collect::<Result<Vec<_>, _>>()?;
        for dest in topo.nodes().iter().map(|n| n.id) {
            let dist = topo.distances_to(dest, failures);
            for node in topo.nodes() {
                let Some(d) = dist[node.id.into_usize()] else {
                    continue;
                };
                if d == 0 {
                    continue;
                }
                for &l in &node.outgoing {
                    if failures.is_link_failed(l) {
                        continue;
                    }
                    let next = topo.link(l)?.dst;
                    if dist[next.into_usize()] == Some(d - 1) {
                        tables[node.id.into_usize()].add_destination_to_next_switch(dest, next)?;
                    }
                }
            }
        }
        Ok(tables)
    }
}
