pub mod path;
pub mod solver;
pub mod store;
pub mod table;

use std::hash::{Hash, Hasher};

use rand::Rng;
use rustc_hash::{FxHashMap, FxHasher};

use crate::{
    flow::Flow,
    packet::Packet,
    time::Time,
    topology::{failures::FailureState, LinkId, NodeId, Topology},
    units::Nanosecs,
    Error, FlowId,
};

use self::{
    solver::{Commodity, PathSolver, SolverRequest},
    store::PathStore,
    table::RoutingTable,
};

/// How devices choose next hops.
#[derive(Debug)]
pub enum RoutingPolicy {
    /// Per-device equal-cost tables over shortest paths.
    TableEcmp { select: EcmpSelect },
    /// Each flow carries an explicit path.
    AssignedPath { source: PathSource },
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        RoutingPolicy::TableEcmp {
            select: EcmpSelect::FlowHash,
        }
    }
}

/// Choice among equal-cost candidates. All packets of a flow take the same hop unless a flowlet
/// gap allows a re-pick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EcmpSelect {
    /// Uniform pick on the first packet, then pinned.
    Random,
    FlowHash,
    /// Re-picks uniformly once the flow has been idle at the device for longer than `gap`.
    Flowlet { gap: Nanosecs },
}

/// Where assigned paths come from.
#[derive(Debug)]
pub enum PathSource {
    ShortestPath,
    Precomputed(PathStore),
    Solver(Box<dyn PathSolver>),
}

/// The resolved action for a packet at a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hop {
    /// The packet has reached its destination.
    Local,
    Forward { next: NodeId, link: LinkId },
}

#[derive(Debug, Clone, Copy)]
struct Pin {
    hop: NodeId,
    last_seen: Time,
}

/// One device's forwarding state.
#[derive(Debug, Clone)]
struct Router {
    table: RoutingTable,
    // (flow, destination) -> chosen next hop
    pins: FxHashMap<(FlowId, NodeId), Pin>,
}

impl Router {
    fn select<R: Rng>(
        &mut self,
        select: EcmpSelect,
        flow: FlowId,
        dest: NodeId,
        now: Time,
        rng: &mut R,
    ) -> Option<NodeId> {
        let candidates = self.table.candidates(dest);
        if candidates.is_empty() {
            return None;
        }
        let node = self.table.node();
        let next = match select {
            EcmpSelect::FlowHash => {
                let mut hasher = FxHasher::default();
                (flow, node, dest).hash(&mut hasher);
                candidates[(hasher.finish() % candidates.len() as u64) as usize]
            }
            EcmpSelect::Random | EcmpSelect::Flowlet { .. } => {
                let pinned = self.pins.get(&(flow, dest)).filter(|pin| {
                    let fresh = match select {
                        EcmpSelect::Flowlet { gap } => {
                            now.saturating_sub(pin.last_seen) <= gap.into_delta()
                        }
                        _ => true,
                    };
                    fresh && candidates.contains(&pin.hop)
                });
                match pinned {
                    Some(pin) => pin.hop,
                    None => candidates[rng.gen_range(0..candidates.len())],
                }
            }
        };
        if select != EcmpSelect::FlowHash {
            self.pins.insert(
                (flow, dest),
                Pin {
                    hop: next,
                    last_seen: now,
                },
            );
        }
        Some(next)
    }
}

/// Next-hop resolution for every device.
#[derive(Debug)]
pub struct RoutingLayer {
    policy: RoutingPolicy,
    routers: Vec<Router>,
    // Failure generation the tables were built against
    generation: u64,
    round: u64,
}

impl RoutingLayer {
    /// Builds the forwarding state against the current failures, so table errors surface before
    /// the run starts.
    pub fn new(
        policy: RoutingPolicy,
        topo: &Topology,
        failures: &FailureState,
    ) -> Result<Self, Error> {
        if let RoutingPolicy::AssignedPath {
            source: PathSource::Precomputed(store),
        } = &policy
        {
            store.validate(topo)?;
        }
        let mut layer = Self {
            policy,
            routers: Vec::new(),
            generation: failures.generation(),
            round: 0,
        };
        if matches!(layer.policy, RoutingPolicy::TableEcmp { .. }) {
            layer.rebuild(topo, failures)?;
        }
        Ok(layer)
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    /// Resolves the next hop for `pkt` at `node`. Under assigned-path routing this may reverse
    /// the flow's path.
    #[allow(clippy::too_many_arguments)]
    pub fn resolve<R: Rng>(
        &mut self,
        node: NodeId,
        pkt: &Packet,
        flow: &mut Flow,
        topo: &Topology,
        failures: &FailureState,
        now: Time,
        rng: &mut R,
    ) -> Result<Hop, Error> {
        if pkt.dst == node {
            return Ok(Hop::Local);
        }
        let unavailable = Error::RouteUnavailable {
            flow: flow.id,
            node,
        };
        let ecmp = match self.policy {
            RoutingPolicy::TableEcmp { select } => Some(select),
            RoutingPolicy::AssignedPath { .. } => None,
        };
        let next = match ecmp {
            Some(select) => {
                if self.generation != failures.generation() {
                    self.rebuild(topo, failures)?;
                }
                let router = self
                    .routers
                    .get_mut(node.into_usize())
                    .ok_or(Error::UnknownNode(node))?;
                router
                    .select(select, flow.id, pkt.dst, now, rng)
                    .ok_or(unavailable)?
            }
            None => match path::next_on_path(flow, node, pkt.is_reverse()) {
                Some(next) => next,
                // Left off the path by a reroute while in flight
                None if !flow.path.contains(&node) => topo
                    .shortest_path(node, pkt.dst, failures)
                    .and_then(|p| p.get(1).copied())
                    .ok_or(unavailable)?,
                None => return Err(unavailable),
            },
        };
        match topo.link_between(node, next) {
            Some(link) if !failures.is_link_failed(link) && !failures.is_node_failed(next) => {
                Ok(Hop::Forward { next, link })
            }
            _ => Err(Error::RouteUnavailable {
                flow: flow.id,
                node,
            }),
        }
    }

    /// Whether `flow` must be given a new path before a packet travelling in direction
    /// `reverse` can be forwarded. The path is checked in the order that packet walks it.
    pub fn needs_path(
        &self,
        flow: &Flow,
        reverse: bool,
        topo: &Topology,
        failures: &FailureState,
    ) -> bool {
        if !matches!(self.policy, RoutingPolicy::AssignedPath { .. }) {
            return false;
        }
        if flow.reverse_path == reverse {
            !failures.path_is_live(topo, &flow.path)
        } else {
            let walk: Vec<_> = flow.path.iter().rev().copied().collect();
            !failures.path_is_live(topo, &walk)
        }
    }

    /// A fresh simple path between the flow's endpoints, live in the direction a packet
    /// travelling in direction `reverse` walks it and returned in that orientation. `None`
    /// if the endpoints are disconnected that way. Solver failures are errors.
    pub fn assign_path(
        &mut self,
        flow: &Flow,
        reverse: bool,
        topo: &Topology,
        failures: &FailureState,
    ) -> Result<Option<Vec<NodeId>>, Error> {
        let RoutingPolicy::AssignedPath { source } = &mut self.policy else {
            return Ok(None);
        };
        let (from, to) = if reverse {
            (flow.dst, flow.src)
        } else {
            (flow.src, flow.dst)
        };
        let found = match source {
            PathSource::ShortestPath => topo.shortest_path(from, to, failures),
            PathSource::Precomputed(store) => {
                store.pick(flow.id, flow.src, flow.dst, reverse, topo, failures)
            }
            PathSource::Solver(solver) => {
                if topo.shortest_path(from, to, failures).is_none() {
                    return Ok(None);
                }
                self.round += 1;
                let commodity = Commodity {
                    flow: flow.id,
                    src: from,
                    dst: to,
                    size: flow.size,
                };
                let req = SolverRequest::new(self.round, topo, failures, vec![commodity]);
                let resp = solver.solve(&req)?;
                let mut paths = resp.validate(&req, topo, failures)?;
                paths.remove(&flow.id)
            }
        };
        Ok(found.map(|p| path::dedup_cycles(&p)))
    }

    /// Drops per-flow pins once a flow leaves the network.
    pub fn forget(&mut self, flow: FlowId) {
        for router in &mut self.routers {
            router.pins.retain(|&(f, _), _| f != flow);
        }
    }

    pub fn table(&self, node: NodeId) -> Option<&RoutingTable> {
        self.routers.get(node.into_usize()).map(|r| &r.table)
    }

    fn rebuild(&mut self, topo: &Topology, failures: &FailureState) -> Result<(), Error> {
        let tables = RoutingTable::build_shortest(topo, failures)?;
        if self.routers.is_empty() {
            self.routers = tables
                .into_iter()
                .map(|table| Router {
                    table,
                    pins: FxHashMap::default(),
                })
                .collect();
        } else {
            // Pins survive; stale ones are re-picked on their next use
            for (router, table) in self.routers.iter_mut().zip(tables) {
                router.table = table;
            }
        }
        self.generation = failures.generation();
        tracing::debug!(generation = self.generation, "routing tables rebuilt");
        Ok(())
    }
}
