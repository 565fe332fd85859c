pub mod failures;

use std::collections::VecDeque;

use rand::Rng;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::{
    port::PortConfig,
    time::Time,
    units::{BitsPerSec, Nanosecs},
    Error,
};

use self::failures::FailureState;

identifier!(NodeId);
identifier!(LinkId);

/// A device in the network. Link membership is fixed once the topology is built.
#[derive(Debug, Clone, Default)]
pub struct Node {
    pub id: NodeId,
    pub incoming: SmallVec<[LinkId; 8]>,
    pub outgoing: SmallVec<[LinkId; 8]>,
}

impl Node {
    /// Incoming links first, then outgoing links.
    pub fn incident_links(&self) -> impl Iterator<Item = LinkId> + '_ {
        self.incoming.iter().chain(self.outgoing.iter()).copied()
    }
}

/// A directional link. Liveness is tracked by [`FailureState`], never on the link itself.
#[derive(Debug, Clone, Copy, PartialEq, typed_builder::TypedBuilder)]
pub struct Link {
    pub id: LinkId,
    pub src: NodeId,
    pub dst: NodeId,
    #[builder(setter(into))]
    pub delay: Nanosecs,
    #[builder(setter(into))]
    pub bandwidth: BitsPerSec,
    #[builder(default)]
    pub failure: FailureModel,
}

/// Decides, per transmitted packet, whether the link loses it.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize, derivative::Derivative)]
#[derivative(Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureModel {
    #[derivative(Default)]
    Never,
    /// Each packet is lost independently with probability `p`.
    Bernoulli { p: f64 },
    /// Every packet whose transmission starts in `[from, until)` is lost.
    Window { from: Nanosecs, until: Nanosecs },
}

impl FailureModel {
    pub(crate) fn fails<R: Rng>(&self, now: Time, rng: &mut R) -> bool {
        match *self {
            FailureModel::Never => false,
            FailureModel::Bernoulli { p } => p > 0.0 && rng.gen_bool(p.min(1.0)),
            FailureModel::Window { from, until } => {
                from.into_time() <= now && now < until.into_time()
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Topology {
    nodes: Vec<Node>,
    links: Vec<Link>,
    by_pair: FxHashMap<(NodeId, NodeId), LinkId>,
}

impl Topology {
    pub fn new(nr_nodes: usize) -> Self {
        Self {
            nodes: (0..nr_nodes)
                .map(|i| Node {
                    id: NodeId::new(i),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn add_link(
        &mut self,
        src: NodeId,
        dst: NodeId,
        delay: impl Into<Nanosecs>,
        bandwidth: impl Into<BitsPerSec>,
    ) -> Result<LinkId, Error> {
        self.node(src)?;
        self.node(dst)?;
        if src == dst {
            return Err(Error::invalid(format!("self-loop on node {src}")));
        }
        if self.by_pair.contains_key(&(src, dst)) {
            return Err(Error::invalid(format!("parallel link {src} -> {dst}")));
        }
        let bandwidth = bandwidth.into();
        if bandwidth == BitsPerSec::ZERO {
            return Err(Error::invalid(format!("zero bandwidth on {src} -> {dst}")));
        }
        let id = LinkId::new(self.links.len());
        let link = Link::builder()
            .id(id)
            .src(src)
            .dst(dst)
            .delay(delay)
            .bandwidth(bandwidth)
            .build();
        self.links.push(link);
        self.by_pair.insert((src, dst), id);
        self.nodes[src.into_usize()].outgoing.push(id);
        self.nodes[dst.into_usize()].incoming.push(id);
        Ok(id)
    }

    /// Adds one link per direction with identical attributes.
    pub fn add_duplex_link(
        &mut self,
        a: NodeId,
        b: NodeId,
        delay: impl Into<Nanosecs>,
        bandwidth: impl Into<BitsPerSec>,
    ) -> Result<(LinkId, LinkId), Error> {
        let (delay, bandwidth) = (delay.into(), bandwidth.into());
        let ab = self.add_link(a, b, delay, bandwidth)?;
        let ba = self.add_link(b, a, delay, bandwidth)?;
        Ok((ab, ba))
    }

    pub fn set_failure_model(&mut self, link: LinkId, model: FailureModel) -> Result<(), Error> {
        let link = self
            .links
            .get_mut(link.into_usize())
            .ok_or(Error::UnknownLink(link))?;
        link.failure = model;
        Ok(())
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, Error> {
        self.nodes.get(id.into_usize()).ok_or(Error::UnknownNode(id))
    }

    pub fn link(&self, id: LinkId) -> Result<&Link, Error> {
        self.links.get(id.into_usize()).ok_or(Error::UnknownLink(id))
    }

    pub fn link_between(&self, src: NodeId, dst: NodeId) -> Option<LinkId> {
        self.by_pair.get(&(src, dst)).copied()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn nr_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Direct neighbors reachable over an outgoing link, in link insertion order.
    pub fn neighbors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .get(id.into_usize())
            .into_iter()
            .flat_map(|n| n.outgoing.iter())
            .map(|&l| self.links[l.into_usize()].dst)
    }

    /// The fastest outgoing link of a node, used as its NIC rate.
    pub fn line_rate(&self, id: NodeId) -> Result<BitsPerSec, Error> {
        self.node(id)?
            .outgoing
            .iter()
            .map(|&l| self.links[l.into_usize()].bandwidth)
            .max()
            .ok_or_else(|| Error::invalid(format!("node {id} has no outgoing links")))
    }

    /// Hop distances from every node to `dst` over live links.
    pub fn distances_to(&self, dst: NodeId, failures: &FailureState) -> Vec<Option<usize>> {
        let mut dist = vec![None; self.nodes.len()];
        if dst.into_usize() >= self.nodes.len() || failures.is_node_failed(dst) {
            return dist;
        }
        dist[dst.into_usize()] = Some(0);
        let mut frontier = VecDeque::from([dst]);
        while let Some(cur) = frontier.pop_front() {
            let d = dist[cur.into_usize()].unwrap_or_default();
            for &l in self.nodes[cur.into_usize()].incoming.iter() {
                if failures.is_link_failed(l) {
                    continue;
                }
                let prev = self.links[l.into_usize()].src;
                if dist[prev.into_usize()].is_none() {
                    dist[prev.into_usize()] = Some(d + 1);
                    frontier.push_back(prev);
                }
            }
        }
        dist
    }

    /// Breadth-first shortest path over live links. Ties go to the earlier-inserted link.
    pub fn shortest_path(
        &self,
        src: NodeId,
        dst: NodeId,
        failures: &FailureState,
    ) -> Option<Vec<NodeId>> {
        if src.into_usize() >= self.nodes.len() || dst.into_usize() >= self.nodes.len() {
            return None;
        }
        if failures.is_node_failed(src) || failures.is_node_failed(dst) {
            return None;
        }
        let mut parent: Vec<Option<NodeId>> = vec![None; self.nodes.len()];
        let mut seen = vec![false; self.nodes.len()];
        seen[src.into_usize()] = true;
        let mut frontier = VecDeque::from([src]);
        while let Some(cur) = frontier.pop_front() {
            if cur == dst {
                let mut path = vec![dst];
                let mut at = dst;
                while let Some(p) = parent[at.into_usize()] {
                    path.push(p);
                    at = p;
                }
                path.reverse();
                return Some(path);
            }
            for &l in self.nodes[cur.into_usize()].outgoing.iter() {
                if failures.is_link_failed(l) {
                    continue;
                }
                let next = self.links[l.into_usize()].dst;
                if !seen[next.into_usize()] {
                    seen[next.into_usize()] = true;
                    parent[next.into_usize()] = Some(cur);
                    frontier.push_back(next);
                }
            }
        }
        None
    }
}

/// On-disk topology description.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TopologyDesc {
    pub nr_nodes: usize,
    pub links: Vec<LinkDesc>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LinkDesc {
    pub src: NodeId,
    pub dst: NodeId,
    pub delay: Nanosecs,
    pub bandwidth: BitsPerSec,
    /// Adds the reverse direction as well.
    #[serde(default)]
    pub duplex: bool,
    #[serde(default)]
    pub failure: FailureModel,
    /// Overrides the default port configuration for this link (both directions when duplex).
    #[serde(default)]
    pub port: Option<PortConfig>,
}

impl TopologyDesc {
    /// Builds the topology and collects the per-link port overrides.
    pub fn build(&self) -> Result<(Topology, FxHashMap<LinkId, PortConfig>), Error> {
        let mut topo = Topology::new(self.nr_nodes);
        let mut overrides = FxHashMap::default();
        for desc in &self.links {
            let mut ids = SmallVec::<[LinkId; 2]>::new();
            ids.push(topo.add_link(desc.src, desc.dst, desc.delay, desc.bandwidth)?);
            if desc.duplex {
                ids.push(topo.add_link(desc.dst, desc.src, desc.delay, desc.bandwidth)?);
            }
            for id in ids {
                topo.set_failure_model(id, desc.failure)?;
                if let Some(port) = &desc.port {
                    overrides.insert(id, port.clone());
                }
            }
        }
        Ok((topo, overrides))
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::units::Gbps;

    fn diamond() -> Topology {
        // 0 -> {1, 2} -> 3
        let mut topo = Topology::new(4);
        for (a, b) in [(0, 1), (0, 2), (1, 3), (2, 3)] {
            topo.add_duplex_link(NodeId::new(a), NodeId::new(b), Nanosecs::new(5), Gbps::new(10))
                .unwrap();
        }
        topo
    }

    #[test]
    fn add_link_rejects_bad_input() {
        let mut topo = Topology::new(2);
        let (a, b) = (NodeId::new(0), NodeId::new(1));
        assert!(matches!(
            topo.add_link(a, a, Nanosecs::new(1), Gbps::new(1)),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            topo.add_link(a, NodeId::new(9), Nanosecs::new(1), Gbps::new(1)),
            Err(Error::UnknownNode(_))
        ));
        assert!(matches!(
            topo.add_link(a, b, Nanosecs::new(1), BitsPerSec::ZERO),
            Err(Error::InvalidArgument(_))
        ));
        topo.add_link(a, b, Nanosecs::new(1), Gbps::new(1)).unwrap();
        assert!(topo.add_link(a, b, Nanosecs::new(1), Gbps::new(1)).is_err());
    }

    #[test]
    fn shortest_path_prefers_first_link() {
        let topo = diamond();
        let path = topo
            .shortest_path(NodeId::new(0), NodeId::new(3), &FailureState::default())
            .unwrap();
        assert_eq!(path, vec![NodeId::new(0), NodeId::new(1), NodeId::new(3)]);
    }

    #[test]
    fn shortest_path_avoids_failed_links() {
        let topo = diamond();
        let mut failures = FailureState::default();
        failures.fail_link(topo.link_between(NodeId::new(0), NodeId::new(1)).unwrap());
        let path = topo
            .shortest_path(NodeId::new(0), NodeId::new(3), &failures)
            .unwrap();
        assert_eq!(path, vec![NodeId::new(0), NodeId::new(2), NodeId::new(3)]);
        failures.fail_link(topo.link_between(NodeId::new(0), NodeId::new(2)).unwrap());
        assert!(topo
            .shortest_path(NodeId::new(0), NodeId::new(3), &failures)
            .is_none());
    }

    #[test]
    fn distances_follow_live_links() {
        let topo = diamond();
        let dist = topo.distances_to(NodeId::new(3), &FailureState::default());
        assert_eq!(dist, vec![Some(2), Some(1), Some(1), Some(0)]);
    }

    #[test]
    fn window_failure_is_deterministic() {
        let mut rng = StdRng::seed_from_u64(0);
        let model = FailureModel::Window {
            from: Nanosecs::new(10),
            until: Nanosecs::new(20),
        };
        assert!(!model.fails(Time::new(9), &mut rng));
        assert!(model.fails(Time::new(10), &mut rng));
        assert!(!model.fails(Time::new(20), &mut rng));
        assert!(!FailureModel::Never.fails(Time::ZERO, &mut rng));
        assert!(FailureModel::Bernoulli { p: 1.0 }.fails(Time::ZERO, &mut rng));
    }

    #[test]
    fn desc_builds_duplex_links() -> anyhow::Result<()> {
        let desc: TopologyDesc = serde_json::from_str(
            r#"{
                "nr_nodes": 2,
                "links": [
                    {"src": 0, "dst": 1, "delay": 5, "bandwidth": 10000000000, "duplex": true,
                     "port": {"max_queue": 1000, "ecn_threshold": 500}}
                ]
            }"#,
        )?;
        let (topo, overrides) = desc.build()?;
        assert_eq!(topo.links().len(), 2);
        assert_eq!(overrides.len(), 2);
        assert!(topo.link_between(NodeId::new(1), NodeId::new(0)).is_some());
        Ok(())
    }
}
