use rustc_hash::FxHashSet;

use crate::{
    simulation::{event::EventList, Context},
    units::Nanosecs,
    Error,
};

use super::{LinkId, NodeId, Topology};

/// The live failed-links and failed-nodes sets.
///
/// A failed node always has every incident link in the failed-links set. The generation counter
/// advances on every effective change so that routing state derived from liveness can tell when
/// it is stale.
#[derive(Debug, Clone, Default)]
pub struct FailureState {
    failed_links: FxHashSet<LinkId>,
    failed_nodes: FxHashSet<NodeId>,
    generation: u64,
}

impl FailureState {
    /// Returns `false` if the link was already down.
    pub fn fail_link(&mut self, link: LinkId) -> bool {
        let changed = self.failed_links.insert(link);
        self.bump(changed);
        changed
    }

    /// Brings a link back up. Either endpoint stops counting as a failed node.
    pub fn recover_link(&mut self, topo: &Topology, link: LinkId) -> Result<bool, Error> {
        let l = topo.link(link)?;
        let mut changed = self.failed_links.remove(&link);
        changed |= self.failed_nodes.remove(&l.src);
        changed |= self.failed_nodes.remove(&l.dst);
        self.bump(changed);
        Ok(changed)
    }

    /// Fails every incident link, then the node itself.
    pub fn fail_node(&mut self, topo: &Topology, node: NodeId) -> Result<(), Error> {
        let n = topo.node(node)?;
        let mut changed = false;
        for link in n.incident_links() {
            changed |= self.failed_links.insert(link);
        }
        changed |= self.failed_nodes.insert(node);
        self.bump(changed);
        Ok(())
    }

    /// Recovers every incident link and the node. Recovering a live node changes nothing.
    pub fn recover_node(&mut self, topo: &Topology, node: NodeId) -> Result<(), Error> {
        let n = topo.node(node)?;
        let mut changed = false;
        for link in n.incident_links() {
            changed |= self.failed_links.remove(&link);
        }
        changed |= self.failed_nodes.remove(&node);
        self.bump(changed);
        Ok(())
    }

    pub fn is_link_failed(&self, link: LinkId) -> bool {
        self.failed_links.contains(&link)
    }

    pub fn is_node_failed(&self, node: NodeId) -> bool {
        self.failed_nodes.contains(&node)
    }

    /// Whether every hop of `path` exists and is up.
    pub fn path_is_live(&self, topo: &Topology, path: &[NodeId]) -> bool {
        if path.is_empty() || path.iter().any(|&n| self.is_node_failed(n)) {
            return false;
        }
        path.windows(2).all(|hop| {
            topo.link_between(hop[0], hop[1])
                .is_some_and(|l| !self.is_link_failed(l))
        })
    }

    pub fn failed_links(&self) -> &FxHashSet<LinkId> {
        &self.failed_links
    }

    pub fn failed_nodes(&self) -> &FxHashSet<NodeId> {
        &self.failed_nodes
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn bump(&mut self, changed: bool) {
        if changed {
            self.generation += 1;
        }
    }
}

#[derive(Debug, Clone, Copy, derive_new::new)]
pub(crate) enum TopologyCmd {
    FailLink(LinkId),
    RecoverLink(LinkId),
    FailNode(NodeId),
    RecoverNode(NodeId),
}

impl TopologyCmd {
    pub(crate) fn apply(
        self,
        topo: &Topology,
        failures: &mut FailureState,
        ctx: Context,
    ) -> Result<EventList, Error> {
        match self {
            TopologyCmd::FailLink(link) => {
                topo.link(link)?;
                failures.fail_link(link);
            }
            TopologyCmd::RecoverLink(link) => {
                failures.recover_link(topo, link)?;
            }
            TopologyCmd::FailNode(node) => failures.fail_node(topo, node)?,
            TopologyCmd::RecoverNode(node) => failures.recover_node(topo, node)?,
        }
        tracing::debug!(
            time = %ctx.cur_time,
            cmd = ?self,
            failed_links = failures.failed_links.len(),
            failed_nodes = failures.failed_nodes.len(),
            "topology changed"
        );
        Ok(ctx.into_events())
    }
}

/// A failure or recovery to inject at an absolute time.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct FailureDesc {
    pub at: Nanosecs,
    #[serde(flatten)]
    pub kind: FailureKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    FailLink { link: LinkId },
    RecoverLink { link: LinkId },
    FailNode { node: NodeId },
    RecoverNode { node: NodeId },
}

impl From<FailureKind> for TopologyCmd {
    fn from(kind: FailureKind) -> Self {
        match kind {
            FailureKind::FailLink { link } => TopologyCmd::FailLink(link),
            FailureKind::RecoverLink { link } => TopologyCmd::RecoverLink(link),
            FailureKind::FailNode { node } => TopologyCmd::FailNode(node),
            FailureKind::RecoverNode { node } => TopologyCmd::RecoverNode(node),
        }
    }
}
