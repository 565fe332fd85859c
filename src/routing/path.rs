use rustc_hash::FxHashSet;

use crate::{flow::Flow, topology::NodeId};

/// Collapses every cycle in `path`, keeping the first visit of each node.
pub fn dedup_cycles(path: &[NodeId]) -> Vec<NodeId> {
    let mut out: Vec<NodeId> = Vec::with_capacity(path.len());
    for &node in path {
        match out.iter().position(|&n| n == node) {
            // Drop the loop back to the earlier visit
            Some(pos) => out.truncate(pos + 1),
            None => out.push(node),
        }
    }
    out
}

pub fn is_simple(path: &[NodeId]) -> bool {
    let mut seen = FxHashSet::default();
    path.iter().all(|n| seen.insert(*n))
}

/// The entry after `node` along the flow's path for a packet travelling in direction `reverse`.
///
/// A packet moving against the path's current orientation flips the path when it is at the tail,
/// so the flip happens once per direction change.
pub(crate) fn next_on_path(flow: &mut Flow, node: NodeId, reverse: bool) -> Option<NodeId> {
    if flow.reverse_path != reverse && flow.path.last() == Some(&node) {
        flow.path.reverse();
        flow.reverse_path = reverse;
        tracing::trace!(flow = %flow.id, %node, reverse, "path reversed");
    }
    let pos = flow.path.iter().position(|&n| n == node)?;
    if flow.reverse_path == reverse {
        flow.path.get(pos + 1).copied()
    } else {
        pos.checked_sub(1).map(|i| flow.path[i])
    }
}
