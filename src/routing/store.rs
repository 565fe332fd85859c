use std::{
    hash::{Hash, Hasher},
    path::Path,
};

use rustc_hash::{FxHashMap, FxHasher};

use crate::{
    topology::{failures::FailureState, NodeId, Topology},
    Error, FlowId,
};

use super::path;

/// The routes one device originates, as stored on disk.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DevicePaths {
    pub device: NodeId,
    pub routes: Vec<RouteDesc>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RouteDesc {
    pub dst: NodeId,
    pub path: Vec<NodeId>,
}

/// Precomputed candidate paths per (source, destination) pair.
#[derive(Debug, Clone, Default)]
pub struct PathStore {
    paths: FxHashMap<(NodeId, NodeId), Vec<Vec<NodeId>>>,
}

impl PathStore {
    /// Collapses cycles, checks endpoints and drops duplicate routes.
    pub fn from_descs(descs: Vec<DevicePaths>) -> Result<Self, Error> {
        let mut store = Self::default();
        for desc in descs {
            for route in desc.routes {
                let p = path::dedup_cycles(&route.path);
                if p.len() < 2 || p.first() != Some(&desc.device) || p.last() != Some(&route.dst) {
                    return Err(Error::invalid(format!(
                        "stored path {:?} does not run from {} to {}",
                        route.path, desc.device, route.dst
                    )));
                }
                let entry = store.paths.entry((desc.device, route.dst)).or_default();
                if !entry.contains(&p) {
                    entry.push(p);
                }
            }
        }
        Ok(store)
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self, Error> {
        let s = std::fs::read_to_string(path)?;
        Self::from_descs(serde_json::from_str(&s)?)
    }

    pub fn candidates(&self, src: NodeId, dst: NodeId) -> &[Vec<NodeId>] {
        self.paths.get(&(src, dst)).map_or(&[][..], |v| v.as_slice())
    }

    /// Number of distinct stored paths.
    pub fn len(&self) -> usize {
        self.paths.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Every hop of every stored path must be a link of `topo`.
    pub(crate) fn validate(&self, topo: &Topology) -> Result<(), Error> {
        for p in self.paths.values().flatten() {
            for hop in p.windows(2) {
                if topo.link_between(hop[0], hop[1]).is_none() {
                    return Err(Error::invalid(format!(
                        "stored path {p:?} uses missing link {} -> {}",
                        hop[0], hop[1]
                    )));
                }
            }
        }
        Ok(())
    }

    /// The first candidate live in the direction of travel, starting from a position derived
    /// from the flow's hash. With `reverse` the path is checked and returned `dst` to `src`.
    pub(crate) fn pick(
        &self,
        flow: FlowId,
        src: NodeId,
        dst: NodeId,
        reverse: bool,
        topo: &Topology,
        failures: &FailureState,
    ) -> Option<Vec<NodeId>> {
        let candidates = self.candidates(src, dst);
        if candidates.is_empty() {
            return None;
        }
        let mut hasher = FxHasher::default();
        flow.hash(&mut hasher);
        let start = (hasher.finish() % candidates.len() as u64) as usize;
        (0..candidates.len())
            .map(|i| &candidates[(start + i) % candidates.len()])
            .map(|p| {
                let mut walk = p.clone();
                if reverse {
                    walk.reverse();
                }
                walk
            })
            .find(|walk| failures.path_is_live(topo, walk))
    }
}
