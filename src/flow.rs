use rustc_hash::FxHashMap;

use crate::{port::QIndex, time::Time, units::Bytes, units::Nanosecs, NodeId};

identifier!(FlowId);
identifier!(JobId);

/// A transfer to admit at `start`.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, typed_builder::TypedBuilder)]
pub struct FlowDesc {
    pub src: NodeId,
    pub dst: NodeId,
    #[builder(setter(into))]
    pub size: Bytes,
    #[builder(setter(into))]
    pub start: Nanosecs,
    /// The job (or coflow) this transfer belongs to.
    #[serde(default)]
    #[builder(default)]
    pub job: JobId,
    /// Sub-queue class at round-robin ports.
    #[serde(default)]
    #[builder(default)]
    pub class: QIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, derivative::Derivative)]
#[derivative(Default)]
pub enum FlowStatus {
    #[derivative(Default)]
    Active,
    Completed,
    Abandoned,
}

/// Live state of an admitted transfer.
#[derive(Debug, Clone, typed_builder::TypedBuilder)]
pub struct Flow {
    pub id: FlowId,
    pub src: NodeId,
    pub dst: NodeId,
    pub job: JobId,
    pub class: QIndex,
    pub size: Bytes,
    pub start: Time,
    /// The assigned path in its current orientation. Empty under table-driven routing.
    #[builder(default)]
    pub path: Vec<NodeId>,
    /// Set while `path` runs from `dst` back to `src`.
    #[builder(default)]
    pub reverse_path: bool,
    /// Bytes received in order at the destination.
    #[builder(default)]
    pub delivered: Bytes,
    #[builder(default)]
    pub status: FlowStatus,
}

impl Flow {
    /// Endpoints of the current path orientation.
    pub fn oriented_endpoints(&self) -> (NodeId, NodeId) {
        if self.reverse_path {
            (self.dst, self.src)
        } else {
            (self.src, self.dst)
        }
    }

    pub fn is_done(&self) -> bool {
        self.delivered >= self.size
    }
}

/// Flows indexed by id. Ids are handed out in admission order.
#[derive(Debug, Default)]
pub struct FlowRegistry {
    next_id: FlowId,
    flows: FxHashMap<FlowId, Flow>,
}

impl FlowRegistry {
    pub fn admit(&mut self, desc: &FlowDesc, now: Time) -> FlowId {
        let id = self.next_id;
        self.next_id = id.next();
        let flow = Flow::builder()
            .id(id)
            .src(desc.src)
            .dst(desc.dst)
            .job(desc.job)
            .class(desc.class)
            .size(desc.size)
            .start(now)
            .build();
        self.flows.insert(id, flow);
        id
    }

    pub fn remove(&mut self, id: FlowId) -> Option<Flow> {
        self.flows.remove(&id)
    }

    /// Active flows sorted by id.
    pub fn sorted_ids(&self) -> Vec<FlowId> {
        let mut ids: Vec<_> = self.flows.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn get(&self, id: FlowId) -> Option<&Flow> {
        self.flows.get(&id)
    }

    pub fn get_mut(&mut self, id: FlowId) -> Option<&mut Flow> {
        self.flows.get_mut(&id)
    }

    delegate::delegate! {
        to self.flows {
            pub fn len(&self) -> usize;
            pub fn is_empty(&self) -> bool;
        }
    }
}
