use crate::{
    flow::JobId,
    port::PortStats,
    topology::{LinkId, NodeId},
    units::{BitsPerSec, Bytes, Nanosecs},
    FlowId,
};

/// The outcome of one flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Record {
    /// The flow ID.
    pub id: FlowId,
    pub job: JobId,
    pub src: NodeId,
    pub dst: NodeId,
    /// The flow size.
    pub size: Bytes,
    /// Bytes received in order by the destination.
    pub delivered: Bytes,
    /// The start time of the flow.
    pub start: Nanosecs,
    /// When the last byte arrived, or when the flow was abandoned or the run ended.
    pub end: Nanosecs,
    /// The flow completion time, `end - start`.
    pub fct: Nanosecs,
    /// Every byte was delivered.
    pub completed: bool,
}

impl Record {
    /// Average delivery rate over the flow's lifetime.
    pub fn goodput(&self) -> BitsPerSec {
        BitsPerSec::over(self.delivered, self.fct)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PortReport {
    pub link: LinkId,
    #[serde(flatten)]
    pub stats: PortStats,
}

/// Everything a finished run reports.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Report {
    /// One record per admitted flow, sorted by flow ID.
    pub records: Vec<Record>,
    /// Port counters, sorted by link.
    pub ports: Vec<PortReport>,
    /// Simulated time when the run stopped.
    pub end: Nanosecs,
    /// Events executed.
    pub events: u64,
    /// Packets dropped because no live next hop existed.
    pub unroutable: u64,
}

impl Report {
    pub fn completed(&self) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(|r| r.completed)
    }
}
