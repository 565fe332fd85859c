use crate::{FlowId, LinkId, NodeId};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("cannot schedule an event {0} ns in the past")]
    InvalidDelay(i128),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("node {node} already routes to {dest} through {next}")]
    DuplicateEntry {
        node: NodeId,
        dest: NodeId,
        next: NodeId,
    },

    #[error("no viable next hop for flow {flow} at node {node}")]
    RouteUnavailable { flow: FlowId, node: NodeId },

    #[error("external solver failure: {0}")]
    ExternalSolverFailure(String),

    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("unknown link {0}")]
    UnknownLink(LinkId),

    #[error("inconsistent simulation state: {0}")]
    Inconsistent(String),

    #[error("serde error")]
    Serde(#[from] serde_json::Error),

    #[error("IO error")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub(crate) fn solver(msg: impl Into<String>) -> Self {
        Self::ExternalSolverFailure(msg.into())
    }
}
