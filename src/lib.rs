#[macro_use]
mod ident;

pub mod data;
pub mod driver;
pub mod error;
pub mod flow;
pub mod packet;
pub mod port;
pub mod routing;
pub mod simulation;
pub mod time;
pub mod topology;
pub mod transport;
pub mod units;

pub(crate) mod queue;
pub(crate) mod workload;

pub use data::{Record, Report};
pub use driver::{build, run, Config};
pub use error::Error;
pub use flow::{FlowDesc, FlowId, JobId};
pub use packet::Packet;
pub use port::PortConfig;
pub use routing::{EcmpSelect, PathSource, RoutingPolicy};
pub use simulation::{Advance, Simulation};
pub use topology::{
    failures::{FailureDesc, FailureKind},
    LinkId, NodeId, Topology,
};
pub use transport::{CongestionAlgorithm, TransportConfig};
