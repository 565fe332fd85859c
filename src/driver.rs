use std::path::Path;

use rustc_hash::FxHashMap;

use crate::{
    data::{Record, Report},
    flow::FlowDesc,
    port::{OutputPort, PortConfig},
    routing::RoutingLayer,
    simulation::Simulation,
    topology::{
        failures::{FailureDesc, FailureKind, FailureState},
        LinkId, Topology, TopologyDesc,
    },
    transport::TransportConfig,
    units::{Bytes, Nanosecs},
    workload::Workload,
    Error, RoutingPolicy,
};

/// Everything one run needs.
#[derive(Debug, typed_builder::TypedBuilder)]
pub struct Config {
    topology: Topology,
    /// Port settings for every link without an override.
    port: PortConfig,
    #[builder(default)]
    port_overrides: FxHashMap<LinkId, PortConfig>,
    #[builder(default)]
    routing: RoutingPolicy,
    #[builder(default)]
    transport: TransportConfig,
    #[builder(default)]
    flows: Vec<FlowDesc>,
    /// Failures and recoveries to inject at absolute times.
    #[builder(default)]
    failures: Vec<FailureDesc>,
    #[builder(default)]
    seed: u64,
    #[builder(default, setter(into, strip_option))]
    horizon: Option<Nanosecs>,
}

/// Validates the configuration and assembles a simulation ready to advance.
pub fn build(cfg: Config) -> Result<Simulation, Error> {
    cfg.transport.validate()?;
    let topo = cfg.topology;
    for desc in &cfg.flows {
        validate_flow(&topo, desc)?;
    }
    for &link in cfg.port_overrides.keys() {
        topo.link(link)?;
    }
    let ports = topo
        .links()
        .iter()
        .map(|link| {
            let port_cfg = cfg.port_overrides.get(&link.id).unwrap_or(&cfg.port).clone();
            OutputPort::new(*link, port_cfg).map(|port| (link.id, port))
        })
        .collect::<Result<FxHashMap<_, _>, _>>()?;
    let routing = RoutingLayer::new(cfg.routing, &topo, &FailureState::default())?;
    let mut sim = Simulation::builder()
        .horizon(cfg.horizon.map(|h| h.into_time()))
        .topology(topo)
        .ports(ports)
        .routing(routing)
        .workload(Workload::new(cfg.flows))
        .transport(cfg.transport)
        .rng(cfg.seed)
        .build();
    for desc in cfg.failures {
        let at = i128::from(desc.at.into_u64());
        match desc.kind {
            FailureKind::FailLink { link } => sim.schedule_link_failure(link, at)?,
            FailureKind::RecoverLink { link } => sim.schedule_link_recovery(link, at)?,
            FailureKind::FailNode { node } => sim.schedule_node_failure(node, at)?,
            FailureKind::RecoverNode { node } => sim.schedule_node_recovery(node, at)?,
        }
    }
    sim.start();
    Ok(sim)
}

/// Builds and runs to completion.
pub fn run(cfg: Config) -> Result<Report, Error> {
    build(cfg)?.run()
}

fn validate_flow(topo: &Topology, desc: &FlowDesc) -> Result<(), Error> {
    topo.node(desc.src)?;
    topo.node(desc.dst)?;
    if desc.src == desc.dst {
        return Err(Error::invalid(format!("flow from {} to itself", desc.src)));
    }
    if desc.size == Bytes::ZERO {
        return Err(Error::invalid(format!(
            "empty flow from {} to {}",
            desc.src, desc.dst
        )));
    }
    // The source needs a NIC
    topo.line_rate(desc.src)?;
    Ok(())
}

pub fn read_flows(path: impl AsRef<Path>) -> Result<Vec<FlowDesc>, Error> {
    let s = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&s)?)
}

/// Reads a topology description and returns the topology with its per-link port overrides.
pub fn read_topology(
    path: impl AsRef<Path>,
) -> Result<(Topology, FxHashMap<LinkId, PortConfig>), Error> {
    let s = std::fs::read_to_string(path)?;
    let desc: TopologyDesc = serde_json::from_str(&s)?;
    desc.build()
}

pub fn read_failures(path: impl AsRef<Path>) -> Result<Vec<FailureDesc>, Error> {
    let s = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&s)?)
}

pub fn read_transport(path: impl AsRef<Path>) -> Result<TransportConfig, Error> {
    let s = std::fs::read_to_string(path)?;
    let cfg: TransportConfig = serde_json::from_str(&s)?;
    cfg.validate()?;
    Ok(cfg)
}

pub fn write_records(path: impl AsRef<Path>, records: &[Record]) -> Result<(), Error> {
    let s = serde_json::to_string_pretty(records)?;
    std::fs::write(path, s)?;
    Ok(())
}
